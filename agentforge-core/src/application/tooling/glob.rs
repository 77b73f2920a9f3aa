/// Wildcard match where `*` stands for any substring, including the empty one.
/// Every other character matches literally.
pub fn matches_glob(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return true,
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return pattern == value,
    };

    let Some(mut remaining) = value.strip_prefix(first) else {
        return false;
    };
    for segment in middle.iter().filter(|segment| !segment.is_empty()) {
        match remaining.find(segment) {
            Some(index) => remaining = &remaining[index + segment.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
