pub mod guardrails;
pub mod tooling;
