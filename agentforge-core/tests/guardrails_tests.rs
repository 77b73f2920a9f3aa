// Guardrail state machine tests - turn accounting, ceilings and history
// trimming, driven through a spy model that records every call.

use agentforge_core::guardrails::{
    EscalationContext, EscalationPolicy, MAX_TURNS_NOTICE, SESSION_ENDED_NOTICE, SessionState,
    TurnError, TurnProcessor, TurnRequest,
};
use agentforge_core::model::{ChatModel, ChatOptions, ModelError};
use agentforge_core::session::{GuardrailLimits, SessionStatus};
use agentforge_core::types::{ChatMessage, MessageRole};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct RecordedCall {
    system_prompt: String,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
}

#[derive(Default)]
struct SpyModel {
    calls: Mutex<Vec<RecordedCall>>,
    fail: bool,
}

impl SpyModel {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_call(&self) -> RecordedCall {
        self.calls.lock().unwrap().last().cloned().expect("model was called")
    }
}

#[async_trait]
impl ChatModel for SpyModel {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
        });
        if self.fail {
            return Err(ModelError::unavailable("spy", "scripted failure"));
        }
        Ok(format!("reply to {}", messages.len()))
    }
}

#[derive(Default)]
struct RecordingEscalation {
    seen: Mutex<Vec<(u32, u32)>>,
}

impl EscalationPolicy for RecordingEscalation {
    fn escalate(&self, context: &EscalationContext<'_>) {
        self.seen
            .lock()
            .unwrap()
            .push((context.failed_attempts, context.threshold));
    }
}

fn request<'a>(
    limits: &'a GuardrailLimits,
    status: SessionStatus,
    turn_count: u32,
    history: &'a [ChatMessage],
) -> TurnRequest<'a> {
    TurnRequest {
        system_prompt: "You are a support agent.",
        limits,
        status,
        turn_count,
        failed_attempts: 0,
        history,
        message: "hello",
    }
}

#[tokio::test]
async fn processed_turn_increments_turn_count_by_one() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default();

    let outcome = processor
        .process_turn(request(&limits, SessionStatus::Active, 3, &[]))
        .await
        .expect("turn");

    assert!(outcome.processed);
    assert_eq!(outcome.updates.turn_count, 4);
    assert_eq!(outcome.updates.status, SessionStatus::Active);
    assert_eq!(outcome.response.role, MessageRole::Assistant);
    assert!(outcome.notice.is_none());
    assert_eq!(model.call_count(), 1);
    assert_eq!(model.last_call().system_prompt, "You are a support agent.");
}

#[tokio::test]
async fn ended_session_never_calls_the_model() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default();

    let outcome = processor
        .process_turn(request(&limits, SessionStatus::Ended, 7, &[]))
        .await
        .expect("turn");

    assert!(!outcome.processed);
    assert_eq!(outcome.notice.as_deref(), Some(SESSION_ENDED_NOTICE));
    assert_eq!(outcome.updates.turn_count, 7);
    assert_eq!(outcome.updates.status, SessionStatus::Ended);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn turn_at_ceiling_is_rejected_without_model_call() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default();

    let outcome = processor
        .process_turn(request(&limits, SessionStatus::Active, 50, &[]))
        .await
        .expect("turn");

    assert!(!outcome.processed);
    assert_eq!(outcome.notice.as_deref(), Some(MAX_TURNS_NOTICE));
    assert_eq!(outcome.updates.turn_count, 50);
    assert_eq!(outcome.updates.status, SessionStatus::Ended);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn final_turn_is_processed_and_ends_session() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default();

    let outcome = processor
        .process_turn(request(&limits, SessionStatus::Active, 49, &[]))
        .await
        .expect("turn");

    assert!(outcome.processed);
    assert_eq!(outcome.updates.turn_count, 50);
    assert_eq!(outcome.updates.status, SessionStatus::Ended);
    assert_eq!(outcome.notice.as_deref(), Some("Reached maximum 50 turns"));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn history_is_trimmed_to_forty_plus_new_message() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default();
    let history: Vec<ChatMessage> = (0..50)
        .map(|index| {
            if index % 2 == 0 {
                ChatMessage::user(format!("question {index}"))
            } else {
                ChatMessage::assistant(format!("answer {index}"))
            }
        })
        .collect();

    processor
        .process_turn(request(&limits, SessionStatus::Active, 0, &history))
        .await
        .expect("turn");

    let call = model.last_call();
    assert_eq!(call.messages.len(), 41);
    assert_eq!(call.messages[0].content, "question 10");
    assert_eq!(call.messages[39].content, "answer 49");
    assert_eq!(call.messages[40], ChatMessage::user("hello"));
}

#[tokio::test]
async fn max_response_length_is_forwarded_as_max_tokens() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default().with_max_response_length(256);

    processor
        .process_turn(request(&limits, SessionStatus::Active, 0, &[]))
        .await
        .expect("turn");
    assert_eq!(model.last_call().max_tokens, Some(256));

    let unlimited = GuardrailLimits::default();
    processor
        .process_turn(request(&unlimited, SessionStatus::Active, 0, &[]))
        .await
        .expect("turn");
    assert_eq!(model.last_call().max_tokens, None);
}

#[tokio::test]
async fn model_failure_is_a_hard_error() {
    let processor = TurnProcessor::new(Arc::new(SpyModel::failing()));
    let limits = GuardrailLimits::default();

    let result = processor
        .process_turn(request(&limits, SessionStatus::Active, 0, &[]))
        .await;
    assert!(matches!(result, Err(TurnError::Model(_))));
}

#[tokio::test]
async fn disabled_processor_still_rejects_but_cannot_process() {
    let processor = TurnProcessor::disabled();
    assert!(!processor.is_enabled());
    let limits = GuardrailLimits::default();

    let rejected = processor
        .process_turn(request(&limits, SessionStatus::Ended, 2, &[]))
        .await
        .expect("rejection is not an error");
    assert!(!rejected.processed);

    let result = processor
        .process_turn(request(&limits, SessionStatus::Active, 2, &[]))
        .await;
    assert!(matches!(result, Err(TurnError::ModelDisabled)));
}

#[tokio::test]
async fn escalation_fires_once_threshold_is_reached() {
    let model = Arc::new(SpyModel::default());
    let escalation = Arc::new(RecordingEscalation::default());
    let processor = TurnProcessor::new(model).with_escalation(escalation.clone());
    let limits = GuardrailLimits::default().with_escalation_threshold(2);

    let mut below = request(&limits, SessionStatus::Active, 0, &[]);
    below.failed_attempts = 1;
    processor.process_turn(below).await.expect("turn");
    assert!(escalation.seen.lock().unwrap().is_empty());

    let mut at = request(&limits, SessionStatus::Active, 1, &[]);
    at.failed_attempts = 2;
    let outcome = processor.process_turn(at).await.expect("turn");
    assert_eq!(escalation.seen.lock().unwrap().as_slice(), [(2, 2)]);
    assert_eq!(outcome.updates.failed_attempts, 2);
}

#[tokio::test]
async fn session_state_runs_until_ceiling_then_stays_ended() {
    let model = Arc::new(SpyModel::default());
    let processor = TurnProcessor::new(model.clone());
    let limits = GuardrailLimits::default().with_max_turns(3);
    let mut session = SessionState::new();

    for _ in 0..3 {
        let outcome = session
            .take_turn(&processor, "prompt", &limits, "next")
            .await
            .expect("turn");
        assert!(outcome.processed);
    }
    assert_eq!(session.turn_count(), 3);
    assert_eq!(session.status(), SessionStatus::Ended);
    assert_eq!(session.history().len(), 6);

    let outcome = session
        .take_turn(&processor, "prompt", &limits, "one more")
        .await
        .expect("turn");
    assert!(!outcome.processed);
    assert_eq!(outcome.notice.as_deref(), Some(SESSION_ENDED_NOTICE));
    assert_eq!(session.turn_count(), 3);
    assert_eq!(session.history().len(), 6);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn failure_counter_is_owned_by_the_caller() {
    let processor = TurnProcessor::new(Arc::new(SpyModel::default()));
    let limits = GuardrailLimits::default();
    let mut session = SessionState::new();

    session.record_failure();
    session.record_failure();
    session
        .take_turn(&processor, "prompt", &limits, "hi")
        .await
        .expect("turn");
    assert_eq!(session.failed_attempts(), 2);

    session.reset_failures();
    assert_eq!(session.failed_attempts(), 0);
}
