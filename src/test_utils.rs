use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, LlmProvider, Role, ToolCall, Usage};
use crate::session::{Session, SessionMessage};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MODEL: &str = "anthropic/claude-sonnet-4-5";

// ===================
// Mock LLM Provider
// ===================

pub struct MockProvider {
    responses: RwLock<Vec<ChatOutcome>>,
    requests: RwLock<Vec<ChatRequest>>,
    call_count: AtomicUsize,
    fail: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: RwLock::new(responses),
            requests: RwLock::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Answers every call with `summary`.
    pub fn summary(summary: &str) -> Self {
        Self::new(vec![Self::text_response(summary)])
    }

    /// Every call returns an error, as a dropped connection would.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn text_response(text: &str) -> ChatOutcome {
        ChatOutcome::Success(ChatResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            model: "mock-model".to_string(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
                ..Usage::default()
            },
        })
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.read().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().expect("lock poisoned").push(request);
        if self.fail {
            bail!("connection reset by peer");
        }
        let responses = self.responses.read().expect("lock poisoned");
        match responses.get(idx).or_else(|| responses.last()) {
            Some(outcome) => Ok(outcome.clone()),
            None => Ok(Self::text_response("Done")),
        }
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

// Make ChatOutcome clonable for tests
impl Clone for ChatOutcome {
    fn clone(&self) -> Self {
        match self {
            Self::Success(r) => Self::Success(r.clone()),
            Self::RateLimited => Self::RateLimited,
            Self::InvalidRequest(s) => Self::InvalidRequest(s.clone()),
            Self::ServerError(s) => Self::ServerError(s.clone()),
        }
    }
}

// ===================
// Session builders
// ===================

/// Timestamp `minutes` after a fixed base instant.
pub fn stamp(minutes: usize) -> String {
    format!("2026-02-09T{:02}:{:02}:00", 8 + minutes / 60, minutes % 60)
}

/// Session of `count` alternating user/assistant messages, each `chars` long
/// and stamped one minute apart.
pub fn chat_session(key: &str, count: usize, chars: usize) -> Session {
    let mut session = Session::new(key);
    for i in 0..count {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let content = format!("{i:04} {}", "w".repeat(chars.saturating_sub(5)));
        session.push(SessionMessage::new(role, content).with_timestamp(Some(stamp(i))));
    }
    session
}

/// Append an assistant tool call followed by its result.
pub fn push_tool_exchange(session: &mut Session, id: &str, output: String) {
    let minute = session.messages.len();
    let call = ToolCall::new(id, "exec", &json!({"command": "cat build.log"}));
    session.push(
        SessionMessage::assistant_tool_calls("", vec![call]).with_timestamp(Some(stamp(minute))),
    );
    session.push(
        SessionMessage::tool_result(id, "exec", output).with_timestamp(Some(stamp(minute + 1))),
    );
}
