//! Persisted conversation session as consumed by the budgeting core.
//!
//! The session store owns persistence; this module only defines the shape
//! and the history-replay rule. Session messages are append-only apart from
//! the one splice a compaction performs (inserting a summary marker ahead of
//! the preserved tail).

use crate::llm::{Content, Message, Role, ToolCall};
use crate::timestamp;
use crate::types::{ContextMode, FlushSeverity};
use serde::{Deserialize, Serialize};

/// Value of `metadata.type` on a compaction marker.
pub const COMPACTION_KIND: &str = "compaction";

/// Prefix of every compaction marker's content.
pub const SUMMARY_PREFIX: &str = "[Conversation Summary]\n";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Append a message stamped with the current time.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(SessionMessage::new(role, content));
    }

    pub fn push(&mut self, message: SessionMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub const fn cache(&self) -> &CacheState {
        &self.metadata.cache
    }

    pub const fn cache_mut(&mut self) -> &mut CacheState {
        &mut self.metadata.cache
    }

    /// Index of the most recent compaction marker.
    #[must_use]
    pub fn last_compaction_index(&self) -> Option<usize> {
        self.messages.iter().rposition(SessionMessage::is_compaction)
    }

    #[must_use]
    pub fn compaction_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_compaction()).count()
    }

    /// Messages recorded after the last compaction marker (all of them when
    /// there is none).
    #[must_use]
    pub fn messages_since_compaction(&self) -> usize {
        self.last_compaction_index()
            .map_or(self.messages.len(), |idx| self.messages.len() - (idx + 1))
    }

    /// History to replay to the model.
    ///
    /// Replay starts at the last compaction marker (inclusive); anything
    /// before it stays on disk but is never sent again. Without a marker,
    /// replay starts at the first user message so it never opens on an
    /// orphaned assistant or tool message. There is no sliding window.
    #[must_use]
    pub fn get_history(&self) -> Vec<Message> {
        let start = match self.last_compaction_index() {
            Some(idx) => idx,
            None => match self.messages.iter().position(|m| m.role == Role::User) {
                Some(idx) => idx,
                None => return Vec::new(),
            },
        };

        self.messages[start..]
            .iter()
            .map(SessionMessage::to_message)
            .collect()
    }
}

/// A persisted message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl SessionMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            metadata: MessageMetadata {
                timestamp: Some(timestamp::now()),
                ..MessageMetadata::default()
            },
        }
    }

    #[must_use]
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Synthetic user-role message carrying a conversation summary.
    #[must_use]
    pub fn compaction(summary: &str, mode: ContextMode, stamp: String) -> Self {
        Self {
            metadata: MessageMetadata {
                timestamp: Some(stamp),
                kind: Some(COMPACTION_KIND.to_string()),
                mode: Some(mode),
                compacted_at: Some(timestamp::now()),
                ..MessageMetadata::default()
            },
            ..Self::new(Role::User, format!("{SUMMARY_PREFIX}{summary}"))
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, stamp: Option<String>) -> Self {
        self.metadata.timestamp = stamp;
        self
    }

    #[must_use]
    pub fn is_compaction(&self) -> bool {
        self.metadata.kind.as_deref() == Some(COMPACTION_KIND)
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.metadata.timestamp.as_deref()
    }

    /// Replayable message with `_ts` taken from the stored timestamp.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let message = self.to_llm_message();
        match self.timestamp() {
            Some(stamp) => message.with_ts(stamp),
            None => message,
        }
    }

    /// Flat role/content/tool_calls/tool_call_id/name shape without `_ts`.
    #[must_use]
    pub fn to_llm_message(&self) -> Message {
        let content = Content::Text(self.content.clone());
        match self.role {
            Role::System => Message::System { content, ts: None },
            Role::User => Message::User { content, ts: None },
            Role::Assistant => Message::Assistant {
                content,
                tool_calls: self.tool_calls.clone(),
                ts: None,
            },
            Role::Tool => Message::Tool {
                tool_call_id: self.tool_call_id.clone().unwrap_or_default(),
                name: self.name.clone().unwrap_or_default(),
                content,
                ts: None,
            },
        }
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ContextMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub cache: CacheState,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Prompt-cache bookkeeping for a session.
///
/// `created_at` is written only when a provider reports cache creation or a
/// cache read. The flush fields describe the last trim applied to an
/// outbound message list; session messages themselves are never trimmed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_type: Option<FlushSeverity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain(role: Role, content: &str) -> SessionMessage {
        SessionMessage::new(role, content).with_timestamp(None)
    }

    fn marker(content: &str) -> SessionMessage {
        SessionMessage {
            metadata: MessageMetadata {
                kind: Some(COMPACTION_KIND.to_string()),
                ..MessageMetadata::default()
            },
            ..plain(Role::User, content)
        }
    }

    #[test]
    fn test_history_starts_from_last_compaction() {
        let mut session = Session::new("test");
        session.push(plain(Role::User, "old msg"));
        session.push(plain(Role::Assistant, "old reply"));
        session.push(marker("Summary"));
        session.push(plain(Role::User, "new msg"));
        session.push(plain(Role::Assistant, "new reply"));

        let history = session.get_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content().as_text(), Some("Summary"));
    }

    #[test]
    fn test_history_uses_last_of_several_markers() {
        let mut session = Session::new("test");
        session.push(marker("Summary1"));
        session.push(plain(Role::User, "mid msg"));
        session.push(marker("Summary2"));
        session.push(plain(Role::User, "final msg"));

        let history = session.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content().as_text(), Some("Summary2"));
        assert_eq!(session.compaction_count(), 2);
        assert_eq!(session.messages_since_compaction(), 1);
    }

    #[test]
    fn test_history_without_marker_starts_at_first_user() {
        let mut session = Session::new("test");
        session.push(plain(Role::Tool, "orphan"));
        session.push(plain(Role::Assistant, "orphan reply"));
        session.push(plain(Role::User, "msg1"));
        session.push(plain(Role::Assistant, "reply1"));

        let history = session.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), Role::User);
    }

    #[test]
    fn test_history_has_no_sliding_window() {
        let mut session = Session::new("test");
        for i in 0..250 {
            session.push(plain(Role::User, &format!("msg {i}")));
        }
        assert_eq!(session.get_history().len(), 250);
    }

    #[test]
    fn test_history_without_user_message_is_empty() {
        let mut session = Session::new("test");
        session.push(plain(Role::Assistant, "hello?"));
        assert!(session.get_history().is_empty());
    }

    #[test]
    fn test_history_carries_ts() {
        let mut session = Session::new("test");
        session.push(
            plain(Role::User, "hello").with_timestamp(Some("2026-02-09T10:00:00".into())),
        );
        session.push(
            plain(Role::Assistant, "hi").with_timestamp(Some("2026-02-09T10:01:00".into())),
        );
        session.push(SessionMessage::tool_result("1", "exec", "result").with_timestamp(None));

        let history = session.get_history();
        assert_eq!(history[0].ts(), Some("2026-02-09T10:00:00"));
        assert_eq!(history[1].ts(), Some("2026-02-09T10:01:00"));
        assert_eq!(history[2].ts(), None);
    }

    #[test]
    fn test_session_deserializes_persisted_shape() {
        let session: Session = serde_json::from_value(json!({
            "key": "telegram_1",
            "messages": [
                {"role": "user", "content": "hi", "metadata": {"timestamp": "2026-02-09T10:00:00"}},
                {"role": "assistant", "content": null,
                 "tool_calls": [{"id": "tc1", "type": "function",
                                 "function": {"name": "exec", "arguments": "{}"}}],
                 "metadata": {}},
                {"role": "user", "content": "[Conversation Summary]\nS",
                 "metadata": {"type": "compaction", "mode": "eco", "reply_to": 5}}
            ],
            "metadata": {
                "cache": {"created_at": "2026-02-09T10:00:00", "last_flush_type": "hard"},
                "channel": "telegram"
            }
        }))
        .unwrap();

        assert_eq!(session.last_compaction_index(), Some(2));
        assert_eq!(session.messages[1].content, "");
        assert_eq!(session.messages[2].metadata.mode, Some(ContextMode::Eco));
        assert_eq!(session.messages[2].metadata.extra["reply_to"], json!(5));
        assert_eq!(session.cache().last_flush_type, Some(FlushSeverity::Hard));
        assert_eq!(session.metadata.extra["channel"], json!("telegram"));
    }
}
