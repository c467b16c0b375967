//! Rebuilding the outbound base list from replayed history.

use crate::llm::Message;

/// Turns replayed session history into the base message list for a call.
///
/// The compactor calls this after splicing a summary into the session, so the
/// rebuilt list starts at the new marker. Implementations typically prepend a
/// system prompt assembled from workspace files, memory and skills.
pub trait ContextAssembler: Send + Sync {
    fn build_messages(&self, history: Vec<Message>, session_key: &str) -> Vec<Message>;
}

/// Prepends a fixed system prompt to the history.
#[derive(Clone, Debug, Default)]
pub struct SystemPromptAssembler {
    system_prompt: String,
}

impl SystemPromptAssembler {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

impl ContextAssembler for SystemPromptAssembler {
    fn build_messages(&self, history: Vec<Message>, _session_key: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(history);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_prepends_system_prompt() {
        let assembler = SystemPromptAssembler::new("You are a helpful assistant.");
        let messages = assembler.build_messages(
            vec![Message::user("hi"), Message::assistant("hello")],
            "cli:1",
        );

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role(), Role::System);
        assert_eq!(
            messages[0].content().as_text(),
            Some("You are a helpful assistant.")
        );
        assert_eq!(messages[2].content().as_text(), Some("hello"));
    }

    #[test]
    fn test_empty_history() {
        let assembler = SystemPromptAssembler::default();
        assert_eq!(assembler.build_messages(Vec::new(), "cli:1").len(), 1);
    }
}
