use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exchanges kept in memory per session
pub const HISTORY_CAPACITY: usize = 5;

/// One chat message as sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A completed prompt/response exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
    /// The envelope the reply was parsed into, if any
    pub parsed: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ChatTurn>,
    capacity: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            turns: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an exchange, evicting the oldest once over capacity
    pub fn push(&mut self, user: &str, assistant: &str, parsed: Option<Value>) {
        self.turns.push(ChatTurn {
            user: user.to_string(),
            assistant: assistant.to_string(),
            timestamp: Utc::now(),
            parsed,
        });

        if self.turns.len() > self.capacity {
            self.turns = self.turns.split_off(self.turns.len() - self.capacity);
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last_turns(&self, n: usize) -> &[ChatTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The last `n` exchanges as alternating user/assistant messages,
    /// oldest first.
    pub fn replay(&self, n: usize) -> Vec<ChatMessage> {
        self.last_turns(n)
            .iter()
            .flat_map(|turn| [ChatMessage::user(&turn.user), ChatMessage::assistant(&turn.assistant)])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_history(count: usize) -> ConversationHistory {
        let mut history = ConversationHistory::new();
        for i in 0..count {
            history.push(&format!("prompt {}", i), &format!("reply {}", i), None);
        }
        history
    }

    #[test]
    fn test_capped_at_five() {
        let history = create_test_history(8);

        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.turns()[0].user, "prompt 3");
        assert_eq!(history.turns()[4].user, "prompt 7");
    }

    #[test]
    fn test_replay_last_two_exchanges() {
        let history = create_test_history(4);
        let messages = history.replay(2);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::user("prompt 2"));
        assert_eq!(messages[1], ChatMessage::assistant("reply 2"));
        assert_eq!(messages[3].content, "reply 3");
    }

    #[test]
    fn test_replay_short_history() {
        let history = create_test_history(1);
        assert_eq!(history.replay(2).len(), 2);
        assert!(ConversationHistory::new().replay(2).is_empty());
    }

    #[test]
    fn test_keeps_parsed_envelope() {
        let mut history = ConversationHistory::with_capacity(3);
        history.push("a box", "{...}", Some(json!({"commands": []})));

        assert_eq!(history.last_turns(1)[0].parsed, Some(json!({"commands": []})));
        history.clear();
        assert!(history.is_empty());
    }
}
