//! Conversation history types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

/// One turn of prior conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: None,
        }
    }

    /// `"User: hello"` form used in prompts.
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_renders_with_role_label() {
        assert_eq!(Turn::user("hi").render(), "User: hi");
        assert_eq!(Turn::assistant("hello").render(), "Assistant: hello");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::user("x")).unwrap();
        assert!(json.contains("\"user\""));
    }
}
