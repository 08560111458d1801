//! Conversation data model — captured transcripts and their index projection.

use serde::{Deserialize, Serialize};

/// Chat site a conversation was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// chat.deepseek.com
    Deepseek,
    /// www.doubao.com
    Doubao,
    /// Anything else.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Platform {
    /// Human-facing label used in titles and transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Deepseek => "DeepSeek",
            Self::Doubao => "Doubao",
            Self::Unknown => "Unknown",
        }
    }

    /// Tag prefixed to conversation ids.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Doubao => "doubao",
            Self::Unknown => "chat",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deepseek => write!(f, "deepseek"),
            Self::Doubao => write!(f, "doubao"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deepseek" => Ok(Self::Deepseek),
            "doubao" => Ok(Self::Doubao),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// Speaker of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Normalized text: paragraphs separated by a single blank line.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A captured transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Deterministic id derived from platform + URL.
    pub id: String,
    pub platform: Platform,
    pub title: String,
    /// Source page; used to reopen the original conversation.
    pub url: String,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
    /// Turns in conversation order.
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Project to the lightweight index entry.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            id: self.id.clone(),
            platform: self.platform,
            title: self.title.clone(),
            timestamp: self.timestamp,
            url: self.url.clone(),
        }
    }
}

/// Metadata index entry kept in the capacity-limited store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub timestamp: i64,
    pub url: String,
}

/// Placeholder title for conversations without one.
pub const UNTITLED: &str = "Untitled conversation";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_serde_roundtrip_and_unknown_fallback() {
        let json = serde_json::to_string(&Platform::Doubao).unwrap();
        assert_eq!(json, "\"doubao\"");
        let parsed: Platform = serde_json::from_str("\"claude\"").unwrap();
        assert_eq!(parsed, Platform::Unknown);
    }

    #[test]
    fn index_entry_projection() {
        let conv = Conversation {
            id: "deepseek_abc".into(),
            platform: Platform::Deepseek,
            title: "Rust lifetimes".into(),
            url: "https://chat.deepseek.com/a/chat/s/abc".into(),
            timestamp: 42,
            messages: vec![Message::user("hi")],
        };
        let entry = conv.index_entry();
        assert_eq!(entry.id, "deepseek_abc");
        assert_eq!(entry.platform, Platform::Deepseek);
        assert_eq!(entry.timestamp, 42);
    }
}
