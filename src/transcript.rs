//! Markdown transcript rendering and export naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity;
use crate::model::{Conversation, Role, UNTITLED};

const USER_HEADING: &str = "**User**";
const ASSISTANT_HEADING: &str = "**Assistant**";
const NO_LINK: &str = "(no link)";

/// One rendered conversation ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTranscript {
    pub id: String,
    pub title: String,
    pub file_name: String,
    pub transcript: String,
}

impl ExportedTranscript {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            file_name: export_file_name(conversation),
            transcript: render(conversation),
        }
    }
}

/// Render a conversation as Markdown.
pub fn render(conversation: &Conversation) -> String {
    let title = if conversation.title.trim().is_empty() {
        UNTITLED
    } else {
        conversation.title.as_str()
    };
    let link = if conversation.url.is_empty() {
        NO_LINK
    } else {
        conversation.url.as_str()
    };

    let mut out = format!("# {title}\n\n");
    out.push_str(&format!("- Platform: {}\n", conversation.platform.label()));
    out.push_str(&format!("- Time: {}\n", format_time(conversation.timestamp)));
    out.push_str(&format!("- Link: {link}\n\n"));
    out.push_str("---\n\n");

    for message in &conversation.messages {
        let heading = match message.role {
            Role::User => USER_HEADING,
            Role::Assistant => ASSISTANT_HEADING,
        };
        out.push_str(&format!("## {heading}\n\n{}\n\n", message.content));
    }
    out
}

/// `<sanitized title>_<first 8 chars of the id after its platform prefix>.md`
pub fn export_file_name(conversation: &Conversation) -> String {
    let title = if conversation.title.trim().is_empty() {
        UNTITLED
    } else {
        conversation.title.as_str()
    };
    let safe: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    let short: String = identity::short_id(&conversation.id).chars().take(8).collect();
    format!("{safe}_{short}.md")
}

fn format_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Platform};

    fn sample() -> Conversation {
        Conversation {
            id: "deepseek_0a8a933f".into(),
            platform: Platform::Deepseek,
            title: "Async: what/why?".into(),
            url: "https://chat.deepseek.com/a/chat/s/0a8a933f".into(),
            timestamp: 1_700_000_000_000,
            messages: vec![
                Message::user("What is a future?"),
                Message::assistant("A value that is not ready yet."),
            ],
        }
    }

    #[test]
    fn render_contains_title_bodies_and_roles() {
        let md = render(&sample());
        assert!(md.starts_with("# Async: what/why?\n\n"));
        assert!(md.contains("- Platform: DeepSeek\n"));
        assert!(md.contains("- Time: 2023-11-14 22:13:20 UTC\n"));
        assert!(md.contains("- Link: https://chat.deepseek.com/a/chat/s/0a8a933f\n\n---\n\n"));

        let user = md.find("## **User**\n\nWhat is a future?").unwrap();
        let assistant = md.find("## **Assistant**\n\nA value that is not ready yet.").unwrap();
        assert!(user < assistant);
    }

    #[test]
    fn render_without_link_or_title() {
        let mut conv = sample();
        conv.url.clear();
        conv.title.clear();
        let md = render(&conv);
        assert!(md.starts_with("# Untitled conversation"));
        assert!(md.contains("- Link: (no link)"));
    }

    #[test]
    fn file_name_replaces_reserved_characters() {
        assert_eq!(export_file_name(&sample()), "Async_ what_why__0a8a933f.md");
    }

    #[test]
    fn file_names_differ_for_same_title() {
        let a = sample();
        let mut b = sample();
        b.id = "deepseek_5c1e7d20-aaaa-4bbb-8ccc-000000000000".into();
        assert_ne!(export_file_name(&a), export_file_name(&b));
    }

    #[test]
    fn exported_transcript_bundles_name_and_body() {
        let export = ExportedTranscript::from_conversation(&sample());
        assert_eq!(export.id, "deepseek_0a8a933f");
        assert!(export.transcript.contains("What is a future?"));
        let json = serde_json::to_value(&export).unwrap();
        assert!(json.get("fileName").is_some());
    }
}
