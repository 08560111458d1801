//! Selector tables for the supported chat sites.

use scraper::Selector;

use super::role::RoleClassifier;
use super::strategy::{ContainerStrategy, MessageStrategy, SplitRoleStrategy};
use super::text::TextExtractor;
use super::selector;
use crate::error::ExtractionError;
use crate::model::Platform;

const DEEPSEEK_TITLES: &[&str] = &[
    ".chat-title",
    "h1.title",
    ".conversation-header h1",
    ".header-title",
    "h1",
    "title",
];

const DEEPSEEK_CONTAINERS: &[&str] = &[
    ".message-container",
    ".chat-message",
    ".message-item",
    ".conversation-message",
    ".message",
];

const DEEPSEEK_CONTENT: &[&str] = &[".message-content", ".content", ".text", ".message-text"];

const DEEPSEEK_WATCH_ROOTS: &[&str] = &[
    ".chat-container",
    ".conversation-container",
    ".messages-container",
    ".conversation-messages",
    "[class*=\"chat\"]",
    "[class*=\"message\"]",
    "main",
    "#__next",
    "body",
];

const DOUBAO_TITLES: &[&str] = &[
    ".conversation-title",
    ".chat-title",
    ".session-title",
    "h1.title",
    ".header-title",
    "h1",
    "title",
];

const DOUBAO_USER_CONTAINER: &str = "[class*=\"container-EC68Od\"][class*=\"container-jPfT9u\"]";
const DOUBAO_ASSISTANT_CONTAINER: &str =
    "[class*=\"container-ZYIsnH\"][class*=\"flow-markdown-body\"]";
const DOUBAO_USER_CONTENT: &[&str] = &[
    ".message-content",
    "[class*=\"message-content\"]",
    "[class*=\"message-box-content\"]",
];

const DOUBAO_CONTAINERS: &[&str] = &[
    ".message-box-xy4dB8s",
    "[class*=\"message-box\"]",
    ".message-item",
    ".chat-message",
    ".message-container",
];

const DOUBAO_CONTENT: &[&str] = &[
    ".message-content",
    "[class*=\"message-content\"]",
    ".content",
    ".text",
    ".message-text",
    ".markdown-body",
];

const DOUBAO_WATCH_ROOTS: &[&str] = &[
    ".chat-container",
    "[class*=\"container-EC68Od\"]",
    "[class*=\"container-ZYIsnH\"]",
    "[class*=\"message-box\"]",
    "[class*=\"chat\"]",
    "[class*=\"message\"]",
    "[class*=\"conversation\"]",
    "main",
    "#app",
    "body",
];

/// Selector tables for one platform.
pub struct PlatformProfile {
    pub titles: Vec<Selector>,
    pub strategies: Vec<Box<dyn MessageStrategy>>,
    /// Ordered candidates for the element the change observer watches.
    pub watch_roots: Vec<String>,
}

/// Build the profile for a platform. Unknown pages use the DeepSeek layout,
/// which is the most generic.
pub fn profile(platform: Platform) -> Result<PlatformProfile, ExtractionError> {
    match platform {
        Platform::Doubao => doubao(),
        Platform::Deepseek | Platform::Unknown => deepseek(),
    }
}

fn deepseek() -> Result<PlatformProfile, ExtractionError> {
    let roles = RoleClassifier {
        class_tokens: vec!["user-message", "user", "human"],
        class_substrings: Vec::new(),
        data_attributes: vec![("data-role", "user"), ("data-sender", "user")],
        descendant: Some(selector(".user-avatar, .user-indicator, .human-avatar")?),
    };
    let text = TextExtractor::new(selectors(DEEPSEEK_CONTENT)?);

    let strategies = DEEPSEEK_CONTAINERS
        .iter()
        .map(|css| -> Result<Box<dyn MessageStrategy>, ExtractionError> {
            Ok(Box::new(ContainerStrategy::new(
                format!("deepseek {css}"),
                selector(css)?,
                roles.clone(),
                text.clone(),
            )))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PlatformProfile {
        titles: selectors(DEEPSEEK_TITLES)?,
        strategies,
        watch_roots: to_strings(DEEPSEEK_WATCH_ROOTS),
    })
}

fn doubao() -> Result<PlatformProfile, ExtractionError> {
    let mut strategies: Vec<Box<dyn MessageStrategy>> = vec![Box::new(SplitRoleStrategy::new(
        "doubao split containers",
        selector(DOUBAO_USER_CONTAINER)?,
        selector(DOUBAO_ASSISTANT_CONTAINER)?,
        TextExtractor::new(selectors(DOUBAO_USER_CONTENT)?),
        TextExtractor::formatted(),
    ))];

    let roles = RoleClassifier {
        class_tokens: vec!["user-message", "user", "human", "question"],
        class_substrings: vec!["reverse"],
        data_attributes: vec![
            ("data-role", "user"),
            ("data-sender", "user"),
            ("data-type", "question"),
        ],
        descendant: Some(selector(
            ".user-avatar, .user-indicator, .human-avatar, .question-indicator",
        )?),
    };
    let text = TextExtractor::new(selectors(DOUBAO_CONTENT)?);

    for css in DOUBAO_CONTAINERS {
        strategies.push(Box::new(ContainerStrategy::new(
            format!("doubao {css}"),
            selector(css)?,
            roles.clone(),
            text.clone(),
        )));
    }

    Ok(PlatformProfile {
        titles: selectors(DOUBAO_TITLES)?,
        strategies,
        watch_roots: to_strings(DOUBAO_WATCH_ROOTS),
    })
}

fn selectors(list: &[&str]) -> Result<Vec<Selector>, ExtractionError> {
    list.iter().map(|css| selector(css)).collect()
}

fn to_strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_profiles_build() {
        for platform in [Platform::Deepseek, Platform::Doubao, Platform::Unknown] {
            let profile = profile(platform).unwrap();
            assert!(!profile.titles.is_empty());
            assert!(!profile.strategies.is_empty());
            assert_eq!(profile.watch_roots.last().map(String::as_str), Some("body"));
        }
    }

    #[test]
    fn doubao_tries_split_containers_first() {
        let profile = profile(Platform::Doubao).unwrap();
        assert_eq!(profile.strategies[0].name(), "doubao split containers");
    }
}
