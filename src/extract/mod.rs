//! DOM extraction — turns a page snapshot into a `Conversation`.

pub mod platforms;
pub mod role;
pub mod strategy;
pub mod text;

use scraper::{Html, Selector};
use tracing::debug;

use crate::error::ExtractionError;
use crate::identity::Identity;
use crate::model::{Conversation, Message, Platform, UNTITLED};

pub use strategy::{ContainerStrategy, MessageStrategy, SplitRoleStrategy};

/// Parse a CSS selector, mapping parse failures to `ExtractionError`.
pub fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Per-platform extractor holding the title cascade and message strategies.
pub struct Extractor {
    platform: Platform,
    titles: Vec<Selector>,
    strategies: Vec<Box<dyn MessageStrategy>>,
    watch_roots: Vec<String>,
}

impl Extractor {
    /// Build the extractor for a platform's known layouts.
    pub fn for_platform(platform: Platform) -> Result<Self, ExtractionError> {
        let profile = platforms::profile(platform)?;
        Ok(Self {
            platform,
            titles: profile.titles,
            strategies: profile.strategies,
            watch_roots: profile.watch_roots,
        })
    }

    /// Build an extractor from explicit parts.
    pub fn new(
        platform: Platform,
        titles: Vec<Selector>,
        strategies: Vec<Box<dyn MessageStrategy>>,
    ) -> Self {
        Self {
            platform,
            titles,
            strategies,
            watch_roots: vec!["body".to_string()],
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Ordered watch-root candidates for the change observer.
    pub fn watch_roots(&self) -> &[String] {
        &self.watch_roots
    }

    /// Build a full conversation from an HTML snapshot.
    pub fn extract(
        &self,
        html: &str,
        identity: &Identity,
        url: &str,
        timestamp: i64,
    ) -> Result<Conversation, ExtractionError> {
        let document = Html::parse_document(html);
        let messages = self.extract_messages(&document)?;
        let title = self
            .extract_title(&document)
            .unwrap_or_else(|| placeholder_title(identity));

        Ok(Conversation {
            id: identity.conversation_id.clone(),
            platform: identity.platform,
            title,
            url: url.to_string(),
            timestamp,
            messages,
        })
    }

    /// First title candidate with non-empty trimmed text.
    pub fn extract_title(&self, document: &Html) -> Option<String> {
        self.titles.iter().find_map(|sel| {
            let el = document.select(sel).next()?;
            let title = text::collapse_whitespace(&el.text().collect::<String>());
            (!title.is_empty()).then_some(title)
        })
    }

    /// Run the strategy cascade. The first strategy whose containers exist
    /// decides the result.
    pub fn extract_messages(&self, document: &Html) -> Result<Vec<Message>, ExtractionError> {
        for strategy in &self.strategies {
            let Some(messages) = strategy.attempt(document) else {
                continue;
            };

            debug!(
                platform = %self.platform,
                strategy = strategy.name(),
                count = messages.len(),
                "Extraction strategy matched"
            );

            if messages.is_empty() {
                return Err(ExtractionError::NoContent);
            }
            return Ok(messages);
        }

        Err(ExtractionError::NoContent)
    }
}

/// Title used when no candidate produced text.
pub fn placeholder_title(identity: &Identity) -> String {
    let short = identity.short_id();
    if short.is_empty() {
        UNTITLED.to_string()
    } else {
        format!("{} conversation {}", identity.platform.label(), short)
    }
}
