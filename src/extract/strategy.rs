//! Message extraction strategies.
//!
//! A platform's extractor holds an ordered list of strategies. The first one
//! whose containers are present in the document is used exclusively; later
//! strategies are never merged in.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};

use super::role::RoleClassifier;
use super::text::TextExtractor;
use crate::model::{Message, Role};

/// A single "try this layout" heuristic.
pub trait MessageStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Extract messages in turn order.
    ///
    /// Returns `None` when none of the strategy's containers exist in the
    /// document, so the next strategy should be tried. `Some(vec![])` means
    /// the containers matched but all of them were empty.
    fn attempt(&self, document: &Html) -> Option<Vec<Message>>;
}

/// One container selector whose matches may hold either role.
pub struct ContainerStrategy {
    name: String,
    container: Selector,
    roles: RoleClassifier,
    text: TextExtractor,
}

impl ContainerStrategy {
    pub fn new(
        name: impl Into<String>,
        container: Selector,
        roles: RoleClassifier,
        text: TextExtractor,
    ) -> Self {
        Self {
            name: name.into(),
            container,
            roles,
            text,
        }
    }
}

impl MessageStrategy for ContainerStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn attempt(&self, document: &Html) -> Option<Vec<Message>> {
        let elements = outermost(document.select(&self.container).collect());
        if elements.is_empty() {
            return None;
        }

        Some(
            elements
                .into_iter()
                .filter_map(|el| {
                    let content = self.text.extract(el)?;
                    Some(Message::new(self.roles.classify(el), content))
                })
                .collect(),
        )
    }
}

/// Separate container sets for user and assistant turns.
///
/// Each set is extracted with its role fixed, then both are merged by
/// document position since same-role containers are not interleaved in the
/// DOM the way the turns happened.
pub struct SplitRoleStrategy {
    name: String,
    user: Selector,
    assistant: Selector,
    user_text: TextExtractor,
    assistant_text: TextExtractor,
}

impl SplitRoleStrategy {
    pub fn new(
        name: impl Into<String>,
        user: Selector,
        assistant: Selector,
        user_text: TextExtractor,
        assistant_text: TextExtractor,
    ) -> Self {
        Self {
            name: name.into(),
            user,
            assistant,
            user_text,
            assistant_text,
        }
    }

    fn collect(
        document: &Html,
        selector: &Selector,
        role: Role,
        text: &TextExtractor,
        out: &mut Vec<(usize, Message)>,
    ) -> usize {
        let mut matched = 0;
        for el in outermost(document.select(selector).collect()) {
            matched += 1;
            if let Some(content) = text.extract(el) {
                out.push((document_position(el), Message::new(role, content)));
            }
        }
        matched
    }
}

impl MessageStrategy for SplitRoleStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn attempt(&self, document: &Html) -> Option<Vec<Message>> {
        let mut positioned = Vec::new();
        let users = Self::collect(document, &self.user, Role::User, &self.user_text, &mut positioned);
        let assistants = Self::collect(
            document,
            &self.assistant,
            Role::Assistant,
            &self.assistant_text,
            &mut positioned,
        );

        if users == 0 && assistants == 0 {
            return None;
        }

        tracing::debug!(users, assistants, "Split-role containers matched");

        // Stable sort keeps user-before-assistant for identical positions.
        positioned.sort_by_key(|(position, _)| *position);
        Some(positioned.into_iter().map(|(_, msg)| msg).collect())
    }
}

/// Drop matches nested inside another match of the same selector.
///
/// Class-fragment selectors such as `[class*="message-box"]` also hit a
/// container's own content wrapper; only the outer element is a turn.
pub fn outermost(elements: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let matched: HashSet<_> = elements.iter().map(|el| el.id()).collect();
    elements
        .into_iter()
        .filter(|el| !el.ancestors().any(|a| matched.contains(&a.id())))
        .collect()
}

/// Pre-order position of an element in its document.
///
/// Counts every node that precedes the element: the full subtrees of its
/// previous siblings and of each ancestor's previous siblings, plus the
/// ancestors themselves. Strictly increasing in document order.
pub fn document_position(element: ElementRef<'_>) -> usize {
    let mut position = 0;
    let mut current = Some(*element);

    while let Some(node) = current {
        for sibling in node.prev_siblings() {
            position += sibling.descendants().count();
        }
        current = node.parent();
        if current.is_some() {
            position += 1;
        }
    }

    position
}
