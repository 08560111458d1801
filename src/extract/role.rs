//! Role classification of message elements.

use scraper::{ElementRef, Selector};

use crate::model::Role;

/// Markers identifying a user turn. Elements matching none of them are
/// assistant turns.
#[derive(Debug, Clone, Default)]
pub struct RoleClassifier {
    /// Exact class tokens (`user`, `human`, ...).
    pub class_tokens: Vec<&'static str>,
    /// Substrings searched in the full class attribute (`reverse`, ...).
    pub class_substrings: Vec<&'static str>,
    /// `(attribute, value)` pairs such as `("data-role", "user")`.
    pub data_attributes: Vec<(&'static str, &'static str)>,
    /// Descendant marking the turn as a user turn, e.g. an avatar.
    pub descendant: Option<Selector>,
}

impl RoleClassifier {
    pub fn classify(&self, element: ElementRef<'_>) -> Role {
        if self.matches_class(element)
            || self.matches_data_attribute(element)
            || self.matches_descendant(element)
        {
            Role::User
        } else {
            Role::Assistant
        }
    }

    fn matches_class(&self, element: ElementRef<'_>) -> bool {
        let el = element.value();
        if el
            .classes()
            .any(|c| self.class_tokens.iter().any(|token| *token == c))
        {
            return true;
        }
        let class_attr = el.attr("class").unwrap_or_default();
        self.class_substrings.iter().any(|s| class_attr.contains(s))
    }

    fn matches_data_attribute(&self, element: ElementRef<'_>) -> bool {
        self.data_attributes
            .iter()
            .any(|(name, value)| element.value().attr(name) == Some(*value))
    }

    fn matches_descendant(&self, element: ElementRef<'_>) -> bool {
        self.descendant
            .as_ref()
            .is_some_and(|sel| element.select(sel).next().is_some())
    }
}
