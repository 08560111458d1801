//! Identity resolution — maps a page address to `(platform, conversation_id)`.
//!
//! Always produces an id: known platforms try their path matchers in order,
//! anything else falls back to a truncated SHA-256 of the full address.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::model::Platform;

/// Length of the hex digest suffix used for fallback ids.
const FALLBACK_HASH_LEN: usize = 16;

/// Path words that name a page type rather than a conversation.
const ROUTE_SEGMENTS: &[&str] = &["chat", "thread", "new"];

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})(?:/|$)",
    )
    .expect("valid regex")
});

static CHAT_SESSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)chat/s/([^/]+)").expect("valid regex"));

static NUMERIC_CHAT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)chat/(\d+)(?:/|$)").expect("valid regex"));

/// Resolved identity of the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub platform: Platform,
    pub conversation_id: String,
}

impl Identity {
    /// The id without its platform prefix, used for placeholder titles.
    pub fn short_id(&self) -> &str {
        short_id(&self.conversation_id)
    }
}

/// Strip the `<platform>_` prefix from a conversation id.
pub fn short_id(conversation_id: &str) -> &str {
    conversation_id
        .split_once('_')
        .map(|(_, rest)| rest)
        .unwrap_or(conversation_id)
}

/// A single path-pattern matcher.
type PathMatcher = fn(&str) -> Option<String>;

/// Detect the platform from a host name.
pub fn detect_platform(host: &str) -> Platform {
    if host.contains("deepseek.com") {
        Platform::Deepseek
    } else if host.contains("doubao.com") {
        Platform::Doubao
    } else {
        Platform::Unknown
    }
}

/// Resolve platform and conversation id from a page address.
pub fn resolve(address: &str) -> Identity {
    let platform = Url::parse(address)
        .ok()
        .and_then(|u| u.host_str().map(detect_platform))
        .unwrap_or_default();
    resolve_with_platform(address, platform)
}

/// Resolve the conversation id for an address whose platform is already known.
pub fn resolve_with_platform(address: &str, platform: Platform) -> Identity {
    let path = Url::parse(address)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    let matched = matchers(platform)
        .iter()
        .find_map(|matcher| matcher(&path));

    let conversation_id = match matched {
        Some(segment) => format!("{}_{}", platform.tag(), segment),
        None => fallback_id(address),
    };

    Identity {
        platform,
        conversation_id,
    }
}

fn matchers(platform: Platform) -> &'static [PathMatcher] {
    match platform {
        Platform::Deepseek => &[uuid_segment, chat_session_segment],
        Platform::Doubao => &[numeric_chat_segment, last_path_segment],
        Platform::Unknown => &[],
    }
}

fn uuid_segment(path: &str) -> Option<String> {
    UUID_SEGMENT.captures(path).map(|c| c[1].to_string())
}

fn chat_session_segment(path: &str) -> Option<String> {
    CHAT_SESSION_SEGMENT.captures(path).map(|c| c[1].to_string())
}

fn numeric_chat_segment(path: &str) -> Option<String> {
    NUMERIC_CHAT_SEGMENT.captures(path).map(|c| c[1].to_string())
}

fn last_path_segment(path: &str) -> Option<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .filter(|s| !ROUTE_SEGMENTS.iter().any(|route| route.eq_ignore_ascii_case(s)))
        .map(str::to_string)
}

/// `chat_` + truncated hex SHA-256 of the whole address.
fn fallback_id(address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}_{}", Platform::Unknown.tag(), &hex[..FALLBACK_HASH_LEN])
}
