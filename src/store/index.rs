//! Metadata index maintenance — pure functions over the stored entry list.
//!
//! Invariants after every mutation: unique by id, sorted by timestamp
//! descending, at most `max_entries` long.

use chrono::Utc;
use serde_json::Value;

use crate::model::{IndexEntry, Platform, UNTITLED};

/// Well-known key of the index in the sync store.
pub const INDEX_KEY: &str = "conversationIndex";

/// Coerce whatever is stored under `INDEX_KEY` into valid entries.
///
/// Non-array values become an empty index. Elements that are not objects or
/// lack an id are dropped, duplicate ids keep their first occurrence, and
/// missing fields receive defaults.
pub fn sanitize(raw: Option<Value>) -> Vec<IndexEntry> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };

    let mut entries: Vec<IndexEntry> = Vec::with_capacity(items.len());
    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(id) = obj.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            continue;
        };
        if entries.iter().any(|e| e.id == id) {
            continue;
        }

        let platform = obj
            .get("platform")
            .and_then(Value::as_str)
            .and_then(|p| p.parse::<Platform>().ok())
            .unwrap_or_default();
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED);
        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let url = obj.get("url").and_then(Value::as_str).unwrap_or_default();

        entries.push(IndexEntry {
            id: id.to_string(),
            platform,
            title: title.to_string(),
            timestamp,
            url: url.to_string(),
        });
    }

    sort(&mut entries);
    entries
}

/// Insert or replace the entry for `entry.id`, then sort and trim.
pub fn upsert(mut entries: Vec<IndexEntry>, entry: IndexEntry, max_entries: usize) -> Vec<IndexEntry> {
    match entries.iter_mut().find(|e| e.id == entry.id) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
    sort(&mut entries);
    entries.truncate(max_entries);
    entries
}

/// Drop the entry for `id`.
pub fn remove(mut entries: Vec<IndexEntry>, id: &str) -> Vec<IndexEntry> {
    entries.retain(|e| e.id != id);
    entries
}

/// Build an index from scratch.
pub fn rebuild(entries: impl IntoIterator<Item = IndexEntry>, max_entries: usize) -> Vec<IndexEntry> {
    let mut entries: Vec<IndexEntry> = entries.into_iter().collect();
    sort(&mut entries);
    entries.dedup_by(|a, b| a.id == b.id);
    entries.truncate(max_entries);
    entries
}

/// Drop the oldest entries until the serialized index, stored under `key`,
/// takes at most `limit` bytes. Expects `entries` already sorted.
pub fn fit_to_quota(mut entries: Vec<IndexEntry>, key: &str, limit: usize) -> Vec<IndexEntry> {
    while !entries.is_empty() && key.len() + serialized_len(&entries) > limit {
        entries.pop();
    }
    entries
}

fn serialized_len(entries: &[IndexEntry]) -> usize {
    serde_json::to_string(entries).map(|s| s.len()).unwrap_or(usize::MAX)
}

/// Timestamp descending; stable so equal timestamps keep insertion order.
fn sort(entries: &mut [IndexEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, timestamp: i64) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            platform: Platform::Deepseek,
            title: id.to_string(),
            timestamp,
            url: String::new(),
        }
    }

    fn ids(entries: &[IndexEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn upsert_replaces_and_resorts() {
        let index = vec![entry("a", 3), entry("b", 2), entry("c", 1)];
        let index = upsert(index, entry("c", 10), 100);
        assert_eq!(ids(&index), vec!["c", "a", "b"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn upsert_trims_oldest() {
        let mut index = Vec::new();
        for i in 0..5 {
            index = upsert(index, entry(&format!("id{i}"), i), 3);
        }
        assert_eq!(ids(&index), vec!["id4", "id3", "id2"]);
    }

    #[test]
    fn sanitize_drops_invalid_and_duplicates() {
        let raw = json!([
            {"id": "a", "platform": "doubao", "title": "A", "timestamp": 5, "url": "u"},
            "garbage",
            {"title": "no id"},
            {"id": "a", "timestamp": 99},
            {"id": "b", "timestamp": 7}
        ]);
        let index = sanitize(Some(raw));
        assert_eq!(ids(&index), vec!["b", "a"]);
        assert_eq!(index[1].platform, Platform::Doubao);
        assert_eq!(index[0].platform, Platform::Unknown);
        assert_eq!(index[0].title, UNTITLED);
        assert_eq!(index[0].url, "");
    }

    #[test]
    fn sanitize_non_array_is_empty() {
        assert!(sanitize(Some(json!({"id": "a"}))).is_empty());
        assert!(sanitize(None).is_empty());
    }

    #[test]
    fn rebuild_sorts_and_caps() {
        let index = rebuild(vec![entry("a", 1), entry("b", 3), entry("c", 2)], 2);
        assert_eq!(ids(&index), vec!["b", "c"]);
    }

    #[test]
    fn fit_to_quota_drops_oldest_until_it_fits() {
        let index: Vec<IndexEntry> = (0..10).rev().map(|i| entry(&format!("id{i}"), i)).collect();
        let limit = INDEX_KEY.len() + serialized_len(&index[..4]);

        let fitted = fit_to_quota(index.clone(), INDEX_KEY, limit);
        assert_eq!(ids(&fitted), vec!["id9", "id8", "id7", "id6"]);
        assert_eq!(fit_to_quota(index.clone(), INDEX_KEY, usize::MAX), index);
        assert!(fit_to_quota(index, INDEX_KEY, 0).is_empty());
    }

    #[test]
    fn remove_entry() {
        let index = remove(vec![entry("a", 1), entry("b", 2)], "a");
        assert_eq!(ids(&index), vec!["b"]);
    }
}
