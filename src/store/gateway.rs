//! Persistence gateway — keeps the content store and the metadata index in step.
//!
//! Writes go content first, index second. There is no transaction across the
//! two stores: an index failure after a content write leaves an orphaned
//! record that `get` still finds but listings do not, until the next save or
//! `rebuild_index`. The index update is an unlocked read-modify-write, so two
//! concurrent saves for different ids can lose one index update.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{Conversation, IndexEntry, Platform};
use crate::store::index::{self, INDEX_KEY};
use crate::store::traits::{ContentStore, KeyValueStore};

/// Whether `save` created or replaced the content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

/// Result of a delete that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Both the content record and the index entry are gone.
    Complete,
    /// Only one of the two stores was updated.
    Partial {
        content_removed: bool,
        error: StoreError,
    },
}

/// Sole writer of the content store and the index key.
#[derive(Clone)]
pub struct PersistenceGateway {
    content: Arc<dyn ContentStore>,
    index: Arc<dyn KeyValueStore>,
    max_entries: usize,
    /// Byte limit of the index value; oldest entries give way to stay under it.
    item_quota: Option<usize>,
}

impl PersistenceGateway {
    pub fn new(
        content: Arc<dyn ContentStore>,
        index: Arc<dyn KeyValueStore>,
        max_entries: usize,
    ) -> Self {
        Self {
            content,
            index,
            max_entries,
            item_quota: None,
        }
    }

    /// Keep the serialized index within the index store's per-item quota.
    pub fn with_item_quota(mut self, limit: usize) -> Self {
        self.item_quota = Some(limit);
        self
    }

    /// Insert or overwrite the conversation, then upsert its index entry.
    pub async fn save(&self, conversation: &Conversation) -> Result<SaveOutcome, StoreError> {
        validate(conversation)?;

        let outcome = if self.content.get(&conversation.id).await?.is_some() {
            self.content.put(conversation).await?;
            SaveOutcome::Updated
        } else {
            match self.content.insert(conversation).await {
                Ok(()) => SaveOutcome::Inserted,
                // Another save for the same id got there first; last write wins.
                Err(StoreError::Constraint(_)) => {
                    self.content.put(conversation).await?;
                    SaveOutcome::Updated
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = self.upsert_index(conversation.index_entry()).await {
            warn!(
                conversation_id = %conversation.id,
                error = %e,
                "Index update failed after content write; record is orphaned until the next save"
            );
            return Err(e);
        }

        debug!(
            conversation_id = %conversation.id,
            platform = %conversation.platform,
            messages = conversation.messages.len(),
            ?outcome,
            "Conversation saved"
        );
        Ok(outcome)
    }

    /// Full conversation by id.
    pub async fn get(&self, id: &str) -> Result<Conversation, StoreError> {
        self.content
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// The metadata index, sanitized.
    pub async fn get_index(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let raw = self.index.get(INDEX_KEY).await?;
        Ok(index::sanitize(raw))
    }

    /// Every stored conversation, most recent first.
    pub async fn get_all(&self) -> Result<Vec<Conversation>, StoreError> {
        self.content.all().await
    }

    /// Full records of one platform, read from the content store.
    pub async fn get_by_platform(&self, platform: Platform) -> Result<Vec<Conversation>, StoreError> {
        self.content.by_platform(platform).await
    }

    /// Remove the content record, then the index entry.
    ///
    /// Fails only when neither store could be updated.
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome, StoreError> {
        let content = self.content.delete(id).await;
        let index = match self.get_index().await {
            Ok(entries) => self.write_index(&index::remove(entries, id)).await,
            Err(e) => Err(e),
        };

        match (content, index) {
            (Ok(()), Ok(())) => {
                debug!(conversation_id = %id, "Conversation deleted");
                Ok(DeleteOutcome::Complete)
            }
            (Ok(()), Err(e)) => {
                warn!(conversation_id = %id, error = %e, "Partial delete: index entry kept");
                Ok(DeleteOutcome::Partial {
                    content_removed: true,
                    error: e,
                })
            }
            (Err(e), Ok(())) => {
                warn!(conversation_id = %id, error = %e, "Partial delete: content record kept");
                Ok(DeleteOutcome::Partial {
                    content_removed: false,
                    error: e,
                })
            }
            (Err(content_err), Err(index_err)) => {
                warn!(
                    conversation_id = %id,
                    index_error = %index_err,
                    "Delete failed in both stores"
                );
                Err(content_err)
            }
        }
    }

    /// Replace the index with one derived from the content store.
    pub async fn rebuild_index(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let conversations = self.content.all().await?;
        let total = conversations.len();
        let entries = self.fit(index::rebuild(
            conversations.iter().map(Conversation::index_entry),
            self.max_entries,
        ));
        self.write_index(&entries).await?;

        info!(records = total, indexed = entries.len(), "Index rebuilt");
        Ok(entries)
    }

    async fn upsert_index(&self, entry: IndexEntry) -> Result<(), StoreError> {
        let entries = self.get_index().await?;
        let entries = self.fit(index::upsert(entries, entry, self.max_entries));
        self.write_index(&entries).await
    }

    fn fit(&self, entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
        let Some(limit) = self.item_quota else {
            return entries;
        };
        let before = entries.len();
        let entries = index::fit_to_quota(entries, INDEX_KEY, limit);
        if entries.len() < before {
            debug!(
                dropped = before - entries.len(),
                kept = entries.len(),
                limit,
                "Index trimmed to fit its quota"
            );
        }
        entries
    }

    async fn write_index(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let value: Value = serde_json::to_value(entries)?;
        self.index.set(INDEX_KEY, &value).await
    }
}

fn validate(conversation: &Conversation) -> Result<(), StoreError> {
    if conversation.id.trim().is_empty() {
        return Err(StoreError::Invalid("missing id".to_string()));
    }
    if conversation.messages.is_empty() {
        return Err(StoreError::Invalid(format!(
            "conversation {} has no messages",
            conversation.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;

    fn conv(id: &str, timestamp: i64) -> Conversation {
        Conversation {
            id: id.to_string(),
            platform: Platform::Deepseek,
            title: format!("title {id}"),
            url: format!("https://chat.deepseek.com/a/chat/s/{id}"),
            timestamp,
            messages: vec![Message::user("hi"), Message::assistant("hello")],
        }
    }

    async fn gateway(max_entries: usize) -> (PersistenceGateway, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sync = Arc::new(db.namespace("sync"));
        (PersistenceGateway::new(db.clone(), sync, max_entries), db)
    }

    /// Key-value store whose writes always fail.
    struct BrokenIndex;

    #[async_trait]
    impl KeyValueStore for BrokenIndex {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }
        async fn set(&self, key: &str, _value: &Value) -> Result<(), StoreError> {
            Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size: 1,
                limit: 0,
            })
        }
        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn entries_with_prefix(
            &self,
            _prefix: &str,
        ) -> Result<Vec<(String, Value)>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Content store that rejects every call.
    struct BrokenContent;

    #[async_trait]
    impl ContentStore for BrokenContent {
        async fn get(&self, _id: &str) -> Result<Option<Conversation>, StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
        async fn insert(&self, _c: &Conversation) -> Result<(), StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
        async fn put(&self, _c: &Conversation) -> Result<(), StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
        async fn delete(&self, _id: &str) -> Result<(), StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
        async fn all(&self) -> Result<Vec<Conversation>, StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
        async fn by_platform(&self, _p: Platform) -> Result<Vec<Conversation>, StoreError> {
            Err(StoreError::Connection("offline".into()))
        }
    }

    #[tokio::test]
    async fn save_is_idempotent_per_id() {
        let (gw, db) = gateway(100).await;

        assert_eq!(gw.save(&conv("p_1", 10)).await.unwrap(), SaveOutcome::Inserted);
        let mut later = conv("p_1", 20);
        later.messages.push(Message::user("again"));
        assert_eq!(gw.save(&later).await.unwrap(), SaveOutcome::Updated);

        assert_eq!(db.all().await.unwrap().len(), 1);
        let index = gw.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].timestamp, 20);
        assert_eq!(gw.get("p_1").await.unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn index_is_capped_to_most_recent() {
        let (gw, db) = gateway(5).await;
        for i in 0..8 {
            gw.save(&conv(&format!("p_{i}"), i)).await.unwrap();
        }

        let index = gw.get_index().await.unwrap();
        let ids: Vec<&str> = index.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["p_7", "p_6", "p_5", "p_4", "p_3"]);
        // Content keeps everything.
        assert_eq!(db.all().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn index_trims_oldest_to_fit_item_quota() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sync = Arc::new(db.namespace("sync").with_quota(2_048, 102_400));
        let gw = PersistenceGateway::new(db.clone(), sync, 100).with_item_quota(2_048);

        for i in 0..30 {
            gw.save(&conv(&format!("p_{i:02}"), i)).await.unwrap();
        }

        let index = gw.get_index().await.unwrap();
        assert!(index.len() < 30 && !index.is_empty());
        assert_eq!(index[0].id, "p_29");
        let raw = serde_json::to_string(&index).unwrap();
        assert!(INDEX_KEY.len() + raw.len() <= 2_048);
        // Content keeps everything.
        assert_eq!(db.all().await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn index_stays_sorted_after_resave() {
        let (gw, _db) = gateway(100).await;
        gw.save(&conv("a", 3)).await.unwrap();
        gw.save(&conv("b", 2)).await.unwrap();
        gw.save(&conv("c", 1)).await.unwrap();
        gw.save(&conv("c", 10)).await.unwrap();

        let index = gw.get_index().await.unwrap();
        assert!(index.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(index[0].id, "c");
    }

    #[tokio::test]
    async fn rejects_empty_conversations() {
        let (gw, db) = gateway(100).await;
        let mut empty = conv("p_1", 1);
        empty.messages.clear();

        assert!(matches!(gw.save(&empty).await, Err(StoreError::Invalid(_))));
        assert!(matches!(gw.save(&conv("", 1)).await, Err(StoreError::Invalid(_))));
        assert!(db.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (gw, _db) = gateway(100).await;
        let err = gw.get("nope").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { id: "nope".into() });
    }

    #[tokio::test]
    async fn index_failure_leaves_orphaned_content() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gw = PersistenceGateway::new(db.clone(), Arc::new(BrokenIndex), 100);

        let err = gw.save(&conv("p_1", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert!(gw.get("p_1").await.is_ok());
        assert!(gw.get_index().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_both() {
        let (gw, _db) = gateway(100).await;
        gw.save(&conv("a", 1)).await.unwrap();
        gw.save(&conv("b", 2)).await.unwrap();

        assert_eq!(gw.delete("a").await.unwrap(), DeleteOutcome::Complete);
        assert!(gw.get("a").await.is_err());
        let ids: Vec<String> = gw.get_index().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn delete_is_partial_when_index_fails() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.put(&conv("a", 1)).await.unwrap();
        let gw = PersistenceGateway::new(db.clone(), Arc::new(BrokenIndex), 100);

        match gw.delete("a").await.unwrap() {
            DeleteOutcome::Partial { content_removed, .. } => assert!(content_removed),
            other => panic!("expected partial delete, got {other:?}"),
        }
        assert!(db.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_partial_when_content_fails() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let gw = PersistenceGateway::new(Arc::new(BrokenContent), Arc::new(db.namespace("sync")), 100);

        match gw.delete("a").await.unwrap() {
            DeleteOutcome::Partial { content_removed, .. } => assert!(!content_removed),
            other => panic!("expected partial delete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_fails_when_both_fail() {
        let gw = PersistenceGateway::new(Arc::new(BrokenContent), Arc::new(BrokenIndex), 100);
        assert!(gw.delete("a").await.is_err());
    }

    #[tokio::test]
    async fn rebuild_restores_orphans() {
        let (gw, db) = gateway(100).await;
        gw.save(&conv("a", 1)).await.unwrap();
        // Written behind the gateway's back, so the index misses it.
        db.put(&conv("orphan", 5)).await.unwrap();
        assert_eq!(gw.get_index().await.unwrap().len(), 1);

        let rebuilt = gw.rebuild_index().await.unwrap();
        let ids: Vec<&str> = rebuilt.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["orphan", "a"]);
        assert_eq!(gw.get_index().await.unwrap(), rebuilt);
    }

    #[tokio::test]
    async fn by_platform_reads_content_store() {
        let (gw, _db) = gateway(100).await;
        gw.save(&conv("a", 1)).await.unwrap();
        let mut other = conv("b", 2);
        other.platform = Platform::Doubao;
        gw.save(&other).await.unwrap();

        let deepseek = gw.get_by_platform(Platform::Deepseek).await.unwrap();
        assert_eq!(deepseek.len(), 1);
        assert_eq!(deepseek[0].id, "a");
        assert_eq!(gw.get_all().await.unwrap().len(), 2);
    }
}
