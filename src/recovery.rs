//! Recovery manager — stages conversations locally when the background
//! context is unreachable and replays them once it is back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ReconciliationError, StoreError};
use crate::model::Conversation;
use crate::store::{KeyValueStore, PersistenceGateway};

/// Destination of replayed fallback records.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Timestamp of the stored capture with this id, if any.
    async fn stored_timestamp(&self, id: &str) -> Result<Option<i64>, StoreError>;
}

#[async_trait]
impl ConversationSink for PersistenceGateway {
    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        PersistenceGateway::save(self, conversation).await.map(|_| ())
    }

    async fn stored_timestamp(&self, id: &str) -> Result<Option<i64>, StoreError> {
        match self.get(id).await {
            Ok(conversation) => Ok(Some(conversation.timestamp)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Stored shape of a staged conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(rename = "isTemporary", default)]
    pub is_temporary: bool,
}

impl FallbackRecord {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            is_temporary: true,
        }
    }
}

/// Outcome of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub recovered: usize,
    /// Records dropped because a capture at least as recent was already stored.
    #[serde(default)]
    pub superseded: usize,
    pub failed: usize,
    /// Fallback records left after the pass.
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Saved,
    Superseded,
}

/// Owner of the fallback key prefix in the local namespace.
#[derive(Clone)]
pub struct RecoveryManager {
    local: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl RecoveryManager {
    pub fn new(local: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            local,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Write a fallback record for the conversation, replacing any earlier one.
    pub async fn stash(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let key = self.key(&conversation.id);
        let record = serde_json::to_value(FallbackRecord::new(conversation.clone()))?;
        self.local.set(&key, &record).await?;

        info!(conversation_id = %conversation.id, "Conversation stashed for recovery");
        Ok(())
    }

    /// Staged conversations, without touching the namespace.
    pub async fn pending(&self) -> Result<Vec<Conversation>, StoreError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|(_, conversation)| conversation)
            .collect())
    }

    /// Replay every fallback record into `sink`.
    ///
    /// Successful replays delete their record; failures keep it and the pass
    /// continues with the next one. A record no newer than the stored capture
    /// is deleted without being saved.
    pub async fn reconcile(&self, sink: &dyn ConversationSink) -> Result<ReconcileReport, StoreError> {
        let records = self.records().await?;
        let mut report = ReconcileReport::default();
        for (key, conversation) in records {
            match self.replay(sink, &key, &conversation).await {
                Ok(Replay::Saved) => report.recovered += 1,
                Ok(Replay::Superseded) => report.superseded += 1,
                Err(e) => {
                    warn!(error = %e, "Fallback record kept");
                    report.failed += 1;
                }
            }
        }
        report.remaining = self.local.entries_with_prefix(&self.prefix).await?.len();

        info!(
            recovered = report.recovered,
            superseded = report.superseded,
            failed = report.failed,
            "Fallback reconciliation finished"
        );
        Ok(report)
    }

    async fn replay(
        &self,
        sink: &dyn ConversationSink,
        key: &str,
        conversation: &Conversation,
    ) -> Result<Replay, ReconciliationError> {
        let replay_err = |e: StoreError| ReconciliationError::Replay {
            id: conversation.id.clone(),
            reason: e.to_string(),
        };

        let stored = sink
            .stored_timestamp(&conversation.id)
            .await
            .map_err(replay_err)?;
        let outcome = match stored {
            Some(ts) if ts >= conversation.timestamp => Replay::Superseded,
            _ => {
                sink.save(conversation).await.map_err(replay_err)?;
                Replay::Saved
            }
        };
        self.local.remove(key).await.map_err(replay_err)?;

        debug!(conversation_id = %conversation.id, ?outcome, "Fallback record reconciled");
        Ok(outcome)
    }

    /// Parseable fallback records with their keys. Unreadable values are
    /// skipped and left in place.
    async fn records(&self) -> Result<Vec<(String, Conversation)>, StoreError> {
        let entries = self.local.entries_with_prefix(&self.prefix).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_value::<FallbackRecord>(value) {
                Ok(record) => records.push((key, record.conversation)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable fallback record"),
            }
        }
        Ok(records)
    }
}
