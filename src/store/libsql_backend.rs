//! libSQL backend — content store and key-value namespaces in one database.
//!
//! The content store lives in `conversations`; every key-value namespace
//! (`sync` for the index and settings, `local` for fallback records) shares
//! the `kv_entries` table.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Conversation, Message, Platform};
use crate::store::migrations;
use crate::store::traits::{ContentStore, KeyValueStore};

const CONVERSATION_COLUMNS: &str = "id, platform, title, url, timestamp, messages";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Key-value namespace sharing this database's connection.
    pub fn namespace(&self, name: &str) -> LibSqlKvStore {
        LibSqlKvStore {
            conn: self.conn.clone(),
            namespace: name.to_string(),
            item_quota: None,
            total_quota: None,
        }
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_conversations(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| StoreError::Query(format!("query conversations: {e}")))?;

        let mut conversations = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("read conversation row: {e}")))?
        {
            conversations.push(row_to_conversation(&row)?);
        }
        Ok(conversations)
    }
}

/// Map a libsql Row to a Conversation.
///
/// Column order matches CONVERSATION_COLUMNS:
/// 0:id, 1:platform, 2:title, 3:url, 4:timestamp, 5:messages
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, StoreError> {
    let read_err = |e: libsql::Error| StoreError::Query(format!("decode conversation: {e}"));

    let id: String = row.get(0).map_err(read_err)?;
    let platform_str: String = row.get(1).map_err(read_err)?;
    let title: String = row.get(2).map_err(read_err)?;
    let url: String = row.get(3).map_err(read_err)?;
    let timestamp: i64 = row.get(4).map_err(read_err)?;
    let messages_str: String = row.get(5).map_err(read_err)?;

    let messages: Vec<Message> = serde_json::from_str(&messages_str)?;

    Ok(Conversation {
        id,
        platform: platform_str.parse().unwrap_or_default(),
        title,
        url,
        timestamp,
        messages,
    })
}

fn is_constraint_violation(e: &libsql::Error) -> bool {
    let msg = e.to_string();
    msg.contains("UNIQUE") || msg.contains("constraint")
}

#[async_trait]
impl ContentStore for LibSqlBackend {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
        Ok(self
            .query_conversations(&sql, params![id])
            .await?
            .into_iter()
            .next())
    }

    async fn insert(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&conversation.messages)?;
        self.conn()
            .execute(
                "INSERT INTO conversations (id, platform, title, url, timestamp, messages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conversation.id.as_str(),
                    conversation.platform.to_string(),
                    conversation.title.as_str(),
                    conversation.url.as_str(),
                    conversation.timestamp,
                    messages
                ],
            )
            .await
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Constraint(format!("conversation {} already exists", conversation.id))
                } else {
                    StoreError::Query(format!("insert conversation: {e}"))
                }
            })?;

        debug!(conversation_id = %conversation.id, "Conversation inserted");
        Ok(())
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&conversation.messages)?;
        self.conn()
            .execute(
                "INSERT INTO conversations (id, platform, title, url, timestamp, messages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                    platform = excluded.platform,
                    title = excluded.title,
                    url = excluded.url,
                    timestamp = excluded.timestamp,
                    messages = excluded.messages,
                    updated_at = datetime('now')",
                params![
                    conversation.id.as_str(),
                    conversation.platform.to_string(),
                    conversation.title.as_str(),
                    conversation.url.as_str(),
                    conversation.timestamp,
                    messages
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put conversation: {e}")))?;

        debug!(conversation_id = %conversation.id, "Conversation written");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM conversations WHERE id = ?1", params![id])
            .await
            .map_err(|e| StoreError::Query(format!("delete conversation: {e}")))?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Conversation>, StoreError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY timestamp DESC"
        );
        self.query_conversations(&sql, ()).await
    }

    async fn by_platform(&self, platform: Platform) -> Result<Vec<Conversation>, StoreError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE platform = ?1 ORDER BY timestamp DESC"
        );
        self.query_conversations(&sql, params![platform.to_string()])
            .await
    }
}

/// One key-value namespace inside `kv_entries`, optionally byte-quota limited.
///
/// Sizes are counted as key length plus serialized JSON length.
#[derive(Clone)]
pub struct LibSqlKvStore {
    conn: Connection,
    namespace: String,
    item_quota: Option<usize>,
    total_quota: Option<usize>,
}

impl LibSqlKvStore {
    /// Limit the size of a single item and of the whole namespace.
    pub fn with_quota(mut self, item_quota: usize, total_quota: usize) -> Self {
        self.item_quota = Some(item_quota);
        self.total_quota = Some(total_quota);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Bytes used by every key in the namespace except `key`.
    async fn used_bytes_excluding(&self, key: &str) -> Result<usize, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(SUM(length(key) + length(value)), 0) FROM kv_entries
                 WHERE namespace = ?1 AND key != ?2",
                params![self.namespace.as_str(), key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("kv usage: {e}")))?;

        let used = match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("kv usage: {e}")))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| StoreError::Query(format!("kv usage: {e}")))?,
            None => 0,
        };
        Ok(used.max(0) as usize)
    }
}

#[async_trait]
impl KeyValueStore for LibSqlKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace.as_str(), key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("kv get: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("kv get: {e}")))?
        {
            Some(row) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("kv get: {e}")))?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        let size = key.len() + raw.len();

        if let Some(limit) = self.item_quota {
            if size > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    limit,
                });
            }
        }

        if let Some(limit) = self.total_quota {
            let total = self.used_bytes_excluding(key).await? + size;
            if total > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size: total,
                    limit,
                });
            }
        }

        self.conn
            .execute(
                "INSERT INTO kv_entries (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (namespace, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = datetime('now')",
                params![self.namespace.as_str(), key, raw],
            )
            .await
            .map_err(|e| StoreError::Query(format!("kv set: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace.as_str(), key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("kv remove: {e}")))?;
        Ok(())
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, value FROM kv_entries
                 WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key",
                params![self.namespace.as_str(), prefix],
            )
            .await
            .map_err(|e| StoreError::Query(format!("kv scan: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("kv scan: {e}")))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("kv scan: {e}")))?;
            let raw: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("kv scan: {e}")))?;
            entries.push((key, serde_json::from_str(&raw)?));
        }
        Ok(entries)
    }
}
