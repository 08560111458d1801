//! Storage traits — the content store and the key-value namespaces.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::model::{Conversation, Platform};

/// Document store holding full conversations, keyed by id.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Get a conversation by id.
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Insert a new conversation. Fails with `StoreError::Constraint` if the id exists.
    async fn insert(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Insert or overwrite a conversation.
    async fn put(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Delete a conversation. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// All conversations, most recent first.
    async fn all(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Conversations of one platform, most recent first.
    async fn by_platform(&self, platform: Platform) -> Result<Vec<Conversation>, StoreError>;
}

/// JSON key-value namespace (the index store and the fallback namespace).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;
}
