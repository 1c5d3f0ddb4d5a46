//! `BlobStore` trait: the single async interface for all persistence.
//!
//! The core treats the store as durable, eventually-consistent key-value
//! storage. Keys are namespaced by record type; see [`keys`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Object count and byte size under a key prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    pub objects: u64,
    pub bytes: u64,
}

/// Backend-agnostic byte store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or overwrite `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Read `key`. Returns `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All keys starting with `prefix`, in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Object count and total size under `prefix`.
    async fn usage(&self, prefix: &str) -> Result<StoreUsage, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Key layout for every record type.
pub mod keys {
    use super::*;

    pub const EMAIL: &str = "email/";
    pub const ATTACHMENT: &str = "attachment/";
    pub const CONVERSATION: &str = "conversation/";
    pub const WORKFLOW: &str = "workflow/";
    pub const EXECUTION: &str = "execution/";
    pub const QUARANTINE: &str = "quarantine/";

    /// Percent-encode an id so it stays one path segment. The encoding is
    /// reversible, so distinct ids never share a key.
    pub fn sanitize(id: &str) -> String {
        urlencoding::encode(id).into_owned()
    }

    pub fn email(id: &str) -> String {
        format!("{EMAIL}{}", sanitize(id))
    }

    pub fn attachment_prefix(email_id: &str) -> String {
        format!("{ATTACHMENT}{}/", sanitize(email_id))
    }

    pub fn attachment(email_id: &str, attachment_id: &str) -> String {
        format!("{}{}", attachment_prefix(email_id), sanitize(attachment_id))
    }

    pub fn conversation(id: &str) -> String {
        format!("{CONVERSATION}{}", sanitize(id))
    }

    pub fn workflow(id: Uuid) -> String {
        format!("{WORKFLOW}{id}")
    }

    pub fn execution_prefix(workflow_id: Uuid) -> String {
        format!("{EXECUTION}{workflow_id}/")
    }

    /// Execution keys sort chronologically within a workflow.
    pub fn execution(workflow_id: Uuid, executed_at: DateTime<Utc>, id: Uuid) -> String {
        format!(
            "{}{:013}-{id}",
            execution_prefix(workflow_id),
            executed_at.timestamp_millis().max(0)
        )
    }

    pub fn quarantine(source_id: &str) -> String {
        format!("{QUARANTINE}{}", sanitize(source_id))
    }
}
