//! Typed record access over a [`BlobStore`].
//!
//! Records are JSON under their namespace (see [`keys`]); attachments and
//! quarantined messages are stored as raw bytes.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::pipeline::types::{Conversation, Email};
use crate::store::traits::{BlobStore, StoreUsage, keys};
use crate::workflow::model::{Workflow, WorkflowExecutionResult};

/// Cheap-to-clone handle to the record store.
#[derive(Clone)]
pub struct MailStore {
    blobs: Arc<dyn BlobStore>,
}

impl MailStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    // ── JSON helpers ────────────────────────────────────────────────

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.blobs.put(key, bytes).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.blobs.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load every record under `prefix`. Records that fail to decode are
    /// logged and skipped so one bad object cannot hide the rest.
    async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for key in self.blobs.list(prefix).await? {
            let Some(bytes) = self.blobs.get(&key).await? else {
                // Deleted between list and get
                continue;
            };
            match serde_json::from_slice(&bytes) {
                Ok(value) => out.push(value),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable record"),
            }
        }
        Ok(out)
    }

    // ── Emails ──────────────────────────────────────────────────────

    pub async fn put_email(&self, email: &Email) -> Result<(), StoreError> {
        self.put_json(&keys::email(&email.id), email).await
    }

    pub async fn get_email(&self, id: &str) -> Result<Option<Email>, StoreError> {
        self.get_json(&keys::email(id)).await
    }

    pub async fn email_exists(&self, id: &str) -> Result<bool, StoreError> {
        self.blobs.exists(&keys::email(id)).await
    }

    pub async fn delete_email(&self, id: &str) -> Result<(), StoreError> {
        self.blobs.delete(&keys::email(id)).await
    }

    pub async fn list_emails(&self) -> Result<Vec<Email>, StoreError> {
        self.list_json(keys::EMAIL).await
    }

    // ── Attachments ─────────────────────────────────────────────────

    pub async fn put_attachment(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.put(key, bytes).await
    }

    pub async fn get_attachment(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.blobs.get(key).await
    }

    pub async fn delete_attachment(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.delete(key).await
    }

    // ── Conversations ───────────────────────────────────────────────

    pub async fn put_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.put_json(&keys::conversation(&conversation.id), conversation)
            .await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.get_json(&keys::conversation(id)).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.blobs.delete(&keys::conversation(id)).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        self.list_json(keys::CONVERSATION).await
    }

    // ── Workflows ───────────────────────────────────────────────────

    pub async fn put_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.put_json(&keys::workflow(workflow.id), workflow).await
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        self.get_json(&keys::workflow(id)).await
    }

    /// All workflows, oldest first.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut workflows: Vec<Workflow> = self.list_json(keys::WORKFLOW).await?;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }

    // ── Execution results (append-only) ─────────────────────────────

    pub async fn append_execution(&self, result: &WorkflowExecutionResult) -> Result<(), StoreError> {
        let key = keys::execution(result.workflow_id, result.executed_at, result.id);
        self.put_json(&key, result).await
    }

    /// Execution results, chronological within each workflow.
    pub async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
    ) -> Result<Vec<WorkflowExecutionResult>, StoreError> {
        let prefix = match workflow_id {
            Some(id) => keys::execution_prefix(id),
            None => keys::EXECUTION.to_string(),
        };
        self.list_json(&prefix).await
    }

    // ── Quarantine ──────────────────────────────────────────────────

    pub async fn quarantine(&self, source_id: &str, raw: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.put(&keys::quarantine(source_id), raw).await
    }

    pub async fn is_quarantined(&self, source_id: &str) -> Result<bool, StoreError> {
        self.blobs.exists(&keys::quarantine(source_id)).await
    }

    pub async fn get_quarantined(&self, source_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.blobs.get(&keys::quarantine(source_id)).await
    }

    /// Remove a quarantine entry so the poller picks the message up again.
    pub async fn release_quarantine(&self, source_id: &str) -> Result<(), StoreError> {
        self.blobs.delete(&keys::quarantine(source_id)).await
    }

    // ── Usage ───────────────────────────────────────────────────────

    pub async fn usage(&self, prefix: &str) -> Result<StoreUsage, StoreError> {
        self.blobs.usage(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryBlobStore;
    use crate::workflow::model::{Trigger, WorkflowExecutionResult};
    use chrono::{Duration, Utc};

    fn store() -> MailStore {
        MailStore::new(Arc::new(InMemoryBlobStore::new()))
    }

    #[tokio::test]
    async fn undecodable_records_are_skipped() {
        let store = store();
        store
            .blobs()
            .put("conversation/bad", b"not json".to_vec())
            .await
            .unwrap();
        let conversations = store.list_conversations().await.unwrap();
        assert!(conversations.is_empty());
    }

    #[tokio::test]
    async fn stored_workflow_with_numeric_condition_is_listed() {
        let store = store();
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{
                "id": "{id}",
                "name": "long mails",
                "trigger": {{"type": "any_new_email"}},
                "conditions": [
                    {{"field": "content_length", "operator": "greater_than", "value": 1000}}
                ],
                "actions": [],
                "enabled": true,
                "created_at": "2026-03-01T10:00:00Z",
                "updated_at": "2026-03-01T10:00:00Z"
            }}"#
        );
        store
            .blobs()
            .put(&keys::workflow(id), json.into_bytes())
            .await
            .unwrap();

        let workflows = store.list_workflows().await.unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].conditions[0].value, "1000");
    }

    #[tokio::test]
    async fn ids_differing_only_by_slash_are_kept_apart() {
        let store = store();
        store.quarantine("a/b", b"one".to_vec()).await.unwrap();
        assert!(!store.is_quarantined("a_b").await.unwrap());
        store.quarantine("a_b", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get_quarantined("a/b").await.unwrap().unwrap(), b"one");
        assert_eq!(store.get_quarantined("a_b").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn quarantine_roundtrip() {
        let store = store();
        assert!(!store.is_quarantined("m1").await.unwrap());
        store.quarantine("m1", b"garbage".to_vec()).await.unwrap();
        assert!(store.is_quarantined("m1").await.unwrap());
        assert_eq!(store.get_quarantined("m1").await.unwrap().unwrap(), b"garbage");

        store.release_quarantine("m1").await.unwrap();
        assert!(!store.is_quarantined("m1").await.unwrap());
    }

    #[tokio::test]
    async fn executions_are_scoped_and_chronological() {
        let store = store();
        let wf_a = Uuid::new_v4();
        let wf_b = Uuid::new_v4();
        let now = Utc::now();

        for (wf, offset, email) in [(wf_a, 2, "late"), (wf_a, 1, "early"), (wf_b, 0, "other")] {
            store
                .append_execution(&WorkflowExecutionResult {
                    id: Uuid::new_v4(),
                    workflow_id: wf,
                    email_id: email.into(),
                    executed_at: now + Duration::seconds(offset),
                    trigger: Trigger::Manual,
                    matched: false,
                    outcomes: vec![],
                })
                .await
                .unwrap();
        }

        let a: Vec<String> = store
            .list_executions(Some(wf_a))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.email_id)
            .collect();
        assert_eq!(a, vec!["early", "late"]);
        assert_eq!(store.list_executions(None).await.unwrap().len(), 3);
    }
}
