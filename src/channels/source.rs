//! Mail source abstraction: pure I/O, no business logic.

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::pipeline::types::RawMessage;

/// Exposes unread messages on a mail transfer endpoint.
///
/// Normalization, classification and threading live in the pipeline.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Source name for logging (e.g. "maildev").
    fn name(&self) -> &str;

    /// Ids of messages not yet marked read.
    async fn list_unread(&self) -> Result<Vec<String>, ChannelError>;

    /// Raw bytes and receipt time of one message.
    async fn fetch(&self, source_id: &str) -> Result<RawMessage, ChannelError>;

    /// Best-effort. Store-level idempotency is the real duplicate guard.
    async fn mark_read(&self, source_id: &str) -> Result<(), ChannelError>;
}
