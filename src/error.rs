//! Error types for mailflow.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob store errors.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Mail source and send-path errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Mail source {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Message {id} not found on {name}")]
    MessageNotFound { name: String, id: String },

    #[error("Failed to send via {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Per-message ingestion failures.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Mail source unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Message {0} is no longer on the mail source")]
    MessageGone(String),

    #[error("Attachment {filename} is {size} bytes, limit is {max}")]
    AttachmentTooLarge {
        filename: String,
        size: usize,
        max: usize,
    },
}

impl IngestError {
    /// Whether the failure points at an unreachable collaborator rather than
    /// at the message itself. Adapter-level failures put the poller into backoff.
    pub fn is_adapter_level(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::AdapterUnavailable(_)
        )
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

impl From<ChannelError> for IngestError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::MessageNotFound { id, .. } => Self::MessageGone(id),
            other => Self::AdapterUnavailable(other.to_string()),
        }
    }
}

/// Workflow definition and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} not found")]
    NotFound { id: Uuid },

    #[error("Email {id} not found")]
    EmailNotFound { id: String },

    #[error("Workflow {id} is disabled")]
    Disabled { id: Uuid },

    #[error("Invalid workflow: {0}")]
    InvalidDefinition(String),

    #[error("Action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Read-side errors surfaced to the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Invalid query: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<WorkflowError> for QueryError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound { id } => Self::not_found("Workflow", id),
            WorkflowError::EmailNotFound { id } => Self::not_found("Email", id),
            WorkflowError::Store(e) => Self::Store(e),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
