//! Ingestion pipeline.
//!
//! Every unread message from the mail source flows through:
//! 1. `Normalizer::normalize()`: parse, validate, persist attachments
//! 2. `Classifier::classify()`: keyword priority, category, sentiment
//! 3. `ThreadResolver::commit()`: conversation assignment, then the email
//!    record itself
//!
//! The `Poller` drives `Ingestor::ingest()` for each id on a fixed interval,
//! backing off when the source or the store is unreachable.

pub mod classifier;
pub mod clock;
pub mod ingest;
pub mod normalizer;
pub mod poller;
pub mod threads;
pub mod types;

pub use classifier::{Classifier, ClassifierConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ingest::{IngestOutcome, Ingestor};
pub use normalizer::Normalizer;
pub use poller::{CycleReport, Poller, PollerHandle};
pub use threads::ThreadResolver;
pub use types::{Attachment, Category, Conversation, Email, Priority, RawMessage, Sentiment};
