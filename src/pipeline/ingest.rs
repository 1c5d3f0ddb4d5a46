//! Single-message ingestion: fetch → normalize → classify → thread →
//! persist → mark read → publish event.
//!
//! The email record is the idempotency marker and is written last. A
//! message whose email record exists, or that sits in quarantine, is not
//! fetched again.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::source::MailSource;
use crate::error::IngestError;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::clock::Clock;
use crate::pipeline::normalizer::Normalizer;
use crate::pipeline::threads::ThreadResolver;
use crate::pipeline::types::{Attachment, Email};
use crate::store::records::MailStore;
use crate::workflow::events::{EventPublisher, WorkflowEvent};

/// What happened to one source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested {
        email_id: String,
        conversation_id: String,
    },
    /// An email with this id is already stored.
    AlreadyIngested,
    /// A previous attempt quarantined this message.
    AlreadyQuarantined,
    /// Malformed; raw bytes kept under `quarantine/`.
    Quarantined { reason: String },
}

/// Drives one source message through the pipeline.
pub struct Ingestor {
    source: Arc<dyn MailSource>,
    store: MailStore,
    normalizer: Normalizer,
    classifier: Arc<Classifier>,
    resolver: Arc<ThreadResolver>,
    clock: Arc<dyn Clock>,
    events: Option<EventPublisher>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn MailSource>,
        store: MailStore,
        normalizer: Normalizer,
        classifier: Arc<Classifier>,
        resolver: Arc<ThreadResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            normalizer,
            classifier,
            resolver,
            clock,
            events: None,
        }
    }

    /// Publish `NewEmailIngested` for every stored email.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Ingest one message by source id.
    ///
    /// The source id doubles as the email id, so the existence check runs
    /// before anything is fetched. The thread resolver repeats it under its
    /// lock before writing.
    pub async fn ingest(&self, source_id: &str) -> Result<IngestOutcome, IngestError> {
        if self.store.email_exists(source_id).await? {
            debug!(id = %source_id, "Already ingested, skipping");
            self.mark_read(source_id).await;
            return Ok(IngestOutcome::AlreadyIngested);
        }
        if self.store.is_quarantined(source_id).await? {
            debug!(id = %source_id, "Quarantined, skipping");
            return Ok(IngestOutcome::AlreadyQuarantined);
        }

        let mut raw = self.source.fetch(source_id).await?;
        raw.source_id = Some(source_id.to_string());

        let mut email = match self.normalizer.normalize(&raw, self.clock.now()).await {
            Ok(email) => email,
            Err(IngestError::MalformedMessage { reason }) => {
                self.store.quarantine(source_id, raw.bytes).await?;
                error!(id = %source_id, reason = %reason, "Malformed message quarantined");
                return Ok(IngestOutcome::Quarantined { reason });
            }
            Err(e) => return Err(e),
        };

        email.apply(self.classifier.classify(&email));

        let conversation = match self.resolver.commit(&mut email).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                debug!(id = %source_id, "Stored by a concurrent worker, skipping");
                self.discard_unreferenced(&email).await;
                self.mark_read(source_id).await;
                return Ok(IngestOutcome::AlreadyIngested);
            }
            Err(e) => {
                self.normalizer.discard(&email.attachments).await;
                return Err(e);
            }
        };

        info!(
            id = %email.id,
            priority = %email.priority,
            category = %email.category,
            sentiment = %email.sentiment,
            conversation = %conversation.id,
            "Email ingested"
        );

        self.mark_read(source_id).await;
        self.publish(&email);

        Ok(IngestOutcome::Ingested {
            email_id: email.id,
            conversation_id: conversation.id,
        })
    }

    /// Drop attachments written for a duplicate of an already stored email.
    /// Attachment keys are content addressed, so keys the stored email uses
    /// are kept.
    async fn discard_unreferenced(&self, email: &Email) {
        let kept: Vec<String> = match self.store.get_email(&email.id).await {
            Ok(Some(stored)) => stored
                .attachments
                .into_iter()
                .map(|a| a.storage_key)
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(id = %email.id, error = %e, "Could not read stored email, keeping attachments");
                return;
            }
        };
        let orphans: Vec<Attachment> = email
            .attachments
            .iter()
            .filter(|a| !kept.contains(&a.storage_key))
            .cloned()
            .collect();
        self.normalizer.discard(&orphans).await;
    }

    /// Best-effort; a failure only means the id shows up again next cycle
    /// and is skipped by the existence check.
    async fn mark_read(&self, source_id: &str) {
        if let Err(e) = self.source.mark_read(source_id).await {
            warn!(id = %source_id, error = %e, "Failed to mark message read");
        }
    }

    fn publish(&self, email: &Email) {
        if let Some(events) = &self.events {
            events.publish(WorkflowEvent::NewEmailIngested {
                email_id: email.id.clone(),
            });
        }
    }
}
