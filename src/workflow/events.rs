//! Workflow trigger queue.
//!
//! Ingestion pushes a [`WorkflowEvent`] per new email; a consumer task
//! drains the queue into the workflow engine. The queue is unbounded, so
//! publishing never blocks the poller and never sheds an event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::workflow::engine::WorkflowEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    NewEmailIngested { email_id: String },
}

/// Sending half of the event queue.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl EventPublisher {
    /// Fire-and-forget. Returns `false` only once the consumer is gone.
    pub fn publish(&self, event: WorkflowEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(?event, "Workflow event queue closed");
                false
            }
        }
    }
}

pub fn event_queue() -> (EventPublisher, mpsc::UnboundedReceiver<WorkflowEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventPublisher { tx }, rx)
}

/// Spawn the consumer. It runs every automatic workflow for each event and
/// exits once all publishers are dropped and the queue is drained.
pub fn spawn_event_consumer(
    engine: Arc<WorkflowEngine>,
    mut rx: mpsc::UnboundedReceiver<WorkflowEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Workflow event consumer started");
        while let Some(event) = rx.recv().await {
            match event {
                WorkflowEvent::NewEmailIngested { email_id } => {
                    match engine.run_for_new_email(&email_id).await {
                        Ok(run) => {
                            debug!(
                                email_id = %email_id,
                                executions = run.executions.len(),
                                failures = run.failures.len(),
                                "Workflows evaluated"
                            );
                        }
                        Err(e) => {
                            warn!(email_id = %email_id, error = %e, "Workflow run failed");
                        }
                    }
                }
            }
        }
        info!("Workflow event consumer stopped");
    })
}
