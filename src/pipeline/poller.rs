//! Poller: the recurring ingestion task.
//!
//! One cycle lists unread ids, drops repeats, and ingests them with bounded
//! concurrency.
//! Per-message failures are logged and left unmarked for the next cycle.
//! A cycle that hit an adapter-level failure (mail source or storage
//! unreachable) is followed by the backoff delay instead of the normal
//! interval; the next clean cycle resets it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::source::MailSource;
use crate::config::PipelineConfig;
use crate::pipeline::clock::Clock;
use crate::pipeline::ingest::{IngestOutcome, Ingestor};

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub quarantined: usize,
    pub failed: usize,
    /// The mail source or the store was unreachable at some point.
    pub adapter_failure: bool,
}

pub struct Poller {
    source: Arc<dyn MailSource>,
    ingestor: Arc<Ingestor>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Poller {
    pub fn new(
        source: Arc<dyn MailSource>,
        ingestor: Arc<Ingestor>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            ingestor,
            config,
            clock,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one cycle. Returns `None` without doing anything if another
    /// cycle is still running.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Poll cycle still running, skipping tick");
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let mut report = CycleReport::default();
        let mut ids = match self.source.list_unread().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(source = %self.source.name(), error = %e, "Listing unread messages failed");
                report.adapter_failure = true;
                return Some(report);
            }
        };
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        report.discovered = ids.len();
        if ids.is_empty() {
            return Some(report);
        }
        debug!(count = ids.len(), "Poll cycle started");

        let results: Vec<_> = futures::stream::iter(ids)
            .map(|id| {
                let ingestor = Arc::clone(&self.ingestor);
                async move {
                    let result = ingestor.ingest(&id).await;
                    (id, result)
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(IngestOutcome::Ingested { .. }) => report.ingested += 1,
                Ok(IngestOutcome::AlreadyIngested | IngestOutcome::AlreadyQuarantined) => {
                    report.skipped += 1
                }
                Ok(IngestOutcome::Quarantined { .. }) => report.quarantined += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_adapter_level() {
                        report.adapter_failure = true;
                    }
                    error!(id = %id, error = %e, "Ingestion failed, will retry next cycle");
                }
            }
        }

        info!(
            discovered = report.discovered,
            ingested = report.ingested,
            skipped = report.skipped,
            quarantined = report.quarantined,
            failed = report.failed,
            "Poll cycle complete"
        );
        Some(report)
    }

    /// Delay before the next cycle.
    pub fn next_delay(&self, report: &CycleReport) -> Duration {
        if report.adapter_failure {
            self.config.backoff_interval
        } else {
            self.config.poll_interval
        }
    }

    /// Spawn the recurring loop.
    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let (flag, notify) = (Arc::clone(&shutdown), Arc::clone(&wake));

        let task = tokio::spawn(async move {
            info!(
                source = %self.source.name(),
                interval_secs = self.config.poll_interval.as_secs(),
                backoff_secs = self.config.backoff_interval.as_secs(),
                "Poller started"
            );

            loop {
                if flag.load(Ordering::Acquire) {
                    break;
                }

                let delay = match self.run_cycle().await {
                    Some(report) => {
                        if report.adapter_failure {
                            warn!(
                                delay_secs = self.config.backoff_interval.as_secs(),
                                "Backing off after adapter failure"
                            );
                        }
                        self.next_delay(&report)
                    }
                    None => self.config.poll_interval,
                };

                if flag.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = self.clock.sleep(delay) => {}
                    _ = notify.notified() => {}
                }
            }
            info!("Poller stopped");
        });

        PollerHandle {
            shutdown,
            wake,
            task,
        }
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop starting new cycles and wait up to `grace` for the in-flight
    /// one. Past the grace period the task is aborted. Returns whether the
    /// loop exited on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Poller task ended abnormally");
                false
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "Poller did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
