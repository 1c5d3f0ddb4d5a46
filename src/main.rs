use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mailflow::channels::{MailDevConfig, MailDevSource, MailSender, MailSource, SmtpConfig, SmtpSender};
use mailflow::config::{PipelineConfig, StoreConfig, ThreadConfig};
use mailflow::pipeline::{
    Classifier, ClassifierConfig, Clock, Ingestor, Normalizer, Poller, SystemClock, ThreadResolver,
};
use mailflow::store::{BlobStore, LibSqlBlobStore, MailStore};
use mailflow::workflow::{WorkflowEngine, event_queue, spawn_event_consumer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_tracing();

    eprintln!("📬 Mailflow v{}", env!("CARGO_PKG_VERSION"));

    // ── Configuration ────────────────────────────────────────────────────
    let pipeline_config = PipelineConfig::from_env().context("pipeline configuration")?;
    let thread_config = ThreadConfig::from_env().context("thread configuration")?;
    let store_config = StoreConfig::from_env();
    let maildev_config = MailDevConfig::from_env().context("MailDev configuration")?;
    let smtp_config = SmtpConfig::from_env().context("SMTP configuration")?;
    let classifier_config = ClassifierConfig::from_env().context("classifier configuration")?;

    eprintln!("   Mail source: {}", maildev_config.base_url);
    eprintln!("   SMTP: {}:{}", smtp_config.host, smtp_config.port);
    eprintln!("   Database: {}", store_config.db_path.display());

    // ── Store ────────────────────────────────────────────────────────────
    let blobs: Arc<dyn BlobStore> = Arc::new(
        LibSqlBlobStore::new_local(&store_config.db_path)
            .await
            .with_context(|| format!("opening database at {}", store_config.db_path.display()))?,
    );
    let store = MailStore::new(blobs);

    // ── Pipeline ─────────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source: Arc<dyn MailSource> =
        Arc::new(MailDevSource::new(maildev_config).context("building MailDev client")?);
    let sender: Arc<dyn MailSender> = Arc::new(SmtpSender::new(smtp_config));
    let classifier = Arc::new(Classifier::new(&classifier_config).context("compiling classifier")?);
    let resolver = Arc::new(
        ThreadResolver::load(store.clone(), &thread_config)
            .await
            .context("loading conversation index")?,
    );

    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        Arc::clone(&resolver),
        sender,
        Arc::clone(&clock),
    ));
    let (publisher, events) = event_queue();
    let consumer = spawn_event_consumer(engine, events);

    let normalizer = Normalizer::new(store.clone(), pipeline_config.max_attachment_bytes);
    let ingestor = Arc::new(
        Ingestor::new(
            Arc::clone(&source),
            store,
            normalizer,
            classifier,
            resolver,
            Arc::clone(&clock),
        )
        .with_events(publisher),
    );

    let grace = pipeline_config.shutdown_grace;
    let poller = Arc::new(Poller::new(source, ingestor, pipeline_config, clock));
    let poller_handle = poller.spawn();

    info!("Mailflow running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    // ── Shutdown ─────────────────────────────────────────────────────────
    info!("Shutting down");
    poller_handle.shutdown(grace).await;
    // The poller owned the last publisher; the consumer drains and exits.
    if tokio::time::timeout(grace, consumer).await.is_err() {
        tracing::warn!("Workflow consumer did not drain in time");
    }
    info!("Goodbye");
    Ok(())
}

/// Console logging, plus a daily rolling file when `MAILFLOW_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match std::env::var("MAILFLOW_LOG_DIR").ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mailflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
