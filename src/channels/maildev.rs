//! MailDev channel: REST polling of a MailDev instance for inbound mail.
//!
//! Endpoints used:
//! - `GET /email`: every captured message with its `read` flag
//! - `GET /email/{id}`: message metadata (receipt `time`)
//! - `GET /email/{id}/source`: raw RFC 5322 source
//! - `PATCH /email/{id}/read`: mark one message read

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::channels::source::MailSource;
use crate::config::env_parse;
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::RawMessage;

const NAME: &str = "maildev";

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MailDevConfig {
    /// Base URL of the MailDev web API, without trailing slash.
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for MailDevConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1080".into(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl MailDevConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let base_url = std::env::var("MAILDEV_URL")
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "MAILDEV_URL".into(),
                message: format!("expected an http(s) URL, got '{base_url}'"),
            });
        }
        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(env_parse(
                "MAILDEV_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// The subset of MailDev's message JSON this adapter reads.
#[derive(Debug, Deserialize)]
struct MailDevEmail {
    id: String,
    #[serde(default)]
    read: bool,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

fn unread_ids(listing: Vec<MailDevEmail>) -> Vec<String> {
    listing
        .into_iter()
        .filter(|m| !m.read)
        .map(|m| m.id)
        .collect()
}

// ── Source ──────────────────────────────────────────────────────────

pub struct MailDevSource {
    config: MailDevConfig,
    client: reqwest::Client,
}

impl MailDevSource {
    pub fn new(config: MailDevConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url)
    }

    /// Send a request and map transport errors and non-2xx statuses.
    async fn checked(
        &self,
        request: reqwest::RequestBuilder,
        id: Option<&str>,
    ) -> Result<reqwest::Response, ChannelError> {
        let resp = request
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(ChannelError::MessageNotFound {
                    name: NAME.into(),
                    id: id.to_string(),
                });
            }
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("HTTP {status}: {body}")));
        }
        Ok(resp)
    }
}

fn unavailable(reason: String) -> ChannelError {
    ChannelError::Unavailable {
        name: NAME.into(),
        reason,
    }
}

#[async_trait]
impl MailSource for MailDevSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn list_unread(&self) -> Result<Vec<String>, ChannelError> {
        let resp = self
            .checked(self.client.get(self.api_url("email")), None)
            .await?;
        let listing: Vec<MailDevEmail> = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("Invalid listing JSON: {e}")))?;
        let ids = unread_ids(listing);
        tracing::debug!(count = ids.len(), "MailDev unread messages");
        Ok(ids)
    }

    async fn fetch(&self, source_id: &str) -> Result<RawMessage, ChannelError> {
        let meta: MailDevEmail = self
            .checked(
                self.client.get(self.api_url(&format!("email/{source_id}"))),
                Some(source_id),
            )
            .await?
            .json()
            .await
            .map_err(|e| unavailable(format!("Invalid message JSON: {e}")))?;

        let bytes = self
            .checked(
                self.client
                    .get(self.api_url(&format!("email/{source_id}/source"))),
                Some(source_id),
            )
            .await?
            .bytes()
            .await
            .map_err(|e| unavailable(format!("Failed to read message source: {e}")))?;

        Ok(RawMessage {
            source_id: Some(source_id.to_string()),
            bytes: bytes.to_vec(),
            received_at: meta.time.unwrap_or_else(Utc::now),
        })
    }

    async fn mark_read(&self, source_id: &str) -> Result<(), ChannelError> {
        self.checked(
            self.client
                .patch(self.api_url(&format!("email/{source_id}/read"))),
            Some(source_id),
        )
        .await?;
        Ok(())
    }
}
