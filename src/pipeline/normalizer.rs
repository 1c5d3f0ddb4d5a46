//! Normalizer: raw RFC 5322 bytes into a canonical [`Email`].
//!
//! Parsing is pure ([`parse_message`]). [`Normalizer::normalize`] adds the
//! one side effect: attachments are persisted before the email is returned,
//! all-or-nothing.

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::channels::email_types::{
    extract_mailboxes, is_plausible_address, normalize_message_id,
};
use crate::error::IngestError;
use crate::pipeline::types::{
    Attachment, Category, Email, Priority, RawMessage, RejectedAttachment, Sentiment,
};
use crate::store::keys;
use crate::store::records::MailStore;

/// Attachment bytes waiting to be persisted.
#[derive(Debug, Clone)]
pub struct AttachmentPayload {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A parsed message before its attachments are stored.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Unclassified email with an empty attachment list.
    pub email: Email,
    pub payloads: Vec<AttachmentPayload>,
}

fn malformed(reason: impl Into<String>) -> IngestError {
    IngestError::MalformedMessage {
        reason: reason.into(),
    }
}

fn short_hash(bytes: &[u8], hex_chars: usize) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..hex_chars.min(hex.len())].to_string()
}

/// Source id if supplied, else the Message-ID, else a content hash plus
/// the receipt time.
pub fn derive_email_id(
    source_id: Option<&str>,
    message_id: Option<&str>,
    bytes: &[u8],
    received_at: DateTime<Utc>,
) -> String {
    source_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| message_id.filter(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "gen-{}-{}",
                short_hash(bytes, 16),
                received_at.timestamp_millis()
            )
        })
}

fn text_list(hv: &mail_parser::HeaderValue<'_>) -> Vec<String> {
    let values: Vec<String> = match hv {
        mail_parser::HeaderValue::Text(s) => vec![s.to_string()],
        mail_parser::HeaderValue::TextList(list) => list.iter().map(|s| s.to_string()).collect(),
        _ => Vec::new(),
    };
    values
        .iter()
        .map(|v| normalize_message_id(v))
        .filter(|v| !v.is_empty())
        .collect()
}

/// First body part of the wanted kind. mail-parser lists HTML parts under
/// `text_body` (and vice versa) when the other variant is missing, so the
/// part type is checked.
fn body_part(parsed: &mail_parser::Message<'_>, ids: &[u32], html: bool) -> Option<String> {
    ids.iter()
        .filter_map(|id| parsed.parts.get(*id as usize))
        .find_map(|part| match (&part.body, html) {
            (PartType::Text(text), false) => Some(text.to_string()),
            (PartType::Html(markup), true) => Some(markup.to_string()),
            _ => None,
        })
}

/// Parse raw bytes into an unclassified email plus attachment payloads.
///
/// Fails with `MalformedMessage` when the bytes do not parse, the sender
/// address is missing or unparseable, or there is neither a text nor an
/// HTML body. Attachments over `max_attachment_bytes` are listed in
/// `rejected_attachments` and dropped.
pub fn parse_message(
    raw: &RawMessage,
    max_attachment_bytes: usize,
    ingested_at: DateTime<Utc>,
) -> Result<ParsedMessage, IngestError> {
    if raw.bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(malformed("empty message"));
    }
    let parsed = MessageParser::default()
        .parse(&raw.bytes)
        .ok_or_else(|| malformed("unparseable message"))?;

    let sender = extract_mailboxes(parsed.from())
        .into_iter()
        .next()
        .ok_or_else(|| malformed("missing From address"))?;
    if !is_plausible_address(&sender.address) {
        return Err(malformed(format!(
            "unparseable From address '{}'",
            sender.address
        )));
    }

    let mut to = Vec::new();
    for mailbox in extract_mailboxes(parsed.to()) {
        if is_plausible_address(&mailbox.address) {
            to.push(mailbox.address);
        } else {
            debug!(address = %mailbox.address, "Dropping unparseable recipient");
        }
    }

    let text_body = body_part(&parsed, &parsed.text_body, false);
    let html_body = body_part(&parsed, &parsed.html_body, true);
    if text_body.is_none() && html_body.is_none() {
        return Err(malformed("message has neither a text nor an HTML body"));
    }

    let message_id = parsed
        .message_id()
        .map(normalize_message_id)
        .filter(|s| !s.is_empty());
    let id = derive_email_id(
        raw.source_id.as_deref(),
        message_id.as_deref(),
        &raw.bytes,
        raw.received_at,
    );

    let sent_at = parsed
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());

    let mut payloads = Vec::new();
    let mut rejected = Vec::new();
    for (index, part) in parsed.attachments().enumerate() {
        let filename = MimeHeaders::attachment_name(part)
            .map(str::to_string)
            .unwrap_or_else(|| format!("attachment-{}", index + 1));
        let content_type = MimeHeaders::content_type(part)
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".into());
        let bytes = part.contents();

        if bytes.len() > max_attachment_bytes {
            let err = IngestError::AttachmentTooLarge {
                filename: filename.clone(),
                size: bytes.len(),
                max: max_attachment_bytes,
            };
            warn!(id = %id, error = %err, "Rejecting oversized attachment");
            rejected.push(RejectedAttachment {
                filename,
                content_type,
                size: bytes.len(),
                reason: err.to_string(),
            });
            continue;
        }

        payloads.push(AttachmentPayload {
            id: format!("{}-{}", index + 1, short_hash(bytes, 12)),
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let in_reply_to = text_list(parsed.in_reply_to()).into_iter().next();
    let references = text_list(parsed.references());

    let email = Email {
        id,
        message_id,
        subject: parsed.subject().map(|s| s.trim().to_string()).unwrap_or_default(),
        from_address: sender.address,
        from_name: sender.name,
        to,
        received_at: raw.received_at,
        sent_at,
        text_body,
        html_body,
        attachments: Vec::new(),
        rejected_attachments: rejected,
        in_reply_to,
        references,
        priority: Priority::Normal,
        category: Category::General,
        sentiment: Sentiment::Neutral,
        conversation_id: None,
        ingested_at,
    };

    Ok(ParsedMessage { email, payloads })
}

/// Parses messages and persists their attachments.
#[derive(Clone)]
pub struct Normalizer {
    store: MailStore,
    max_attachment_bytes: usize,
}

impl Normalizer {
    pub fn new(store: MailStore, max_attachment_bytes: usize) -> Self {
        Self {
            store,
            max_attachment_bytes,
        }
    }

    /// Parse `raw` and persist its attachments.
    ///
    /// If any attachment write fails, the ones already written are removed
    /// and the call fails with `StorageUnavailable`.
    pub async fn normalize(
        &self,
        raw: &RawMessage,
        ingested_at: DateTime<Utc>,
    ) -> Result<Email, IngestError> {
        let ParsedMessage {
            mut email,
            payloads,
        } = parse_message(raw, self.max_attachment_bytes, ingested_at)?;

        let mut stored: Vec<Attachment> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let key = keys::attachment(&email.id, &payload.id);
            let size = payload.bytes.len();
            if let Err(e) = self.store.put_attachment(&key, payload.bytes).await {
                warn!(id = %email.id, key = %key, error = %e, "Attachment write failed, rolling back");
                self.discard(&stored).await;
                return Err(e.into());
            }
            stored.push(Attachment {
                id: payload.id,
                filename: payload.filename,
                content_type: payload.content_type,
                size,
                storage_key: key,
            });
        }

        email.attachments = stored;
        Ok(email)
    }

    /// Best-effort removal of persisted attachments.
    pub async fn discard(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            if let Err(e) = self.store.delete_attachment(&attachment.storage_key).await {
                warn!(key = %attachment.storage_key, error = %e, "Failed to remove attachment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlobStore;
    use crate::store::traits::BlobStore;
    use std::sync::Arc;

    fn raw(source_id: Option<&str>, body: &str) -> RawMessage {
        RawMessage {
            source_id: source_id.map(str::to_string),
            bytes: body.as_bytes().to_vec(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    const PLAIN: &str = "From: Alice Doe <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Subject: Pedido #45\r\n\
Message-ID: <order-45@example.com>\r\n\
Date: Sun, 1 Mar 2026 09:58:00 +0000\r\n\
\r\n\
Hello Bob\r\n";

    const HTML_ONLY: &str = "From: shop@example.com\r\n\
To: bob@example.com\r\n\
Subject: Promo\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Big <b>sale</b></p>\r\n";

    const WITH_ATTACHMENT: &str = "From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Report\r\n\
Message-ID: <report@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--XYZ\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"report.csv\"\r\n\
\r\n\
a,b,c\r\n1,2,3\r\n\
--XYZ--\r\n";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 5).unwrap()
    }

    #[test]
    fn parses_addresses_and_headers() {
        let parsed = parse_message(&raw(Some("src-1"), PLAIN), 1024, now()).unwrap();
        let email = parsed.email;

        assert_eq!(email.id, "src-1");
        assert_eq!(email.from_address, "alice@example.com");
        assert_eq!(email.from_name, "Alice Doe");
        assert_eq!(email.to, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(email.subject, "Pedido #45");
        assert_eq!(email.message_id.as_deref(), Some("order-45@example.com"));
        assert_eq!(email.text_body.as_deref().map(str::trim), Some("Hello Bob"));
        assert!(email.html_body.is_none());
        assert_eq!(
            email.sent_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 58, 0).unwrap())
        );
        assert_eq!(email.received_at, raw(None, "").received_at);
    }

    #[test]
    fn missing_display_name_is_empty_string() {
        let parsed = parse_message(&raw(Some("s"), HTML_ONLY), 1024, now()).unwrap();
        assert_eq!(parsed.email.from_name, "");
    }

    #[test]
    fn html_only_message_keeps_html_body() {
        let parsed = parse_message(&raw(Some("s"), HTML_ONLY), 1024, now()).unwrap();
        assert!(parsed.email.text_body.is_none());
        assert!(parsed.email.html_body.unwrap().contains("<b>sale</b>"));
    }

    #[test]
    fn reply_headers_are_captured() {
        let msg = "From: bob@example.com\r\nTo: alice@example.com\r\nSubject: RE: Pedido #45\r\n\
In-Reply-To: <order-45@example.com>\r\nReferences: <root@example.com> <order-45@example.com>\r\n\r\nok\r\n";
        let email = parse_message(&raw(Some("s2"), msg), 1024, now()).unwrap().email;
        assert_eq!(email.in_reply_to.as_deref(), Some("order-45@example.com"));
        assert_eq!(
            email.references,
            vec!["root@example.com", "order-45@example.com"]
        );
    }

    #[test]
    fn id_falls_back_to_message_id_then_hash() {
        let email = parse_message(&raw(None, PLAIN), 1024, now()).unwrap().email;
        assert_eq!(email.id, "order-45@example.com");

        let email = parse_message(&raw(None, HTML_ONLY), 1024, now()).unwrap().email;
        assert!(email.id.starts_with("gen-"));
        let again = parse_message(&raw(None, HTML_ONLY), 1024, now()).unwrap().email;
        assert_eq!(email.id, again.id);
    }

    #[test]
    fn missing_sender_is_malformed() {
        let msg = "To: bob@example.com\r\nSubject: who?\r\n\r\nbody\r\n";
        let err = parse_message(&raw(Some("s"), msg), 1024, now()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMessage { .. }));
    }

    #[test]
    fn garbage_sender_is_malformed() {
        let msg = "From: not-an-address\r\nTo: bob@example.com\r\nSubject: x\r\n\r\nbody\r\n";
        let err = parse_message(&raw(Some("s"), msg), 1024, now()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMessage { .. }));
    }

    #[test]
    fn empty_input_is_malformed() {
        let err = parse_message(&raw(Some("s"), "  \r\n"), 1024, now()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMessage { .. }));
    }

    #[test]
    fn bodiless_message_is_malformed() {
        let msg = "From: a@example.com\r\nTo: b@example.com\r\nSubject: bin\r\n\
Content-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"x.bin\"\r\n\r\nAAAA\r\n";
        let err = parse_message(&raw(Some("s"), msg), 1024, now()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedMessage { .. }));
    }

    #[test]
    fn oversized_attachment_is_rejected_not_truncated() {
        let parsed = parse_message(&raw(Some("s"), WITH_ATTACHMENT), 4, now()).unwrap();
        assert!(parsed.payloads.is_empty());
        assert_eq!(parsed.email.rejected_attachments.len(), 1);
        let rejected = &parsed.email.rejected_attachments[0];
        assert_eq!(rejected.filename, "report.csv");
        assert!(rejected.size > 4);
    }

    #[tokio::test]
    async fn normalize_persists_attachments() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = MailStore::new(blobs.clone());
        let normalizer = Normalizer::new(store.clone(), 1024);

        let email = normalizer
            .normalize(&raw(Some("m-att"), WITH_ATTACHMENT), now())
            .await
            .unwrap();

        assert_eq!(email.attachments.len(), 1);
        let att = &email.attachments[0];
        assert_eq!(att.filename, "report.csv");
        assert_eq!(att.content_type, "text/csv");
        assert!(att.storage_key.starts_with("attachment/m-att/"));

        let stored = store.get_attachment(&att.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.len(), att.size);
    }

    #[tokio::test]
    async fn discard_removes_attachments() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = MailStore::new(blobs.clone());
        let normalizer = Normalizer::new(store.clone(), 1024);

        let email = normalizer
            .normalize(&raw(Some("m-att"), WITH_ATTACHMENT), now())
            .await
            .unwrap();
        normalizer.discard(&email.attachments).await;

        assert!(blobs.list("attachment/").await.unwrap().is_empty());
    }
}
