//! Shared types for the ingestion pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::email_types::strip_html;

// ── Raw input ───────────────────────────────────────────────────────

/// A raw message as handed over by the mail source.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Source-stable id, when the source supplies one.
    pub source_id: Option<String>,
    /// RFC 5322 bytes.
    pub bytes: Vec<u8>,
    /// When the source received the message.
    pub received_at: DateTime<Utc>,
}

// ── Classification labels ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    Normal,
}

impl Priority {
    /// Ordinal rank: normal < low < medium < high.
    pub fn rank(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Normal => "normal",
        }
    }

    pub const ALL: [Priority; 4] = [Self::High, Self::Medium, Self::Low, Self::Normal];
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Support,
    Purchase,
    Notification,
    Marketing,
    General,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Purchase => "purchase",
            Self::Notification => "notification",
            Self::Marketing => "marketing",
            Self::General => "general",
        }
    }

    /// Tie-break order used by the classifier. `General` is the fallback.
    pub const PRECEDENCE: [Category; 4] = [
        Self::Support,
        Self::Purchase,
        Self::Notification,
        Self::Marketing,
    ];

    pub const ALL: [Category; 5] = [
        Self::Support,
        Self::Purchase,
        Self::Notification,
        Self::Marketing,
        Self::General,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

macro_rules! label_display_and_parse {
    ($ty:ty, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
                    .map_err(|_| format!("unknown {} '{s}'", $what))
            }
        }
    };
}

label_display_and_parse!(Priority, "priority");
label_display_and_parse!(Category, "category");
label_display_and_parse!(Sentiment, "sentiment");

/// Output of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub priority: Priority,
    pub category: Category,
    pub sentiment: Sentiment,
}

// ── Email ───────────────────────────────────────────────────────────

/// Metadata for a persisted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub storage_key: String,
}

/// An attachment that was dropped because it exceeded the size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub reason: String,
}

/// Normalized representation of one ingested message.
///
/// Content fields never change after creation. Classification fields change
/// only through the workflow `tag` action; `conversation_id` is set by the
/// thread resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    /// `Message-ID` header, without angle brackets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub subject: String,
    pub from_address: String,
    /// Display name; empty when the header carries none.
    pub from_name: String,
    pub to: Vec<String>,
    pub received_at: DateTime<Utc>,
    /// `Date` header, when present and parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_attachments: Vec<RejectedAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub priority: Priority,
    pub category: Category,
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl Email {
    /// Readable body: the text part, else the HTML part with tags stripped.
    pub fn body(&self) -> String {
        match (&self.text_body, &self.html_body) {
            (Some(text), _) => text.clone(),
            (None, Some(html)) => strip_html(html),
            (None, None) => String::new(),
        }
    }

    /// Combined length of the text and HTML bodies, in characters.
    pub fn content_length(&self) -> usize {
        self.text_body.as_deref().map_or(0, |s| s.chars().count())
            + self.html_body.as_deref().map_or(0, |s| s.chars().count())
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Lowercased union of the sender and the `To` recipients.
    pub fn participants(&self) -> BTreeSet<String> {
        std::iter::once(&self.from_address)
            .chain(self.to.iter())
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// Thread references carried by the headers (`In-Reply-To` first).
    pub fn thread_references(&self) -> impl Iterator<Item = &str> {
        self.in_reply_to
            .iter()
            .chain(self.references.iter())
            .map(String::as_str)
    }

    pub fn classification(&self) -> Classification {
        Classification {
            priority: self.priority,
            category: self.category,
            sentiment: self.sentiment,
        }
    }

    pub fn apply(&mut self, classification: Classification) {
        self.priority = classification.priority;
        self.category = classification.category;
        self.sentiment = classification.sentiment;
    }
}

// ── Conversation ────────────────────────────────────────────────────

/// A cluster of emails judged to be the same logical thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Member ids, chronological by `received_at`.
    pub email_ids: Vec<String>,
    pub participants: BTreeSet<String>,
    /// Normalized subject of the earliest member.
    pub topic: String,
    /// Highest priority across members.
    pub urgency: Priority,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
