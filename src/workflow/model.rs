//! Core types for workflows.
//!
//! A workflow is a stored rule: a trigger, an AND-list of conditions and an
//! ordered list of actions. Each run leaves an append-only
//! [`WorkflowExecutionResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::channels::email_types::is_plausible_address;
use crate::error::WorkflowError;
use crate::pipeline::types::{Category, Priority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// A new enabled workflow with a fresh id.
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            trigger,
            conditions,
            actions,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reject definitions that can never run successfully.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "name must not be empty".into(),
            ));
        }
        for (i, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|reason| WorkflowError::InvalidDefinition(format!("action {i}: {reason}")))?;
        }
        Ok(())
    }

    /// Whether the workflow runs automatically for a new email.
    pub fn is_automatic(&self) -> bool {
        self.enabled && !matches!(self.trigger, Trigger::Manual)
    }
}

/// When a workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Every newly ingested email.
    AnyNewEmail,
    /// New emails whose classification matches every given field.
    Filter {
        #[serde(default)]
        category: Option<Category>,
        #[serde(default)]
        priority: Option<Priority>,
    },
    /// Only on explicit invocation.
    Manual,
}

impl Trigger {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Trigger::AnyNewEmail => "any_new_email",
            Trigger::Filter { .. } => "filter",
            Trigger::Manual => "manual",
        }
    }
}

/// Email field a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Subject,
    Body,
    From,
    FromName,
    To,
    Category,
    Priority,
    Sentiment,
    ContentLength,
    AttachmentCount,
    #[serde(other)]
    Unknown,
}

impl ConditionField {
    /// Fields `greater_than` / `less_than` may compare.
    pub fn is_ordinal(self) -> bool {
        matches!(
            self,
            ConditionField::Priority | ConditionField::ContentLength | ConditionField::AttachmentCount
        )
    }

    /// Fields `contains` may search.
    pub fn is_text(self) -> bool {
        matches!(self, ConditionField::Subject | ConditionField::Body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: Operator,
    /// Compared as text. Stored numbers and booleans are read as their
    /// text form.
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub value: String,
}

fn scalar_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Condition {
    pub fn new(field: ConditionField, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }
}

/// What a matched workflow does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Reply to the sender, threaded on the original Message-ID.
    SendReply {
        body: String,
        #[serde(default)]
        subject: Option<String>,
    },
    /// Forward the email to other recipients.
    Forward {
        to: Vec<String>,
        #[serde(default)]
        note: Option<String>,
    },
    /// Send a short notice about the email.
    Notify {
        to: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Re-classify the email.
    Tag {
        #[serde(default)]
        category: Option<Category>,
        #[serde(default)]
        priority: Option<Priority>,
    },
}

impl Action {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Action::SendReply { .. } => "send_reply",
            Action::Forward { .. } => "forward",
            Action::Notify { .. } => "notify",
            Action::Tag { .. } => "tag",
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Action::SendReply { body, .. } if body.trim().is_empty() => {
                Err("send_reply needs a body".into())
            }
            Action::Forward { to, .. } | Action::Notify { to, .. } => {
                if to.is_empty() {
                    return Err(format!("{} needs at least one recipient", self.type_tag()));
                }
                match to.iter().find(|a| !is_plausible_address(a)) {
                    Some(bad) => Err(format!("invalid recipient '{bad}'")),
                    None => Ok(()),
                }
            }
            Action::Tag {
                category: None,
                priority: None,
            } => Err("tag needs a category or a priority".into()),
            _ => Ok(()),
        }
    }
}

/// Result of one action within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(action: &Action, message: impl Into<String>) -> Self {
        Self {
            action: action.type_tag().to_string(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(action: &Action, message: impl Into<String>) -> Self {
        Self {
            action: action.type_tag().to_string(),
            success: false,
            message: message.into(),
        }
    }
}

/// Append-only audit record of one workflow run against one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub email_id: String,
    pub executed_at: DateTime<Utc>,
    /// What started the run: the workflow's own trigger, or `Manual`.
    pub trigger: Trigger,
    pub matched: bool,
    pub outcomes: Vec<ActionOutcome>,
}

impl WorkflowExecutionResult {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}
