//! Workflow execution engine.
//!
//! `evaluate` is a pure AND over a workflow's conditions and never errors:
//! an operator that makes no sense for a field is a non-match. `execute`
//! runs every action of a matched workflow in order, folds each action's
//! failure into its own outcome and appends one audit record per call.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::sender::{MailSender, OutgoingMail};
use crate::error::WorkflowError;
use crate::pipeline::clock::Clock;
use crate::pipeline::threads::ThreadResolver;
use crate::pipeline::types::{Category, Email, Priority, Sentiment};
use crate::store::records::MailStore;
use crate::workflow::model::{
    Action, ActionOutcome, Condition, ConditionField, Operator, Trigger, Workflow,
    WorkflowExecutionResult,
};

/// Whether one condition holds for `email`.
pub fn condition_holds(email: &Email, condition: &Condition) -> bool {
    let field = condition.field;
    let value = condition.value.as_str();
    match condition.operator {
        Operator::Equals => equals(email, field, value),
        Operator::Contains if field.is_text() => {
            let needle = value.to_lowercase();
            text_of(email, field).to_lowercase().contains(&needle)
        }
        Operator::GreaterThan if field.is_ordinal() => {
            compare(email, field, value).is_some_and(|o| o.is_gt())
        }
        Operator::LessThan if field.is_ordinal() => {
            compare(email, field, value).is_some_and(|o| o.is_lt())
        }
        _ => false,
    }
}

/// Logical AND in list order. No conditions matches every email.
pub fn evaluate(email: &Email, workflow: &Workflow) -> bool {
    workflow.conditions.iter().all(|c| condition_holds(email, c))
}

/// Whether an automatic trigger fires for a newly ingested email.
pub fn trigger_fires(trigger: &Trigger, email: &Email) -> bool {
    match trigger {
        Trigger::AnyNewEmail => true,
        Trigger::Filter { category, priority } => {
            category.is_none_or(|c| c == email.category)
                && priority.is_none_or(|p| p == email.priority)
        }
        Trigger::Manual => false,
    }
}

fn text_of(email: &Email, field: ConditionField) -> String {
    match field {
        ConditionField::Subject => email.subject.clone(),
        ConditionField::Body => email.body(),
        _ => String::new(),
    }
}

fn equals(email: &Email, field: ConditionField, value: &str) -> bool {
    match field {
        ConditionField::Subject => email.subject == value,
        ConditionField::Body => email.body() == value,
        ConditionField::From => email.from_address.eq_ignore_ascii_case(value.trim()),
        ConditionField::FromName => email.from_name == value,
        ConditionField::To => email.to.iter().any(|a| a.eq_ignore_ascii_case(value.trim())),
        ConditionField::Category => value.parse::<Category>().is_ok_and(|c| c == email.category),
        ConditionField::Priority => value.parse::<Priority>().is_ok_and(|p| p == email.priority),
        ConditionField::Sentiment => {
            value.parse::<Sentiment>().is_ok_and(|s| s == email.sentiment)
        }
        ConditionField::ContentLength | ConditionField::AttachmentCount => {
            compare(email, field, value).is_some_and(|o| o.is_eq())
        }
        ConditionField::Unknown => false,
    }
}

/// Ordering of the email's ordinal field against `value`, or `None` when
/// the field is not ordinal or `value` does not parse.
fn compare(email: &Email, field: ConditionField, value: &str) -> Option<std::cmp::Ordering> {
    match field {
        ConditionField::Priority => {
            let other: Priority = value.parse().ok()?;
            Some(email.priority.cmp(&other))
        }
        ConditionField::ContentLength => {
            let other: usize = value.trim().parse().ok()?;
            Some(email.content_length().cmp(&other))
        }
        ConditionField::AttachmentCount => {
            let other: usize = value.trim().parse().ok()?;
            Some(email.attachments.len().cmp(&other))
        }
        _ => None,
    }
}

fn reply_subject(subject: &str) -> String {
    if subject.trim_start().to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Automatic workflow runs for one new email.
#[derive(Debug, Default)]
pub struct AutomaticRun {
    pub executions: Vec<WorkflowExecutionResult>,
    /// Workflows whose run could not be recorded, with the cause.
    pub failures: Vec<(Uuid, WorkflowError)>,
}

pub struct WorkflowEngine {
    store: MailStore,
    resolver: Arc<ThreadResolver>,
    sender: Arc<dyn MailSender>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn new(
        store: MailStore,
        resolver: Arc<ThreadResolver>,
        sender: Arc<dyn MailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            sender,
            clock,
        }
    }

    // ── Definitions ─────────────────────────────────────────────────

    pub async fn create_workflow(&self, mut workflow: Workflow) -> Result<Workflow, WorkflowError> {
        workflow.validate()?;
        let now = self.clock.now();
        workflow.created_at = now;
        workflow.updated_at = now;
        self.store.put_workflow(&workflow).await?;
        info!(workflow = %workflow.name, id = %workflow.id, "Workflow created");
        Ok(workflow)
    }

    /// Replace a stored workflow. The creation timestamp is kept.
    pub async fn update_workflow(&self, mut workflow: Workflow) -> Result<Workflow, WorkflowError> {
        let existing = self.get_workflow(workflow.id).await?;
        workflow.validate()?;
        workflow.created_at = existing.created_at;
        workflow.updated_at = self.clock.now();
        self.store.put_workflow(&workflow).await?;
        info!(workflow = %workflow.name, id = %workflow.id, "Workflow updated");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, WorkflowError> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or(WorkflowError::NotFound { id })
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self.store.list_workflows().await?)
    }

    // ── Triggers ────────────────────────────────────────────────────

    /// Run every enabled automatic workflow whose trigger fires for the
    /// email. Workflows run oldest first; a `tag` in one is visible to the
    /// next. A workflow that fails is logged and the rest still run.
    pub async fn run_for_new_email(&self, email_id: &str) -> Result<AutomaticRun, WorkflowError> {
        let mut email = self.load_email(email_id).await?;
        let workflows = self.store.list_workflows().await?;

        let mut run = AutomaticRun::default();
        for workflow in workflows.iter().filter(|w| w.is_automatic()) {
            if !trigger_fires(&workflow.trigger, &email) {
                continue;
            }
            match self
                .execute(&mut email, workflow, workflow.trigger.clone())
                .await
            {
                Ok(result) => run.executions.push(result),
                Err(e) => {
                    error!(
                        workflow = %workflow.name,
                        email_id = %email.id,
                        error = %e,
                        "Automatic workflow run failed"
                    );
                    run.failures.push((workflow.id, e));
                }
            }
        }
        Ok(run)
    }

    /// Run one workflow against an existing email, whatever its trigger.
    pub async fn run_on_demand(
        &self,
        workflow_id: Uuid,
        email_id: &str,
    ) -> Result<WorkflowExecutionResult, WorkflowError> {
        let workflow = self.get_workflow(workflow_id).await?;
        if !workflow.enabled {
            return Err(WorkflowError::Disabled { id: workflow_id });
        }
        let mut email = self.load_email(email_id).await?;
        self.execute(&mut email, &workflow, Trigger::Manual).await
    }

    async fn load_email(&self, email_id: &str) -> Result<Email, WorkflowError> {
        self.store
            .get_email(email_id)
            .await?
            .ok_or_else(|| WorkflowError::EmailNotFound {
                id: email_id.to_string(),
            })
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Evaluate and, on a match, run every action in order. The result is
    /// appended to the audit log whether or not the workflow matched.
    pub async fn execute(
        &self,
        email: &mut Email,
        workflow: &Workflow,
        trigger: Trigger,
    ) -> Result<WorkflowExecutionResult, WorkflowError> {
        let matched = evaluate(email, workflow);
        let mut outcomes = Vec::new();

        if matched {
            for action in &workflow.actions {
                let outcome = match self.run_action(email, action).await {
                    Ok(message) => ActionOutcome::ok(action, message),
                    Err(e) => ActionOutcome::failed(action, e.to_string()),
                };
                if outcome.success {
                    debug!(workflow = %workflow.name, action = %outcome.action, "Action succeeded");
                } else {
                    warn!(
                        workflow = %workflow.name,
                        email_id = %email.id,
                        action = %outcome.action,
                        error = %outcome.message,
                        "Action failed"
                    );
                }
                outcomes.push(outcome);
            }
        }

        let result = WorkflowExecutionResult {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            email_id: email.id.clone(),
            executed_at: self.clock.now(),
            trigger,
            matched,
            outcomes,
        };
        self.store.append_execution(&result).await?;

        info!(
            workflow = %workflow.name,
            email_id = %email.id,
            trigger = result.trigger.type_tag(),
            matched,
            actions = result.outcomes.len(),
            "Workflow executed"
        );
        Ok(result)
    }

    async fn run_action(&self, email: &mut Email, action: &Action) -> Result<String, WorkflowError> {
        match action {
            Action::SendReply { body, subject } => {
                let mail = OutgoingMail {
                    to: vec![email.from_address.clone()],
                    subject: subject
                        .clone()
                        .unwrap_or_else(|| reply_subject(&email.subject)),
                    body: body.clone(),
                    in_reply_to: email.message_id.clone(),
                };
                self.send(action, &mail).await?;
                Ok(format!("Reply sent to {}", email.from_address))
            }
            Action::Forward { to, note } => {
                let mut body = String::new();
                if let Some(note) = note {
                    body.push_str(note);
                    body.push_str("\n\n");
                }
                body.push_str("---------- Forwarded message ----------\n");
                body.push_str(&format!("From: {}\n", email.from_address));
                body.push_str(&format!("Subject: {}\n\n", email.subject));
                body.push_str(&email.body());

                let mail = OutgoingMail {
                    to: to.clone(),
                    subject: format!("Fwd: {}", email.subject),
                    body,
                    in_reply_to: None,
                };
                self.send(action, &mail).await?;
                Ok(format!("Forwarded to {}", to.join(", ")))
            }
            Action::Notify { to, message } => {
                let body = message.clone().unwrap_or_else(|| {
                    format!(
                        "New {} email from {}: {}",
                        email.category, email.from_address, email.subject
                    )
                });
                let mail = OutgoingMail {
                    to: to.clone(),
                    subject: format!("[{}] {}", email.priority, email.subject),
                    body,
                    in_reply_to: None,
                };
                self.send(action, &mail).await?;
                Ok(format!("Notified {}", to.join(", ")))
            }
            Action::Tag { category, priority } => self.tag(email, *category, *priority).await,
        }
    }

    async fn send(&self, action: &Action, mail: &OutgoingMail) -> Result<(), WorkflowError> {
        self.sender
            .send(mail)
            .await
            .map_err(|e| WorkflowError::ActionFailed {
                action: action.type_tag().to_string(),
                reason: e.to_string(),
            })
    }

    /// The only path that changes an email's classification after ingestion.
    async fn tag(
        &self,
        email: &mut Email,
        category: Option<Category>,
        priority: Option<Priority>,
    ) -> Result<String, WorkflowError> {
        if category.is_none() && priority.is_none() {
            return Err(WorkflowError::ActionFailed {
                action: "tag".into(),
                reason: "nothing to tag".into(),
            });
        }

        let mut updated = email.clone();
        if let Some(category) = category {
            updated.category = category;
        }
        if let Some(priority) = priority {
            updated.priority = priority;
        }
        self.store.put_email(&updated).await?;

        let priority_changed = updated.priority != email.priority;
        *email = updated;
        if priority_changed
            && let Err(e) = self
                .resolver
                .refresh_priority(&email.id, email.priority)
                .await
        {
            // The email is stored; ThreadResolver::load re-derives urgency.
            warn!(email_id = %email.id, error = %e, "Conversation urgency not persisted");
        }
        Ok(format!("Tagged {} / {}", email.category, email.priority))
    }
}
