//! Read-side query surface for the routing layer.
//!
//! Reads go straight to the store and may observe a conversation while
//! ingestion is updating it. Workflow writes and on-demand runs delegate to
//! the [`WorkflowEngine`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueryError;
use crate::pipeline::clock::Clock;
use crate::pipeline::threads::ThreadResolver;
use crate::pipeline::types::{
    Category, Conversation, Email, Priority, RejectedAttachment, Sentiment,
};
use crate::store::records::MailStore;
use crate::store::traits::keys;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::model::{Workflow, WorkflowExecutionResult};

/// Characters kept in an [`EmailSummary`] preview.
pub const PREVIEW_CHARS: usize = 200;

const DEFAULT_LIMIT: usize = 50;

// ── Projections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailFilter {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Compact view of an email for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub subject: String,
    pub from_address: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub has_attachments: bool,
    pub preview: String,
    pub priority: Priority,
    pub category: Category,
    pub sentiment: Sentiment,
    pub conversation_id: Option<String>,
}

impl EmailSummary {
    pub fn from_email(email: &Email) -> Self {
        Self {
            id: email.id.clone(),
            subject: email.subject.clone(),
            from_address: email.from_address.clone(),
            from_name: email.from_name.clone(),
            to: email.to.clone(),
            received_at: email.received_at,
            has_attachments: email.has_attachments(),
            preview: preview(email),
            priority: email.priority,
            category: email.category,
            sentiment: email.sentiment,
            conversation_id: email.conversation_id.clone(),
        }
    }
}

/// Text body first, then raw HTML, truncated on a char boundary.
fn preview(email: &Email) -> String {
    let source = email
        .text_body
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| email.html_body.as_deref().filter(|s| !s.trim().is_empty()));
    match source {
        Some(content) => content.chars().take(PREVIEW_CHARS).collect(),
        None => "(no content)".to_string(),
    }
}

/// Full email plus derived metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDetail {
    pub email: Email,
    pub content_length: usize,
    pub has_attachments: bool,
    pub ingested_at: DateTime<Utc>,
    pub rejected_attachments: Vec<RejectedAttachment>,
}

/// Thread context for one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub email_thread: Vec<String>,
    pub participants: Vec<String>,
    pub topic: String,
    pub urgency: Priority,
    pub last_activity: DateTime<Utc>,
    pub sentiment: Sentiment,
}

impl ConversationContext {
    fn new(conversation: Conversation, email: &Email) -> Self {
        Self {
            conversation_id: conversation.id,
            email_thread: conversation.email_ids,
            participants: conversation.participants.into_iter().collect(),
            topic: conversation.topic,
            urgency: conversation.urgency,
            last_activity: conversation.last_activity,
            sentiment: email.sentiment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_emails: usize,
    pub total_conversations: usize,
    pub total_attachments: usize,
    pub quarantined: u64,
    pub workflows: u64,
    pub executions: u64,
    pub store_bytes: u64,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
}

// ── Service ─────────────────────────────────────────────────────────

pub struct QueryService {
    store: MailStore,
    resolver: Arc<ThreadResolver>,
    engine: Arc<WorkflowEngine>,
    clock: Arc<dyn Clock>,
}

impl QueryService {
    pub fn new(
        store: MailStore,
        resolver: Arc<ThreadResolver>,
        engine: Arc<WorkflowEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            engine,
            clock,
        }
    }

    /// Emails newest first, filtered then paged.
    pub async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<EmailSummary>, QueryError> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            return Err(QueryError::Invalid("limit must be positive".into()));
        }
        let emails = self.sorted_emails().await?;
        Ok(emails
            .iter()
            .filter(|e| filter.category.is_none_or(|c| c == e.category))
            .filter(|e| filter.priority.is_none_or(|p| p == e.priority))
            .skip(filter.offset)
            .take(limit)
            .map(EmailSummary::from_email)
            .collect())
    }

    pub async fn get_email(&self, id: &str) -> Result<EmailDetail, QueryError> {
        let email = self.load_email(id).await?;
        Ok(EmailDetail {
            content_length: email.content_length(),
            has_attachments: email.has_attachments(),
            ingested_at: email.ingested_at,
            rejected_attachments: email.rejected_attachments.clone(),
            email,
        })
    }

    pub async fn conversation_context(&self, email_id: &str) -> Result<ConversationContext, QueryError> {
        let email = self.load_email(email_id).await?;
        if let Some(conversation) = self.resolver.conversation_of(email_id).await {
            return Ok(ConversationContext::new(conversation, &email));
        }
        let conversation_id = email
            .conversation_id
            .clone()
            .ok_or_else(|| QueryError::not_found("Conversation", format!("for email {email_id}")))?;
        let conversation = self
            .store
            .get_conversation(&conversation_id)
            .await?
            .ok_or_else(|| QueryError::not_found("Conversation", &conversation_id))?;
        Ok(ConversationContext::new(conversation, &email))
    }

    /// Case-insensitive substring search over subject and body.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<EmailSummary>, QueryError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(QueryError::Invalid("search query must not be empty".into()));
        }
        let emails = self.sorted_emails().await?;
        Ok(emails
            .iter()
            .filter(|e| {
                e.subject.to_lowercase().contains(&needle)
                    || e.body().to_lowercase().contains(&needle)
            })
            .take(limit.unwrap_or(DEFAULT_LIMIT))
            .map(EmailSummary::from_email)
            .collect())
    }

    // ── Workflows ───────────────────────────────────────────────────

    pub async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow, QueryError> {
        Ok(self.engine.create_workflow(workflow).await?)
    }

    pub async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow, QueryError> {
        Ok(self.engine.update_workflow(workflow).await?)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, QueryError> {
        Ok(self.engine.get_workflow(id).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, QueryError> {
        Ok(self.engine.list_workflows().await?)
    }

    pub async fn run_workflow(
        &self,
        workflow_id: Uuid,
        email_id: &str,
    ) -> Result<WorkflowExecutionResult, QueryError> {
        Ok(self.engine.run_on_demand(workflow_id, email_id).await?)
    }

    /// Execution results, optionally narrowed to one workflow and/or email.
    pub async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
        email_id: Option<&str>,
    ) -> Result<Vec<WorkflowExecutionResult>, QueryError> {
        if let Some(id) = workflow_id
            && self.store.get_workflow(id).await?.is_none()
        {
            return Err(QueryError::not_found("Workflow", id));
        }
        let mut results = self.store.list_executions(workflow_id).await?;
        if let Some(email_id) = email_id {
            results.retain(|r| r.email_id == email_id);
        }
        results.sort_by(|a, b| a.executed_at.cmp(&b.executed_at).then(a.id.cmp(&b.id)));
        Ok(results)
    }

    // ── Statistics ──────────────────────────────────────────────────

    pub async fn statistics(&self) -> Result<Statistics, QueryError> {
        let emails = self.store.list_emails().await?;
        let conversations = self.store.usage(keys::CONVERSATION).await?;

        let mut by_category: BTreeMap<String, usize> =
            Category::ALL.iter().map(|c| (c.to_string(), 0)).collect();
        let mut by_priority: BTreeMap<String, usize> =
            Priority::ALL.iter().map(|p| (p.to_string(), 0)).collect();
        for email in &emails {
            *by_category.entry(email.category.to_string()).or_default() += 1;
            *by_priority.entry(email.priority.to_string()).or_default() += 1;
        }

        Ok(Statistics {
            total_emails: emails.len(),
            total_conversations: conversations.objects as usize,
            total_attachments: emails.iter().map(|e| e.attachments.len()).sum(),
            quarantined: self.store.usage(keys::QUARANTINE).await?.objects,
            workflows: self.store.usage(keys::WORKFLOW).await?.objects,
            executions: self.store.usage(keys::EXECUTION).await?.objects,
            store_bytes: self.store.usage("").await?.bytes,
            by_category,
            by_priority,
            generated_at: self.clock.now(),
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn load_email(&self, id: &str) -> Result<Email, QueryError> {
        self.store
            .get_email(id)
            .await?
            .ok_or_else(|| QueryError::not_found("Email", id))
    }

    async fn sorted_emails(&self) -> Result<Vec<Email>, QueryError> {
        let mut emails = self.store.list_emails().await?;
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(a.id.cmp(&b.id)));
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::sender::{MailSender, OutgoingMail};
    use crate::config::ThreadConfig;
    use crate::error::ChannelError;
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::types::Attachment;
    use crate::store::InMemoryBlobStore;
    use crate::workflow::model::Trigger;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    struct NullSender;

    #[async_trait]
    impl MailSender for NullSender {
        async fn send(&self, _mail: &OutgoingMail) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn report_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap()
    }

    fn email(id: &str, subject: &str, minutes: i64) -> Email {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap() + Duration::minutes(minutes);
        Email {
            id: id.into(),
            message_id: None,
            subject: subject.into(),
            from_address: "alice@example.com".into(),
            from_name: String::new(),
            to: vec!["bob@example.com".into()],
            received_at: t,
            sent_at: None,
            text_body: Some(format!("body of {subject}")),
            html_body: None,
            attachments: vec![],
            rejected_attachments: vec![],
            in_reply_to: None,
            references: vec![],
            priority: Priority::Normal,
            category: Category::General,
            sentiment: Sentiment::Neutral,
            conversation_id: None,
            ingested_at: t,
        }
    }

    async fn service(emails: Vec<Email>) -> QueryService {
        let store = MailStore::new(Arc::new(InMemoryBlobStore::new()));
        let resolver = Arc::new(ThreadResolver::new(store.clone(), &ThreadConfig::default()));
        for mut e in emails {
            resolver.commit(&mut e).await.unwrap();
        }
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(report_time()));
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            Arc::clone(&resolver),
            Arc::new(NullSender),
            Arc::clone(&clock),
        ));
        QueryService::new(store, resolver, engine, clock)
    }

    #[tokio::test]
    async fn list_filters_then_pages_newest_first() {
        let mut support = email("s1", "Preciso de ajuda", 5);
        support.category = Category::Support;
        let svc = service(vec![email("g1", "one", 0), support, email("g2", "two", 10)]).await;

        let all = svc.list_emails(&EmailFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["g2", "s1", "g1"]);

        let general = svc
            .list_emails(&EmailFilter {
                category: Some(Category::General),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].id, "g1");

        assert!(matches!(
            svc.list_emails(&EmailFilter {
                limit: Some(0),
                ..Default::default()
            })
            .await,
            Err(QueryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn preview_prefers_text_then_html() {
        let mut long = email("m1", "long", 0);
        long.text_body = Some("x".repeat(500));
        assert_eq!(EmailSummary::from_email(&long).preview.len(), PREVIEW_CHARS);

        let mut html = email("m2", "html", 0);
        html.text_body = None;
        html.html_body = Some("<p>Olá</p>".into());
        assert_eq!(EmailSummary::from_email(&html).preview, "<p>Olá</p>");

        let mut empty = email("m3", "empty", 0);
        empty.text_body = None;
        assert_eq!(EmailSummary::from_email(&empty).preview, "(no content)");
    }

    #[tokio::test]
    async fn missing_ids_are_typed_not_found() {
        let svc = service(vec![]).await;
        match svc.get_email("ghost").await {
            Err(QueryError::NotFound { entity, id }) => {
                assert_eq!(entity, "Email");
                assert_eq!(id, "ghost");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(matches!(
            svc.conversation_context("ghost").await,
            Err(QueryError::NotFound { .. })
        ));
        assert!(matches!(
            svc.get_workflow(Uuid::new_v4()).await,
            Err(QueryError::NotFound { .. })
        ));
        assert!(matches!(
            svc.list_executions(Some(Uuid::new_v4()), None).await,
            Err(QueryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn context_reports_thread_and_sentiment() {
        let mut reply = email("b2", "RE: Pedido #45", 30);
        reply.from_address = "bob@example.com".into();
        reply.to = vec!["alice@example.com".into()];
        reply.sentiment = Sentiment::Positive;
        let svc = service(vec![email("b1", "Pedido #45", 0), reply]).await;

        let ctx = svc.conversation_context("b2").await.unwrap();
        assert_eq!(ctx.email_thread, vec!["b1", "b2"]);
        assert_eq!(ctx.topic, "pedido #45");
        assert_eq!(ctx.participants, vec!["alice@example.com", "bob@example.com"]);
        assert_eq!(ctx.sentiment, Sentiment::Positive);
    }

    #[tokio::test]
    async fn search_matches_subject_or_body() {
        let svc = service(vec![email("m1", "Fatura de março", 0), email("m2", "Olá", 1)]).await;
        let hits = svc.search("FATURA", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m1");

        let hits = svc.search("body of", None).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(matches!(svc.search("  ", None).await, Err(QueryError::Invalid(_))));
    }

    #[tokio::test]
    async fn statistics_count_everything() {
        let mut with_file = email("m1", "invoice", 0);
        with_file.category = Category::Purchase;
        with_file.priority = Priority::High;
        with_file.attachments.push(Attachment {
            id: "1-abc".into(),
            filename: "invoice.pdf".into(),
            content_type: "application/pdf".into(),
            size: 3,
            storage_key: keys::attachment("m1", "1-abc"),
        });
        let svc = service(vec![with_file, email("m2", "unrelated", 1)]).await;
        svc.store.quarantine("bad", b"junk".to_vec()).await.unwrap();
        svc.create_workflow(Workflow::new("wf", Trigger::AnyNewEmail, vec![], vec![]))
            .await
            .unwrap();

        let stats = svc.statistics().await.unwrap();
        assert_eq!(stats.generated_at, report_time());
        assert_eq!(stats.total_emails, 2);
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_attachments, 1);
        assert_eq!(stats.quarantined, 1);
        assert_eq!(stats.workflows, 1);
        assert_eq!(stats.executions, 0);
        assert!(stats.store_bytes > 0);
        assert_eq!(stats.by_category["purchase"], 1);
        assert_eq!(stats.by_category["general"], 1);
        assert_eq!(stats.by_category["support"], 0);
        assert_eq!(stats.by_priority["high"], 1);
        assert_eq!(stats.by_priority["normal"], 1);
    }

    #[tokio::test]
    async fn executions_filter_by_email() {
        let svc = service(vec![email("m1", "a", 0), email("m2", "b", 1)]).await;
        let wf = svc
            .create_workflow(Workflow::new("manual", Trigger::Manual, vec![], vec![]))
            .await
            .unwrap();
        svc.run_workflow(wf.id, "m1").await.unwrap();
        svc.run_workflow(wf.id, "m2").await.unwrap();

        assert_eq!(svc.list_executions(Some(wf.id), None).await.unwrap().len(), 2);
        let only = svc.list_executions(None, Some("m2")).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].email_id, "m2");
    }
}
