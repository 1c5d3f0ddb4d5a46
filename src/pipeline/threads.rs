//! Thread resolver: clusters emails into conversations.
//!
//! Matching, in order:
//! 1. an `In-Reply-To` / `References` value naming a member's id or
//!    Message-ID joins that member's conversation
//! 2. otherwise a conversation whose topic equals the normalized subject,
//!    whose participants overlap the email's, and whose last activity is
//!    within the merge window
//! 3. several candidates: most recent last activity wins, then lowest id
//! 4. nothing matches: a new conversation `conv_{email id}`
//!
//! The index lives behind one mutex. Resolution and the conversation and
//! email writes happen under it, so concurrent merges cannot lose members.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ThreadConfig;
use crate::error::{IngestError, StoreError};
use crate::pipeline::types::{Conversation, Email, Priority};
use crate::store::records::MailStore;

static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:re|res|fw|fwd|enc|aw|tr)\s*(?:\[\d+\])?\s*:\s*")
        .expect("reply prefix pattern is valid")
});

/// Lowercase, strip any number of leading reply/forward prefixes, and
/// collapse whitespace. `"RE: Fwd: Pedido  #45"` → `"pedido #45"`.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    while let Some(m) = REPLY_PREFIX.find(rest) {
        if m.end() == 0 {
            break;
        }
        rest = &rest[m.end()..];
    }
    rest.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Index ───────────────────────────────────────────────────────────

/// What the index remembers about each member email.
#[derive(Debug, Clone)]
struct Member {
    received_at: DateTime<Utc>,
    priority: Priority,
    topic: String,
    participants: BTreeSet<String>,
    message_id: Option<String>,
}

impl Member {
    fn of(email: &Email) -> Self {
        Self {
            received_at: email.received_at,
            priority: email.priority,
            topic: normalize_subject(&email.subject),
            participants: email.participants(),
            message_id: email.message_id.clone(),
        }
    }
}

/// Result of resolving one email.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub conversation: Conversation,
    pub created: bool,
}

/// Result of removing an email from its conversation.
#[derive(Debug, Clone)]
pub enum Detached {
    /// The conversation still has members.
    Updated(Conversation),
    /// The email was the only member; the conversation is gone.
    Removed(String),
}

/// In-memory conversation index. Pure; persistence is the resolver's job.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    conversations: HashMap<String, Conversation>,
    members: HashMap<String, Member>,
    /// Email id or Message-ID → conversation id.
    owners: HashMap<String, String>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn conversation_of(&self, email_id: &str) -> Option<&Conversation> {
        self.owners
            .get(email_id)
            .and_then(|id| self.conversations.get(id))
    }

    fn find_by_reference(&self, email: &Email) -> Option<String> {
        email
            .thread_references()
            .find_map(|r| self.owners.get(r).cloned())
    }

    fn find_by_subject(&self, email: &Email, window: Duration) -> Option<String> {
        let topic = normalize_subject(&email.subject);
        if topic.is_empty() {
            return None;
        }
        let participants = email.participants();

        self.conversations
            .values()
            .filter(|c| c.topic == topic)
            .filter(|c| c.participants.intersection(&participants).next().is_some())
            .filter(|c| (email.received_at - c.last_activity).abs() <= window)
            .max_by(|a, b| {
                a.last_activity
                    .cmp(&b.last_activity)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|c| c.id.clone())
    }

    fn fresh_id(&self, email_id: &str) -> String {
        let base = format!("conv_{email_id}");
        if !self.conversations.contains_key(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|id| !self.conversations.contains_key(id))
            .unwrap_or(base)
    }

    /// Re-derive ordering, participants, topic, urgency and last activity
    /// from the members.
    fn rederive(&self, conversation: &mut Conversation) {
        conversation.email_ids.sort_by(|a, b| {
            let ta = self.members.get(a).map(|m| m.received_at);
            let tb = self.members.get(b).map(|m| m.received_at);
            ta.cmp(&tb).then_with(|| a.cmp(b))
        });
        conversation.email_ids.dedup();

        let members: Vec<&Member> = conversation
            .email_ids
            .iter()
            .filter_map(|id| self.members.get(id))
            .collect();

        if let Some(first) = members.first() {
            conversation.topic = first.topic.clone();
        }
        conversation.participants = members
            .iter()
            .flat_map(|m| m.participants.iter().cloned())
            .collect();
        conversation.urgency = members
            .iter()
            .map(|m| m.priority)
            .max()
            .unwrap_or(Priority::Normal);
        if let Some(latest) = members.iter().map(|m| m.received_at).max() {
            conversation.last_activity = latest;
        }
    }

    fn register(&mut self, email: &Email, conversation_id: &str) {
        self.members.insert(email.id.clone(), Member::of(email));
        self.owners
            .insert(email.id.clone(), conversation_id.to_string());
        if let Some(message_id) = &email.message_id {
            self.owners
                .entry(message_id.clone())
                .or_insert_with(|| conversation_id.to_string());
        }
    }

    /// Assign `email` to a conversation and set its `conversation_id`.
    pub fn resolve(&mut self, email: &mut Email, window: Duration) -> Resolution {
        let existing = self
            .find_by_reference(email)
            .or_else(|| self.find_by_subject(email, window));
        let created = existing.is_none();
        let id = existing.unwrap_or_else(|| self.fresh_id(&email.id));

        self.register(email, &id);
        let mut conversation = self.conversations.remove(&id).unwrap_or_else(|| Conversation {
            id: id.clone(),
            email_ids: Vec::new(),
            participants: BTreeSet::new(),
            topic: String::new(),
            urgency: Priority::Normal,
            last_activity: email.received_at,
            created_at: email.ingested_at,
        });
        if !conversation.email_ids.contains(&email.id) {
            conversation.email_ids.push(email.id.clone());
        }
        self.rederive(&mut conversation);
        self.conversations.insert(id.clone(), conversation.clone());

        email.conversation_id = Some(id);
        Resolution {
            conversation,
            created,
        }
    }

    /// Remove `email_id` from its conversation.
    pub fn detach(&mut self, email_id: &str) -> Option<Detached> {
        let conversation_id = self.owners.get(email_id)?.clone();
        let member = self.members.remove(email_id);
        self.owners.remove(email_id);
        if let Some(message_id) = member.and_then(|m| m.message_id) {
            if self.owners.get(&message_id) == Some(&conversation_id) {
                self.owners.remove(&message_id);
            }
        }

        let mut conversation = self.conversations.remove(&conversation_id)?;
        conversation.email_ids.retain(|id| id != email_id);
        if conversation.email_ids.is_empty() {
            return Some(Detached::Removed(conversation_id));
        }
        self.rederive(&mut conversation);
        self.conversations
            .insert(conversation_id, conversation.clone());
        Some(Detached::Updated(conversation))
    }

    /// Record a new priority for a member and re-derive urgency.
    pub fn set_priority(&mut self, email_id: &str, priority: Priority) -> Option<Conversation> {
        self.members.get_mut(email_id)?.priority = priority;
        let conversation_id = self.owners.get(email_id)?.clone();
        let mut conversation = self.conversations.remove(&conversation_id)?;
        self.rederive(&mut conversation);
        self.conversations
            .insert(conversation_id, conversation.clone());
        Some(conversation)
    }

    /// Rebuild one persisted conversation from its member emails. Members
    /// without an email record are dropped. Returns the re-derived
    /// conversation, or `None` if no member survived.
    fn restore(&mut self, mut conversation: Conversation, emails: &HashMap<&str, &Email>) -> Option<Conversation> {
        conversation.email_ids.retain(|id| {
            emails
                .get(id.as_str())
                .is_some_and(|e| e.conversation_id.as_deref() == Some(conversation.id.as_str()))
        });
        if conversation.email_ids.is_empty() {
            return None;
        }
        for id in &conversation.email_ids {
            if let Some(email) = emails.get(id.as_str()) {
                self.register(email, &conversation.id);
            }
        }
        self.rederive(&mut conversation);
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Some(conversation)
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// Owns the conversation index and persists conversation membership.
pub struct ThreadResolver {
    index: Mutex<ConversationIndex>,
    store: MailStore,
    merge_window: Duration,
}

impl ThreadResolver {
    /// Start with an empty index.
    pub fn new(store: MailStore, config: &ThreadConfig) -> Self {
        Self {
            index: Mutex::new(ConversationIndex::new()),
            store,
            merge_window: config.merge_window,
        }
    }

    /// Rebuild the index from persisted conversations and emails.
    ///
    /// Conversations are pruned of members whose email was never written;
    /// emails without a live conversation are resolved again.
    pub async fn load(store: MailStore, config: &ThreadConfig) -> Result<Self, StoreError> {
        let conversations = store.list_conversations().await?;
        let emails = store.list_emails().await?;
        let by_id: HashMap<&str, &Email> = emails.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut index = ConversationIndex::new();
        for persisted in conversations {
            let id = persisted.id.clone();
            match index.restore(persisted.clone(), &by_id) {
                Some(restored) if restored != persisted => {
                    debug!(conversation = %id, "Repairing persisted conversation");
                    store.put_conversation(&restored).await?;
                }
                Some(_) => {}
                None => {
                    warn!(conversation = %id, "Dropping conversation with no stored members");
                    store.delete_conversation(&id).await?;
                }
            }
        }

        let mut orphans: Vec<Email> = emails
            .iter()
            .filter(|e| index.conversation_of(&e.id).is_none())
            .cloned()
            .collect();
        orphans.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        for mut email in orphans {
            warn!(id = %email.id, "Re-threading email without a conversation");
            let resolution = index.resolve(&mut email, config.merge_window);
            store.put_conversation(&resolution.conversation).await?;
            store.put_email(&email).await?;
        }

        info!(
            conversations = index.len(),
            emails = emails.len(),
            "Conversation index loaded"
        );
        Ok(Self {
            index: Mutex::new(index),
            store,
            merge_window: config.merge_window,
        })
    }

    /// Resolve `email` into a conversation and persist both, conversation
    /// first. The email record is written last; if either write fails the
    /// assignment is undone and nothing refers to the email.
    ///
    /// Returns `None` without touching anything when an email with the same
    /// id is already stored. The check runs under the index lock, so two
    /// workers racing on one id commit it once.
    pub async fn commit(&self, email: &mut Email) -> Result<Option<Conversation>, IngestError> {
        let mut index = self.index.lock().await;
        if self.store.email_exists(&email.id).await? {
            debug!(id = %email.id, "Email already stored, not threading again");
            return Ok(None);
        }
        let Resolution {
            conversation,
            created,
        } = index.resolve(email, self.merge_window);

        if let Err(e) = self.store.put_conversation(&conversation).await {
            index.detach(&email.id);
            email.conversation_id = None;
            return Err(e.into());
        }

        if let Err(e) = self.store.put_email(email).await {
            let detached = index.detach(&email.id);
            email.conversation_id = None;
            self.persist_detached(detached).await;
            return Err(e.into());
        }

        debug!(
            id = %email.id,
            conversation = %conversation.id,
            created,
            members = conversation.email_ids.len(),
            "Email threaded"
        );
        Ok(Some(conversation))
    }

    async fn persist_detached(&self, detached: Option<Detached>) {
        let result = match &detached {
            Some(Detached::Updated(conversation)) => self.store.put_conversation(conversation).await,
            Some(Detached::Removed(id)) => self.store.delete_conversation(id).await,
            None => Ok(()),
        };
        if let Err(e) = result {
            // The next load() prunes the dangling member.
            warn!(error = %e, "Failed to roll back conversation membership");
        }
    }

    /// Re-derive urgency after a member's priority changed and persist it.
    pub async fn refresh_priority(
        &self,
        email_id: &str,
        priority: Priority,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut index = self.index.lock().await;
        let Some(conversation) = index.set_priority(email_id, priority) else {
            return Ok(None);
        };
        self.store.put_conversation(&conversation).await?;
        Ok(Some(conversation))
    }

    /// Snapshot of the conversation owning `email_id`.
    pub async fn conversation_of(&self, email_id: &str) -> Option<Conversation> {
        self.index.lock().await.conversation_of(email_id).cloned()
    }

    pub async fn conversation_count(&self) -> usize {
        self.index.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Category, Sentiment};
    use crate::store::InMemoryBlobStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, hour, minute, 0).unwrap()
    }

    fn email(id: &str, subject: &str, from: &str, to: &[&str], received_at: DateTime<Utc>) -> Email {
        Email {
            id: id.into(),
            message_id: Some(format!("{id}@mail.test")),
            subject: subject.into(),
            from_address: from.into(),
            from_name: String::new(),
            to: to.iter().map(|s| s.to_string()).collect(),
            received_at,
            sent_at: None,
            text_body: Some("body".into()),
            html_body: None,
            attachments: vec![],
            rejected_attachments: vec![],
            in_reply_to: None,
            references: vec![],
            priority: Priority::Normal,
            category: Category::General,
            sentiment: Sentiment::Neutral,
            conversation_id: None,
            ingested_at: received_at,
        }
    }

    fn window() -> Duration {
        Duration::hours(72)
    }

    // ── normalize_subject ───────────────────────────────────────

    #[test]
    fn subject_prefixes_are_stripped() {
        assert_eq!(normalize_subject("RE: Pedido #45"), "pedido #45");
        assert_eq!(normalize_subject("Res: FW: fwd:  Pedido   #45 "), "pedido #45");
        assert_eq!(normalize_subject("Re[2]: Status"), "status");
        assert_eq!(normalize_subject("ENC: Relatório"), "relatório");
        assert_eq!(normalize_subject("Reunião amanhã"), "reunião amanhã");
        assert_eq!(normalize_subject("   "), "");
    }

    // ── Merging ─────────────────────────────────────────────────

    #[test]
    fn reply_merges_into_same_conversation() {
        let mut index = ConversationIndex::new();
        let mut b1 = email("b1", "Pedido #45", "alice@x.com", &["bob@y.com"], at(10, 0));
        let mut b2 = email("b2", "RE: Pedido #45", "bob@y.com", &["alice@x.com"], at(10, 30));
        b1.priority = Priority::Low;
        b2.priority = Priority::Medium;

        let first = index.resolve(&mut b1, window());
        let second = index.resolve(&mut b2, window());

        assert!(first.created);
        assert!(!second.created);
        let conv = second.conversation;
        assert_eq!(conv.id, "conv_b1");
        assert_eq!(conv.email_ids, vec!["b1", "b2"]);
        assert_eq!(
            conv.participants.iter().cloned().collect::<Vec<_>>(),
            vec!["alice@x.com", "bob@y.com"]
        );
        assert_eq!(conv.urgency, Priority::Medium);
        assert_eq!(conv.topic, "pedido #45");
        assert_eq!(conv.last_activity, at(10, 30));
        assert_eq!(b2.conversation_id.as_deref(), Some("conv_b1"));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let start = at(8, 0);
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Status", "alice@x.com", &["bob@y.com"], start);
        index.resolve(&mut a, window());

        let mut inside = email("b", "Re: Status", "bob@y.com", &["alice@x.com"], start + window());
        assert_eq!(index.resolve(&mut inside, window()).conversation.id, "conv_a");

        let mut index = ConversationIndex::new();
        let mut a = email("a", "Status", "alice@x.com", &["bob@y.com"], start);
        index.resolve(&mut a, window());
        let mut outside = email(
            "b",
            "Re: Status",
            "bob@y.com",
            &["alice@x.com"],
            start + window() + Duration::seconds(1),
        );
        let resolution = index.resolve(&mut outside, window());
        assert!(resolution.created);
        assert_eq!(resolution.conversation.id, "conv_b");
    }

    #[test]
    fn empty_subjects_never_merge() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "", "alice@x.com", &["bob@y.com"], at(9, 0));
        let mut b = email("b", "RE:", "bob@y.com", &["alice@x.com"], at(9, 5));
        index.resolve(&mut a, window());
        assert!(index.resolve(&mut b, window()).created);
    }

    #[test]
    fn reused_subject_without_shared_participants_stays_apart() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Invoice", "alice@x.com", &["bob@y.com"], at(9, 0));
        let mut b = email("b", "Invoice", "carol@z.com", &["dave@w.com"], at(9, 5));
        index.resolve(&mut a, window());
        assert!(index.resolve(&mut b, window()).created);
    }

    #[test]
    fn shared_sender_is_enough_to_merge() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Pedido #45", "alice@x.com", &["bob@y.com"], at(9, 0));
        let mut b = email("b", "RE: Pedido #45", "alice@x.com", &["carol@z.com"], at(9, 30));
        index.resolve(&mut a, window());
        let resolution = index.resolve(&mut b, window());
        assert!(!resolution.created);
        assert_eq!(resolution.conversation.id, "conv_a");
        assert_eq!(resolution.conversation.participants.len(), 3);
    }

    #[test]
    fn same_sender_outside_window_starts_new_conversation() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Weekly news", "news@shop.com", &["u1@x.com"], at(9, 0));
        let mut b = email(
            "b",
            "Weekly news",
            "news@shop.com",
            &["u2@x.com"],
            at(9, 0) + window() + Duration::hours(1),
        );
        index.resolve(&mut a, window());
        assert!(index.resolve(&mut b, window()).created);
    }

    #[test]
    fn explicit_reference_wins_over_subject() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Kickoff", "alice@x.com", &["bob@y.com"], at(9, 0));
        index.resolve(&mut a, window());

        // Different subject, outside the window, but replies to a.
        let mut b = email("b", "Something else", "bob@y.com", &["alice@x.com"], at(9, 0) + Duration::days(30));
        b.in_reply_to = Some("a@mail.test".into());
        let resolution = index.resolve(&mut b, window());
        assert!(!resolution.created);
        assert_eq!(resolution.conversation.id, "conv_a");
        // Topic stays with the earliest member
        assert_eq!(resolution.conversation.topic, "kickoff");
    }

    #[test]
    fn most_recently_active_candidate_wins() {
        let c1 = email("c1", "Sync", "alice@x.com", &["bob@y.com"], at(8, 0));
        let c2 = email("c2", "Sync", "carol@z.com", &["dave@w.com"], at(9, 0));

        // Same outcome whichever order the candidates were created in.
        for order in [[&c1, &c2], [&c2, &c1]] {
            let mut index = ConversationIndex::new();
            for seed in order {
                index.resolve(&mut seed.clone(), window());
            }
            assert_eq!(index.len(), 2);

            // Overlaps both: bob with c1, dave with c2.
            let mut newcomer = email(
                "p",
                "Re: Sync",
                "eve@v.com",
                &["bob@y.com", "dave@w.com"],
                at(9, 30),
            );
            assert_eq!(index.resolve(&mut newcomer, window()).conversation.id, "conv_c2");
        }
    }

    #[test]
    fn equal_activity_tie_breaks_on_lowest_id() {
        let mut index = ConversationIndex::new();
        let mut c1 = email("x1", "Sync", "alice@x.com", &["bob@y.com"], at(8, 0));
        let mut c2 = email("x2", "Sync", "carol@z.com", &["dave@w.com"], at(8, 0));
        index.resolve(&mut c2, window());
        index.resolve(&mut c1, window());

        let mut newcomer = email("p", "Sync", "eve@v.com", &["bob@y.com", "dave@w.com"], at(9, 0));
        assert_eq!(index.resolve(&mut newcomer, window()).conversation.id, "conv_x1");
    }

    #[test]
    fn out_of_order_arrival_keeps_chronology() {
        let mut index = ConversationIndex::new();
        let mut late = email("late", "Re: Plan", "bob@y.com", &["alice@x.com"], at(11, 0));
        let mut early = email("early", "Plan", "alice@x.com", &["bob@y.com"], at(10, 0));
        index.resolve(&mut late, window());
        let conv = index.resolve(&mut early, window()).conversation;

        assert_eq!(conv.id, "conv_late");
        assert_eq!(conv.email_ids, vec!["early", "late"]);
        assert_eq!(conv.topic, "plan");
        assert_eq!(conv.last_activity, at(11, 0));
    }

    #[test]
    fn detach_and_priority_refresh() {
        let mut index = ConversationIndex::new();
        let mut a = email("a", "Plan", "alice@x.com", &["bob@y.com"], at(10, 0));
        let mut b = email("b", "Re: Plan", "bob@y.com", &["alice@x.com"], at(10, 5));
        index.resolve(&mut a, window());
        index.resolve(&mut b, window());

        let conv = index.set_priority("b", Priority::High).unwrap();
        assert_eq!(conv.urgency, Priority::High);

        match index.detach("b") {
            Some(Detached::Updated(conv)) => {
                assert_eq!(conv.email_ids, vec!["a"]);
                assert_eq!(conv.urgency, Priority::Normal);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
        assert!(matches!(index.detach("a"), Some(Detached::Removed(id)) if id == "conv_a"));
        assert!(index.is_empty());
        assert!(index.detach("a").is_none());
    }

    // ── Resolver persistence ────────────────────────────────────

    fn store() -> MailStore {
        MailStore::new(Arc::new(InMemoryBlobStore::new()))
    }

    #[tokio::test]
    async fn commit_persists_conversation_and_email() {
        let store = store();
        let resolver = ThreadResolver::new(store.clone(), &ThreadConfig::default());

        let mut a = email("a", "Plan", "alice@x.com", &["bob@y.com"], at(10, 0));
        let conv = resolver.commit(&mut a).await.unwrap().unwrap();

        let stored = store.get_email("a").await.unwrap().unwrap();
        assert_eq!(stored.conversation_id.as_deref(), Some(conv.id.as_str()));
        assert_eq!(store.get_conversation(&conv.id).await.unwrap().unwrap(), conv);
    }

    #[tokio::test]
    async fn second_commit_of_same_id_is_refused() {
        let store = store();
        let resolver = ThreadResolver::new(store.clone(), &ThreadConfig::default());

        let mut a = email("a", "Plan", "alice@x.com", &["bob@y.com"], at(10, 0));
        resolver.commit(&mut a).await.unwrap().unwrap();

        let mut again = email("a", "Different", "carol@z.com", &["dave@w.com"], at(11, 0));
        assert!(resolver.commit(&mut again).await.unwrap().is_none());
        assert!(again.conversation_id.is_none());
        assert_eq!(resolver.conversation_count().await, 1);
        assert_eq!(store.get_email("a").await.unwrap().unwrap().subject, "Plan");
    }

    #[tokio::test]
    async fn load_rebuilds_index_and_prunes_dangling_members() {
        let store = store();
        {
            let resolver = ThreadResolver::new(store.clone(), &ThreadConfig::default());
            let mut a = email("a", "Plan", "alice@x.com", &["bob@y.com"], at(10, 0));
            resolver.commit(&mut a).await.unwrap();
        }
        // A conversation whose member email was never written.
        let mut ghost_conv = store.get_conversation("conv_a").await.unwrap().unwrap();
        ghost_conv.email_ids.push("ghost".into());
        store.put_conversation(&ghost_conv).await.unwrap();

        let resolver = ThreadResolver::load(store.clone(), &ThreadConfig::default())
            .await
            .unwrap();
        let repaired = store.get_conversation("conv_a").await.unwrap().unwrap();
        assert_eq!(repaired.email_ids, vec!["a"]);

        // The rebuilt index keeps merging replies.
        let mut b = email("b", "RE: Plan", "bob@y.com", &["alice@x.com"], at(10, 20));
        let conv = resolver.commit(&mut b).await.unwrap().unwrap();
        assert_eq!(conv.id, "conv_a");
        assert_eq!(conv.email_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn load_rethreads_orphan_emails() {
        let store = store();
        let orphan = email("o", "Loose", "alice@x.com", &["bob@y.com"], at(10, 0));
        store.put_email(&orphan).await.unwrap();

        let resolver = ThreadResolver::load(store.clone(), &ThreadConfig::default())
            .await
            .unwrap();
        assert_eq!(resolver.conversation_count().await, 1);
        let stored = store.get_email("o").await.unwrap().unwrap();
        assert_eq!(stored.conversation_id.as_deref(), Some("conv_o"));
    }
}
