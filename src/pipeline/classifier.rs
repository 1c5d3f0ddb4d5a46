//! Keyword classifier: priority, category and sentiment from subject, body
//! and sender.
//!
//! Keyword sets are configuration data ([`ClassifierConfig`]), compiled once
//! into case-insensitive, word-bounded `RegexSet`s. `classify` is pure.

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::channels::email_types::sender_matches;
use crate::config::env_list;
use crate::error::ConfigError;
use crate::pipeline::types::{Category, Classification, Email, Priority, Sentiment};

// ── Configuration ───────────────────────────────────────────────────

/// Keywords and sender patterns for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Sender patterns, same syntax as [`sender_matches`].
    #[serde(default)]
    pub senders: Vec<String>,
}

/// Keyword tables injected into the [`Classifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub high_priority: Vec<String>,
    pub medium_priority: Vec<String>,
    pub low_priority: Vec<String>,
    /// High-value senders promoted to `medium` when no keyword fires.
    pub vip_senders: Vec<String>,
    pub categories: Vec<CategoryRule>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            high_priority: words(&[
                "urgente",
                "urgent",
                "crítico",
                "critical",
                "emergência",
                "emergency",
                "imediato",
                "immediate",
                "asap",
            ]),
            medium_priority: words(&[
                "importante",
                "important",
                "atenção",
                "attention",
                "revisar",
                "review",
            ]),
            low_priority: words(&["fyi", "newsletter", "unsubscribe", "descadastrar"]),
            vip_senders: Vec::new(),
            categories: vec![
                CategoryRule {
                    category: Category::Support,
                    keywords: words(&[
                        "suporte", "support", "ajuda", "help", "problema", "problem", "erro",
                        "error", "falha", "bug",
                    ]),
                    senders: Vec::new(),
                },
                CategoryRule {
                    category: Category::Purchase,
                    keywords: words(&[
                        "pedido", "order", "compra", "purchase", "fatura", "invoice", "pagamento",
                        "payment",
                    ]),
                    senders: Vec::new(),
                },
                CategoryRule {
                    category: Category::Notification,
                    keywords: words(&["notificação", "notification", "alerta", "alert"]),
                    senders: words(&["noreply@", "no-reply@", "notifications@"]),
                },
                CategoryRule {
                    category: Category::Marketing,
                    keywords: words(&[
                        "spam",
                        "promoção",
                        "promotion",
                        "marketing",
                        "oferta",
                        "desconto",
                        "discount",
                    ]),
                    senders: Vec::new(),
                },
            ],
            positive: words(&[
                "obrigado",
                "obrigada",
                "thanks",
                "thank you",
                "excelente",
                "excellent",
                "ótimo",
                "great",
                "bom",
                "good",
            ]),
            negative: words(&[
                "problema", "problem", "erro", "error", "ruim", "bad", "péssimo", "terrible",
            ]),
        }
    }
}

impl ClassifierConfig {
    /// Load keyword tables from `MAILFLOW_CLASSIFIER_CONFIG` (a JSON file)
    /// when set, else the built-in defaults. `MAILFLOW_VIP_SENDERS` is
    /// appended to the VIP list either way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("MAILFLOW_CLASSIFIER_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.vip_senders.extend(env_list("MAILFLOW_VIP_SENDERS"));
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{path}: {e}")))
    }
}

// ── Classifier ──────────────────────────────────────────────────────

struct CompiledCategory {
    category: Category,
    keywords: Option<RegexSet>,
    senders: Vec<String>,
}

/// Deterministic keyword classifier.
pub struct Classifier {
    high: Option<RegexSet>,
    medium: Option<RegexSet>,
    low: Option<RegexSet>,
    vip_senders: Vec<String>,
    categories: Vec<CompiledCategory>,
    positive: Option<RegexSet>,
    negative: Option<RegexSet>,
}

/// Compile keywords into one case-insensitive, word-bounded pattern each.
/// An empty list compiles to `None` (never matches).
fn keyword_set(keywords: &[String]) -> Result<Option<RegexSet>, ConfigError> {
    let patterns: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| format!(r"(?i)\b{}\b", regex::escape(k)))
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }
    RegexSet::new(&patterns)
        .map(Some)
        .map_err(|e| ConfigError::ParseError(format!("Invalid keyword pattern: {e}")))
}

fn any_match(set: &Option<RegexSet>, text: &str) -> bool {
    set.as_ref().is_some_and(|s| s.is_match(text))
}

/// Number of distinct keywords present in `text`.
fn distinct_hits(set: &Option<RegexSet>, text: &str) -> usize {
    set.as_ref().map_or(0, |s| s.matches(text).iter().count())
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        let mut categories = Vec::new();
        // Fixed precedence regardless of the order rules were configured in.
        for category in Category::PRECEDENCE {
            let mut keywords = Vec::new();
            let mut senders = Vec::new();
            for rule in config.categories.iter().filter(|r| r.category == category) {
                keywords.extend(rule.keywords.iter().cloned());
                senders.extend(rule.senders.iter().cloned());
            }
            categories.push(CompiledCategory {
                category,
                keywords: keyword_set(&keywords)?,
                senders,
            });
        }

        Ok(Self {
            high: keyword_set(&config.high_priority)?,
            medium: keyword_set(&config.medium_priority)?,
            low: keyword_set(&config.low_priority)?,
            vip_senders: config.vip_senders.clone(),
            categories,
            positive: keyword_set(&config.positive)?,
            negative: keyword_set(&config.negative)?,
        })
    }

    /// Classify an email. Same input, same output.
    pub fn classify(&self, email: &Email) -> Classification {
        let body = email.body();
        let combined = format!("{}\n{}", email.subject, body);
        Classification {
            priority: self.priority(&email.subject, &body, &email.from_address),
            category: self.category(&combined, &email.from_address),
            sentiment: self.sentiment(&combined),
        }
    }

    fn priority(&self, subject: &str, body: &str, sender: &str) -> Priority {
        if any_match(&self.high, subject) || any_match(&self.high, body) {
            return Priority::High;
        }
        if any_match(&self.medium, subject) || any_match(&self.medium, body) {
            return Priority::Medium;
        }
        if sender_matches(&self.vip_senders, sender) {
            return Priority::Medium;
        }
        if any_match(&self.low, subject) || any_match(&self.low, body) {
            return Priority::Low;
        }
        Priority::Normal
    }

    fn category(&self, text: &str, sender: &str) -> Category {
        self.categories
            .iter()
            .find(|c| any_match(&c.keywords, text) || sender_matches(&c.senders, sender))
            .map_or(Category::General, |c| c.category)
    }

    fn sentiment(&self, text: &str) -> Sentiment {
        let score = distinct_hits(&self.positive, text) as i64
            - distinct_hits(&self.negative, text) as i64;
        match score {
            s if s > 0 => Sentiment::Positive,
            s if s < 0 => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}
