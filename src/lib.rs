//! Mailflow: email ingestion, classification, threading and workflows.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod workflow;
