//! Persistence layer: byte-oriented blob store plus typed record access.
//!
//! Every record type lives under its own key namespace (`email/`,
//! `attachment/`, `conversation/`, `workflow/`, `execution/`, `quarantine/`).

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod records;
pub mod traits;

pub use libsql_backend::LibSqlBlobStore;
pub use memory::InMemoryBlobStore;
pub use records::MailStore;
pub use traits::{BlobStore, StoreUsage, keys};
