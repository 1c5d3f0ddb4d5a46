//! Channel abstraction for mail I/O: the inbound mail source and the
//! outbound send path.

pub mod email_types;
pub mod maildev;
pub mod sender;
pub mod source;

pub use maildev::{MailDevConfig, MailDevSource};
pub use sender::{MailSender, OutgoingMail, SmtpConfig, SmtpSender, SmtpTls};
pub use source::MailSource;
