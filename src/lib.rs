//! Normalize article HTML for email clients and ship it as a multipart
//! message with inline images, either over SMTP or to a file on disk.

pub mod config;
pub mod email;
pub mod error;
pub mod normalize;

pub use config::{HtmlConfig, ImageStyles, SmtpConfig};
pub use email::{EmailMessage, EmailSender, EmailService, PartKind};
pub use error::MailfeedError;
pub use normalize::{HtmlCleaner, HtmlNormalizer};

pub type Result<T> = std::result::Result<T, MailfeedError>;
