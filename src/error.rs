#[derive(Debug, thiserror::Error)]
pub enum MailfeedError {
    #[error("HTML rewrite error: {reason}")]
    HtmlParse { reason: String },

    #[error("link '{link}' has no '.' to derive an image path prefix from")]
    LinkWithoutDot { link: String },

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("could not attach image '{content_id}' from {path}: {reason}")]
    ImageAttach {
        content_id: String,
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("invalid {field} address '{value}': {reason}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to build message: {reason}")]
    MessageBuild { reason: String },

    #[error("SMTP error: {reason}")]
    Smtp { reason: String },
}
