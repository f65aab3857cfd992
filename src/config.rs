use serde::{Deserialize, Serialize};

fn default_image_width() -> u32 {
    600
}

fn default_image_height() -> u32 {
    400
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

/// Display attributes stamped onto every `<img>` by the email markup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlConfig {
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    #[serde(default)]
    pub image_border: u32,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            image_width: default_image_width(),
            image_height: default_image_height(),
            image_border: 0,
        }
    }
}

impl HtmlConfig {
    pub fn image_styles(&self) -> ImageStyles {
        ImageStyles {
            width: self.image_width.to_string(),
            height: self.image_height.to_string(),
            border: self.image_border.to_string(),
        }
    }
}

/// Attribute values derived from [`HtmlConfig`], already rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStyles {
    pub width: String,
    pub height: String,
    pub border: String,
}

/// Connection parameters for an SMTP relay.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Upgrade the connection with STARTTLS (default: true).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            use_tls: default_use_tls(),
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .finish()
    }
}
