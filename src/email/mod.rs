use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lettre::{
    address::Envelope,
    message::{
        header::{self, ContentType, HeaderName, HeaderValue, Headers},
        Attachment, Mailboxes, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    Address, SmtpTransport, Transport,
};
use tracing::{error, info, warn};

use crate::{config::SmtpConfig, MailfeedError, Result};

/// One body part of an [`EmailMessage`], in attachment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    PlainText,
    Html,
    InlineImage { content_id: String },
}

/// A fully assembled `multipart/alternative` email.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    subject: String,
    from: String,
    to: String,
    parts: Vec<PartKind>,
    headers: Headers,
    body: MultiPart,
}

impl EmailMessage {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    /// Body parts in the order they appear on the wire.
    pub fn parts(&self) -> &[PartKind] {
        &self.parts
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, PartKind::InlineImage { .. }))
            .count()
    }

    /// RFC 5322 wire form of the message.
    pub fn formatted(&self) -> Vec<u8> {
        let mut out = self.headers.to_string().into_bytes();
        out.extend(self.body.formatted());
        out
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// Delivery of an assembled message to a single recipient.
pub trait EmailSender {
    /// Returns `true` when the message was accepted; failures are logged, never raised.
    #[allow(clippy::too_many_arguments)]
    fn send_smtp_email(
        &self,
        sender: &str,
        recipient: &str,
        message: &EmailMessage,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> bool;
}

/// Builds HTML emails with inline images and delivers them over SMTP or to disk.
#[derive(Debug, Clone)]
pub struct EmailService {
    _private: (),
}

impl Default for EmailService {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailService {
    pub fn new() -> Self {
        info!("initialized EmailService");
        Self { _private: () }
    }

    /// Write the wire form of `message` to `filename`, replacing any existing file.
    pub fn write_email_to_file(
        &self,
        filename: impl AsRef<Path>,
        message: &EmailMessage,
    ) -> Result<()> {
        let path = filename.as_ref();
        info!(path = %path.display(), "writing email to file");
        std::fs::write(path, message.formatted()).map_err(|e| MailfeedError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Assemble a `multipart/alternative` message: plain text, then HTML, then inline images.
    ///
    /// `images` maps a content-id to an image file; the HTML references each one as
    /// `<img src="cid:{content-id}">`. An image that is missing, unreadable or not an
    /// image type is logged and skipped, so the text and HTML parts are always present.
    ///
    /// `From` and `To` are not validated. Values that parse as address lists are
    /// written as structured headers (so `To` may hold several comma-separated
    /// addresses); anything else is written verbatim.
    pub fn build_html_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        text: &str,
        html: &str,
        images: Option<&BTreeMap<String, PathBuf>>,
    ) -> EmailMessage {
        info!(subject, "building HTML email");

        let mut headers = Headers::new();
        headers.set(header::Date::now());
        headers.set(header::Subject::from(subject.to_string()));
        match parse_mailboxes(from) {
            Some(mailboxes) => headers.set(header::From::from(mailboxes)),
            None => {
                insert_verbatim(&mut headers, HeaderName::new_from_ascii_str("From"), from)
            }
        }
        match parse_mailboxes(to) {
            Some(mailboxes) => headers.set(header::To::from(mailboxes)),
            None => {
                insert_verbatim(&mut headers, HeaderName::new_from_ascii_str("To"), to)
            }
        }
        headers.set(header::MIME_VERSION_1_0);

        // The last alternative is the one clients prefer, so HTML goes after plain text.
        let mut parts = vec![PartKind::PlainText, PartKind::Html];
        let mut alternative = MultiPart::alternative()
            .singlepart(SinglePart::plain(text.to_string()))
            .singlepart(SinglePart::html(html.to_string()));

        for (content_id, path) in images.into_iter().flatten() {
            match inline_image(content_id, path) {
                Ok(part) => {
                    alternative = alternative.singlepart(part);
                    parts.push(PartKind::InlineImage {
                        content_id: content_id.clone(),
                    });
                    info!(%content_id, path = %path.display(), "attached image");
                }
                Err(e) => error!("{e}"),
            }
        }

        EmailMessage {
            subject: subject.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            parts,
            headers,
            body: alternative,
        }
    }

    /// Send `message` through `host:port` with STARTTLS and login authentication.
    ///
    /// The envelope goes from `sender` to `recipient`, independent of the message
    /// headers. Blocks until the server answers; there is no retry. Any failure is
    /// logged and reported as `false`.
    #[allow(clippy::too_many_arguments)]
    pub fn send_smtp_email(
        &self,
        sender: &str,
        recipient: &str,
        message: &EmailMessage,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> bool {
        let result = starttls_transport(host, port, username, password)
            .and_then(|transport| deliver(&transport, sender, recipient, message));
        report(recipient, result)
    }

    /// Like [`EmailService::send_smtp_email`], with connection settings from `config`.
    ///
    /// With `use_tls` off the connection stays plaintext and an empty username
    /// skips authentication.
    pub fn send_with_config(
        &self,
        sender: &str,
        recipient: &str,
        message: &EmailMessage,
        config: &SmtpConfig,
    ) -> bool {
        let transport = if config.use_tls {
            starttls_transport(&config.host, config.port, &config.username, &config.password)
        } else {
            Ok(plain_transport(config))
        };
        let result =
            transport.and_then(|transport| deliver(&transport, sender, recipient, message));
        report(recipient, result)
    }
}

impl EmailSender for EmailService {
    fn send_smtp_email(
        &self,
        sender: &str,
        recipient: &str,
        message: &EmailMessage,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> bool {
        EmailService::send_smtp_email(
            self, sender, recipient, message, host, port, username, password,
        )
    }
}

/// `None` when `value` is not a non-empty address list.
fn parse_mailboxes(value: &str) -> Option<Mailboxes> {
    value
        .parse::<Mailboxes>()
        .ok()
        .filter(|mailboxes| mailboxes.iter().next().is_some())
}

fn insert_verbatim(headers: &mut Headers, name: HeaderName, value: &str) {
    warn!(header = %name, value, "writing unparsed address header verbatim");
    headers.insert_raw(HeaderValue::new(name, value.to_string()));
}

fn inline_image(content_id: &str, path: &Path) -> Result<SinglePart> {
    let attach_error = |reason: String| MailfeedError::ImageAttach {
        content_id: content_id.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| attach_error(e.to_string()))?;
    let content_type = match sniff_image_type(&bytes) {
        Some(sniffed) => sniffed.to_string(),
        None => mime_guess::from_path(path)
            .first()
            .filter(|m| m.type_() == mime_guess::mime::IMAGE)
            .map(|m| m.essence_str().to_string())
            .ok_or_else(|| attach_error("not a recognised image type".to_string()))?,
    };
    let content_type = ContentType::parse(&content_type)
        .map_err(|e| attach_error(format!("invalid content type '{content_type}': {e}")))?;

    Ok(Attachment::new_inline(content_id.to_string()).body(bytes, content_type))
}

/// Image MIME type from the leading magic bytes.
fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: [(&[u8], &str); 7] = [
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
    ];
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    SIGNATURES
        .iter()
        .find(|&&(magic, _)| bytes.starts_with(magic))
        .map(|&(_, mime)| mime)
}

/// Blocking transport that greets, upgrades with STARTTLS (required), greets again
/// and logs in.
fn starttls_transport(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<SmtpTransport> {
    let creds = Credentials::new(username.to_string(), password.to_string());
    let transport = SmtpTransport::starttls_relay(host)
        .map_err(|e| MailfeedError::Smtp {
            reason: e.to_string(),
        })?
        .port(port)
        .credentials(creds)
        .build();
    Ok(transport)
}

fn plain_transport(config: &SmtpConfig) -> SmtpTransport {
    let builder = SmtpTransport::builder_dangerous(&config.host).port(config.port);
    if config.username.is_empty() {
        builder.build()
    } else {
        builder
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build()
    }
}

fn deliver(
    transport: &SmtpTransport,
    sender: &str,
    recipient: &str,
    message: &EmailMessage,
) -> Result<()> {
    let from = sender.parse::<Address>().map_err(|e| MailfeedError::InvalidAddress {
        field: "sender",
        value: sender.to_string(),
        reason: e.to_string(),
    })?;
    let to = recipient
        .parse::<Address>()
        .map_err(|e| MailfeedError::InvalidAddress {
            field: "recipient",
            value: recipient.to_string(),
            reason: e.to_string(),
        })?;
    let envelope =
        Envelope::new(Some(from), vec![to]).map_err(|e| MailfeedError::MessageBuild {
            reason: e.to_string(),
        })?;
    transport
        .send_raw(&envelope, &message.formatted())
        .map_err(|e| MailfeedError::Smtp {
            reason: e.to_string(),
        })?;
    Ok(())
}

fn report(recipient: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!(recipient, "successfully sent email");
            true
        }
        Err(e) => {
            error!(recipient, "failed to send email: {e}");
            false
        }
    }
}
