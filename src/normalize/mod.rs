use lol_html::{doc_comments, element, rewrite_str, RewriteStrSettings};
use tracing::{debug, trace};

use crate::config::HtmlConfig;
use crate::{MailfeedError, Result};

/// Attributes dropped from every element once the markup has been sanitized.
const STRIPPED_ATTRIBUTES: [&str; 6] = ["class", "id", "style", "width", "height", "border"];

/// Frames, embedded applets, form controls and `<meta>`: removed with their content.
const KILLED_TAGS: [&str; 10] = [
    "iframe", "frame", "frameset", "applet", "param", "button", "input", "select", "textarea",
    "meta",
];

/// Tags dropped while their children are kept.
const UNWRAPPED_TAGS: [&str; 6] = ["form", "object", "embed", "layer", "blink", "marquee"];

/// Attributes that survive sanitizing; everything else, including `style`, `on*`
/// handlers and `data-*`, is removed.
const SAFE_ATTRIBUTES: [&str; 71] = [
    "abbr", "accept", "accept-charset", "accesskey", "action", "align", "alt", "axis",
    "border", "cellpadding", "cellspacing", "char", "charoff", "charset", "checked", "cite",
    "class", "clear", "color", "cols", "colspan", "compact", "coords", "datetime", "dir",
    "disabled", "enctype", "for", "frame", "headers", "height", "href", "hreflang", "hspace",
    "id", "ismap", "label", "lang", "longdesc", "maxlength", "media", "method", "multiple",
    "name", "nohref", "noshade", "nowrap", "prompt", "readonly", "rel", "rev", "rows",
    "rowspan", "rules", "scope", "selected", "shape", "size", "span", "src", "start",
    "summary", "tabindex", "target", "title", "type", "usemap", "valign", "value", "vspace",
    "width",
];

/// DOM passes that prepare article HTML for embedding in an email.
pub trait HtmlCleaner {
    fn clean_html(&self, input_html: &str) -> Result<String>;
    fn add_full_image_path(&self, article: &str, link: &str) -> Result<String>;
    fn add_email_markup(&self, article: &str) -> Result<String>;
}

/// Strips unwanted markup from HTML fragments and stamps email-friendly image attributes.
///
/// Each method is a single rewrite pass. Callers chain them as needed, usually
/// `clean_html` → `add_full_image_path` → `add_email_markup`.
#[derive(Debug, Clone, Default)]
pub struct HtmlNormalizer {
    config: HtmlConfig,
}

impl HtmlNormalizer {
    pub fn new(config: HtmlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HtmlConfig {
        &self.config
    }

    /// Sanitize `input_html`, then strip presentational and identifying attributes.
    ///
    /// The sanitizer removes `<style>`, `<script>` and stylesheet `<link>` elements
    /// with their content, as well as frames, applets, form controls and `<meta>`.
    /// `<span>`, `<form>`, `<object>` and `<embed>` tags are unwrapped (content kept)
    /// and `<br>` elements are removed outright. Only attributes on the safe list
    /// survive, so `style`, `on*` handlers and `data-*` go, and `javascript:` URLs
    /// are dropped. The second pass removes `class`, `id`, `style`, `width`,
    /// `height` and `border` from every element.
    ///
    /// Empty or whitespace-only input is an [`MailfeedError::HtmlParse`] error, as
    /// are the other passes given an empty document.
    pub fn clean_html(&self, input_html: &str) -> Result<String> {
        ensure_document(input_html)?;
        let sanitized = sanitize(input_html)?;
        let cleaned = strip_attributes(&sanitized)?;
        debug!(
            input_len = input_html.len(),
            output_len = cleaned.len(),
            "cleaned HTML"
        );
        Ok(cleaned)
    }

    /// Prefix relative `<img src>` values with a base derived from `link`.
    ///
    /// The prefix is `link` cut four characters past its last `.`, so
    /// `http://site.com/post/1` gives `http://site.com`. When fewer than four
    /// characters follow the dot the whole link is used, e.g.
    /// `https://example.com/feed.xml` stays intact and `pic.png` becomes
    /// `https://example.com/feed.xmlpic.png`. This is a heuristic with sharp
    /// edges; it is kept as-is so existing feeds keep producing the same URLs.
    ///
    /// Any `src` containing `http` anywhere is left untouched, as are images
    /// without a `src`.
    pub fn add_full_image_path(&self, article: &str, link: &str) -> Result<String> {
        ensure_document(article)?;
        let prefix = link_prefix(link)?;
        let output = rewrite(
            article,
            RewriteStrSettings {
                element_content_handlers: vec![element!("img[src]", |el| {
                    if let Some(src) = el.get_attribute("src") {
                        if !src.contains("http") {
                            let full = format!("{prefix}{src}");
                            trace!(%src, %full, "rewrote image path");
                            el.set_attribute("src", &full)?;
                        }
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        debug!(link, prefix, "added full image paths");
        Ok(output)
    }

    /// Overwrite `width`, `height` and `border` on every `<img>` with the configured values.
    pub fn add_email_markup(&self, article: &str) -> Result<String> {
        ensure_document(article)?;
        let styles = self.config.image_styles();
        let output = rewrite(
            article,
            RewriteStrSettings {
                element_content_handlers: vec![element!("img", |el| {
                    el.set_attribute("width", &styles.width)?;
                    el.set_attribute("height", &styles.height)?;
                    el.set_attribute("border", &styles.border)?;
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        debug!(
            width = %styles.width,
            height = %styles.height,
            border = %styles.border,
            "applied email image markup"
        );
        Ok(output)
    }
}

impl HtmlCleaner for HtmlNormalizer {
    fn clean_html(&self, input_html: &str) -> Result<String> {
        HtmlNormalizer::clean_html(self, input_html)
    }

    fn add_full_image_path(&self, article: &str, link: &str) -> Result<String> {
        HtmlNormalizer::add_full_image_path(self, article, link)
    }

    fn add_email_markup(&self, article: &str) -> Result<String> {
        HtmlNormalizer::add_email_markup(self, article)
    }
}

fn ensure_document(html: &str) -> Result<()> {
    if html.trim().is_empty() {
        return Err(MailfeedError::HtmlParse {
            reason: "document is empty".to_string(),
        });
    }
    Ok(())
}

fn rewrite(html: &str, settings: RewriteStrSettings<'_, '_>) -> Result<String> {
    rewrite_str(html, settings).map_err(|e| MailfeedError::HtmlParse {
        reason: e.to_string(),
    })
}

fn sanitize(html: &str) -> Result<String> {
    let mut handlers = vec![
        element!("script", |el| {
            el.remove();
            Ok(())
        }),
        element!("style", |el| {
            el.remove();
            Ok(())
        }),
        element!("link[rel]", |el| {
            let rel = el.get_attribute("rel").unwrap_or_default();
            if rel.to_ascii_lowercase().contains("stylesheet") {
                el.remove();
            }
            Ok(())
        }),
        element!("span", |el| {
            el.remove_and_keep_content();
            Ok(())
        }),
        element!("br", |el| {
            el.remove();
            Ok(())
        }),
    ];
    handlers.extend(KILLED_TAGS.iter().map(|tag| {
        element!(*tag, |el| {
            el.remove();
            Ok(())
        })
    }));
    handlers.extend(UNWRAPPED_TAGS.iter().map(|tag| {
        element!(*tag, |el| {
            el.remove_and_keep_content();
            Ok(())
        })
    }));
    handlers.push(element!("*", |el| {
        let unsafe_attrs: Vec<String> = el
            .attributes()
            .iter()
            .map(|attr| attr.name())
            .filter(|name| !SAFE_ATTRIBUTES.contains(&name.as_str()))
            .collect();
        for name in unsafe_attrs {
            el.remove_attribute(&name);
        }
        for name in ["href", "src", "action"] {
            if el.get_attribute(name).is_some_and(|v| is_javascript_url(&v)) {
                el.remove_attribute(name);
            }
        }
        Ok(())
    }));

    rewrite(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            document_content_handlers: vec![doc_comments!(|c| {
                c.remove();
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
}

fn strip_attributes(html: &str) -> Result<String> {
    rewrite(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                for name in STRIPPED_ATTRIBUTES {
                    el.remove_attribute(name);
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
}

fn is_javascript_url(value: &str) -> bool {
    value
        .trim_start()
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
}

/// `link[..last_dot + 4]`, counted in characters and clamped to the end of `link`.
fn link_prefix(link: &str) -> Result<&str> {
    let dot = link.rfind('.').ok_or_else(|| MailfeedError::LinkWithoutDot {
        link: link.to_string(),
    })?;
    let end = link[dot..]
        .char_indices()
        .nth(4)
        .map_or(link.len(), |(offset, _)| dot + offset);
    Ok(&link[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> HtmlNormalizer {
        HtmlNormalizer::default()
    }

    #[test]
    fn test_clean_removes_script_and_style() {
        let html = "<style>p { color: red; }</style><p>Body</p><script>alert('x')</script>";
        let out = normalizer().clean_html(html).unwrap();
        assert!(!out.contains("<style"), "style survived: {out}");
        assert!(!out.contains("color: red"), "style content survived: {out}");
        assert!(!out.contains("<script"), "script survived: {out}");
        assert!(!out.contains("alert"), "script content survived: {out}");
        assert!(out.contains("<p>Body</p>"), "body lost: {out}");
    }

    #[test]
    fn test_clean_unwraps_span() {
        let out = normalizer()
            .clean_html("<p>Hello <span>world</span>!</p>")
            .unwrap();
        assert_eq!(out, "<p>Hello world!</p>");
    }

    #[test]
    fn test_clean_kills_br() {
        let out = normalizer().clean_html("<p>one<br>two<br/></p>").unwrap();
        assert_eq!(out, "<p>onetwo</p>");
    }

    #[test]
    fn test_clean_strips_attributes_on_any_tag() {
        let html = r#"<div class="a" id="b" style="color:red" width="1" height="2" border="3"><img src="x.png" width="10" height="20" border="1" alt="pic"><table border="1" class="t"><tr><td>x</td></tr></table></div>"#;
        let out = normalizer().clean_html(html).unwrap();
        for attr in STRIPPED_ATTRIBUTES {
            assert!(
                !out.contains(&format!(" {attr}=")),
                "attribute '{attr}' survived: {out}"
            );
        }
        assert!(out.contains(r#"src="x.png""#), "src lost: {out}");
        assert!(out.contains(r#"alt="pic""#), "alt lost: {out}");
    }

    #[test]
    fn test_clean_removes_event_handlers_and_javascript_urls() {
        let html = r#"<a href="javascript:alert(1)" onclick="steal()">link</a><img src="a.png" onerror="boom()">"#;
        let out = normalizer().clean_html(html).unwrap();
        assert!(!out.contains("onclick"), "onclick survived: {out}");
        assert!(!out.contains("onerror"), "onerror survived: {out}");
        assert!(!out.contains("javascript:"), "javascript url survived: {out}");
        assert!(out.contains(r#"src="a.png""#), "plain src lost: {out}");
        assert!(out.contains(">link</a>"), "link text lost: {out}");
    }

    #[test]
    fn test_clean_removes_comments_and_stylesheets() {
        let html = r#"<link rel="stylesheet" href="site.css"><link rel="alternate" href="feed.xml"><!-- tracking --><p>kept</p>"#;
        let out = normalizer().clean_html(html).unwrap();
        assert!(!out.contains("site.css"), "stylesheet survived: {out}");
        assert!(out.contains("feed.xml"), "non-stylesheet link removed: {out}");
        assert!(!out.contains("tracking"), "comment survived: {out}");
        assert!(out.contains("<p>kept</p>"));
    }

    #[test]
    fn test_clean_removes_frames_embeds_forms_and_meta() {
        let html = concat!(
            r#"<meta http-equiv="refresh" content="0;url=https://evil.example">"#,
            r#"<p>x</p><iframe src="https://evil.example"></iframe>"#,
            r#"<object data="movie.swf"><embed src="movie.swf">fallback</object>"#,
            r#"<form action="/login"><input name="user"><textarea>note</textarea>Sign in</form>"#,
            r#"<applet code="Evil.class">applet text</applet>"#,
        );
        let out = normalizer().clean_html(html).unwrap();
        for tag in ["<meta", "<iframe", "<object", "<embed", "<form", "<input", "<textarea", "<applet"] {
            assert!(!out.contains(tag), "{tag} survived: {out}");
        }
        assert!(!out.contains("evil.example"), "frame or refresh target survived: {out}");
        assert!(!out.contains("note"), "form control content survived: {out}");
        assert!(!out.contains("applet text"), "applet content survived: {out}");
        assert!(out.contains("<p>x</p>"), "paragraph lost: {out}");
        assert!(out.contains("fallback"), "object fallback content lost: {out}");
        assert!(out.contains("Sign in"), "form text lost: {out}");
    }

    #[test]
    fn test_clean_keeps_only_safe_attributes() {
        let html = r#"<a href="https://example.com/a" title="A" data-track="42" aria-hidden="true" target="_blank">a</a>"#;
        let out = normalizer().clean_html(html).unwrap();
        assert!(!out.contains("data-track"), "data attribute survived: {out}");
        assert!(!out.contains("aria-hidden"), "unsafe attribute survived: {out}");
        assert!(out.contains(r#"href="https://example.com/a""#), "href lost: {out}");
        assert!(out.contains(r#"title="A""#), "title lost: {out}");
        assert!(out.contains(r#"target="_blank""#), "target lost: {out}");
    }

    #[test]
    fn test_empty_document_is_a_parse_error() {
        let normalizer = normalizer();
        for input in ["", "   \n\t"] {
            assert!(matches!(
                normalizer.clean_html(input),
                Err(MailfeedError::HtmlParse { .. })
            ));
            assert!(matches!(
                normalizer.add_full_image_path(input, "http://site.com/post"),
                Err(MailfeedError::HtmlParse { .. })
            ));
            assert!(matches!(
                normalizer.add_email_markup(input),
                Err(MailfeedError::HtmlParse { .. })
            ));
        }
    }

    #[test]
    fn test_clean_script_only_document_is_empty() {
        assert_eq!(normalizer().clean_html("<script>x()</script>").unwrap(), "");
    }

    #[test]
    fn test_link_prefix_arithmetic() {
        assert_eq!(
            link_prefix("https://example.com/feed.xml").unwrap(),
            "https://example.com/feed.xml"
        );
        assert_eq!(link_prefix("http://site.com/post/1").unwrap(), "http://site.com");
        assert_eq!(
            link_prefix("https://blog.example.org/2024/01/entry").unwrap(),
            "https://blog.example.org"
        );
        assert_eq!(link_prefix("a.b").unwrap(), "a.b");
    }

    #[test]
    fn test_link_prefix_counts_characters() {
        assert_eq!(link_prefix("http://ex.éé/p/q").unwrap(), "http://ex.éé/");
        assert_eq!(link_prefix("http://exä.éé/").unwrap(), "http://exä.éé/");
    }

    #[test]
    fn test_link_without_dot_is_an_error() {
        let err = normalizer()
            .add_full_image_path(r#"<img src="pic.png">"#, "localhost/feed")
            .unwrap_err();
        assert!(
            matches!(err, MailfeedError::LinkWithoutDot { ref link } if link == "localhost/feed"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_add_full_image_path_relative() {
        let out = normalizer()
            .add_full_image_path(r#"<img src="pic.png">"#, "https://example.com/feed.xml")
            .unwrap();
        assert!(
            out.contains(r#"src="https://example.com/feed.xmlpic.png""#),
            "unexpected src: {out}"
        );
    }

    #[test]
    fn test_add_full_image_path_skips_absolute_and_missing_src() {
        let html = r#"<img src="http://cdn.example/pic.png"><img alt="no source"><img src="/img/http-logo.png">"#;
        let out = normalizer()
            .add_full_image_path(html, "http://site.com/post/1")
            .unwrap();
        assert_eq!(out, html);
    }

    #[test]
    fn test_add_email_markup_overwrites() {
        let normalizer = HtmlNormalizer::new(HtmlConfig {
            image_width: 600,
            image_height: 400,
            image_border: 0,
        });
        let html = r#"<p><img src="a.png" width="10" height="10" border="5"></p><img src="b.png">"#;
        let out = normalizer.add_email_markup(html).unwrap();
        assert_eq!(out.matches(r#"width="600""#).count(), 2, "{out}");
        assert_eq!(out.matches(r#"height="400""#).count(), 2, "{out}");
        assert_eq!(out.matches(r#"border="0""#).count(), 2, "{out}");
        assert!(!out.contains(r#"width="10""#), "old width survived: {out}");
        assert!(!out.contains(r#"border="5""#), "old border survived: {out}");
    }

    #[test]
    fn test_add_email_markup_without_images_is_noop() {
        let html = "<p>No pictures here.</p>";
        assert_eq!(normalizer().add_email_markup(html).unwrap(), html);
    }

    #[test]
    fn test_trait_object_dispatch() {
        let cleaner: Box<dyn HtmlCleaner> = Box::new(normalizer());
        let out = cleaner.clean_html("<p><span>hi</span></p>").unwrap();
        assert_eq!(out, "<p>hi</p>");
    }
}
