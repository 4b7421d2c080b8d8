use crate::dom::Document;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SCRIPT_NAME: &str = "ytd-embed.js";

static ABSOLUTE_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://([-\w.]+)(:\d+)?").expect("absolute src regex"));

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("no <script> tag loads {script_name}")]
    ScriptNotFound { script_name: String },
    #[error("cannot extract a host from script src {0}")]
    UnparsableSource(String),
    #[error("invalid script name {0}: {1}")]
    InvalidScriptName(String, regex::Error),
}

/// Domain (host plus optional `:port`) that served the widget script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOrigin(String);

impl ScriptOrigin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognizes the widget's own `<script src>`.
#[derive(Debug, Clone)]
pub struct ScriptMatcher {
    script_name: String,
    pattern: Regex,
}

impl ScriptMatcher {
    pub fn new(script_name: &str) -> Result<Self, OriginError> {
        let pattern = Regex::new(&format!(".+{}$", regex::escape(script_name)))
            .map_err(|err| OriginError::InvalidScriptName(script_name.to_string(), err))?;
        Ok(Self {
            script_name: script_name.to_string(),
            pattern,
        })
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn is_embed_script(&self, src: &str) -> bool {
        self.pattern.is_match(src)
    }
}

impl Default for ScriptMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SCRIPT_NAME).expect("default script name is a valid pattern")
    }
}

fn is_relative_path(src: &str) -> bool {
    !src.starts_with("http")
}

/// Resolves the origin from a list of script sources. The first matching
/// script decides; later duplicates are ignored.
pub fn resolve_from_sources<'a, I>(
    sources: I,
    page_host: &str,
    matcher: &ScriptMatcher,
) -> Result<ScriptOrigin, OriginError>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let Some(src) = sources
        .into_iter()
        .flatten()
        .find(|src| matcher.is_embed_script(src))
    else {
        return Err(OriginError::ScriptNotFound {
            script_name: matcher.script_name().to_string(),
        });
    };

    if is_relative_path(src) {
        debug!(%src, %page_host, "embed script loaded by relative path");
        return Ok(ScriptOrigin(page_host.to_string()));
    }

    let caps = ABSOLUTE_SRC_RE
        .captures(src)
        .ok_or_else(|| OriginError::UnparsableSource(src.to_string()))?;
    let mut domain = caps[1].to_string();
    if let Some(port) = caps.get(2) {
        domain.push_str(port.as_str());
    }
    debug!(%src, %domain, "embed script loaded from absolute url");
    Ok(ScriptOrigin(domain))
}

/// Scans the document's script elements for the widget script.
pub fn resolve_script_origin<D: Document>(
    doc: &D,
    matcher: &ScriptMatcher,
) -> Result<ScriptOrigin, OriginError> {
    let sources = doc.script_sources();
    resolve_from_sources(
        sources.iter().map(Option::as_deref),
        &doc.location().host(),
        matcher,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::HtmlDocument;

    #[test]
    fn relative_src_uses_page_host() {
        let origin = resolve_from_sources(
            [Some("/js/jquery.js"), Some("/js/ytd-embed.js")],
            "example.com:8080",
            &ScriptMatcher::default(),
        )
        .unwrap();
        assert_eq!(origin.as_str(), "example.com:8080");
    }

    #[test]
    fn absolute_src_keeps_port() {
        let origin = resolve_from_sources(
            [Some("https://cdn.example.org:9000/v1/ytd-embed.js")],
            "page.example.com",
            &ScriptMatcher::default(),
        )
        .unwrap();
        assert_eq!(origin.to_string(), "cdn.example.org:9000");
    }

    #[test]
    fn absolute_src_without_port() {
        let origin = resolve_from_sources(
            [Some("http://ytd.appspot.com/js/ytd-embed.js")],
            "page.example.com",
            &ScriptMatcher::default(),
        )
        .unwrap();
        assert_eq!(origin.as_str(), "ytd.appspot.com");
    }

    #[test]
    fn first_match_wins() {
        let origin = resolve_from_sources(
            [
                None,
                Some("http://first.example/ytd-embed.js"),
                Some("http://second.example/ytd-embed.js"),
            ],
            "page",
            &ScriptMatcher::default(),
        )
        .unwrap();
        assert_eq!(origin.as_str(), "first.example");
    }

    #[test]
    fn missing_script_is_an_error() {
        let err = resolve_from_sources(
            [Some("/js/other.js"), None],
            "page",
            &ScriptMatcher::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OriginError::ScriptNotFound { script_name } if script_name == "ytd-embed.js"));
    }

    #[test]
    fn filename_dot_is_literal() {
        let matcher = ScriptMatcher::default();
        assert!(matcher.is_embed_script("/js/ytd-embed.js"));
        assert!(!matcher.is_embed_script("/js/ytd-embedxjs"));
        assert!(!matcher.is_embed_script("/js/ytd-embed.js?v=2"));
    }

    #[test]
    fn unparsable_absolute_src() {
        let err = resolve_from_sources(
            [Some("httpx:/broken/ytd-embed.js")],
            "page",
            &ScriptMatcher::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OriginError::UnparsableSource(_)));
    }

    #[test]
    fn resolves_from_document() {
        let doc = HtmlDocument::parse(
            r#"<html><head><script src="/static/ytd-embed.js"></script></head><body></body></html>"#,
            "http://example.com:8080/story",
        )
        .unwrap();
        let origin = resolve_script_origin(&doc, &ScriptMatcher::default()).unwrap();
        assert_eq!(origin.as_str(), "example.com:8080");
    }

    #[test]
    fn custom_script_name() {
        let matcher = ScriptMatcher::new("widget.min.js").unwrap();
        let origin =
            resolve_from_sources([Some("//cdn/widget.min.js")], "host", &matcher).unwrap();
        assert_eq!(origin.as_str(), "host");
    }
}
