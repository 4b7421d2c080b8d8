use crate::dom::{Document, DomError, EventCallback, EventModel};
use crate::origin::{OriginError, ScriptMatcher, ScriptOrigin, resolve_script_origin};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_WIDTH: u32 = 350;
pub const DEFAULT_HEIGHT: u32 = 550;
pub const LOADING_TEXT: &str = "Loading... please wait.";

static AUTH_RETURN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?-u:#return-sessionId-)(.+)").expect("auth return regex"));
static FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)#.*$").expect("fragment regex"));

/// Bytes left alone by the browser `escape()` function.
const ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'@')
    .remove(b'*')
    .remove(b'_')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'/');

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("widget container has not been set")]
    NoContainer,
    #[error("call-to-action element has not been set")]
    NoCallToAction,
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Origin(#[from] OriginError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    Unconfigured,
    Configured,
    Embedded,
}

/// What the host page should do with the click that triggered an embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    PreventDefault,
}

#[derive(Debug, Clone)]
pub struct WidgetConfig<E> {
    pub container: Option<E>,
    pub width: u32,
    pub height: u32,
    pub call_to_action: Option<E>,
    pub assignment_id: Option<String>,
    pub article_url: Option<String>,
    pub session_id: Option<String>,
}

impl<E> Default for WidgetConfig<E> {
    fn default() -> Self {
        Self {
            container: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            call_to_action: None,
            assignment_id: None,
            article_url: None,
            session_id: None,
        }
    }
}

/// Everything the hosted flow receives through the iframe URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedRequest {
    pub origin: ScriptOrigin,
    pub article_url: String,
    pub assignment_id: String,
    pub width: u32,
    pub height: u32,
    pub session_id: Option<String>,
}

impl EmbedRequest {
    pub fn iframe_url(&self) -> String {
        format!(
            "http://{}/embed?articleUrl={}&assignmentId={}&width={}&height={}&sessionId={}",
            self.origin,
            escape(&self.article_url),
            self.assignment_id,
            self.width,
            self.height,
            self.session_id.as_deref().unwrap_or_default()
        )
    }
}

/// Handles created by the last embed.
#[derive(Debug, Clone)]
pub struct Embedded<E> {
    pub placeholder: E,
    pub iframe: E,
    pub url: String,
}

/// The embeddable submission widget.
pub struct Ytd<D: Document> {
    config: WidgetConfig<D::Element>,
    state: WidgetState,
    matcher: ScriptMatcher,
    embedded: Option<Embedded<D::Element>>,
}

impl<D: Document + 'static> Default for Ytd<D> {
    fn default() -> Self {
        Self::with_matcher(ScriptMatcher::default())
    }
}

impl<D: Document + 'static> Ytd<D> {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matcher(matcher: ScriptMatcher) -> Self {
        Self {
            config: WidgetConfig::default(),
            state: WidgetState::Unconfigured,
            matcher,
            embedded: None,
        }
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    pub fn config(&self) -> &WidgetConfig<D::Element> {
        &self.config
    }

    pub fn embedded(&self) -> Option<&Embedded<D::Element>> {
        self.embedded.as_ref()
    }

    fn mark_configured(&mut self) {
        if self.state == WidgetState::Unconfigured {
            self.state = WidgetState::Configured;
        }
    }

    pub fn set_assignment_id(&mut self, id: impl Into<String>) {
        self.config.assignment_id = Some(id.into());
        self.mark_configured();
    }

    pub fn set_article_url(&mut self, url: impl Into<String>) {
        self.config.article_url = Some(url.into());
        self.mark_configured();
    }

    /// Targets the element the iframe is injected into. Missing or zero
    /// dimensions fall back to 350x550.
    pub fn set_container(
        &mut self,
        doc: &D,
        element_id: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(), WidgetError> {
        let container = doc.element_by_id(element_id)?;
        self.config.container = Some(container);
        self.config.width = width.filter(|w| *w > 0).unwrap_or(DEFAULT_WIDTH);
        self.config.height = height.filter(|h| *h > 0).unwrap_or(DEFAULT_HEIGHT);
        self.mark_configured();
        Ok(())
    }

    /// Binds the element whose click starts the embed flow.
    pub fn set_call_to_action(&mut self, doc: &D, element_id: &str) -> Result<(), WidgetError> {
        let element = doc.element_by_id(element_id)?;
        self.config.call_to_action = Some(element);
        self.mark_configured();
        Ok(())
    }

    /// Click handler for the call-to-action: hides it and embeds.
    pub fn click_call_to_action(&mut self, doc: &mut D) -> Result<ClickOutcome, WidgetError> {
        let cta = self
            .config
            .call_to_action
            .clone()
            .ok_or(WidgetError::NoCallToAction)?;
        doc.set_style(&cta, "display", "none")?;
        self.embed(doc)?;
        Ok(ClickOutcome::PreventDefault)
    }

    pub fn is_auth_return(&self, doc: &D) -> bool {
        is_auth_return(doc.location().href())
    }

    /// Page-ready hook. On a `#return-sessionId-<id>` URL it embeds right
    /// away and clears the fragment so a reload does not embed again.
    pub fn ready(&mut self, doc: &mut D) -> Result<bool, WidgetError> {
        let Some(session_id) = session_id_from_url(doc.location().href()) else {
            return Ok(false);
        };
        info!(%session_id, "returning from session flow");
        self.config.session_id = Some(session_id);
        if let Some(cta) = &self.config.call_to_action {
            doc.set_style(cta, "display", "none")?;
        }
        self.embed(doc)?;
        doc.location_mut().clear_hash();
        Ok(true)
    }

    /// Builds the iframe request from the current configuration. Pins the
    /// article URL (fragment stripped) on first use.
    pub fn embed_request(&mut self, doc: &D) -> Result<EmbedRequest, WidgetError> {
        let origin = resolve_script_origin(doc, &self.matcher)?;
        let article_url = strip_fragment(
            self.config
                .article_url
                .as_deref()
                .unwrap_or_else(|| doc.location().href()),
        );
        self.config.article_url = Some(article_url.clone());
        Ok(EmbedRequest {
            origin,
            article_url,
            assignment_id: self.config.assignment_id.clone().unwrap_or_default(),
            width: self.config.width,
            height: self.config.height,
            session_id: self.config.session_id.clone(),
        })
    }

    /// Replaces the container's content with a loading placeholder and the
    /// submission iframe.
    pub fn embed(&mut self, doc: &mut D) -> Result<&Embedded<D::Element>, WidgetError> {
        let container = self
            .config
            .container
            .clone()
            .ok_or(WidgetError::NoContainer)?;
        let url = self.embed_request(doc)?.iframe_url();

        let placeholder = doc.create_element("div")?;
        let text = doc.create_text(LOADING_TEXT);
        doc.append_child(&placeholder, &text);
        doc.set_style(&placeholder, "font-family", "arial, sans-serif")?;
        doc.set_style(&placeholder, "top", "100px")?;

        let iframe = doc.create_element("iframe")?;
        doc.set_attribute(&iframe, "width", &format!("{}px", self.config.width))?;
        doc.set_attribute(&iframe, "height", &format!("{}px", self.config.height))?;
        doc.set_style(&iframe, "border", "0px solid gray")?;
        doc.set_attribute(&iframe, "frameborder", "0")?;

        let hide_target = placeholder.clone();
        let hide_loading: EventCallback<D> = Box::new(move |doc: &mut D| {
            if let Err(err) = doc.set_style(&hide_target, "display", "none") {
                warn!(?err, "failed to hide loading placeholder");
            }
        });
        match doc.event_model() {
            EventModel::Standard => doc.add_event_listener(&iframe, "load", hide_loading)?,
            EventModel::Legacy => doc.attach_event(&iframe, "onload", hide_loading)?,
            EventModel::Unsupported => {
                warn!("document cannot register load listeners; placeholder stays visible")
            }
        }

        doc.set_attribute(&iframe, "src", &url)?;
        if let Some(previous) = self.embedded.take() {
            let dropped = doc.remove_listeners(&previous.iframe);
            debug!(dropped, "released listeners of replaced iframe");
        }
        doc.clear_children(&container);
        doc.append_child(&container, &placeholder);
        doc.append_child(&container, &iframe);

        if self.state == WidgetState::Embedded {
            debug!("container already embedded; replacing contents");
        }
        self.state = WidgetState::Embedded;
        info!(%url, "embedded submission iframe");
        Ok(self.embedded.insert(Embedded {
            placeholder,
            iframe,
            url,
        }))
    }
}

pub fn is_auth_return(href: &str) -> bool {
    AUTH_RETURN_RE.is_match(href)
}

pub fn session_id_from_url(href: &str) -> Option<String> {
    AUTH_RETURN_RE
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn strip_fragment(url: &str) -> String {
    FRAGMENT_RE.replace(url, "").into_owned()
}

/// Percent-encodes like the browser `escape()` function for ASCII input;
/// non-ASCII characters are encoded as their UTF-8 bytes.
pub fn escape(input: &str) -> String {
    utf8_percent_encode(input, ESCAPE_SET).to_string()
}
