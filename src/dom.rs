use html5ever::{LocalName, Namespace, QualName};
use kuchiki::traits::*;
use kuchiki::{Attribute, ExpandedName, NodeRef};
use thiserror::Error;
use tracing::debug;
use url::Url;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

#[derive(Debug, Error)]
pub enum DomError {
    #[error("element #{0} not found")]
    NotFound(String),
    #[error("invalid page location {href}: {reason}")]
    InvalidLocation { href: String, reason: String },
    #[error("node is not an element")]
    NotAnElement,
    #[error("cannot create element <{0}>")]
    InvalidTag(String),
    #[error("{0} is not supported by this document")]
    Unsupported(&'static str),
}

/// The page URL as seen by the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    url: Url,
}

impl Location {
    pub fn parse(href: &str) -> Result<Self, DomError> {
        let url = Url::parse(href).map_err(|err| DomError::InvalidLocation {
            href: href.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { url })
    }

    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    /// Host name plus `:port` when the URL carries a non-default port.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn hash(&self) -> Option<&str> {
        self.url.fragment()
    }

    pub fn clear_hash(&mut self) {
        self.url.set_fragment(None);
    }
}

/// Which load-event registration API a document exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventModel {
    /// `addEventListener("load", ...)`
    Standard,
    /// `attachEvent("onload", ...)`
    Legacy,
    Unsupported,
}

pub type EventCallback<D> = Box<dyn FnMut(&mut D)>;

/// Element accessor the widget is written against.
///
/// Element handles are resolved once and passed back explicitly; lookups
/// that can miss return [`DomError::NotFound`].
pub trait Document {
    type Element: Clone + 'static;

    fn location(&self) -> &Location;
    fn location_mut(&mut self) -> &mut Location;

    fn element_by_id(&self, id: &str) -> Result<Self::Element, DomError>;
    /// `src` attribute of every `<script>` element, in document order.
    fn script_sources(&self) -> Vec<Option<String>>;

    fn create_element(&mut self, tag: &str) -> Result<Self::Element, DomError>;
    fn create_text(&mut self, text: &str) -> Self::Element;

    fn set_attribute(
        &mut self,
        element: &Self::Element,
        name: &str,
        value: &str,
    ) -> Result<(), DomError>;
    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;
    fn set_style(
        &mut self,
        element: &Self::Element,
        property: &str,
        value: &str,
    ) -> Result<(), DomError>;
    fn style(&self, element: &Self::Element, property: &str) -> Option<String>;

    fn clear_children(&mut self, element: &Self::Element);
    fn append_child(&mut self, parent: &Self::Element, child: &Self::Element);

    fn event_model(&self) -> EventModel;

    fn add_event_listener(
        &mut self,
        target: &Self::Element,
        event: &str,
        callback: EventCallback<Self>,
    ) -> Result<(), DomError>
    where
        Self: Sized;

    fn attach_event(
        &mut self,
        target: &Self::Element,
        event: &str,
        callback: EventCallback<Self>,
    ) -> Result<(), DomError>
    where
        Self: Sized;

    /// Drops every listener registered on `target`, returning how many went.
    fn remove_listeners(&mut self, target: &Self::Element) -> usize;

    /// Fires `event` on `target`, returning how many listeners ran.
    fn dispatch_event(&mut self, target: &Self::Element, event: &str) -> usize
    where
        Self: Sized;
}

struct RegisteredListener {
    target: NodeRef,
    event: String,
    callback: EventCallback<HtmlDocument>,
}

/// [`Document`] over a parsed HTML tree.
pub struct HtmlDocument {
    root: NodeRef,
    location: Location,
    event_model: EventModel,
    listeners: Vec<RegisteredListener>,
}

impl HtmlDocument {
    pub fn parse(html: &str, href: &str) -> Result<Self, DomError> {
        let location = Location::parse(href)?;
        Ok(Self {
            root: kuchiki::parse_html().one(html),
            location,
            event_model: EventModel::Standard,
            listeners: Vec::new(),
        })
    }

    pub fn with_event_model(mut self, event_model: EventModel) -> Self {
        self.event_model = event_model;
        self
    }

    pub fn to_html(&self) -> String {
        self.root.to_string()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Elements with the given tag name, in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeRef> {
        self.root
            .descendants()
            .elements()
            .filter(|el| &*el.name.local == tag)
            .map(|el| el.as_node().clone())
            .collect()
    }
}

impl Document for HtmlDocument {
    type Element = NodeRef;

    fn location(&self) -> &Location {
        &self.location
    }

    fn location_mut(&mut self) -> &mut Location {
        &mut self.location
    }

    fn element_by_id(&self, id: &str) -> Result<NodeRef, DomError> {
        self.root
            .descendants()
            .elements()
            .find(|el| el.attributes.borrow().get("id") == Some(id))
            .map(|el| el.as_node().clone())
            .ok_or_else(|| DomError::NotFound(id.to_string()))
    }

    fn script_sources(&self) -> Vec<Option<String>> {
        self.elements_by_tag("script")
            .iter()
            .filter_map(|node| node.as_element())
            .map(|el| el.attributes.borrow().get("src").map(str::to_string))
            .collect()
    }

    fn create_element(&mut self, tag: &str) -> Result<NodeRef, DomError> {
        if !is_valid_tag_name(tag) {
            return Err(DomError::InvalidTag(tag.to_string()));
        }
        let name = QualName::new(
            None,
            Namespace::from(HTML_NAMESPACE),
            LocalName::from(tag.to_ascii_lowercase()),
        );
        Ok(NodeRef::new_element(
            name,
            std::iter::empty::<(ExpandedName, Attribute)>(),
        ))
    }

    fn create_text(&mut self, text: &str) -> NodeRef {
        NodeRef::new_text(text)
    }

    fn set_attribute(&mut self, element: &NodeRef, name: &str, value: &str) -> Result<(), DomError> {
        let data = element.as_element().ok_or(DomError::NotAnElement)?;
        data.attributes.borrow_mut().insert(name, value.to_string());
        Ok(())
    }

    fn attribute(&self, element: &NodeRef, name: &str) -> Option<String> {
        element
            .as_element()
            .and_then(|el| el.attributes.borrow().get(name).map(str::to_string))
    }

    fn set_style(&mut self, element: &NodeRef, property: &str, value: &str) -> Result<(), DomError> {
        let current = self.attribute(element, "style").unwrap_or_default();
        let mut declarations = parse_style(&current);
        match declarations.iter_mut().find(|(name, _)| name == property) {
            Some(existing) => existing.1 = value.to_string(),
            None => declarations.push((property.to_string(), value.to_string())),
        }
        self.set_attribute(element, "style", &render_style(&declarations))
    }

    fn style(&self, element: &NodeRef, property: &str) -> Option<String> {
        let current = self.attribute(element, "style")?;
        parse_style(&current)
            .into_iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    fn clear_children(&mut self, element: &NodeRef) {
        let existing: Vec<_> = element.children().collect();
        for child in existing {
            child.detach();
        }
    }

    fn append_child(&mut self, parent: &NodeRef, child: &NodeRef) {
        parent.append(child.clone());
    }

    fn event_model(&self) -> EventModel {
        self.event_model
    }

    fn add_event_listener(
        &mut self,
        target: &NodeRef,
        event: &str,
        callback: EventCallback<Self>,
    ) -> Result<(), DomError> {
        if self.event_model != EventModel::Standard {
            return Err(DomError::Unsupported("addEventListener"));
        }
        self.listeners.push(RegisteredListener {
            target: target.clone(),
            event: event.to_string(),
            callback,
        });
        Ok(())
    }

    fn attach_event(
        &mut self,
        target: &NodeRef,
        event: &str,
        callback: EventCallback<Self>,
    ) -> Result<(), DomError> {
        if self.event_model != EventModel::Legacy {
            return Err(DomError::Unsupported("attachEvent"));
        }
        self.listeners.push(RegisteredListener {
            target: target.clone(),
            event: event.to_string(),
            callback,
        });
        Ok(())
    }

    fn remove_listeners(&mut self, target: &NodeRef) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.target != *target);
        before - self.listeners.len()
    }

    fn dispatch_event(&mut self, target: &NodeRef, event: &str) -> usize {
        let legacy_name = format!("on{event}");
        let mut listeners = std::mem::take(&mut self.listeners);
        let mut fired = 0;
        for listener in listeners
            .iter_mut()
            .filter(|l| l.target == *target && (l.event == event || l.event == legacy_name))
        {
            (listener.callback)(self);
            fired += 1;
        }
        // keep anything registered by the callbacks themselves
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        debug!(event, fired, "dispatched event");
        fired
    }
}

/// Letters and digits, plus `-` for custom elements; must start with a letter.
fn is_valid_tag_name(tag: &str) -> bool {
    let mut chars = tag.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn parse_style(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn render_style(declarations: &[(String, String)]) -> String {
    declarations
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <script src="/js/jquery.js"></script>
        <script>var inline = 1;</script>
        <script src="/js/ytd-embed.js"></script>
    </head><body><div id="ytd" style="color: red">old</div><a id="cta" href="/go">go</a></body></html>"#;

    fn doc() -> HtmlDocument {
        HtmlDocument::parse(PAGE, "http://example.com:8080/article?x=1#top").unwrap()
    }

    #[test]
    fn location_reports_host_with_port() {
        let loc = Location::parse("http://example.com:8080/a#b").unwrap();
        assert_eq!(loc.host(), "example.com:8080");
        assert_eq!(loc.hash(), Some("b"));
        assert_eq!(Location::parse("http://example.com/").unwrap().host(), "example.com");
        assert_eq!(Location::parse("http://example.com:80/").unwrap().host(), "example.com");
    }

    #[test]
    fn clearing_hash_drops_fragment() {
        let mut loc = Location::parse("http://host/page#return-sessionId-1").unwrap();
        loc.clear_hash();
        assert_eq!(loc.href(), "http://host/page");
        assert_eq!(loc.hash(), None);
    }

    #[test]
    fn rejects_unparsable_location() {
        assert!(matches!(
            Location::parse("not a url"),
            Err(DomError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn lists_script_sources_in_order() {
        let sources = doc().script_sources();
        assert_eq!(
            sources,
            vec![
                Some("/js/jquery.js".to_string()),
                None,
                Some("/js/ytd-embed.js".to_string())
            ]
        );
    }

    #[test]
    fn element_lookup_reports_missing_ids() {
        let doc = doc();
        assert!(doc.element_by_id("ytd").is_ok());
        assert!(matches!(doc.element_by_id("nope"), Err(DomError::NotFound(id)) if id == "nope"));
    }

    #[test]
    fn set_style_updates_existing_declarations() {
        let mut doc = doc();
        let el = doc.element_by_id("ytd").unwrap();
        doc.set_style(&el, "display", "none").unwrap();
        doc.set_style(&el, "color", "blue").unwrap();
        assert_eq!(doc.style(&el, "display").as_deref(), Some("none"));
        assert_eq!(
            doc.attribute(&el, "style").as_deref(),
            Some("color: blue; display: none")
        );
    }

    #[test]
    fn creates_and_appends_elements() {
        let mut doc = doc();
        let container = doc.element_by_id("ytd").unwrap();
        let frame = doc.create_element("iframe").unwrap();
        doc.set_attribute(&frame, "src", "http://x/embed").unwrap();
        let text = doc.create_text("hello");
        doc.clear_children(&container);
        doc.append_child(&container, &text);
        doc.append_child(&container, &frame);
        let html = doc.to_html();
        assert!(html.contains("hello<iframe src=\"http://x/embed\"></iframe>"));
        assert!(!html.contains(">old<"));
    }

    #[test]
    fn refuses_odd_tag_names() {
        assert!(matches!(
            doc().create_element("div onclick=x"),
            Err(DomError::InvalidTag(_))
        ));
        assert!(matches!(doc().create_element(""), Err(DomError::InvalidTag(_))));
        assert!(matches!(doc().create_element("-x"), Err(DomError::InvalidTag(_))));
    }

    #[test]
    fn creates_context_sensitive_and_custom_elements() {
        let mut doc = doc();
        let container = doc.element_by_id("ytd").unwrap();
        for tag in ["td", "my-widget", "IFRAME"] {
            let el = doc.create_element(tag).unwrap();
            doc.append_child(&container, &el);
        }
        let html = doc.to_html();
        assert!(html.contains("<td></td><my-widget></my-widget><iframe></iframe>"));
    }

    #[test]
    fn removing_listeners_only_touches_target() {
        let mut doc = doc();
        let a = doc.element_by_id("ytd").unwrap();
        let b = doc.element_by_id("cta").unwrap();
        doc.add_event_listener(&a, "load", Box::new(|_: &mut HtmlDocument| {}))
            .unwrap();
        doc.add_event_listener(&a, "click", Box::new(|_: &mut HtmlDocument| {}))
            .unwrap();
        doc.add_event_listener(&b, "load", Box::new(|_: &mut HtmlDocument| {}))
            .unwrap();
        assert_eq!(doc.remove_listeners(&a), 2);
        assert_eq!(doc.listener_count(), 1);
        assert_eq!(doc.dispatch_event(&a, "load"), 0);
        assert_eq!(doc.dispatch_event(&b, "load"), 1);
        assert_eq!(doc.remove_listeners(&a), 0);
    }

    #[test]
    fn dispatch_runs_matching_listeners_only() {
        let mut doc = doc();
        let a = doc.element_by_id("ytd").unwrap();
        let b = doc.element_by_id("cta").unwrap();
        let marker = a.clone();
        doc.add_event_listener(
            &a,
            "load",
            Box::new(move |d: &mut HtmlDocument| {
                d.set_style(&marker, "display", "none").unwrap();
            }),
        )
        .unwrap();
        assert_eq!(doc.dispatch_event(&b, "load"), 0);
        assert_eq!(doc.dispatch_event(&a, "click"), 0);
        assert_eq!(doc.dispatch_event(&a, "load"), 1);
        assert_eq!(doc.style(&a, "display").as_deref(), Some("none"));
        assert_eq!(doc.listener_count(), 1);
    }

    #[test]
    fn legacy_model_uses_attach_event() {
        let mut doc = doc().with_event_model(EventModel::Legacy);
        let a = doc.element_by_id("ytd").unwrap();
        assert!(matches!(
            doc.add_event_listener(&a, "load", Box::new(|_: &mut HtmlDocument| {})),
            Err(DomError::Unsupported("addEventListener"))
        ));
        doc.attach_event(&a, "onload", Box::new(|_: &mut HtmlDocument| {}))
            .unwrap();
        assert_eq!(doc.dispatch_event(&a, "load"), 1);
    }
}
