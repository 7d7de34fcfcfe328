use crate::form::Form;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// How a state is reached from its parent page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Method {
    Get,
    Event,
    Form,
    Iframe,
    UiForm,
    Javascript,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Event => "event",
            Method::Form => "form",
            Method::Iframe => "iframe",
            Method::UiForm => "ui_form",
            Method::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reachable application state. Identity is `(url, method)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: Method,
}

impl Request {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get)
    }

    /// Code carried by a `javascript:` request, without the scheme prefix.
    pub fn javascript_code(&self) -> Option<&str> {
        self.url.strip_prefix("javascript:")
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

/// A DOM event handler found on the page (click, onmouseover, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub function_id: String,
    pub event: String,
    pub element_id: String,
    pub tag: String,
    pub address: String,
    pub event_class: String,
}

impl Event {
    pub fn is_click(&self) -> bool {
        self.event.contains("click")
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.function_id == other.function_id
            && self.element_id == other.element_id
            && self.tag == other.tag
            && self.address == other.address
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.function_id.hash(state);
        self.element_id.hash(state);
        self.tag.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({}, {})", self.event, self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iframe {
    pub id: Option<String>,
    pub src: Option<String>,
}

impl fmt::Display for Iframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.as_ref().map(|i| format!("id={}", i)).unwrap_or_default();
        let src = self.src.as_ref().map(|s| format!("src={}", s)).unwrap_or_default();
        write!(f, "Iframe({},{})", id, src)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSource {
    pub xpath: String,
    pub value: Option<String>,
}

/// Inputs that behave like a form without a `<form>` element around them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiForm {
    pub sources: Vec<UiSource>,
    pub submit: String,
}

impl UiForm {
    fn xpaths(&self) -> BTreeSet<&str> {
        self.sources.iter().map(|s| s.xpath.as_str()).collect()
    }
}

// Only the set of source xpaths identifies a UI form.
impl PartialEq for UiForm {
    fn eq(&self, other: &Self) -> bool {
        self.xpaths() == other.xpaths()
    }
}

impl Eq for UiForm {}

impl Hash for UiForm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.xpaths().hash(state);
    }
}

impl fmt::Display for UiForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let xpaths: Vec<&str> = self.sources.iter().map(|s| s.xpath.as_str()).collect();
        write!(f, "UiForm([{}], {})", xpaths.join(", "), self.submit)
    }
}

/// Per-edge payload, keyed by the edge method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodData {
    None,
    Form(Form),
    Event(Event),
    Iframe(Iframe),
    UiForm(UiForm),
}

impl fmt::Display for MethodData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodData::None => f.write_str("None"),
            MethodData::Form(form) => fmt::Display::fmt(form, f),
            MethodData::Event(event) => fmt::Display::fmt(event, f),
            MethodData::Iframe(iframe) => fmt::Display::fmt(iframe, f),
            MethodData::UiForm(ui_form) => fmt::Display::fmt(ui_form, f),
        }
    }
}

/// Edge label. Cookies are a snapshot taken at discovery time and do not
/// take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEdge {
    method: Method,
    data: MethodData,
    cookies: Vec<Cookie>,
}

impl CrawlEdge {
    pub fn get(cookies: Vec<Cookie>) -> Self {
        Self {
            method: Method::Get,
            data: MethodData::None,
            cookies,
        }
    }

    /// Label for a plain link: `get` or `javascript`, never with data.
    pub fn for_request(request: &Request, cookies: Vec<Cookie>) -> Self {
        let method = match request.method {
            Method::Javascript => Method::Javascript,
            _ => Method::Get,
        };
        Self {
            method,
            data: MethodData::None,
            cookies,
        }
    }

    pub fn form(form: Form, cookies: Vec<Cookie>) -> Self {
        Self {
            method: Method::Form,
            data: MethodData::Form(form),
            cookies,
        }
    }

    pub fn event(event: Event, cookies: Vec<Cookie>) -> Self {
        Self {
            method: Method::Event,
            data: MethodData::Event(event),
            cookies,
        }
    }

    pub fn iframe(iframe: Iframe, cookies: Vec<Cookie>) -> Self {
        Self {
            method: Method::Iframe,
            data: MethodData::Iframe(iframe),
            cookies,
        }
    }

    pub fn ui_form(ui_form: UiForm, cookies: Vec<Cookie>) -> Self {
        Self {
            method: Method::UiForm,
            data: MethodData::UiForm(ui_form),
            cookies,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn data(&self) -> &MethodData {
        &self.data
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn as_form(&self) -> Option<&Form> {
        match &self.data {
            MethodData::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match &self.data {
            MethodData::Event(event) => Some(event),
            _ => None,
        }
    }

    /// Mutable access to the form state. The form identity cannot change
    /// through this handle, so the edge's hash stays valid.
    pub(crate) fn form_mut(&mut self) -> Option<&mut Form> {
        match &mut self.data {
            MethodData::Form(form) => Some(form),
            _ => None,
        }
    }
}

impl PartialEq for CrawlEdge {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.data == other.data
    }
}

impl Eq for CrawlEdge {}

impl Hash for CrawlEdge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Display for CrawlEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.data)
    }
}
