// Plain HTTP session, no script execution

use crate::driver::{Driver, Extractor, Observation, PageFacts};
use crate::error::{Result, ScanError};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, RequestBuilder};
use scraper::{ElementRef, Html, Node, Selector};
use snare_core::{Cookie, Event, Form, Iframe, Method, Request, UiForm, UiSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub struct HttpSession {
    client: Client,
    jar: Arc<Jar>,
    current: Option<Url>,
    status: u16,
    body: String,
}

impl HttpSession {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent("Snare/0.1 (https://github.com/trapdoorsec/snare)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs / 2))
            .cookie_provider(jar.clone())
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            jar,
            current: None,
            status: 0,
            body: String::new(),
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    async fn load(&mut self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        self.status = response.status().as_u16();
        self.current = Some(response.url().clone());
        self.body = response.text().await?;
        debug!(
            "Loaded {} ({}, {} bytes)",
            self.current_url(),
            self.status,
            self.body.len()
        );
        Ok(())
    }

    fn resolve(&self, href: &str) -> Result<Url> {
        let resolved = match &self.current {
            Some(base) => base.join(href),
            None => Url::parse(href),
        };
        resolved.map_err(|e| ScanError::InvalidUrl(format!("{}: {}", href, e)))
    }
}

impl Driver for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if url.starts_with("javascript:") {
            return Err(ScanError::Unsupported(format!("script url {}", url)));
        }
        let url = self.resolve(url)?;
        let request = self.client.get(url);
        self.load(request).await
    }

    async fn fill_and_submit(&mut self, form: &Form) -> Result<()> {
        let mut action = self.resolve(&form.action)?;
        action.set_fragment(None);
        let values = form.submission_values();
        debug!("Submitting {} with {} values", form, values.len());

        let request = if form.method.eq_ignore_ascii_case("post") {
            self.client.post(action).form(&values)
        } else {
            action.set_query(None);
            if !values.is_empty() {
                action.query_pairs_mut().extend_pairs(values.iter());
            }
            self.client.get(action)
        };
        self.load(request).await
    }

    async fn submit_ui_form(&mut self, ui_form: &UiForm) -> Result<()> {
        Err(ScanError::Unsupported(format!("{} needs a script-capable session", ui_form)))
    }

    async fn dispatch(&mut self, event: &Event) -> Result<()> {
        Err(ScanError::Unsupported(format!("{} needs a script-capable session", event)))
    }

    async fn enter_iframe(&mut self, iframe: &Iframe) -> Result<()> {
        match &iframe.src {
            Some(src) => self.navigate(src).await,
            None => Err(ScanError::Unsupported(format!("{} has no src", iframe))),
        }
    }

    async fn run_script(&mut self, code: &str) -> Result<()> {
        Err(ScanError::Unsupported(format!("script {}", code)))
    }

    fn cookies(&self) -> Vec<Cookie> {
        let Some(url) = &self.current else {
            return Vec::new();
        };
        let Some(header) = self.jar.cookies(url) else {
            return Vec::new();
        };
        let Ok(raw) = header.to_str() else {
            return Vec::new();
        };
        raw.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some(Cookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    domain: url.host_str().map(String::from),
                    path: None,
                })
            })
            .collect()
    }

    async fn dismiss_alert(&mut self) -> bool {
        false
    }

    fn current_url(&self) -> String {
        self.current
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "about:blank".to_string())
    }

    async fn need_to_wait(&mut self) -> Result<bool> {
        Ok(false)
    }
}

impl Extractor for HttpSession {
    async fn extract(&mut self) -> Result<PageFacts> {
        let Some(base) = self.current.clone() else {
            return Ok(PageFacts::default());
        };
        let document = Html::parse_document(&self.body);

        let facts = PageFacts {
            urls: extract_links(&document, &base)?,
            forms: extract_forms(&document, &base)?,
            events: extract_events(&document),
            iframes: extract_iframes(&document, &base)?,
            ui_forms: extract_ui_forms(&document)?,
        };
        info!("Extracted {} facts from {}", facts.len(), base);
        Ok(facts)
    }

    async fn observe_markers(&mut self, markers: &[String]) -> Vec<Observation> {
        if markers.is_empty() || self.body.is_empty() {
            return Vec::new();
        }
        find_markers(&Html::parse_document(&self.body), markers)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScanError::Other(format!("bad selector {}: {:?}", css, e)))
}

fn resolve_link(base: &Url, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with("mailto:") || href.starts_with("tel:") || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url.to_string())
}

fn is_noop_script(code: &str) -> bool {
    let code = code.trim().trim_end_matches(';').trim();
    code.is_empty() || code == "void(0)" || code == "void 0"
}

fn extract_links(document: &Html, base: &Url) -> Result<Vec<Request>> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for element in document.select(&selector("a[href]")?) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        let request = if let Some(code) = href.strip_prefix("javascript:") {
            if is_noop_script(code) {
                continue;
            }
            Request::new(href, Method::Javascript)
        } else {
            match resolve_link(base, href) {
                Some(url) => Request::get(url),
                None => continue,
            }
        };
        if seen.insert(request.clone()) {
            urls.push(request);
        }
    }
    Ok(urls)
}

fn extract_forms(document: &Html, base: &Url) -> Result<Vec<Form>> {
    let field_selector = selector("input, select, textarea, button")?;
    let option_selector = selector("option")?;
    let mut forms = Vec::new();

    for form_el in document.select(&selector("form")?) {
        let mut action = form_el
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .and_then(|a| base.join(a).ok())
            .unwrap_or_else(|| base.clone());
        action.set_fragment(None);
        let method = form_el.value().attr("method").unwrap_or("get").to_lowercase();
        let mut form = Form::new(action.to_string(), method);

        for field in form_el.select(&field_selector) {
            let el = field.value();
            let name = el.attr("name");
            match el.name() {
                "input" => {
                    let itype = el.attr("type").unwrap_or("text").to_lowercase();
                    match itype.as_str() {
                        "submit" | "image" => {
                            form.add_button(Some("submit"), name, el.attr("value"));
                        }
                        "button" | "reset" => {}
                        _ => {
                            form.add_input(Some(&itype), name, el.attr("value"), el.attr("checked").is_some());
                        }
                    }
                }
                "select" => {
                    let options = field
                        .select(&option_selector)
                        .map(|o| match o.value().attr("value") {
                            Some(v) => v.to_string(),
                            None => o.text().collect::<String>().trim().to_string(),
                        })
                        .collect();
                    form.add_select(name, options);
                }
                "textarea" => {
                    let text: String = field.text().collect();
                    form.add_textarea(name, Some(&text));
                }
                "button" => {
                    let btype = el.attr("type").unwrap_or("submit").to_lowercase();
                    if btype == "submit" {
                        form.add_button(Some("submit"), name, el.attr("value"));
                    }
                }
                _ => {}
            }
        }
        forms.push(form);
    }
    Ok(forms)
}

/// Inline `on*` handlers. The handler source stands in for the function id.
fn extract_events(document: &Html) -> Vec<Event> {
    let mut events = Vec::new();
    for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
        let el = element.value();
        for (attr, code) in el.attrs() {
            let Some(event) = attr.strip_prefix("on") else {
                continue;
            };
            if event.is_empty() {
                continue;
            }
            events.push(Event {
                function_id: code.to_string(),
                event: event.to_string(),
                element_id: el.id().unwrap_or_default().to_string(),
                tag: el.name().to_string(),
                address: xpath(element),
                event_class: el.attr("class").unwrap_or_default().to_string(),
            });
        }
    }
    events
}

fn extract_iframes(document: &Html, base: &Url) -> Result<Vec<Iframe>> {
    Ok(document
        .select(&selector("iframe, frame")?)
        .map(|el| Iframe {
            id: el.value().id().map(String::from),
            src: el
                .value()
                .attr("src")
                .and_then(|src| resolve_link(base, src.trim())),
        })
        .collect())
}

/// Text inputs outside any form, paired with the first button outside any
/// form.
fn extract_ui_forms(document: &Html) -> Result<Vec<UiForm>> {
    let sources: Vec<UiSource> = document
        .select(&selector("input, textarea")?)
        .filter(outside_form)
        .filter(|el| {
            let itype = el.value().attr("type").unwrap_or("text").to_lowercase();
            matches!(itype.as_str(), "text" | "search" | "email" | "password" | "url" | "tel")
                || el.value().name() == "textarea"
        })
        .map(|el| UiSource {
            xpath: xpath(el),
            value: el.value().attr("value").map(String::from),
        })
        .collect();

    let submit = document
        .select(&selector("button, input[type=button], input[type=submit]")?)
        .find(outside_form)
        .map(xpath);

    Ok(match (sources.is_empty(), submit) {
        (false, Some(submit)) => vec![UiForm { sources, submit }],
        _ => Vec::new(),
    })
}

fn outside_form(el: &ElementRef<'_>) -> bool {
    !el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "form")
}

/// Absolute position of `element`, e.g. `/html[1]/body[1]/div[2]`.
fn xpath(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current {
        let name = el.value().name();
        let index = el
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|s| s.value().name() == name)
            .count()
            + 1;
        parts.push(format!("{}[{}]", name, index));
        current = el.parent().and_then(ElementRef::wrap);
    }
    parts.reverse();
    format!("/{}", parts.join("/"))
}

/// True if `marker` occurs in `haystack` not glued to other word characters.
fn contains_marker(haystack: &str, marker: &str) -> bool {
    haystack.match_indices(marker).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + marker.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

fn record(found: &mut Vec<Observation>, marker: &str, location: String) {
    let observation = Observation {
        marker: marker.to_string(),
        location,
    };
    if !found.contains(&observation) {
        found.push(observation);
    }
}

/// Markers in script bodies, attribute names or values, and text.
fn find_markers(document: &Html, markers: &[String]) -> Vec<Observation> {
    let mut found = Vec::new();
    for node in document.root_element().descendants() {
        match node.value() {
            Node::Element(el) => {
                for (name, value) in el.attrs() {
                    for marker in markers {
                        if contains_marker(value, marker) || contains_marker(name, marker) {
                            record(&mut found, marker, format!("attribute:{}", name));
                        }
                    }
                }
            }
            Node::Text(text) => {
                let content: &str = text;
                let in_script = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| e.name() == "script"))
                    .unwrap_or(false);
                let location = if in_script { "script" } else { "text" };
                for marker in markers {
                    if contains_marker(content, marker) {
                        record(&mut found, marker, location.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    found
}
