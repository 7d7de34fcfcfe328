use crate::error::{Result, ScanError};
use snare_core::{CrawlEdge, EdgeId, Graph, Method, MethodData, Request};
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_MAX_URL_VISITS: u32 = 120;
pub const DEFAULT_MAX_FORM_SUBMITS: u32 = 10;
pub const DEFAULT_MAX_EVENT_CHAIN: usize = 10;

/// Admissibility rules for a crawl rooted at one URL.
#[derive(Debug, Clone)]
pub struct Scope {
    root: Url,
    host: String,
    exclude: Vec<String>,
    max_url_visits: u32,
    max_form_submits: u32,
    max_event_chain: usize,
}

impl Scope {
    pub fn new(root_url: &str) -> Result<Self> {
        let root = Url::parse(root_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", root_url, e)))?;
        let host = root
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", root_url)))?
            .to_string();

        Ok(Self {
            root,
            host,
            exclude: Vec::new(),
            max_url_visits: DEFAULT_MAX_URL_VISITS,
            max_form_submits: DEFAULT_MAX_FORM_SUBMITS,
            max_event_chain: DEFAULT_MAX_EVENT_CHAIN,
        })
    }

    /// URLs containing any of these substrings are never followed.
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_limits(mut self, max_url_visits: u32, max_form_submits: u32, max_event_chain: usize) -> Self {
        self.max_url_visits = max_url_visits;
        self.max_form_submits = max_form_submits;
        self.max_event_chain = max_event_chain;
        self
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Same host or a subdomain of it, over http(s), and not excluded.
    pub fn url_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let in_scope = host == self.host || host.ends_with(&format!(".{}", self.host));
        in_scope && !self.exclude.iter().any(|e| url.contains(e.as_str()))
    }

    /// Whether an edge with this label may lead to `target`.
    pub fn allow(&self, target: &Request, label: &CrawlEdge) -> bool {
        match (label.method(), label.data()) {
            (Method::Get, _) => self.url_allowed(&target.url),
            (Method::Form, MethodData::Form(form)) => self.url_allowed(&form.action),
            (Method::Iframe, MethodData::Iframe(iframe)) => match &iframe.src {
                Some(src) => self.url_allowed(src),
                None => true,
            },
            (Method::Iframe, _) => self.url_allowed(&target.url),
            // Events, UI forms and javascript: links act on the page we're on
            _ => true,
        }
    }

    pub fn allow_edge(&self, graph: &Graph, edge: EdgeId) -> bool {
        match (graph.target(edge), graph.edge(edge)) {
            (Some(target), Some(e)) => self.allow(target, &e.label),
            _ => false,
        }
    }

    /// Admissibility of an edge right before following it. Besides scope,
    /// caps how often a URL path is fetched, how often a form action is
    /// submitted and how long an uninterrupted chain of events may grow.
    pub fn check_edge(&self, graph: &Graph, edge: EdgeId) -> bool {
        if !self.allow_edge(graph, edge) {
            debug!("Edge out of scope: {}", graph.describe_edge(edge));
            return false;
        }
        let (Some(target), Some(e)) = (graph.target(edge), graph.edge(edge)) else {
            return false;
        };

        match e.label.data() {
            MethodData::None if e.label.method() == Method::Get => {
                let visits = graph.data.urls.get(&path_key(&target.url)).copied().unwrap_or(0);
                if visits > self.max_url_visits {
                    info!("Too many visits to {} ({})", target.url, visits);
                    return false;
                }
            }
            MethodData::Form(form) => {
                let submits = graph
                    .data
                    .form_urls
                    .get(&path_key(&form.action))
                    .copied()
                    .unwrap_or(0);
                if submits > self.max_form_submits {
                    info!("Too many submits to {} ({})", form.action, submits);
                    return false;
                }
            }
            MethodData::Event(event) => {
                if event.event == "onerror" || event.event == "error" {
                    return false;
                }
                let chain = event_chain_len(graph, edge);
                if chain > self.max_event_chain {
                    info!("Event chain too long ({}) for {}", chain, event);
                    return false;
                }
            }
            _ => {}
        }
        true
    }
}

/// Consecutive event edges ending at `edge`, walking discovery parents.
fn event_chain_len(graph: &Graph, edge: EdgeId) -> usize {
    let mut len = 0;
    let mut current = Some(edge);
    while let Some(id) = current {
        match graph.edge(id) {
            Some(e) if e.label.method() == Method::Event => {
                len += 1;
                if len > graph.edge_count() {
                    break;
                }
                current = e.parent;
            }
            _ => break,
        }
    }
    len
}

/// Key used for visit counting: the URL path, or the raw string when it
/// does not parse.
pub fn path_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snare_core::{Event, Form, Iframe};

    fn scope() -> Scope {
        Scope::new("http://example.com/app/index.php").unwrap()
    }

    #[test]
    fn test_url_allowed() {
        let s = scope().with_exclude(vec!["logout".to_string()]);
        assert!(s.url_allowed("http://example.com/other"));
        assert!(s.url_allowed("https://api.example.com/"));
        assert!(!s.url_allowed("http://evil.com/"));
        assert!(!s.url_allowed("http://notexample.com/"));
        assert!(!s.url_allowed("mailto:a@example.com"));
        assert!(!s.url_allowed("http://example.com/logout.php"));
    }

    #[test]
    fn test_allow_by_method() {
        let s = scope();
        let out = Request::get("http://evil.com/");
        assert!(!s.allow(&out, &CrawlEdge::get(vec![])));

        let form = Form::new("http://evil.com/post", "post");
        let here = Request::new("http://example.com/", Method::Form);
        assert!(!s.allow(&here, &CrawlEdge::form(form, vec![])));

        let iframe = Iframe {
            id: Some("f".to_string()),
            src: None,
        };
        assert!(s.allow(&Request::new("", Method::Iframe), &CrawlEdge::iframe(iframe, vec![])));

        let event = Event {
            function_id: "1".to_string(),
            event: "click".to_string(),
            element_id: "b".to_string(),
            tag: "button".to_string(),
            address: "/html/body/button".to_string(),
            event_class: String::new(),
        };
        let ev_req = Request::new("http://example.com/", Method::Event);
        assert!(s.allow(&ev_req, &CrawlEdge::event(event, vec![])));
    }

    #[test]
    fn test_check_edge_visit_cap() {
        let s = scope().with_limits(2, 10, 10);
        let mut graph = Graph::new();
        let root = Request::get("ROOTREQ");
        let page = Request::get("http://example.com/page");
        graph.add(root.clone());
        graph.add(page.clone());
        graph.connect(&root, &page, CrawlEdge::get(vec![]), None);
        let id = graph.edge_ids()[0];

        assert!(s.check_edge(&graph, id));
        graph.data.urls.insert("/page".to_string(), 3);
        assert!(!s.check_edge(&graph, id));
    }

    #[test]
    fn test_check_edge_event_chain() {
        let s = scope().with_limits(120, 10, 2);
        let mut graph = Graph::new();
        let page = Request::get("http://example.com/");
        let ev = Request::new("http://example.com/", Method::Event);
        graph.add(page.clone());
        graph.add(ev.clone());

        let mut parent = None;
        for i in 0..3 {
            let event = Event {
                function_id: i.to_string(),
                event: "click".to_string(),
                element_id: format!("b{}", i),
                tag: "button".to_string(),
                address: format!("/html/body/button[{}]", i),
                event_class: String::new(),
            };
            let label = CrawlEdge::event(event, vec![]);
            graph.connect(&page, &ev, label.clone(), parent);
            parent = graph.find_edge(&page, &ev, &label);
        }
        let ids = graph.edge_ids();
        assert!(s.check_edge(&graph, ids[1]));
        assert!(!s.check_edge(&graph, ids[2]));
    }

    #[test]
    fn test_path_key() {
        assert_eq!(path_key("http://a.com/x/y?z=1"), "/x/y");
        assert_eq!(path_key("ROOTREQ"), "ROOTREQ");
    }
}
