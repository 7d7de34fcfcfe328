// Tests for payload arming and reflection tracking

use snare_core::form::ElementKey;
use snare_core::path::reconstruct;
use snare_core::taint::{FILE_PAYLOAD_TEMPLATE, PAYLOAD_TEMPLATES};
use snare_core::{
    AttackMode, CrawlEdge, Form, Graph, Injection, InjectionVector, Method, Parameter, Request,
    TaintTracker,
};

fn text_form() -> Form {
    let mut form = Form::new("http://example.com/search", "get");
    form.add_input(Some("text"), Some("q"), None, false);
    form.add_input(Some("password"), Some("pw"), None, false);
    form.add_input(Some("submit"), Some("go"), Some("Go"), false);
    form
}

fn mixed_form() -> Form {
    let mut form = Form::new("http://example.com/profile", "post");
    form.add_input(Some("text"), Some("name"), None, false);
    form.add_input(Some("hidden"), Some("csrf"), Some("tok"), false);
    form.add_input(Some("checkbox"), Some("news"), Some("yes"), false);
    form.add_input(Some("radio"), Some("plan"), Some("free"), false);
    form.add_select(Some("country"), vec!["fi".to_string()]);
    form.add_input(Some("file"), Some("avatar"), None, false);
    form
}

fn query_injection(url: &str) -> Injection {
    Injection {
        vector: InjectionVector::Query {
            url: url.to_string(),
        },
        parameter: Parameter::Query("q".to_string()),
        payload: "x".to_string(),
    }
}

// ============================================================================
// Marker Table Tests
// ============================================================================

#[test]
fn test_payload_lookup_accepts_numeric_and_string_ids() {
    let mut tracker = TaintTracker::new();
    tracker.use_payload(4242u32, query_injection("http://example.com/?q=1"));

    assert!(tracker.get_table_entry(4242).is_some());
    assert!(tracker.get_table_entry("4242").is_some());
    assert!(tracker.get_table_entry(4243).is_none());
}

#[test]
fn test_reflected_payload_unknown_id_is_noop() {
    let mut tracker = TaintTracker::new();
    assert!(!tracker.reflected_payload(99, "http://example.com/", "text"));
    assert_eq!(tracker.payload_count(), 0);
    assert_eq!(tracker.reflection_count(), 0);
}

#[test]
fn test_reflected_payload_appends_once_per_pair() {
    let mut tracker = TaintTracker::new();
    tracker.use_payload("77", query_injection("http://example.com/?q=1"));

    assert!(tracker.reflected_payload(77, "http://example.com/a", "script"));
    assert!(tracker.reflected_payload("77", "http://example.com/a", "script"));
    assert!(tracker.reflected_payload(77, "http://example.com/b", "script"));

    let entry = tracker.get_table_entry(77).unwrap();
    assert_eq!(entry.reflected.len(), 2);
    assert!(
        entry
            .reflected
            .contains(&("http://example.com/a".to_string(), "script".to_string()))
    );
}

#[test]
fn test_observe_routes_to_the_right_table() {
    let mut tracker = TaintTracker::new();
    tracker.use_payload("123", query_injection("http://example.com/?q=1"));
    tracker.use_tracker("abcdefgh", query_injection("http://example.com/?q=2"));

    assert!(tracker.observe("123", "http://example.com/", "text"));
    assert!(tracker.observe("abcdefgh", "http://example.com/", "attribute"));
    assert!(!tracker.observe("zzzzzzzz", "http://example.com/", "text"));

    assert_eq!(tracker.get_table_entry("123").unwrap().reflected.len(), 1);
    assert_eq!(tracker.get_tracker_entry("abcdefgh").unwrap().reflected.len(), 1);

    let mut markers = tracker.markers();
    markers.sort();
    assert_eq!(markers, vec!["123".to_string(), "abcdefgh".to_string()]);
}

// ============================================================================
// fix_form Tests
// ============================================================================

#[test]
fn test_fix_form_safe_injects_free_text_only() {
    let mut tracker = TaintTracker::new();
    let mut form = mixed_form();
    let injected = tracker.fix_form(&mut form, PAYLOAD_TEMPLATES[0], AttackMode::Safe);

    assert_eq!(injected, 1);
    assert_eq!(tracker.payload_count(), 1);

    let name = form.element(&ElementKey::new(Some("text"), Some("name"))).unwrap();
    let payload = name.value.clone().unwrap();
    assert!(payload.starts_with("<script>xss("));

    let csrf = form.element(&ElementKey::new(Some("hidden"), Some("csrf"))).unwrap();
    assert_eq!(csrf.value.as_deref(), Some("tok"));

    let (_, record) = tracker.payloads().next().unwrap();
    assert_eq!(record.injected.payload, payload);
    assert_eq!(
        record.injected.parameter,
        Parameter::Field(ElementKey::new(Some("text"), Some("name")))
    );
    assert_eq!(record.injected.vector, InjectionVector::Form(mixed_form().identity()));
}

#[test]
fn test_fix_form_aggressive_covers_hidden_overrides_and_files() {
    let mut tracker = TaintTracker::new();
    let mut form = mixed_form();
    let injected = tracker.fix_form(&mut form, PAYLOAD_TEMPLATES[1], AttackMode::Aggressive);

    // text, hidden, checkbox, radio, select, file
    assert_eq!(injected, 6);
    assert_eq!(tracker.payload_count(), 6);

    let csrf = form.element(&ElementKey::new(Some("hidden"), Some("csrf"))).unwrap();
    assert!(csrf.value.as_deref().unwrap().contains("<script>xss("));

    let news = form.element(&ElementKey::new(Some("checkbox"), Some("news"))).unwrap();
    assert!(!news.override_value.is_empty());
    assert_eq!(news.value.as_deref(), Some("yes"));

    let avatar = form.element(&ElementKey::new(Some("file"), Some("avatar"))).unwrap();
    assert!(avatar.value.as_deref().unwrap().starts_with("<img src=x onerror=xss("));
    assert!(FILE_PAYLOAD_TEMPLATE.starts_with("<img src=x"));

    let submitted = form.submission_values();
    assert!(submitted.iter().any(|(n, v)| n == "plan" && v.contains("<script>")));
}

#[test]
fn test_fix_form_aggressive_skips_pure_text_forms() {
    let mut tracker = TaintTracker::new();
    let mut form = text_form();
    assert_eq!(tracker.fix_form(&mut form, PAYLOAD_TEMPLATES[2], AttackMode::Aggressive), 0);
    assert_eq!(tracker.payload_count(), 0);

    assert_eq!(tracker.fix_form(&mut form, PAYLOAD_TEMPLATES[2], AttackMode::Safe), 2);
}

// ============================================================================
// Tracker Flow Tests
// ============================================================================

#[test]
fn test_arm_form_trackers_writes_back_into_graph() {
    let mut graph = Graph::new();
    let root = Request::get("ROOTREQ");
    let a = Request::get("http://example.com/a");
    let b = Request::new("http://example.com/search", Method::Form);
    for n in [&root, &a, &b] {
        graph.add(n.clone());
    }
    graph.connect(&root, &a, CrawlEdge::get(vec![]), None);
    let first = graph.edge_ids()[0];
    let label = CrawlEdge::form(text_form(), vec![]);
    graph.connect(&a, &b, label.clone(), Some(first));
    let form_edge = graph.find_edge(&a, &b, &label).unwrap();

    let mut tracker = TaintTracker::new();
    let path = reconstruct(&graph, form_edge);
    // Only the text input is tracked, the password is not.
    assert_eq!(tracker.arm_form_trackers(&mut graph, &path), 1);

    let (marker, record) = tracker.trackers().next().unwrap();
    assert_eq!(marker.len(), 8);
    assert_eq!(&record.injected.payload, marker);
    assert!(matches!(
        record.injected.vector,
        InjectionVector::FormEdge { edge, .. } if edge == form_edge
    ));

    let stored = graph.edge(form_edge).unwrap().label.as_form().unwrap();
    let q = stored.element(&ElementKey::new(Some("text"), Some("q"))).unwrap();
    assert_eq!(q.value.as_deref(), Some(marker.as_str()));
}

#[test]
fn test_mark_attacked_once() {
    let mut tracker = TaintTracker::new();
    let form = text_form();
    assert!(!tracker.is_attacked(&form));
    assert!(tracker.mark_attacked(&form));

    let mut armed = form.clone();
    tracker.fix_form(&mut armed, PAYLOAD_TEMPLATES[0], AttackMode::Safe);
    assert!(!tracker.mark_attacked(&armed));
    assert_eq!(tracker.attacked_form_count(), 1);
}
