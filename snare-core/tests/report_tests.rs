// Tests for report generation functionality

use snare_core::data::{Database, ReflectionRow, SessionRecord};
use snare_core::report::{
    ReportData, ReportFormat, gather_report_data, generate_json_report, generate_markdown_report,
    generate_text_report, render, save_report,
};
use snare_core::taint::PAYLOAD_TEMPLATES;
use snare_core::{AttackMode, CrawlEdge, Form, Graph, Request, TaintTracker};
use tempfile::TempDir;

fn sample_data(reflections: Vec<ReflectionRow>) -> ReportData {
    ReportData {
        session: SessionRecord {
            id: "test-session".to_string(),
            start_time: 1_700_000_000,
            end_time: Some(1_700_000_042),
            status: "completed".to_string(),
            target_url: "http://example.com/".to_string(),
            configuration: None,
        },
        total_pages: 3,
        total_edges: 5,
        visited_edges: 4,
        payloads_armed: 7,
        trackers_armed: 1,
        reflections,
    }
}

fn reflection(flow: &str, marker: &str) -> ReflectionRow {
    ReflectionRow {
        marker: marker.to_string(),
        flow: flow.to_string(),
        injected_at: "http://example.com/search".to_string(),
        parameter: "(text, q)".to_string(),
        payload: format!("<script>xss({})</script>", marker),
        url: "http://example.com/results".to_string(),
        location: "script".to_string(),
    }
}

// ============================================================================
// Report Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("JSON"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
    assert_eq!(ReportFormat::from_str("markdown"), Some(ReportFormat::Markdown));
    assert_eq!(ReportFormat::from_str("html"), None);
}

#[test]
fn test_report_format_extension() {
    assert_eq!(ReportFormat::Text.extension(), "txt");
    assert_eq!(ReportFormat::Json.extension(), "json");
    assert_eq!(ReportFormat::Markdown.extension(), "md");
}

// ============================================================================
// Rendering Tests
// ============================================================================

#[test]
fn test_text_report_sections() {
    let data = sample_data(vec![reflection("payload", "123"), reflection("tracker", "abcdefgh")]);
    let report = generate_text_report(&data);

    assert!(report.contains("SNARE REFLECTION REPORT"));
    assert!(report.contains("Session ID:   test-session"));
    assert!(report.contains("Status:       Completed"));
    assert!(report.contains("Duration:     42 seconds"));
    assert!(report.contains("Markers reflected: 2"));
    assert!(report.contains("REFLECTED PAYLOADS"));
    assert!(report.contains("TRACKED DATA FLOW"));
    assert!(report.contains("marker abcdefgh"));
}

#[test]
fn test_text_report_without_reflections() {
    let report = generate_text_report(&sample_data(vec![]));
    assert!(report.contains("Markers reflected: 0"));
    assert!(!report.contains("REFLECTED PAYLOADS"));
    assert!(report.contains("End of Report"));
}

#[test]
fn test_json_report_structure() {
    let data = sample_data(vec![reflection("payload", "123")]);
    let json = generate_json_report(&data).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let report = &value["report"];
    assert_eq!(report["metadata"]["generator"], "Snare");
    assert_eq!(report["session"]["id"], "test-session");
    assert_eq!(report["session"]["duration_seconds"], 42);
    assert_eq!(report["summary"]["payloads_armed"], 7);
    assert_eq!(report["summary"]["markers_reflected"], 1);
    assert_eq!(report["reflections"][0]["marker"], "123");
}

#[test]
fn test_markdown_report() {
    let mut row = reflection("payload", "123");
    row.location = "attribute|value".to_string();
    let md = generate_markdown_report(&sample_data(vec![row]));

    assert!(md.starts_with("# Snare Reflection Report"));
    assert!(md.contains("| payload | `123` |"));
    assert!(md.contains("attribute\\|value"));

    let empty = generate_markdown_report(&sample_data(vec![]));
    assert!(empty.contains("No injected marker was seen again."));
}

#[test]
fn test_render_dispatch() {
    let data = sample_data(vec![]);
    assert!(render(&data, ReportFormat::Text).unwrap().contains("SNARE"));
    assert!(render(&data, ReportFormat::Json).unwrap().starts_with('{'));
    assert!(render(&data, ReportFormat::Markdown).unwrap().starts_with('#'));
}

// ============================================================================
// Gather Tests
// ============================================================================

#[test]
fn test_gather_report_data_from_database() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    let session_id = db.create_session("http://example.com/", None).unwrap();

    let mut graph = Graph::new();
    let root = Request::get("ROOTREQ");
    let home = Request::get("http://example.com/");
    let about = Request::get("http://example.com/about");
    for n in [&root, &home, &about] {
        graph.add(n.clone());
    }
    graph.connect(&root, &home, CrawlEdge::get(vec![]), None);
    graph.connect(&home, &about, CrawlEdge::get(vec![]), None);
    graph.visit_edge(graph.edge_ids()[0]);
    db.save_graph(&session_id, &graph).unwrap();

    let mut tracker = TaintTracker::new();
    let mut form = Form::new("http://example.com/search", "get");
    form.add_input(Some("text"), Some("q"), None, false);
    tracker.fix_form(&mut form, PAYLOAD_TEMPLATES[0], AttackMode::Safe);
    let marker = tracker.markers().remove(0);
    tracker.reflected_payload(&marker, "http://example.com/about", "script");
    db.save_tracker(&session_id, &tracker).unwrap();
    db.complete_session(&session_id).unwrap();

    let data = gather_report_data(&db, &session_id).unwrap();
    assert_eq!(data.session.status, "completed");
    assert_eq!(data.total_pages, 2);
    assert_eq!(data.total_edges, 2);
    assert_eq!(data.visited_edges, 1);
    assert_eq!(data.payloads_armed, 1);
    assert_eq!(data.trackers_armed, 0);
    assert_eq!(data.reflections.len(), 1);
    assert_eq!(data.reflected_markers(), 1);
}

#[test]
fn test_gather_report_data_unknown_session() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    assert!(gather_report_data(&db, "missing").is_err());
}

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.txt");
    save_report("hello", &path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
}
