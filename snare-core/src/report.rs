// Report generation from database

use crate::data::{Database, ReflectionRow, SessionRecord};
use rusqlite::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub session: SessionRecord,
    pub total_pages: usize,
    pub total_edges: usize,
    pub visited_edges: usize,
    pub payloads_armed: usize,
    pub trackers_armed: usize,
    pub reflections: Vec<ReflectionRow>,
}

impl ReportData {
    /// Markers that came back at least once.
    pub fn reflected_markers(&self) -> usize {
        self.reflections
            .iter()
            .map(|r| (&r.flow, &r.marker))
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn payload_reflections(&self) -> impl Iterator<Item = &ReflectionRow> {
        self.reflections.iter().filter(|r| r.flow == "payload")
    }

    fn tracker_reflections(&self) -> impl Iterator<Item = &ReflectionRow> {
        self.reflections.iter().filter(|r| r.flow == "tracker")
    }

    fn status_to_string(&self) -> &str {
        match self.session.status.as_str() {
            "completed" => "Completed",
            "failed" => "Failed",
            "running" => "Running",
            "cancelled" => "Cancelled",
            _ => "Unknown",
        }
    }

    fn duration(&self) -> Option<i64> {
        self.session.end_time.map(|end| end - self.session.start_time)
    }
}

pub fn gather_report_data(db: &Database, session_id: &str) -> Result<ReportData> {
    let session = db
        .get_session(session_id)?
        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

    let edges = db.get_edges(session_id)?;
    let pages: BTreeSet<&str> = edges
        .iter()
        .flat_map(|e| [e.from_url.as_str(), e.to_url.as_str()])
        .filter(|u| u.starts_with("http"))
        .collect();

    let injections = db.get_injections(session_id)?;
    let payloads_armed = injections.iter().filter(|i| i.flow == "payload").count();

    Ok(ReportData {
        total_pages: pages.len(),
        total_edges: edges.len(),
        visited_edges: edges.iter().filter(|e| e.visited).count(),
        payloads_armed,
        trackers_armed: injections.len() - payloads_armed,
        reflections: db.get_reflections(session_id)?,
        session,
    })
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push('\n');
    report.push_str("                        SNARE REFLECTION REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Session ID:   {}\n", data.session.id));
    report.push_str(&format!("Status:       {}\n", data.status_to_string()));
    report.push_str(&format!("Crawl Date:   {}\n", format_timestamp(data.session.start_time)));
    if let Some(duration) = data.duration() {
        report.push_str(&format!("Duration:     {} seconds\n", duration));
    }
    report.push_str(&format!("Target:       {}\n", data.session.target_url));
    report.push_str(&format!("Pages Found:  {}\n", data.total_pages));
    report.push_str(&format!(
        "Edges:        {} ({} visited)\n\n",
        data.total_edges, data.visited_edges
    ));

    report.push_str(RULE);
    report.push_str("\nSUMMARY\n");
    report.push_str(RULE);
    report.push_str("\n\n");
    report.push_str(&format!("Payloads armed:    {}\n", data.payloads_armed));
    report.push_str(&format!("Trackers armed:    {}\n", data.trackers_armed));
    report.push_str(&format!("Markers reflected: {}\n\n", data.reflected_markers()));

    let sections: [(&str, Vec<&ReflectionRow>); 2] = [
        ("REFLECTED PAYLOADS", data.payload_reflections().collect()),
        ("TRACKED DATA FLOW", data.tracker_reflections().collect()),
    ];

    for (title, rows) in sections {
        if rows.is_empty() {
            continue;
        }
        report.push_str(RULE);
        report.push('\n');
        report.push_str(title);
        report.push('\n');
        report.push_str(RULE);
        report.push_str("\n\n");

        for (idx, row) in rows.iter().enumerate() {
            report.push_str(&format!("[{}] marker {}\n", idx + 1, row.marker));
            report.push_str(&format!("Injected at:  {}\n", row.injected_at));
            report.push_str(&format!("Parameter:    {}\n", row.parameter));
            report.push_str(&format!("Payload:      {}\n", row.payload));
            report.push_str(&format!("Seen at:      {}\n", row.url));
            report.push_str(&format!("Location:     {}\n", row.location));
            report.push_str("────────────────────────────────────────────────────────────────────────────────\n\n");
        }
    }

    report.push_str(RULE);
    report.push_str("\n                          End of Report\n");
    report.push_str(RULE);
    report.push_str("\n\nGenerated by Snare - a stateful crawler that tracks where your input comes back\n");
    report.push_str("For authorized security testing only.\n\n");

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Snare",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json",
                "disclaimer": "For authorized security testing only"
            },
            "session": {
                "id": data.session.id,
                "status": data.session.status,
                "start_time": format_iso8601_timestamp(data.session.start_time),
                "end_time": data.session.end_time.map(format_iso8601_timestamp),
                "duration_seconds": data.duration(),
                "target": data.session.target_url,
            },
            "summary": {
                "total_pages": data.total_pages,
                "total_edges": data.total_edges,
                "visited_edges": data.visited_edges,
                "payloads_armed": data.payloads_armed,
                "trackers_armed": data.trackers_armed,
                "markers_reflected": data.reflected_markers(),
            },
            "reflections": data.reflections,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_markdown_report(data: &ReportData) -> String {
    let mut md = String::new();

    md.push_str("# Snare Reflection Report\n\n");
    md.push_str("| | |\n|---|---|\n");
    md.push_str(&format!("| Session | `{}` |\n", data.session.id));
    md.push_str(&format!("| Status | {} |\n", data.status_to_string()));
    md.push_str(&format!("| Started | {} |\n", format_timestamp(data.session.start_time)));
    md.push_str(&format!("| Target | {} |\n", data.session.target_url));
    md.push_str(&format!("| Pages | {} |\n", data.total_pages));
    md.push_str(&format!("| Edges | {} ({} visited) |\n", data.total_edges, data.visited_edges));
    md.push_str(&format!("| Payloads armed | {} |\n", data.payloads_armed));
    md.push_str(&format!("| Trackers armed | {} |\n\n", data.trackers_armed));

    md.push_str("## Reflections\n\n");
    if data.reflections.is_empty() {
        md.push_str("No injected marker was seen again.\n");
        return md;
    }

    md.push_str("| Flow | Marker | Injected at | Parameter | Seen at | Location |\n");
    md.push_str("|---|---|---|---|---|---|\n");
    for row in &data.reflections {
        md.push_str(&format!(
            "| {} | `{}` | {} | `{}` | {} | {} |\n",
            row.flow,
            row.marker,
            escape_md(&row.injected_at),
            escape_md(&row.parameter),
            escape_md(&row.url),
            escape_md(&row.location)
        ));
    }
    md
}

pub fn render(data: &ReportData, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data),
        ReportFormat::Markdown => Ok(generate_markdown_report(data)),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn escape_md(s: &str) -> String {
    s.replace('|', "\\|")
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}
