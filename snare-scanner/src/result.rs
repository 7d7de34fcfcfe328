use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub target: String,
    pub steps: usize,
    pub step_errors: usize,
    pub nodes: usize,
    pub edges: usize,
    pub visited_edges: usize,
    pub payloads_armed: usize,
    pub trackers_armed: usize,
    pub reflections: usize,
    /// Stopped by the operator.
    pub stopped: bool,
    /// Gave up after too many consecutive step errors.
    pub aborted: bool,
    pub duration: Duration,
}

impl CrawlSummary {
    pub fn new(target: String) -> Self {
        Self {
            target,
            steps: 0,
            step_errors: 0,
            nodes: 0,
            edges: 0,
            visited_edges: 0,
            payloads_armed: 0,
            trackers_armed: 0,
            reflections: 0,
            stopped: false,
            aborted: false,
            duration: Duration::from_secs(0),
        }
    }

    pub fn finished(&self) -> bool {
        !self.stopped && !self.aborted
    }
}
