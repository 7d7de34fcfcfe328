use crate::error::{Result, ScanError};
use crate::scope::{DEFAULT_MAX_EVENT_CHAIN, DEFAULT_MAX_FORM_SUBMITS, DEFAULT_MAX_URL_VISITS, Scope};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_EARLY_GETS: u32 = 100;
/// Seed for the weighted category pick.
pub const DEFAULT_SEED: u64 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub url: String,
    /// Skips path-prefix seeding and the early-discovery phase.
    pub debug: bool,
    /// Crawl only, no attack phase.
    pub crawler_only: bool,
    pub max_early_gets: u32,
    pub seed: u64,
    pub settle_delay_ms: u64,
    pub max_step_errors: u32,
    pub exclude: Vec<String>,
    pub max_url_visits: u32,
    pub max_form_submits: u32,
    pub max_event_chain: usize,
    /// Where the graph export and dumps are written. None disables them.
    pub output_dir: Option<PathBuf>,
    /// Names the session in control and output files.
    pub browser: String,
}

impl CrawlConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            debug: false,
            crawler_only: false,
            max_early_gets: DEFAULT_MAX_EARLY_GETS,
            seed: DEFAULT_SEED,
            settle_delay_ms: 1000,
            max_step_errors: 10,
            exclude: Vec::new(),
            max_url_visits: DEFAULT_MAX_URL_VISITS,
            max_form_submits: DEFAULT_MAX_FORM_SUBMITS,
            max_event_chain: DEFAULT_MAX_EVENT_CHAIN,
            output_dir: None,
            browser: "http".to_string(),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn scope(&self) -> Result<Scope> {
        Ok(Scope::new(&self.url)?
            .with_exclude(self.exclude.clone())
            .with_limits(self.max_url_visits, self.max_form_submits, self.max_event_chain))
    }

    /// `{host}-{browser}`, with the port if there is one.
    pub fn session_key(&self) -> Result<String> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", self.url)))?;
        let domain = match parsed.port() {
            Some(port) => format!("{}_{}", host, port),
            None => host.to_string(),
        };
        Ok(format!("{}-{}", domain, self.browser))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ScanError::Other(e.to_string()))
    }
}
