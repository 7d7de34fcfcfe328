// Scripted in-memory session shared by the engine tests

#![allow(dead_code)]

use snare_core::{Cookie, Event, Form, Iframe, UiForm};
use snare_scanner::error::{Result, ScanError};
use snare_scanner::{Driver, Extractor, Observation, PageFacts};
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct MockDriver {
    pub pages: HashMap<String, PageFacts>,
    pub failing: HashSet<String>,
    pub current: String,
    /// Every action attempted, in order.
    pub log: Vec<String>,
    /// Values submitted so far; the mock "stores" and echoes them.
    pub stored: Vec<String>,
    pub broken_extract: bool,
    /// Alerts still pending per URL; each load raises one.
    pub alerts: HashMap<String, usize>,
    /// Alerts raised by the next extractions.
    pub extract_alerts: usize,
    pub alert_open: bool,
    pub dismissed: usize,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            current: "about:blank".to_string(),
            ..Default::default()
        }
    }

    pub fn page(mut self, url: &str, facts: PageFacts) -> Self {
        self.pages.insert(url.to_string(), facts);
        self
    }

    pub fn failing(mut self, what: &str) -> Self {
        self.failing.insert(what.to_string());
        self
    }

    pub fn alerting(mut self, url: &str, times: usize) -> Self {
        self.alerts.insert(url.to_string(), times);
        self
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log.iter().filter(|l| l.starts_with(prefix)).count()
    }
}

impl Driver for MockDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.log.push(format!("get {}", url));
        if let Some(left) = self.alerts.get_mut(url).filter(|n| **n > 0) {
            *left -= 1;
            self.alert_open = true;
            return Err(ScanError::UnexpectedAlert(format!("alert on {}", url)));
        }
        if self.failing.contains(url) {
            return Err(ScanError::Other(format!("cannot load {}", url)));
        }
        self.current = url.to_string();
        Ok(())
    }

    async fn fill_and_submit(&mut self, form: &Form) -> Result<()> {
        self.log.push(format!("submit {}", form.action));
        if self.failing.contains(&form.action) {
            return Err(ScanError::StaleElement(form.action.clone()));
        }
        for (_, value) in form.submission_values() {
            self.stored.push(value);
        }
        self.current = form.action.clone();
        Ok(())
    }

    async fn submit_ui_form(&mut self, ui_form: &UiForm) -> Result<()> {
        self.log.push(format!("ui {}", ui_form.submit));
        Ok(())
    }

    async fn dispatch(&mut self, event: &Event) -> Result<()> {
        self.log.push(format!("event {}", event.address));
        Ok(())
    }

    async fn enter_iframe(&mut self, iframe: &Iframe) -> Result<()> {
        self.log.push(format!("iframe {:?}", iframe.src));
        if let Some(src) = &iframe.src {
            self.current = src.clone();
        }
        Ok(())
    }

    async fn run_script(&mut self, code: &str) -> Result<()> {
        self.log.push(format!("script {}", code));
        Ok(())
    }

    fn cookies(&self) -> Vec<Cookie> {
        Vec::new()
    }

    async fn dismiss_alert(&mut self) -> bool {
        if !self.alert_open {
            return false;
        }
        self.alert_open = false;
        self.dismissed += 1;
        true
    }

    fn current_url(&self) -> String {
        self.current.clone()
    }

    async fn need_to_wait(&mut self) -> Result<bool> {
        Ok(false)
    }
}

impl Extractor for MockDriver {
    async fn extract(&mut self) -> Result<PageFacts> {
        if self.broken_extract {
            return Err(ScanError::Other("extractor crashed".to_string()));
        }
        if self.extract_alerts > 0 {
            self.extract_alerts -= 1;
            self.alert_open = true;
            return Err(ScanError::UnexpectedAlert("alert during extract".to_string()));
        }
        Ok(self.pages.get(&self.current).cloned().unwrap_or_default())
    }

    async fn observe_markers(&mut self, markers: &[String]) -> Vec<Observation> {
        markers
            .iter()
            .filter(|m| {
                self.current.contains(m.as_str()) || self.stored.iter().any(|v| v.contains(m.as_str()))
            })
            .map(|m| Observation {
                marker: m.clone(),
                location: "text".to_string(),
            })
            .collect()
    }
}
