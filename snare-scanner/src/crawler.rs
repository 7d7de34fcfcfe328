// Crawl loop

use crate::config::CrawlConfig;
use crate::control::{Command, Control, RunState};
use crate::driver::{Driver, Extractor, PageFacts};
use crate::error::{Result, ScanError};
use crate::policy::PolicyState;
use crate::result::CrawlSummary;
use crate::scope::Scope;
use snare_core::export::{write_mathematica, write_text};
use snare_core::{CrawlEdge, EdgeId, Graph, Method, Request, TaintTracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Placeholder URL of the root node every crawl starts from.
pub const ROOT_URL: &str = "ROOTREQ";

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

pub struct Crawler<D> {
    pub(crate) driver: D,
    pub(crate) config: CrawlConfig,
    pub(crate) scope: Scope,
    pub(crate) graph: Graph,
    pub(crate) tracker: TaintTracker,
    pub(crate) control: Control,
    pub(crate) policy: PolicyState,
    pub(crate) root: Request,
    session_key: String,
    progress_callback: Option<ProgressCallback>,
    steps: usize,
}

impl<D: Driver + Extractor> Crawler<D> {
    pub fn new(driver: D, config: CrawlConfig) -> Result<Self> {
        let scope = config.scope()?;
        let session_key = config.session_key()?;
        let policy = PolicyState::new(config.seed, config.max_early_gets);

        Ok(Self {
            driver,
            scope,
            session_key,
            policy,
            config,
            graph: Graph::new(),
            tracker: TaintTracker::new(),
            control: Control::new(),
            root: Request::get(ROOT_URL),
            progress_callback: None,
            steps: 0,
        })
    }

    /// Share a control channel with an operator.
    pub fn with_control(mut self, control: Control) -> Self {
        self.control = control;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tracker(&self) -> &TaintTracker {
        &self.tracker
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Crawl, then attack what was found unless running crawl-only.
    pub async fn run(&mut self) -> Result<CrawlSummary> {
        let started = Instant::now();
        let mut summary = self.crawl().await?;

        if !self.config.crawler_only && summary.finished() {
            info!("Crawl done, attacking");
            let sent = self.attack().await;
            info!("Attack phase sent {} payloads", sent);
            summary.stopped = self.control.state() == RunState::Stop;
        }

        self.fill_summary(&mut summary);
        summary.duration = started.elapsed();
        Ok(summary)
    }

    /// Runs steps until no edge is left, the operator stops the crawl, or
    /// too many steps fail in a row.
    pub async fn crawl(&mut self) -> Result<CrawlSummary> {
        let started = Instant::now();
        let mut summary = CrawlSummary::new(self.config.url.clone());

        info!("Starting crawl of {}", self.config.url);
        self.seed()?;

        let mut consecutive_errors = 0u32;
        loop {
            match self.control.state() {
                RunState::Stop => {
                    info!("Crawler stopped by operator");
                    summary.stopped = true;
                    break;
                }
                RunState::Pause => {
                    info!("Crawler paused");
                    self.control.wait_for_resume().await;
                    if self.control.state() == RunState::Stop {
                        continue;
                    }
                    self.control.set_state(RunState::Step);
                }
                RunState::Run | RunState::Step => {}
            }

            debug!(
                "Unvisited: {} gets, {} forms, {} events",
                self.graph.unvisited_count(Method::Get),
                self.graph.unvisited_count(Method::Form),
                self.graph.unvisited_count(Method::Event)
            );

            match self.step().await {
                Ok(true) => consecutive_errors = 0,
                Ok(false) => break,
                Err(e) => {
                    error!("Crawl step failed: {}", e);
                    summary.step_errors += 1;
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_step_errors {
                        error!("Giving up after {} failed steps in a row", consecutive_errors);
                        summary.aborted = true;
                        break;
                    }
                    if self.graph.all_unvisited().is_empty() {
                        break;
                    }
                }
            }
        }

        self.fill_summary(&mut summary);
        summary.duration = started.elapsed();
        info!(
            "Crawl finished: {} steps, {} nodes, {} edges",
            summary.steps, summary.nodes, summary.edges
        );
        Ok(summary)
    }

    fn fill_summary(&self, summary: &mut CrawlSummary) {
        summary.steps = self.steps;
        summary.nodes = self.graph.node_count();
        summary.edges = self.graph.edge_count();
        summary.visited_edges = self.graph.edges().filter(|(_, e)| e.visited).count();
        summary.payloads_armed = self.tracker.payload_count();
        summary.trackers_armed = self.tracker.tracker_count();
        summary.reflections = self.tracker.reflection_count();
    }

    /// Adds the root, the target and, outside debug mode, every directory
    /// prefix of the target path.
    pub(crate) fn seed(&mut self) -> Result<()> {
        if self.graph.contains(&self.root) {
            return Ok(());
        }
        self.graph.add(self.root.clone());

        let target = Request::get(self.config.url.clone());
        self.graph.add(target.clone());
        self.graph
            .connect(&self.root, &target, CrawlEdge::get(Vec::new()), None);

        if !self.config.debug {
            for prefix in path_prefixes(&self.config.url)? {
                let req = Request::get(prefix);
                self.graph.add(req.clone());
                self.graph
                    .connect(&self.root, &req, CrawlEdge::get(Vec::new()), None);
            }
        }
        Ok(())
    }

    /// One crawl step. Returns false when there is nothing left to do.
    pub async fn step(&mut self) -> Result<bool> {
        if !self.graph.contains(&self.root) {
            self.seed()?;
        }

        let Some(edge) = self.next_unvisited_edge().await else {
            self.finish();
            return Ok(false);
        };

        self.graph.data.prev_edge = Some(edge);
        let Some(request) = self.graph.target(edge).cloned() else {
            return Err(ScanError::Core(snare_core::CoreError::UnknownEdge(edge.index())));
        };
        let method = self.graph.edge(edge).map(|e| e.label.method());

        self.steps += 1;
        let description = self.graph.describe_edge(edge);
        info!("Crawl step {}: {}", self.steps, description);
        if let Some(cb) = &self.progress_callback {
            cb(self.steps, description);
        }

        self.graph.visit_node(&request);
        self.graph.visit_edge(edge);
        if method == Some(Method::Get) {
            self.graph.visit_sibling_gets(edge);
        }

        self.settle().await;

        if self.login_if_needed().await {
            self.settle().await;
        }

        let mut facts = self.extract_facts().await?;
        facts.forms = facts
            .forms
            .into_iter()
            .flat_map(|mut form| {
                form.fill_defaults();
                form.submit_variants()
            })
            .collect();

        self.settle().await;

        let added = self.fold_facts(&request, edge, facts);
        debug!("Added {} edges from {}", added, request);

        if self.driver.dismiss_alert().await {
            debug!("Dismissed stray alert");
        }

        self.observe().await;

        if self.control.state() == RunState::Step {
            info!("Crawler in stepping mode");
            self.control.wait_for_resume().await;
        }

        if let Some(Command::GetGraph) = self.control.take_command().await {
            if let Some(path) = self.output_file("graph.txt") {
                match write_text(&self.graph, &path) {
                    Ok(()) => info!("Graph written to {}", path.display()),
                    Err(e) => warn!("Could not write graph: {}", e),
                }
            }
        }

        Ok(true)
    }

    /// Submits the first in-scope login form on the current page with
    /// default credentials. Returns true when a submit went through.
    async fn login_if_needed(&mut self) -> bool {
        let facts = match self.extract_facts().await {
            Ok(facts) => facts,
            Err(e) => {
                debug!("No login check: {}", e);
                return false;
            }
        };
        let Some(mut form) = facts
            .forms
            .into_iter()
            .find(|f| f.is_login_form() && self.scope.url_allowed(&f.action))
        else {
            return false;
        };
        form.fill_defaults();
        let Some(form) = form.submit_variants().into_iter().next() else {
            return false;
        };

        match self.driver.fill_and_submit(&form).await {
            Ok(()) => {
                info!("Submitted login form to {}", form.action);
                true
            }
            Err(e) => {
                warn!("Failed to login to potential login form: {}", e);
                false
            }
        }
    }

    async fn extract_facts(&mut self) -> Result<PageFacts> {
        match self.driver.extract().await {
            Err(ScanError::UnexpectedAlert(text)) => {
                warn!("Alert during extraction: {}", text);
                self.driver.dismiss_alert().await;
                self.driver.extract().await
            }
            other => other,
        }
    }

    /// Waits out asynchronous page activity.
    pub(crate) async fn settle(&mut self) {
        let wait = match self.driver.need_to_wait().await {
            Ok(wait) => wait,
            Err(ScanError::UnexpectedAlert(text)) => {
                warn!("Alert detected: {}", text);
                self.driver.dismiss_alert().await;
                self.driver.need_to_wait().await.unwrap_or_else(|e| {
                    warn!("Inner wait error for need_to_wait: {}", e);
                    false
                })
            }
            Err(e) => {
                debug!("No need_to_wait: {}", e);
                false
            }
        };
        if wait {
            tokio::time::sleep(self.config.settle_delay()).await;
        }
    }

    /// Turns harvested facts into graph edges from `request`. Returns how
    /// many new edges were connected.
    fn fold_facts(&mut self, request: &Request, parent: EdgeId, facts: PageFacts) -> usize {
        let cookies = self.driver.cookies();
        let current_url = self.driver.current_url();
        let mut added = 0;

        for url in facts.urls {
            let label = CrawlEdge::for_request(&url, cookies.clone());
            added += self.add_discovered(request, url, label, parent) as usize;
        }
        for form in facts.forms {
            let target = Request::new(form.action.clone(), Method::Form);
            let label = CrawlEdge::form(form, cookies.clone());
            added += self.add_discovered(request, target, label, parent) as usize;
        }
        for event in facts.events {
            let target = Request::new(request.url.clone(), Method::Event);
            let label = CrawlEdge::event(event, cookies.clone());
            added += self.add_discovered(request, target, label, parent) as usize;
        }
        for iframe in facts.iframes {
            let target = Request::new(iframe.src.clone().unwrap_or_default(), Method::Iframe);
            let label = CrawlEdge::iframe(iframe, cookies.clone());
            added += self.add_discovered(request, target, label, parent) as usize;
        }
        for ui_form in facts.ui_forms {
            let target = Request::new(current_url.clone(), Method::UiForm);
            let label = CrawlEdge::ui_form(ui_form, cookies.clone());
            added += self.add_discovered(request, target, label, parent) as usize;
        }
        added
    }

    fn add_discovered(&mut self, from: &Request, to: Request, label: CrawlEdge, parent: EdgeId) -> bool {
        if !self.scope.allow(&to, &label) {
            debug!("Not allowed to add edge {} -> {}", label, to);
            return false;
        }
        self.graph.add(to.clone());
        self.graph.connect(from, &to, label, Some(parent))
    }

    /// Looks for every armed marker in the current page. Returns the number
    /// of reflections recorded.
    pub(crate) async fn observe(&mut self) -> usize {
        let markers = self.tracker.markers();
        if markers.is_empty() {
            return 0;
        }
        let observations = self.driver.observe_markers(&markers).await;
        let url = self.driver.current_url();
        observations
            .iter()
            .filter(|o| self.tracker.observe(&o.marker, &url, &o.location))
            .count()
    }

    /// End of crawl: export the graph and log every tracked flow.
    fn finish(&self) {
        info!("Done crawling, ready to attack!");
        if let Some(path) = self.output_file("graph_mathematica.txt") {
            match write_mathematica(&self.graph, &path) {
                Ok(()) => info!("Graph export written to {}", path.display()),
                Err(e) => warn!("Could not write graph export: {}", e),
            }
        }
        for (tracker, record) in self.tracker.trackers() {
            for (url, location) in &record.reflected {
                info!(
                    "EDGE FROM {} {} ({}) to {} at {}",
                    record.injected.vector, record.injected.parameter, tracker, url, location
                );
            }
        }
    }

    fn output_file(&self, suffix: &str) -> Option<PathBuf> {
        let dir = self.config.output_dir.as_ref()?;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Could not create {}: {}", dir.display(), e);
            return None;
        }
        Some(dir.join(format!("{}-{}", self.session_key, suffix)))
    }
}

/// Every directory prefix of the URL path, e.g. `/a/b/c.php` gives `/a/`
/// and `/a/b/`. Query and fragment are dropped.
pub fn path_prefixes(url: &str) -> Result<Vec<String>> {
    let parsed = Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    let dirs = if parsed.path().ends_with('/') {
        segments.len()
    } else {
        segments.len().saturating_sub(1)
    };

    let mut prefixes = Vec::new();
    let mut path = String::from("/");
    for segment in &segments[..dirs] {
        path.push_str(segment);
        path.push('/');
        let mut prefix = parsed.clone();
        prefix.set_path(&path);
        prefix.set_query(None);
        prefix.set_fragment(None);
        prefixes.push(prefix.to_string());
    }
    Ok(prefixes)
}
