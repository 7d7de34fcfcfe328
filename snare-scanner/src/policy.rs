// Edge selection for the next crawl step

use crate::control::RunState;
use crate::crawler::Crawler;
use crate::driver::{Driver, Extractor};
use crate::replay::{execute_path, follow_edge};
use crate::scope::path_key;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snare_core::path::reconstruct;
use snare_core::{CrawlEdge, EdgeId, Graph, Method, Request};
use tracing::{debug, error, info, warn};
use url::Url;

/// Selection state that survives between steps.
pub struct PolicyState {
    rng: StdRng,
    early_gets: u32,
    max_early_gets: u32,
}

impl PolicyState {
    pub fn new(seed: u64, max_early_gets: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            early_gets: 0,
            max_early_gets,
        }
    }

    pub fn early_gets(&self) -> u32 {
        self.early_gets
    }

    /// Roll in `0..=100` for the category pick.
    fn roll(&mut self) -> u32 {
        self.rng.random_range(0..=100)
    }

    pub(crate) fn pick_category(&mut self) -> Category {
        let roll = self.roll();
        let category = Category::from_roll(roll);
        debug!("Looking for {:?} ({})", category, roll);
        category
    }
}

/// Edge kind tried when nothing more specific applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Form,
    Get,
    Event,
}

impl Category {
    /// Forms half the time, gets 30%, events 20%.
    fn from_roll(roll: u32) -> Self {
        match roll {
            0..50 => Category::Form,
            50..80 => Category::Get,
            _ => Category::Event,
        }
    }
}

/// Unvisited edges of `category`. Click handlers are preferred over other
/// events when any exist.
pub(crate) fn category_candidates(graph: &Graph, category: Category) -> Vec<EdgeId> {
    match category {
        Category::Form => graph.unvisited(Method::Form),
        Category::Get => link_rank(graph, graph.unvisited(Method::Get)),
        Category::Event => {
            let events = graph.unvisited(Method::Event);
            let clicks: Vec<EdgeId> = events
                .iter()
                .copied()
                .filter(|&id| {
                    graph
                        .edge(id)
                        .and_then(|e| e.label.as_event())
                        .is_some_and(|ev| ev.is_click())
                })
                .collect();
            if clicks.is_empty() { events } else { clicks }
        }
    }
}

/// Orders get edges so that rarely visited, shallow, parameter-poor URLs
/// come first. The sort is stable.
pub fn link_rank(graph: &Graph, mut edges: Vec<EdgeId>) -> Vec<EdgeId> {
    edges.sort_by_key(|&id| {
        let Some(target) = graph.target(id) else {
            return (u32::MAX, usize::MAX, usize::MAX);
        };
        let visits = graph.data.urls.get(&path_key(&target.url)).copied().unwrap_or(0);
        match Url::parse(&target.url) {
            Ok(url) => {
                let depth = url.path().split('/').filter(|s| !s.is_empty()).count();
                (visits, depth, url.query_pairs().count())
            }
            Err(_) => (visits, usize::MAX, usize::MAX),
        }
    });
    edges
}

impl<D: Driver + Extractor> Crawler<D> {
    /// Early-phase get selections made so far; past `max_early_gets` once
    /// the phase has ended.
    pub fn early_gets(&self) -> u32 {
        self.policy.early_gets()
    }

    /// Picks the next edge and brings the session to its state. None when
    /// nothing followable is left.
    pub async fn next_unvisited_edge(&mut self) -> Option<EdgeId> {
        if let Some(edge) = self.queued_edge().await {
            return Some(edge);
        }

        loop {
            let mut candidates = self.graph.unvisited(Method::Iframe);
            if !candidates.is_empty() {
                info!("Following iframe edge");
            }

            if !self.config.debug {
                if self.policy.early_gets < self.policy.max_early_gets {
                    info!(
                        "Looking for EARLY gets {}/{}",
                        self.policy.early_gets, self.policy.max_early_gets
                    );
                    candidates = link_rank(&self.graph, self.graph.unvisited(Method::Get));
                    if candidates.is_empty() {
                        info!("No get, trying something else");
                    } else {
                        self.policy.early_gets += 1;
                    }
                }
                if self.policy.early_gets == self.policy.max_early_gets {
                    self.end_early_phase();
                }
            }

            if candidates.is_empty() {
                self.follow_up_previous_form().await;
            }

            if candidates.is_empty() {
                candidates = self.category_candidates();
            }

            if candidates.is_empty() {
                warn!("Falling back to GET");
                candidates = link_rank(&self.graph, self.graph.unvisited(Method::Get));
            }

            if let Some(edge) = self.try_candidates(&candidates).await {
                return Some(edge);
            }
            let everything = self.graph.all_unvisited();
            if let Some(edge) = self.try_candidates(&everything).await {
                return Some(edge);
            }

            if self.policy.early_gets < self.policy.max_early_gets {
                info!("Nothing followable, ending early phase and retrying");
                self.policy.early_gets = self.policy.max_early_gets;
                continue;
            }
            return None;
        }
    }

    /// Everything becomes unvisited again and visit counters restart, so
    /// the main phase revisits pages discovered early with fresh eyes.
    fn end_early_phase(&mut self) {
        info!("RESET");
        for id in self.graph.edge_ids() {
            self.graph.unvisit_edge(id);
        }
        self.graph.data.urls.clear();
        self.graph.data.form_urls.clear();
        self.policy.early_gets += 1;
    }

    /// A URL the operator queued becomes a get edge from the root and is
    /// followed right away. The crawl drops to stepping mode.
    async fn queued_edge(&mut self) -> Option<EdgeId> {
        let url = self.control.take_queued().await?;
        info!("Operator queued {}", url);

        let request = Request::get(url.clone());
        let label = CrawlEdge::get(self.driver.cookies());
        self.graph.add(request.clone());
        let prev = self.graph.data.prev_edge;
        self.graph.connect(&self.root, &request, label.clone(), prev);
        self.control.set_state(RunState::Step);

        let edge = self.graph.find_edge(&self.root, &request, &label)?;
        if follow_edge(&mut self.driver, &mut self.graph, &self.scope, edge).await {
            Some(edge)
        } else {
            error!("Could not load URL from user: {}", url);
            None
        }
    }

    /// If the previous step submitted a form nobody has tracked yet, resubmit
    /// it carrying trackers.
    async fn follow_up_previous_form(&mut self) {
        let Some(prev) = self.graph.data.prev_edge else {
            return;
        };
        let Some(form) = self.graph.edge(prev).and_then(|e| e.label.as_form()).cloned() else {
            return;
        };
        if self.tracker.is_attacked(&form) {
            warn!("Form already done! {}", form);
            return;
        }
        self.tracker.mark_attacked(&form);
        info!("prev was form, TRACK {}", form);
        if !self.track_form(prev).await {
            warn!("Tracking replay failed for {}", form);
        }
    }

    /// Arms trackers on every form along the path to `edge` and replays it.
    pub async fn track_form(&mut self, edge: EdgeId) -> bool {
        let path = reconstruct(&self.graph, edge);
        let armed = self.tracker.arm_form_trackers(&mut self.graph, &path);
        debug!("Armed {} trackers for {}", armed, self.graph.describe_edge(edge));
        let replayed = execute_path(&mut self.driver, &self.graph, &self.scope, &path).await;
        if replayed {
            self.observe().await;
        }
        replayed
    }

    fn category_candidates(&mut self) -> Vec<EdgeId> {
        let category = self.policy.pick_category();
        category_candidates(&self.graph, category)
    }

    /// Follows the first candidate that is still unvisited and passes
    /// check_edge. Rejected candidates are marked visited.
    async fn try_candidates(&mut self, candidates: &[EdgeId]) -> Option<EdgeId> {
        for &id in candidates {
            if self.graph.edge(id).is_none_or(|e| e.visited) {
                continue;
            }
            if !self.scope.check_edge(&self.graph, id) {
                warn!("check_edge failed for {}", self.graph.describe_edge(id));
                self.graph.visit_edge(id);
                continue;
            }
            if follow_edge(&mut self.driver, &mut self.graph, &self.scope, id).await {
                return Some(id);
            }
        }
        None
    }
}
