// Attack phase: replays forms and query strings carrying payloads

use crate::control::RunState;
use crate::crawler::Crawler;
use crate::driver::{Driver, Extractor};
use crate::replay::execute_path;
use snare_core::path::reconstruct_prefix;
use snare_core::taint::PAYLOAD_TEMPLATES;
use snare_core::{AttackMode, EdgeId, Form, FormIdentity, Injection, InjectionVector, Method, Parameter};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};
use url::Url;

impl<D: Driver + Extractor> Crawler<D> {
    /// Runs the attack phase. Returns the number of submissions sent.
    pub async fn attack(&mut self) -> usize {
        let mut sent = self.attack_forms().await;
        if self.control.state() != RunState::Stop {
            sent += self.attack_queries().await;
        }
        info!(
            "Attack phase done: {} payloads armed, {} reflections",
            self.tracker.payload_count(),
            self.tracker.reflection_count()
        );
        sent
    }

    async fn attack_forms(&mut self) -> usize {
        let form_edges: Vec<(EdgeId, Form)> = self
            .graph
            .edges()
            .filter_map(|(id, e)| e.label.as_form().map(|f| (id, f.clone())))
            .collect();

        let mut done: HashSet<FormIdentity> = HashSet::new();
        let mut sent = 0;

        for (edge, form) in form_edges {
            if !form.attackable() {
                debug!("Form not attackable: {}", form);
                continue;
            }
            if !done.insert(form.identity()) {
                continue;
            }
            if !self.scope.allow_edge(&self.graph, edge) {
                continue;
            }

            info!("Attacking form {}", form);
            let prefix = reconstruct_prefix(&self.graph, edge);

            for template in PAYLOAD_TEMPLATES {
                for mode in [AttackMode::Safe, AttackMode::Aggressive] {
                    if self.control.state() == RunState::Stop {
                        info!("Attack stopped by operator");
                        return sent;
                    }
                    let mut armed = form.clone();
                    if self.tracker.fix_form(&mut armed, template, mode) == 0 {
                        continue;
                    }
                    if !execute_path(&mut self.driver, &self.graph, &self.scope, &prefix).await {
                        warn!("Could not reach {} for {} attack", form.action, mode.as_str());
                        continue;
                    }
                    match self.driver.fill_and_submit(&armed).await {
                        Ok(()) => {
                            sent += 1;
                            self.settle().await;
                            self.observe().await;
                        }
                        Err(e) => warn!("Submit failed for {}: {}", form.action, e),
                    }
                    self.driver.dismiss_alert().await;
                }
            }
        }
        sent
    }

    async fn attack_queries(&mut self) -> usize {
        let urls: BTreeSet<String> = self
            .graph
            .nodes()
            .filter(|n| n.value.method == Method::Get && self.scope.url_allowed(&n.value.url))
            .map(|n| n.value.url.clone())
            .collect();

        let mut sent = 0;
        for url in urls {
            let Ok(parsed) = Url::parse(&url) else {
                continue;
            };
            let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
            if pairs.is_empty() {
                continue;
            }
            info!("Attacking query parameters of {}", url);

            for i in 0..pairs.len() {
                for template in PAYLOAD_TEMPLATES {
                    if self.control.state() == RunState::Stop {
                        return sent;
                    }
                    let (lookup_id, payload) = self.tracker.arm_payload(template);
                    let attacked = with_query_value(&parsed, &pairs, i, &payload);
                    self.tracker.use_payload(
                        lookup_id,
                        Injection {
                            vector: InjectionVector::Query { url: url.clone() },
                            parameter: Parameter::Query(pairs[i].0.clone()),
                            payload,
                        },
                    );
                    match self.driver.navigate(&attacked).await {
                        Ok(()) => {
                            sent += 1;
                            self.settle().await;
                            self.observe().await;
                        }
                        Err(e) => warn!("Query attack on {} failed: {}", url, e),
                    }
                    self.driver.dismiss_alert().await;
                }
            }
        }
        sent
    }
}

/// `url` with the value of query pair `index` replaced.
fn with_query_value(url: &Url, pairs: &[(String, String)], index: usize, value: &str) -> String {
    let mut attacked = url.clone();
    attacked.set_fragment(None);
    {
        let mut query = attacked.query_pairs_mut();
        query.clear();
        for (i, (name, original)) in pairs.iter().enumerate() {
            let v = if i == index { value } else { original.as_str() };
            query.append_pair(name, v);
        }
    }
    attacked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query_value() {
        let url = Url::parse("http://example.com/s?q=a&page=2#top").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let attacked = with_query_value(&url, &pairs, 1, "<b>");
        assert_eq!(attacked, "http://example.com/s?q=a&page=%3Cb%3E");
    }
}
