// Replaying discovery paths against a live session

use crate::driver::Driver;
use crate::error::{Result, ScanError};
use crate::scope::{Scope, path_key};
use snare_core::path::reconstruct;
use snare_core::{EdgeId, Graph, Method, MethodData};
use tracing::{debug, error, info, warn};

async fn perform<D: Driver>(driver: &mut D, graph: &Graph, scope: &Scope, edge: EdgeId) -> Result<()> {
    let (Some(target), Some(e)) = (graph.target(edge), graph.edge(edge)) else {
        return Err(ScanError::Other(format!("unknown edge {}", edge.index())));
    };
    debug!("find_state method {}", e.label.method());

    match (e.label.method(), e.label.data()) {
        (Method::Get, _) => {
            if !scope.allow_edge(graph, edge) {
                warn!("Not allowed to get: {}", target.url);
                return Err(ScanError::NotAllowed(target.url.clone()));
            }
            driver.navigate(&target.url).await
        }
        (Method::Form, MethodData::Form(form)) => driver.fill_and_submit(form).await,
        (Method::Event, MethodData::Event(event)) => {
            let result = match driver.dispatch(event).await {
                Err(ScanError::StaleElement(what)) => {
                    warn!("Stale element for {}: {}", event, what);
                    Ok(())
                }
                other => other,
            };
            driver.dismiss_alert().await;
            result
        }
        (Method::Iframe, MethodData::Iframe(iframe)) => driver.enter_iframe(iframe).await,
        (Method::UiForm, MethodData::UiForm(ui_form)) => driver.submit_ui_form(ui_form).await,
        (Method::Javascript, _) => match target.javascript_code() {
            Some(code) => driver.run_script(code).await,
            None => Err(ScanError::Other(format!("not a javascript: url {}", target.url))),
        },
        (method, data) => Err(ScanError::Other(format!(
            "edge {} has {} data for method {}",
            edge.index(),
            data,
            method
        ))),
    }
}

/// Runs one edge. An alert interrupting the step is dismissed and the step
/// is tried once more.
pub async fn execute_edge<D: Driver>(driver: &mut D, graph: &Graph, scope: &Scope, edge: EdgeId) -> Result<()> {
    match perform(driver, graph, scope, edge).await {
        Err(ScanError::UnexpectedAlert(text)) => {
            warn!("Alert detected: {}", text);
            driver.dismiss_alert().await;
            perform(driver, graph, scope, edge).await
        }
        other => other,
    }
}

/// Replays `path` in order and stops at the first failing step.
pub async fn execute_path<D: Driver>(driver: &mut D, graph: &Graph, scope: &Scope, path: &[EdgeId]) -> bool {
    for &edge in path {
        if let Err(e) = execute_edge(driver, graph, scope, edge).await {
            warn!("Replay failed at {}: {}", graph.describe_edge(edge), e);
            return false;
        }
    }
    true
}

/// Brings the session to the state after `edge`. Plain gets are loaded
/// directly; everything else replays its discovery path. An edge that
/// cannot be followed is marked visited so it is not picked again.
pub async fn follow_edge<D: Driver>(driver: &mut D, graph: &mut Graph, scope: &Scope, edge: EdgeId) -> bool {
    let Some(method) = graph.edge(edge).map(|e| e.label.method()) else {
        return false;
    };

    let success = if method == Method::Get {
        execute_edge(driver, graph, scope, edge).await.is_ok()
    } else {
        let path = reconstruct(graph, edge);
        execute_path(driver, graph, scope, &path).await
    };

    if success {
        if let Some(target) = graph.target(edge) {
            let key = path_key(&target.url);
            *graph.data.urls.entry(key).or_insert(0) += 1;
        }
        if let Some(form) = graph.edge(edge).and_then(|e| e.label.as_form()) {
            let key = path_key(&form.action);
            *graph.data.form_urls.entry(key).or_insert(0) += 1;
        }
        info!("Followed {}", graph.describe_edge(edge));
    } else {
        error!("Could not follow {}", graph.describe_edge(edge));
        graph.visit_edge(edge);
    }
    success
}
