use crate::graph::{EdgeId, Graph};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Edges to replay to reach `edge` from the root, root first, `edge` last.
///
/// This is the route the edge was originally discovered through, which is
/// not necessarily the shortest one.
pub fn reconstruct(graph: &Graph, edge: EdgeId) -> Vec<EdgeId> {
    if graph.edge(edge).is_none() {
        warn!("Cannot reconstruct path to unknown edge {}", edge.index());
        return Vec::new();
    }

    let mut path = vec![edge];
    let mut seen = HashSet::from([edge]);
    let mut current = graph.parent(edge);

    while let Some(parent) = current {
        if !seen.insert(parent) {
            warn!("Parent cycle at edge {}, truncating path", parent.index());
            break;
        }
        path.push(parent);
        current = graph.parent(parent);
    }

    path.reverse();
    debug!("Reconstructed path of {} edges", path.len());
    path
}

/// Path up to, but excluding, `edge`: the state `edge` starts from.
pub fn reconstruct_prefix(graph: &Graph, edge: EdgeId) -> Vec<EdgeId> {
    let mut path = reconstruct(graph, edge);
    path.pop();
    path
}

