use crate::error::Result;
use crate::graph::Graph;
use petgraph::dot::Dot;
use std::fs;
use std::path::Path;
use tracing::info;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

/// Renders the graph in Mathematica `Graph[...]` notation. Vertices are
/// named by request URL; output only depends on insertion order.
pub fn to_mathematica(graph: &Graph) -> String {
    let mut cons = Vec::new();
    let mut edge_cons = Vec::new();

    for (id, edge) in graph.edges() {
        let (Some(from), Some(to)) = (graph.source(id), graph.target(id)) else {
            continue;
        };
        let connector = format!("{} -> {}", quote(&from.url), quote(&to.url));
        let label = format!("{},{}", edge.label.method(), edge.label.data());
        edge_cons.push(format!("({}) -> {}", connector, quote(&label)));
        cons.push(connector);
    }

    let data = format!("{{{}}}", cons.join(","));
    let edge_data = format!("{{{}}}", edge_cons.join(","));

    let settings = [
        "VertexLabels -> All".to_string(),
        format!("EdgeLabels -> {}", edge_data),
        "EdgeShapeFunction -> GraphElementData[\"FilledArrow\", \"ArrowSize\" -> 0.005]".to_string(),
        "VertexSize -> 0.1".to_string(),
        "ImageSize->Scaled[3]".to_string(),
    ];

    format!("Graph[{}, {}  ]", data, settings.join(","))
}

/// Human readable dump, as written for the `get_graph` command.
pub fn to_text(graph: &Graph) -> String {
    graph.to_string()
}

/// Graphviz rendering of the raw graph.
pub fn to_dot(graph: &Graph) -> String {
    format!("{}", Dot::new(graph.inner()))
}

pub fn write_mathematica(graph: &Graph, path: &Path) -> Result<()> {
    fs::write(path, to_mathematica(graph))?;
    info!("Wrote graph export to {}", path.display());
    Ok(())
}

pub fn write_text(graph: &Graph, path: &Path) -> Result<()> {
    fs::write(path, to_text(graph))?;
    info!("Wrote graph dump to {}", path.display());
    Ok(())
}
