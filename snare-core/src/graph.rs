use crate::form::Form;
use crate::model::{CrawlEdge, Method, Request};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

pub type EdgeId = EdgeIndex;

#[derive(Debug, Clone)]
pub struct Node {
    pub value: Request,
    pub visited: bool,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub label: CrawlEdge,
    pub visited: bool,
    /// The edge whose execution discovered this one. Set once, at
    /// discovery, and never updated.
    pub parent: Option<EdgeId>,
}

/// Auxiliary run state kept next to the graph.
#[derive(Debug, Clone, Default)]
pub struct RunData {
    /// Visit counts per URL path, used for link ranking.
    pub urls: HashMap<String, u32>,
    /// Submission counts per form action path.
    pub form_urls: HashMap<String, u32>,
    /// Edge executed on the previous crawl step.
    pub prev_edge: Option<EdgeId>,
}

/// Crawl graph. Nodes and edges are identified by value; nothing is ever
/// removed, so iteration follows insertion order.
#[derive(Debug, Default)]
pub struct Graph {
    inner: StableDiGraph<Node, Edge>,
    nodes: HashMap<Request, NodeIndex>,
    edges: HashMap<(NodeIndex, NodeIndex, CrawlEdge), EdgeId>,
    pub data: RunData,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: Request) -> bool {
        if self.nodes.contains_key(&value) {
            info!("failed to add node {}, already added", value);
            return false;
        }
        let idx = self.inner.add_node(Node {
            value: value.clone(),
            visited: false,
        });
        self.nodes.insert(value, idx);
        true
    }

    pub fn contains(&self, value: &Request) -> bool {
        self.nodes.contains_key(value)
    }

    pub fn connect(
        &mut self,
        from: &Request,
        to: &Request,
        label: CrawlEdge,
        parent: Option<EdgeId>,
    ) -> bool {
        let n1 = self.nodes.get(from).copied();
        let n2 = self.nodes.get(to).copied();
        let is_new = match (n1, n2) {
            (Some(a), Some(b)) => !self.edges.contains_key(&(a, b, label.clone())),
            _ => true,
        };

        let (Some(a), Some(b), true) = (n1, n2, is_new) else {
            warn!(
                "Failed to connect edge, {} ({} {} {})",
                label,
                n1.is_some(),
                n2.is_some(),
                is_new
            );
            return false;
        };

        let id = self.inner.add_edge(
            a,
            b,
            Edge {
                label: label.clone(),
                visited: false,
                parent,
            },
        );
        self.edges.insert((a, b, label), id);
        true
    }

    pub fn find_edge(&self, from: &Request, to: &Request, label: &CrawlEdge) -> Option<EdgeId> {
        let a = *self.nodes.get(from)?;
        let b = *self.nodes.get(to)?;
        self.edges.get(&(a, b, label.clone())).copied()
    }

    pub fn visit_node(&mut self, value: &Request) -> bool {
        match self.nodes.get(value) {
            Some(&idx) => {
                self.inner[idx].visited = true;
                true
            }
            None => false,
        }
    }

    pub fn visit_edge(&mut self, id: EdgeId) -> bool {
        self.set_edge_visited(id, true)
    }

    pub fn unvisit_edge(&mut self, id: EdgeId) -> bool {
        self.set_edge_visited(id, false)
    }

    fn set_edge_visited(&mut self, id: EdgeId, visited: bool) -> bool {
        match self.inner.edge_weight_mut(id) {
            Some(edge) => {
                edge.visited = visited;
                true
            }
            None => false,
        }
    }

    /// Marks every other `get` edge into the same target as visited.
    pub fn visit_sibling_gets(&mut self, id: EdgeId) -> usize {
        let Some((_, target)) = self.inner.edge_endpoints(id) else {
            return 0;
        };
        let siblings: Vec<EdgeId> = self
            .inner
            .edge_indices()
            .filter(|&e| e != id)
            .filter(|&e| {
                let edge = &self.inner[e];
                !edge.visited
                    && edge.label.method() == Method::Get
                    && self.inner.edge_endpoints(e).map(|(_, t)| t) == Some(target)
            })
            .collect();
        for &e in &siblings {
            self.inner[e].visited = true;
        }
        siblings.len()
    }

    /// Values of all nodes with an edge into `value`, in edge order.
    pub fn get_parents(&self, value: &Request) -> Vec<Request> {
        let Some(&target) = self.nodes.get(value) else {
            return Vec::new();
        };
        self.inner
            .edge_indices()
            .filter_map(|e| self.inner.edge_endpoints(e))
            .filter(|&(_, t)| t == target)
            .map(|(s, _)| self.inner[s].value.clone())
            .collect()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.inner.edge_weight(id)
    }

    pub fn source(&self, id: EdgeId) -> Option<&Request> {
        self.inner
            .edge_endpoints(id)
            .map(|(s, _)| &self.inner[s].value)
    }

    pub fn target(&self, id: EdgeId) -> Option<&Request> {
        self.inner
            .edge_endpoints(id)
            .map(|(_, t)| &self.inner[t].value)
    }

    pub fn parent(&self, id: EdgeId) -> Option<EdgeId> {
        self.edge(id).and_then(|e| e.parent)
    }

    /// Mutable form state of a form edge.
    pub fn form_mut(&mut self, id: EdgeId) -> Option<&mut Form> {
        self.inner.edge_weight_mut(id)?.label.form_mut()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.node_indices().map(move |n| &self.inner[n])
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.inner.edge_indices().map(move |e| (e, &self.inner[e]))
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.inner.edge_indices().collect()
    }

    pub fn unvisited(&self, method: Method) -> Vec<EdgeId> {
        self.edges()
            .filter(|(_, e)| !e.visited && e.label.method() == method)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn all_unvisited(&self) -> Vec<EdgeId> {
        self.edges()
            .filter(|(_, e)| !e.visited)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn unvisited_count(&self, method: Method) -> usize {
        self.edges()
            .filter(|(_, e)| !e.visited && e.label.method() == method)
            .count()
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<Node, Edge> {
        &self.inner
    }

    pub fn describe_edge(&self, id: EdgeId) -> String {
        match (self.source(id), self.edge(id), self.target(id)) {
            (Some(from), Some(edge), Some(to)) => {
                format!("{} -({}[{}])-> {}", from, edge.label, edge.visited, to)
            }
            _ => format!("<unknown edge {}>", id.index()),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.label, self.visited)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---GRAPH---")?;
        for node in self.nodes() {
            write!(f, "{} ", node)?;
        }
        writeln!(f)?;
        for id in self.inner.edge_indices() {
            writeln!(f, "{}", self.describe_edge(id))?;
        }
        write!(f, "\n---/GRAPH---")
    }
}
