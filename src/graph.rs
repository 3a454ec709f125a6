use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProtocolError;

/// Joins source and target ids into an edge id. Raw node ids are not expected
/// to contain it.
pub const EDGE_ID_SEPARATOR: &str = "---";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: Option<String>,
    pub sub_label: Option<String>,
    pub rank: Option<String>,
    pub pseudo: bool,
    /// Neighbor ids in arrival order; the only input to edge derivation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjacency: Vec<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Node {
    pub fn new(id: impl Into<String>, position: Point) -> Self {
        Self {
            id: id.into(),
            x: position.x,
            y: position.y,
            ..Self::default()
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn degree(&self) -> usize {
        self.adjacency.len()
    }
}

/// Derived from adjacency: `source` is the node listing the neighbor, `target`
/// the listed neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// False when either endpoint is missing from the node collection. Such
    /// edges are kept for diagnostics and never handed to the layout.
    pub resolved: bool,
    pub value: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<Point>,
}

impl Edge {
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

pub fn edge_identifier(source: &str, target: &str) -> String {
    format!("{source}{EDGE_ID_SEPARATOR}{target}")
}

/// One edge per distinct (node, neighbor) pair, in node-id order.
pub fn derive_edges(nodes: &BTreeMap<String, Node>) -> BTreeMap<String, Edge> {
    let mut edges = BTreeMap::new();

    for node in nodes.values() {
        for adjacent in &node.adjacency {
            let id = edge_identifier(&node.id, adjacent);
            if edges.contains_key(&id) {
                continue;
            }

            let resolved = nodes.contains_key(adjacent);
            if !resolved {
                debug!(source = %node.id, target = %adjacent, "missing edge node");
            }

            edges.insert(
                id.clone(),
                Edge {
                    id,
                    source: node.id.clone(),
                    target: adjacent.clone(),
                    resolved,
                    value: 1,
                    points: Vec::new(),
                },
            );
        }
    }

    edges
}

/// Digest of ids and adjacency; changes only when the graph shape does.
pub fn topology_fingerprint(nodes: &BTreeMap<String, Node>) -> String {
    let mut parts = Vec::with_capacity(nodes.len() * 2);
    for node in nodes.values() {
        parts.push(node.id.clone());
        if !node.adjacency.is_empty() {
            parts.push(node.adjacency.join(","));
        }
    }
    parts.join(";")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub value: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyOption {
    pub name: String,
    pub choices: Vec<OptionChoice>,
}

impl TopologyOption {
    pub fn default_value(&self) -> Option<&str> {
        self.choices
            .iter()
            .find(|choice| choice.is_default)
            .map(|choice| choice.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub id: String,
    pub name: String,
    pub url: String,
    pub options: BTreeMap<String, TopologyOption>,
    pub sub_topologies: Vec<Topology>,
}

impl Topology {
    /// Depth-first search over this topology and its sub-topologies.
    pub fn find(&self, id: &str) -> Option<&Topology> {
        if self.id == id {
            return Some(self);
        }
        self.sub_topologies.iter().find_map(|sub| sub.find(id))
    }

    pub fn option(&self, name: &str) -> Option<&TopologyOption> {
        self.options.get(name)
    }
}

/// Last non-empty path segment of a topology url.
pub fn topology_id_from_url(url: &str) -> String {
    url.split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .unwrap_or(url)
        .to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOptionChoice {
    pub value: String,
    #[serde(default)]
    pub default: bool,
}

/// Catalog entry as it arrives over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTopology {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, Vec<RawOptionChoice>>,
    #[serde(default)]
    pub sub_topologies: Vec<RawTopology>,
}

impl From<RawTopology> for Topology {
    fn from(raw: RawTopology) -> Self {
        let options = raw
            .options
            .into_iter()
            .map(|(name, choices)| {
                let choices = choices
                    .into_iter()
                    .map(|choice| OptionChoice {
                        value: choice.value,
                        is_default: choice.default,
                    })
                    .collect();
                (name.clone(), TopologyOption { name, choices })
            })
            .collect();

        Topology {
            id: topology_id_from_url(&raw.url),
            name: raw.name,
            url: raw.url,
            options,
            sub_topologies: raw.sub_topologies.into_iter().map(Topology::from).collect(),
        }
    }
}

pub fn parse_catalog(value: serde_json::Value) -> Result<Vec<Topology>, ProtocolError> {
    let raw: Vec<RawTopology> = serde_json::from_value(value).map_err(ProtocolError::InvalidCatalog)?;
    Ok(raw.into_iter().map(Topology::from).collect())
}
