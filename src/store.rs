use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::delta::{NodeDelta, Snapshot, apply_delta, reconcile_snapshot};
use crate::graph::{Edge, Node, Point, Topology, TopologyOption, derive_edges};

/// The navigable part of the state, as persisted by an external router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteState {
    pub topology_id: Option<String>,
    pub selected_node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ReceiveTopologies(Vec<Topology>),
    ReceiveSnapshot(Snapshot),
    ReceiveDelta(NodeDelta),
    SelectTopology(String),
    SelectGrouping(String),
    ChangeOption { option: String, value: String },
    SelectNode(String),
    Deselect,
    EnterNode(String),
    LeaveNode(String),
    EnterEdge(String),
    LeaveEdge(String),
    ConnectionOpened,
    ConnectionClosed,
    Route(RouteState),
    Resize { width: f64, height: f64 },
}

/// What a dispatched action touched, for whoever drives layout and viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    pub nodes_changed: bool,
    pub topology_changed: bool,
    pub connection_reset: bool,
    pub resized: bool,
}

#[derive(Debug, Clone)]
pub struct AppState {
    topologies: Vec<Topology>,
    topology_id: Option<String>,
    active_options: BTreeMap<String, String>,
    selected_node_id: Option<String>,
    mouse_over_node_id: Option<String>,
    mouse_over_edge_id: Option<String>,
    connection_closed: bool,
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<String, Edge>,
    canvas: (f64, f64),
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            topologies: Vec::new(),
            topology_id: None,
            active_options: BTreeMap::new(),
            selected_node_id: None,
            mouse_over_node_id: None,
            mouse_over_edge_id: None,
            connection_closed: true,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            canvas: (0.0, 0.0),
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_canvas(width: f64, height: f64) -> Self {
        Self {
            canvas: (width, height),
            ..Self::default()
        }
    }

    pub fn dispatch(&mut self, action: Action) -> Transition {
        let mut transition = Transition::default();

        match action {
            Action::ReceiveTopologies(topologies) => {
                debug!(count = topologies.len(), "received topologies");
                self.topologies = topologies;
            }
            Action::ReceiveSnapshot(snapshot) => {
                self.nodes = reconcile_snapshot(&self.nodes, &snapshot, self.canvas_center());
                self.edges = derive_edges(&self.nodes);
                transition.nodes_changed = true;
            }
            Action::ReceiveDelta(delta) => {
                if delta.is_empty() {
                    return transition;
                }
                let nodes = std::mem::take(&mut self.nodes);
                self.nodes = apply_delta(nodes, &delta, self.canvas_center());
                self.edges = derive_edges(&self.nodes);
                transition.nodes_changed = true;
            }
            Action::SelectTopology(topology_id) => {
                transition.topology_changed = self.select_topology(topology_id);
                transition.nodes_changed = transition.topology_changed;
            }
            Action::SelectGrouping(grouping) => match self.grouping_target(&grouping) {
                Some(topology_id) => {
                    transition.topology_changed = self.select_topology(topology_id);
                    transition.nodes_changed = transition.topology_changed;
                }
                None => warn!(grouping = %grouping, "no sub-topology for grouping"),
            },
            Action::ChangeOption { option, value } => self.change_option(option, value),
            Action::SelectNode(node_id) => {
                self.selected_node_id = Some(node_id);
            }
            Action::Deselect => {
                self.selected_node_id = None;
            }
            Action::EnterNode(node_id) => {
                self.mouse_over_node_id = Some(node_id);
            }
            Action::LeaveNode(node_id) => {
                if self.mouse_over_node_id.as_deref() == Some(node_id.as_str()) {
                    self.mouse_over_node_id = None;
                }
            }
            Action::EnterEdge(edge_id) => {
                self.mouse_over_edge_id = Some(edge_id);
            }
            Action::LeaveEdge(edge_id) => {
                if self.mouse_over_edge_id.as_deref() == Some(edge_id.as_str()) {
                    self.mouse_over_edge_id = None;
                }
            }
            Action::ConnectionOpened => {
                info!("connection opened, clearing topology");
                self.connection_closed = false;
                self.nodes.clear();
                self.edges.clear();
                self.clear_hover();
                transition.nodes_changed = true;
                transition.connection_reset = true;
            }
            Action::ConnectionClosed => {
                info!("connection closed, keeping last known topology");
                self.connection_closed = true;
            }
            Action::Route(route) => {
                // Navigation never touches the graph, but a different topology
                // still hands zoom control back to the auto-fit.
                transition.topology_changed = route.topology_id != self.topology_id;
                self.topology_id = route.topology_id;
                self.selected_node_id = route.selected_node_id;
            }
            Action::Resize { width, height } => {
                self.canvas = (width, height);
                transition.resized = true;
            }
        }

        transition
    }

    /// Returns whether the active topology actually changed. A new topology
    /// starts with an empty graph until its first snapshot arrives.
    fn select_topology(&mut self, topology_id: String) -> bool {
        if self.topology_id.as_deref() == Some(topology_id.as_str()) {
            self.selected_node_id = None;
            return false;
        }

        let previous = option_names(self.current_topology());
        if self.find_topology(&topology_id).is_none() {
            warn!(topology = %topology_id, "selected unknown topology");
        }
        self.topology_id = Some(topology_id);
        self.selected_node_id = None;
        self.nodes.clear();
        self.edges.clear();
        self.clear_hover();

        if option_names(self.current_topology()) != previous {
            self.active_options.clear();
        }
        true
    }

    fn grouping_target(&self, grouping: &str) -> Option<String> {
        let current = self.topology_id.as_deref()?;
        let parent = self
            .topologies
            .iter()
            .find(|topology| topology.find(current).is_some())?;

        if grouping.is_empty() || grouping == "none" {
            return Some(parent.id.clone());
        }

        let wanted = format!("{}-{}", parent.id, grouping);
        parent
            .sub_topologies
            .iter()
            .find(|sub| sub.id == wanted)
            .map(|sub| sub.id.clone())
    }

    fn change_option(&mut self, option: String, value: String) {
        let default = self
            .option_definition(&option)
            .and_then(TopologyOption::default_value);

        if default == Some(value.as_str()) {
            self.active_options.remove(&option);
        } else {
            self.active_options.insert(option, value);
        }
    }

    /// Definition from the current topology, else the first catalog entry
    /// that declares the option.
    fn option_definition(&self, option: &str) -> Option<&TopologyOption> {
        if let Some(definition) = self.current_topology().and_then(|t| t.option(option)) {
            return Some(definition);
        }
        fn search<'a>(topologies: &'a [Topology], option: &str) -> Option<&'a TopologyOption> {
            topologies.iter().find_map(|topology| {
                topology
                    .option(option)
                    .or_else(|| search(&topology.sub_topologies, option))
            })
        }
        search(&self.topologies, option)
    }

    fn clear_hover(&mut self) {
        self.mouse_over_node_id = None;
        self.mouse_over_edge_id = None;
    }

    fn find_topology(&self, topology_id: &str) -> Option<&Topology> {
        self.topologies.iter().find_map(|topology| topology.find(topology_id))
    }

    pub fn canvas(&self) -> (f64, f64) {
        self.canvas
    }

    pub fn canvas_center(&self) -> Point {
        Point::new(self.canvas.0 / 2.0, self.canvas.1 / 2.0)
    }

    pub fn topologies(&self) -> &[Topology] {
        &self.topologies
    }

    pub fn topology_id(&self) -> Option<&str> {
        self.topology_id.as_deref()
    }

    pub fn current_topology(&self) -> Option<&Topology> {
        self.find_topology(self.topology_id.as_deref()?)
    }

    pub fn current_topology_url(&self) -> Option<&str> {
        self.current_topology().map(|topology| topology.url.as_str())
    }

    /// `None` when the current topology declares no options.
    pub fn current_topology_options(&self) -> Option<&BTreeMap<String, TopologyOption>> {
        self.current_topology()
            .map(|topology| &topology.options)
            .filter(|options| !options.is_empty())
    }

    /// Non-default option selections only.
    pub fn active_options(&self) -> &BTreeMap<String, String> {
        &self.active_options
    }

    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn edges(&self) -> &BTreeMap<String, Edge> {
        &self.edges
    }

    /// Mutable access for the layout pass, which positions nodes in place.
    pub fn graph_mut(&mut self) -> (&mut BTreeMap<String, Node>, &mut BTreeMap<String, Edge>) {
        (&mut self.nodes, &mut self.edges)
    }

    pub fn selected_node_id(&self) -> Option<&str> {
        self.selected_node_id.as_deref()
    }

    pub fn is_connection_closed(&self) -> bool {
        self.connection_closed
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            topology_id: self.topology_id.clone(),
            selected_node_id: self.selected_node_id.clone(),
        }
    }

    /// The hovered node with everything adjacent to it, or the endpoints of
    /// the hovered edge.
    pub fn highlighted_node_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        if let Some(node_id) = &self.mouse_over_node_id {
            ids.insert(node_id.clone());
            for edge in self.edges.values().filter(|edge| edge.touches(node_id)) {
                ids.insert(edge.source.clone());
                ids.insert(edge.target.clone());
            }
        }
        if let Some(edge) = self.mouse_over_edge_id.as_ref().and_then(|id| self.edges.get(id)) {
            ids.insert(edge.source.clone());
            ids.insert(edge.target.clone());
        }
        ids
    }

    pub fn highlighted_edge_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        if let Some(node_id) = &self.mouse_over_node_id {
            ids.extend(
                self.edges
                    .values()
                    .filter(|edge| edge.touches(node_id))
                    .map(|edge| edge.id.clone()),
            );
        }
        if let Some(edge_id) = &self.mouse_over_edge_id {
            ids.insert(edge_id.clone());
        }
        ids
    }
}

fn option_names(topology: Option<&Topology>) -> BTreeSet<String> {
    topology
        .map(|topology| topology.options.keys().cloned().collect())
        .unwrap_or_default()
}
