use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::{ChartConfig, Margins};
use crate::graph::{Edge, Node, topology_fingerprint};
use crate::layout::{BoundingBox, LayoutEngine, NodeScale};
use crate::store::{Action, AppState, Transition};
use crate::viewport::{ViewportController, ViewportEvent, ViewportState};

/// Layout cache key used while no topology is selected.
const UNSELECTED_TOPOLOGY: &str = "";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Store(Action),
    ViewportAdjusted(ViewportEvent),
}

impl From<Action> for Event {
    fn from(action: Action) -> Self {
        Event::Store(action)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub degree: usize,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            degree: node.degree(),
            node: node.clone(),
        }
    }
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct ChartView {
    pub topology_id: Option<String>,
    pub topology_url: Option<String>,
    pub active_options: BTreeMap<String, String>,
    pub selected_node_id: Option<String>,
    pub connection_closed: bool,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<Edge>,
    pub highlighted_node_ids: Vec<String>,
    pub highlighted_edge_ids: Vec<String>,
    pub viewport: ViewportState,
    pub bounding_box: BoundingBox,
}

/// Drives the store, the layout engine and the viewport from one event at a
/// time.
#[derive(Debug, Clone)]
pub struct TopologyView {
    state: AppState,
    engine: LayoutEngine,
    viewport: ViewportController,
    config: ChartConfig,
    /// Topology key, fingerprint and canvas of the last successful layout.
    laid_out: Option<(String, String, (f64, f64))>,
    bounding_box: BoundingBox,
}

impl TopologyView {
    pub fn new(config: ChartConfig, width: f64, height: f64) -> Self {
        Self {
            state: AppState::with_canvas(width, height),
            engine: LayoutEngine::new(config.clone()),
            viewport: ViewportController::new(config.scale_extent, config.margins),
            config,
            laid_out: None,
            bounding_box: BoundingBox::EMPTY,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn engine(&self) -> &LayoutEngine {
        &self.engine
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn handle(&mut self, event: impl Into<Event>) -> Transition {
        match event.into() {
            Event::Store(action) => self.dispatch(action),
            Event::ViewportAdjusted(adjustment) => {
                self.viewport.user_adjusted(adjustment);
                Transition::default()
            }
        }
    }

    fn dispatch(&mut self, action: Action) -> Transition {
        let transition = self.state.dispatch(action);

        if transition.topology_changed {
            self.viewport.reset();
        }
        if transition.connection_reset {
            let key = self.layout_key().to_string();
            if self.engine.invalidate(&key) {
                debug!(topology = %key, "dropped cached layout after reconnect");
            }
        }
        if transition.nodes_changed || transition.resized {
            self.relayout();
        }

        transition
    }

    fn layout_key(&self) -> &str {
        self.state.topology_id().unwrap_or(UNSELECTED_TOPOLOGY)
    }

    fn relayout(&mut self) {
        let key = self.layout_key().to_string();
        let canvas = self.state.canvas();
        let fingerprint = topology_fingerprint(self.state.nodes());
        let unchanged = self
            .laid_out
            .as_ref()
            .is_some_and(|(last_key, last, last_canvas)| {
                *last_key == key && *last == fingerprint && *last_canvas == canvas
            });
        let (area_width, area_height) = layout_area(canvas, &self.config.margins);

        let (nodes, edges) = self.state.graph_mut();
        let restored = if unchanged {
            self.engine.restore(&key, nodes, edges)
        } else {
            None
        };

        let bounding_box = match restored {
            Some(bounding_box) => bounding_box,
            None => {
                let scale = NodeScale::for_canvas(canvas.0, canvas.1, nodes.len());
                self.engine.layout(
                    &key,
                    nodes,
                    edges,
                    area_width,
                    area_height,
                    scale,
                    &self.config.margins,
                )
            }
        };

        self.laid_out = (!bounding_box.is_empty()).then(|| (key, fingerprint, canvas));
        self.bounding_box = bounding_box;
        self.viewport.fit(&bounding_box, area_width, area_height);
    }

    pub fn view(&self) -> ChartView {
        ChartView {
            topology_id: self.state.topology_id().map(str::to_string),
            topology_url: self.state.current_topology_url().map(str::to_string),
            active_options: self.state.active_options().clone(),
            selected_node_id: self.state.selected_node_id().map(str::to_string),
            connection_closed: self.state.is_connection_closed(),
            nodes: self.state.nodes().values().map(NodeView::from).collect(),
            edges: self.state.edges().values().cloned().collect(),
            highlighted_node_ids: self.state.highlighted_node_ids().into_iter().collect(),
            highlighted_edge_ids: self.state.highlighted_edge_ids().into_iter().collect(),
            viewport: self.viewport.state(),
            bounding_box: self.bounding_box,
        }
    }
}

/// Canvas minus margins; both the layout and the fit work inside it.
fn layout_area(canvas: (f64, f64), margins: &Margins) -> (f64, f64) {
    (
        canvas.0 - margins.left - margins.right,
        canvas.1 - margins.top - margins.bottom,
    )
}

impl Default for TopologyView {
    fn default() -> Self {
        Self::new(ChartConfig::default(), 800.0, 600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaOp, NodeDelta, RawNode, Snapshot};
    use crate::graph::Point;
    use crate::store::RouteState;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Action {
        Action::ReceiveSnapshot(Snapshot::from_value(value).unwrap())
    }

    #[test]
    fn snapshot_is_laid_out_and_fitted() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({
            "a": {"label_major": "a", "adjacency": ["b"]},
            "b": {"label_major": "b"}
        })));

        assert!(!view.bounding_box().is_empty());
        let nodes = view.state().nodes();
        assert!(nodes["a"].y < nodes["b"].y);
        assert!(nodes["a"].width > 0.0);
        assert_eq!(view.engine().context("").map(|c| c.passes()), Some(2));

        // two ranks of full-size nodes are taller than the 480px layout area
        let bbox = view.bounding_box();
        assert!(bbox.height > 480.0);
        assert_eq!(view.viewport().scale(), 480.0 / bbox.height);
    }

    #[test]
    fn label_only_update_reuses_geometry() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({"a": {"adjacency": ["b"]}, "b": {}})));
        let before = view.state().nodes()["a"].position();
        let route = view.state().edges()["a---b"].points.clone();

        view.handle(Action::ReceiveDelta(NodeDelta::from_ops(vec![DeltaOp::Update(vec![
            RawNode::with_id("a").adjacency(["b"]).label("renamed"),
        ])])));

        assert_eq!(view.engine().context("").map(|c| c.passes()), Some(2));
        assert_eq!(view.state().nodes()["a"].position(), before);
        assert_eq!(view.state().edges()["a---b"].points, route);
        assert_eq!(view.state().nodes()["a"].label.as_deref(), Some("renamed"));
    }

    #[test]
    fn shape_change_runs_a_single_pass() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({"a": {"adjacency": ["b"]}, "b": {}})));
        view.handle(Action::ReceiveDelta(NodeDelta::from_ops(vec![DeltaOp::Add(vec![
            RawNode::with_id("c").adjacency(["a"]),
        ])])));

        assert_eq!(view.engine().context("").map(|c| c.passes()), Some(3));
        assert_eq!(view.state().edges().len(), 2);
    }

    #[test]
    fn user_zoom_survives_updates_until_topology_changes() {
        let mut view = TopologyView::default();
        view.handle(hosts_and_containers());
        view.handle(Action::SelectTopology("hosts".into()));
        view.handle(Event::ViewportAdjusted(ViewportEvent {
            scale: 1.5,
            translate: Point::new(5.0, 5.0),
        }));
        view.handle(snapshot(json!({"a": {"adjacency": ["b"]}, "b": {}})));
        assert_eq!(view.viewport().scale(), 1.5);
        assert!(view.viewport().user_has_adjusted());

        view.handle(Action::SelectTopology("containers".into()));
        assert!(!view.viewport().user_has_adjusted());
        assert!(view.state().nodes().is_empty());
    }

    fn hosts_and_containers() -> Action {
        Action::ReceiveTopologies(
            crate::graph::parse_catalog(json!([
                {"url": "/hosts", "name": "Hosts"},
                {"url": "/containers", "name": "Containers"}
            ]))
            .unwrap(),
        )
    }

    #[test]
    fn fitted_drawing_stays_inside_layout_area() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({
            "a": {}, "b": {}, "c": {}, "d": {}, "e": {}, "f": {}
        })));

        let bbox = view.bounding_box();
        assert!(bbox.width > 720.0, "six nodes in one layer overflow 720px");
        assert_eq!(view.viewport().scale(), 720.0 / bbox.width);
        assert!(bbox.width * view.viewport().scale() <= 720.0 + 1e-9);
    }

    #[test]
    fn navigating_to_another_topology_resets_user_zoom() {
        let mut view = TopologyView::default();
        view.handle(hosts_and_containers());
        view.handle(Action::SelectTopology("hosts".into()));
        view.handle(snapshot(json!({"a": {"adjacency": ["b"]}, "b": {}})));
        view.handle(Event::ViewportAdjusted(ViewportEvent {
            scale: 1.5,
            translate: Point::new(5.0, 5.0),
        }));

        view.handle(Action::Route(RouteState {
            topology_id: Some("containers".into()),
            selected_node_id: None,
        }));
        assert!(!view.viewport().user_has_adjusted());
        assert_eq!(view.state().nodes().len(), 2);
    }

    #[test]
    fn same_shape_under_another_topology_is_laid_out_afresh() {
        let mut view = TopologyView::default();
        view.handle(hosts_and_containers());
        view.handle(Action::SelectTopology("hosts".into()));
        view.handle(snapshot(json!({"a": {"adjacency": ["b"]}, "b": {}})));
        view.handle(Action::Route(RouteState {
            topology_id: Some("containers".into()),
            selected_node_id: None,
        }));

        view.handle(Action::ReceiveDelta(NodeDelta::from_ops(vec![DeltaOp::Update(vec![
            RawNode::with_id("b").label("renamed"),
        ])])));
        assert_eq!(view.engine().context("containers").map(|c| c.passes()), Some(2));
        assert_eq!(view.engine().context("hosts").map(|c| c.passes()), Some(2));
    }

    #[test]
    fn reconnect_drops_cached_layout() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({"a": {}})));
        assert!(view.engine().context("").is_some());

        view.handle(Action::ConnectionOpened);
        assert!(view.engine().context("").is_none());
        assert!(view.bounding_box().is_empty());
    }

    #[test]
    fn resize_moves_the_drawing() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({"a": {}})));
        let before = view.state().nodes()["a"].position();

        view.handle(Action::Resize {
            width: 1200.0,
            height: 900.0,
        });
        assert_ne!(view.state().nodes()["a"].position(), before);
    }

    #[test]
    fn view_serializes_for_renderers() {
        let mut view = TopologyView::default();
        view.handle(snapshot(json!({"a": {"adjacency": ["a"]}})));
        view.handle(Action::EnterNode("a".into()));

        let value = serde_json::to_value(view.view()).unwrap();
        assert_eq!(value["nodes"][0]["id"], "a");
        assert_eq!(value["nodes"][0]["degree"], 1);
        assert_eq!(value["edges"][0]["id"], "a---a");
        assert_eq!(value["highlighted_edge_ids"], json!(["a---a"]));
        assert_eq!(value["connection_closed"], true);
    }
}
