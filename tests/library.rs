use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::json;
use topoview::viewport::zoom_factor;
use topoview::{
    Action, BoundingBox, ChartConfig, LayoutEngine, Margins, Node, NodeDelta, NodeScale, Point,
    Snapshot, TopologyView, apply_delta, derive_edges, reconcile_snapshot,
};

fn node_set_snapshot() -> Result<Action> {
    let snapshot = Snapshot::from_value(json!({
        "n1": {"label_major": "n1", "adjacency": ["n1", "n2"]},
        "n2": {"label_major": "n2"}
    }))?;
    Ok(Action::ReceiveSnapshot(snapshot))
}

fn edge_ids(view: &TopologyView) -> Vec<String> {
    view.state().edges().keys().cloned().collect()
}

#[test]
fn snapshot_then_escape_keeps_nodes() -> Result<()> {
    let mut view = TopologyView::default();
    view.handle(node_set_snapshot()?);

    assert_eq!(view.state().nodes().len(), 2);
    assert_eq!(edge_ids(&view), vec!["n1---n1", "n1---n2"]);

    let nodes = view.state().nodes().clone();
    view.handle(Action::SelectNode("n1".into()));
    assert_eq!(view.state().selected_node_id(), Some("n1"));

    view.handle(Action::Deselect);
    assert_eq!(view.state().selected_node_id(), None);
    assert_eq!(view.state().nodes(), &nodes, "escape must not touch nodes");

    Ok(())
}

#[test]
fn update_and_remove_reduce_to_self_loop() -> Result<()> {
    let mut view = TopologyView::default();
    view.handle(node_set_snapshot()?);

    let delta = NodeDelta::from_value(json!({
        "update": [{"id": "n1", "adjacency": ["n1"]}],
        "remove": ["n2"]
    }))?;
    view.handle(Action::ReceiveDelta(delta));

    let nodes = view.state().nodes();
    assert_eq!(nodes["n1"].adjacency, vec!["n1".to_string()]);
    assert!(!nodes.contains_key("n2"));
    assert_eq!(edge_ids(&view), vec!["n1---n1"]);

    Ok(())
}

#[test]
fn repeated_update_is_idempotent() -> Result<()> {
    let base: BTreeMap<String, Node> = reconcile_snapshot(
        &BTreeMap::new(),
        &Snapshot::from_value(json!({"a": {"adjacency": ["b"]}, "b": {}}))?,
        Point::new(400.0, 300.0),
    );
    let delta = NodeDelta::from_value(json!({
        "update": [{"id": "a", "label_major": "A", "adjacency": ["a", "b"]}]
    }))?;

    let once = apply_delta(base.clone(), &delta, Point::default());
    let twice = apply_delta(once.clone(), &delta, Point::default());
    assert_eq!(once, twice);

    Ok(())
}

#[test]
fn surviving_nodes_keep_their_position_across_snapshots() -> Result<()> {
    let mut view = TopologyView::default();
    view.handle(node_set_snapshot()?);
    let laid_out = view.state().nodes()["n1"].position();
    assert_ne!(laid_out, Point::new(400.0, 300.0), "layout should move nodes");

    let next = Snapshot::from_value(json!({
        "n1": {"label_major": "renamed"},
        "n3": {}
    }))?;
    let nodes = reconcile_snapshot(view.state().nodes(), &next, Point::new(400.0, 300.0));

    assert_eq!(nodes["n1"].position(), laid_out);
    assert_eq!(nodes["n3"].position(), Point::new(400.0, 300.0));
    assert!(!nodes.contains_key("n2"));

    Ok(())
}

#[test]
fn edges_depend_only_on_adjacency() -> Result<()> {
    let center = Point::default();
    let forward = apply_delta(
        BTreeMap::new(),
        &NodeDelta::from_value(json!({
            "add": [{"id": "a", "adjacency": ["b", "b"]}, {"id": "b", "adjacency": ["a"]}]
        }))?,
        center,
    );

    let staged = apply_delta(
        BTreeMap::new(),
        &NodeDelta::from_value(json!({"add": [{"id": "b"}, {"id": "a", "adjacency": ["b"]}]}))?,
        center,
    );
    let staged = apply_delta(
        staged,
        &NodeDelta::from_value(json!({
            "update": [{"id": "b", "adjacency": ["a"]}, {"id": "a", "adjacency": ["b", "b"]}]
        }))?,
        center,
    );

    let forward_edges = derive_edges(&forward);
    let staged_edges = derive_edges(&staged);
    assert_eq!(
        forward_edges.keys().collect::<Vec<_>>(),
        staged_edges.keys().collect::<Vec<_>>()
    );
    assert_eq!(forward_edges.len(), 2, "duplicate adjacency yields one edge");

    Ok(())
}

#[test]
fn layout_ceiling_is_one_hundred_nodes() -> Result<()> {
    fn chain(count: usize) -> BTreeMap<String, Node> {
        (0..count)
            .map(|i| {
                let mut node = Node::new(format!("n{i:03}"), Point::new(400.0, 300.0));
                if i + 1 < count {
                    node.adjacency = vec![format!("n{:03}", i + 1)];
                }
                (node.id.clone(), node)
            })
            .collect()
    }

    let mut engine = LayoutEngine::new(ChartConfig::default());
    let margins = Margins::default();

    let mut nodes = chain(101);
    let mut edges = derive_edges(&nodes);
    let bbox = engine.layout(
        "big",
        &mut nodes,
        &mut edges,
        720.0,
        480.0,
        NodeScale::for_canvas(800.0, 600.0, 101),
        &margins,
    );
    assert_eq!(bbox, BoundingBox::EMPTY);
    assert!(nodes.values().all(|n| n.position() == Point::new(400.0, 300.0)));

    let mut nodes = chain(100);
    let mut edges = derive_edges(&nodes);
    let bbox = engine.layout(
        "big",
        &mut nodes,
        &mut edges,
        720.0,
        480.0,
        NodeScale::for_canvas(800.0, 600.0, 100),
        &margins,
    );
    assert!(!bbox.is_empty());

    Ok(())
}

#[test]
fn auto_zoom_only_shrinks_or_holds() {
    let small = BoundingBox {
        left: 0.0,
        top: 0.0,
        width: 120.0,
        height: 80.0,
    };
    let large = BoundingBox {
        left: 0.0,
        top: 0.0,
        width: 4000.0,
        height: 900.0,
    };

    assert_eq!(zoom_factor(&small, 800.0, 600.0), 1.0);
    assert!(zoom_factor(&large, 800.0, 600.0) <= 1.0);
}

#[test]
fn reconnect_clears_nodes_but_close_keeps_them() -> Result<()> {
    let mut view = TopologyView::default();
    view.handle(node_set_snapshot()?);

    view.handle(Action::ConnectionClosed);
    assert!(view.state().is_connection_closed());
    assert_eq!(view.state().nodes().len(), 2);

    view.handle(Action::ConnectionOpened);
    assert!(!view.state().is_connection_closed());
    assert!(view.state().nodes().is_empty());

    Ok(())
}

#[test]
fn option_round_trip_leaves_no_override() -> Result<()> {
    let mut view = TopologyView::default();
    view.handle(Action::ReceiveTopologies(topoview::graph::parse_catalog(json!([{
        "url": "/topo1",
        "name": "Topo1",
        "options": {"option1": [{"value": "on", "default": true}, {"value": "off"}]}
    }]))?));
    view.handle(Action::SelectTopology("topo1".into()));

    view.handle(Action::ChangeOption {
        option: "option1".into(),
        value: "off".into(),
    });
    assert_eq!(
        view.state().active_options().get("option1").map(String::as_str),
        Some("off")
    );

    view.handle(Action::ChangeOption {
        option: "option1".into(),
        value: "on".into(),
    });
    assert!(view.state().active_options().is_empty());

    Ok(())
}
