//! Inbound event stream: one JSON object per line, tagged by `type`.
//!
//! ```text
//! {"type": "topologies", "topologies": [{"url": "/hosts", "name": "Hosts"}]}
//! {"type": "select_topology", "topology_id": "hosts"}
//! {"type": "snapshot", "nodes": {"a": {"label_major": "a", "adjacency": ["b"]}, "b": {}}}
//! {"type": "delta", "delta": {"remove": ["b"]}}
//! {"type": "zoom", "scale": 0.5, "translate": {"x": 10, "y": 0}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::app::Event;
use crate::delta::{NodeDelta, Snapshot};
use crate::error::ProtocolError;
use crate::graph::parse_catalog;
use crate::store::{Action, RouteState};
use crate::viewport::ViewportEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Topologies { topologies: Value },
    Snapshot { nodes: Value },
    Delta { delta: Value },
    SelectTopology { topology_id: String },
    SelectGrouping { grouping: String },
    ChangeOption { option: String, value: String },
    SelectNode { node_id: String },
    Deselect,
    EnterNode { node_id: String },
    LeaveNode { node_id: String },
    EnterEdge { edge_id: String },
    LeaveEdge { edge_id: String },
    Open,
    Close,
    Route(RouteState),
    Zoom(ViewportEvent),
    Resize { width: f64, height: f64 },
}

impl Message {
    /// Payload-carrying messages that fail to decode yield `None`; the
    /// failure is logged and the stream carries on.
    pub fn into_event(self) -> Option<Event> {
        let action = match self {
            Message::Topologies { topologies } => match parse_catalog(topologies) {
                Ok(catalog) => Action::ReceiveTopologies(catalog),
                Err(err) => return skipped("topologies", err),
            },
            Message::Snapshot { nodes } => match Snapshot::from_value(nodes) {
                Ok(snapshot) => Action::ReceiveSnapshot(snapshot),
                Err(err) => return skipped("snapshot", err),
            },
            Message::Delta { delta } => match NodeDelta::from_value(delta) {
                Ok(delta) => Action::ReceiveDelta(delta),
                Err(err) => return skipped("delta", err),
            },
            Message::SelectTopology { topology_id } => Action::SelectTopology(topology_id),
            Message::SelectGrouping { grouping } => Action::SelectGrouping(grouping),
            Message::ChangeOption { option, value } => Action::ChangeOption { option, value },
            Message::SelectNode { node_id } => Action::SelectNode(node_id),
            Message::Deselect => Action::Deselect,
            Message::EnterNode { node_id } => Action::EnterNode(node_id),
            Message::LeaveNode { node_id } => Action::LeaveNode(node_id),
            Message::EnterEdge { edge_id } => Action::EnterEdge(edge_id),
            Message::LeaveEdge { edge_id } => Action::LeaveEdge(edge_id),
            Message::Open => Action::ConnectionOpened,
            Message::Close => Action::ConnectionClosed,
            Message::Route(route) => Action::Route(route),
            Message::Zoom(adjustment) => return Some(Event::ViewportAdjusted(adjustment)),
            Message::Resize { width, height } => Action::Resize { width, height },
        };
        Some(Event::Store(action))
    }
}

fn skipped(kind: &'static str, err: ProtocolError) -> Option<Event> {
    warn!(message = kind, error = %err, "ignoring malformed message");
    None
}

/// Decodes one stream line. Blank lines yield `Ok(None)`; `line` is 1-based
/// and only used for error reporting.
pub fn parse_line(line: usize, text: &str) -> Result<Option<Message>, ProtocolError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|source| ProtocolError::InvalidLine { line, source })
}

/// Every event in `input`, skipping blank, undecodable and malformed lines.
pub fn decode_stream(input: &str) -> Vec<Event> {
    input
        .lines()
        .enumerate()
        .filter_map(|(index, text)| match parse_line(index + 1, text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "skipping stream line");
                None
            }
        })
        .filter_map(Message::into_event)
        .collect()
}
