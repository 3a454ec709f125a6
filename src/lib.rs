//! Live topology graph core: reconciles snapshots and deltas into a node and
//! edge set, lays it out in stable layers and fits the viewport around it.

pub mod app;
pub mod config;
pub mod delta;
pub mod error;
pub mod graph;
pub mod layout;
pub mod protocol;
pub mod store;
pub mod viewport;

pub use app::{ChartView, Event, NodeView, TopologyView};
pub use config::{ChartConfig, Margins, ScaleExtent};
pub use delta::{DeltaOp, NodeDelta, RawNode, Snapshot, apply_delta, reconcile_snapshot};
pub use error::ProtocolError;
pub use graph::{
    EDGE_ID_SEPARATOR, Edge, Node, Point, Topology, TopologyOption, derive_edges, edge_identifier,
    topology_fingerprint,
};
pub use layout::{BoundingBox, LayoutEngine, NodeScale};
pub use protocol::{Message, decode_stream};
pub use store::{Action, AppState, RouteState, Transition};
pub use viewport::{ViewportController, ViewportEvent, ViewportState};
