use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::graph::{Node, Point};

/// Node fields as they arrive in a snapshot entry or delta operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label_major: Option<String>,
    #[serde(default)]
    pub label_minor: Option<String>,
    #[serde(default)]
    pub pseudo: Option<bool>,
    #[serde(default, deserialize_with = "rank_from_value")]
    pub rank: Option<String>,
    #[serde(default)]
    pub adjacency: Option<Vec<String>>,
}

impl RawNode {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn adjacency<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.adjacency = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label_major = Some(label.into());
        self
    }

    /// Overwrites every semantic field wholesale. Absent fields clear the
    /// previous value; position and size are left alone.
    fn apply_to(&self, node: &mut Node) {
        node.label = self.label_major.clone();
        node.sub_label = self.label_minor.clone();
        node.rank = self.rank.clone();
        node.pseudo = self.pseudo.unwrap_or(false);
        node.adjacency = self.adjacency.clone().unwrap_or_default();
    }
}

fn rank_from_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(rank)) => Ok(Some(rank)),
        Some(Value::Number(rank)) => Ok(Some(rank.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "rank must be a string or number, found {other}"
        ))),
    }
}

/// Complete node set, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub nodes: BTreeMap<String, RawNode>,
}

impl Snapshot {
    /// Any malformed entry rejects the whole snapshot so that a partial
    /// decode never drops healthy nodes.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(entries) = value else {
            return Err(ProtocolError::NotAnObject { what: "snapshot" });
        };

        let mut nodes = BTreeMap::new();
        for (id, entry) in entries {
            let raw: RawNode = serde_json::from_value(entry).map_err(|source| {
                ProtocolError::InvalidSnapshotEntry {
                    id: id.clone(),
                    source,
                }
            })?;
            nodes.insert(id, raw);
        }
        Ok(Self { nodes })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    Remove(Vec<String>),
    Update(Vec<RawNode>),
    Add(Vec<RawNode>),
}

impl DeltaOp {
    fn sequence(&self) -> u8 {
        match self {
            DeltaOp::Remove(_) => 0,
            DeltaOp::Update(_) => 1,
            DeltaOp::Add(_) => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeltaOp::Remove(_) => "remove",
            DeltaOp::Update(_) => "update",
            DeltaOp::Add(_) => "add",
        }
    }
}

/// Incremental change set. Operations always apply as remove, update, add
/// regardless of how they were supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDelta {
    ops: Vec<DeltaOp>,
}

impl NodeDelta {
    pub fn from_ops(mut ops: Vec<DeltaOp>) -> Self {
        ops.sort_by_key(DeltaOp::sequence);
        Self { ops }
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Decodes `{add?, update?, remove?}`. A single malformed operation is
    /// dropped on its own; the others still apply.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject { what: "delta" });
        };

        let known = ["remove", "update", "add"];
        if !known.iter().any(|key| fields.contains_key(*key)) {
            return Err(ProtocolError::NoOperations);
        }

        let mut ops = Vec::new();
        for key in known {
            let Some(payload) = fields.remove(key) else {
                continue;
            };
            if payload.is_null() {
                continue;
            }

            let decoded = match key {
                "remove" => serde_json::from_value(payload).map(DeltaOp::Remove),
                "update" => serde_json::from_value(payload).map(DeltaOp::Update),
                _ => serde_json::from_value(payload).map(DeltaOp::Add),
            };

            match decoded {
                Ok(op) => ops.push(op),
                Err(source) => {
                    let err = ProtocolError::InvalidOperation { op: key, source };
                    warn!(error = %err, "dropping delta operation");
                }
            }
        }

        Ok(Self::from_ops(ops))
    }
}

/// Rebuilds the collection from a full snapshot. Surviving nodes keep their
/// position and size; new nodes start at `center`.
pub fn reconcile_snapshot(
    previous: &BTreeMap<String, Node>,
    snapshot: &Snapshot,
    center: Point,
) -> BTreeMap<String, Node> {
    let mut nodes = BTreeMap::new();

    for (id, raw) in &snapshot.nodes {
        let mut node = previous
            .get(id)
            .cloned()
            .unwrap_or_else(|| Node::new(id.clone(), center));
        node.id = id.clone();
        raw.apply_to(&mut node);
        nodes.insert(id.clone(), node);
    }

    nodes
}

pub fn apply_delta(
    mut nodes: BTreeMap<String, Node>,
    delta: &NodeDelta,
    center: Point,
) -> BTreeMap<String, Node> {
    for op in delta.ops() {
        match op {
            DeltaOp::Remove(ids) => {
                for id in ids {
                    nodes.remove(id);
                }
            }
            DeltaOp::Update(raws) => {
                for (id, raw) in with_ids(raws, op) {
                    match nodes.get_mut(id) {
                        Some(node) => raw.apply_to(node),
                        None => debug!(node = %id, "update for unknown node ignored"),
                    }
                }
            }
            DeltaOp::Add(raws) => {
                for (id, raw) in with_ids(raws, op) {
                    let node = nodes
                        .entry(id.to_string())
                        .or_insert_with(|| Node::new(id, center));
                    raw.apply_to(node);
                }
            }
        }
    }

    nodes
}

fn with_ids<'a>(
    raws: &'a [RawNode],
    op: &'a DeltaOp,
) -> impl Iterator<Item = (&'a str, &'a RawNode)> + 'a {
    raws.iter().filter_map(move |raw| match raw.id.as_deref() {
        Some(id) => Some((id, raw)),
        None => {
            debug!(op = op.name(), "skipping node without id");
            None
        }
    })
}
