//! Layered layout with a persistent context per topology.
//!
//! Each pass assigns ranks (cycles broken, the internet node pinned on top),
//! threads long edges through bend slots, reduces crossings with barycenter
//! sweeps seeded from the previous pass and finally places every layer
//! centered on the widest one. Seeding from the previous ordering is what
//! keeps successive layouts of a changing graph visually stable.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ChartConfig, Margins};
use crate::graph::{Edge, Node, Point, topology_fingerprint};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// "No layout available".
    pub const EMPTY: Self = Self {
        left: 0.0,
        top: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 && self.height <= 0.0
    }

    /// Extent of node centers.
    pub fn of_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut min_x = f64::MAX;
        let mut max_x = f64::MIN;
        let mut min_y = f64::MAX;
        let mut max_y = f64::MIN;

        for node in nodes {
            min_x = min_x.min(node.x);
            max_x = max_x.max(node.x);
            min_y = min_y.min(node.y);
            max_y = max_y.max(node.y);
        }

        if min_x > max_x || min_y > max_y {
            return Self::EMPTY;
        }

        Self {
            left: min_x,
            top: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }
}

/// Linear map from abstract node units to pixels, shrinking as the graph grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeScale {
    factor: f64,
}

impl NodeScale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn for_canvas(width: f64, height: f64, node_count: usize) -> Self {
        let expanse = width.min(height);
        let node_size = expanse / 2.0;
        let count = node_count.max(1) as f64;
        Self::new(node_size / count.powf(0.7))
    }

    pub fn apply(self, value: f64) -> f64 {
        value * self.factor
    }

    pub fn factor(self) -> f64 {
        self.factor
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LayoutParams {
    node_width: f64,
    node_height: f64,
    node_separation: f64,
    rank_separation: f64,
    ordering_passes: usize,
}

impl LayoutParams {
    fn new(config: &ChartConfig, scale: NodeScale) -> Self {
        let size = scale.apply(config.node_size);
        Self {
            node_width: size,
            node_height: size,
            node_separation: scale.apply(config.node_separation),
            rank_separation: scale.apply(config.rank_separation),
            ordering_passes: config.ordering_passes,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ContextNode {
    rank_hint: Option<String>,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    placed: bool,
}

#[derive(Debug, Clone)]
struct ContextEdge {
    source: String,
    target: String,
    /// Bend positions from the upper to the lower endpoint.
    bends: Vec<Point>,
    points: Vec<Point>,
}

/// Last frame an engine applied, so geometry can be restored without a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Frame {
    width: f64,
    height: f64,
    margins: Margins,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Slot {
    Node(String),
    Bend { edge: String, index: usize },
}

/// Persistent layout state for one topology.
#[derive(Debug, Clone, Default)]
pub struct LayoutContext {
    nodes: BTreeMap<String, ContextNode>,
    edges: BTreeMap<String, ContextEdge>,
    fingerprint: Option<String>,
    frame: Option<Frame>,
    passes: usize,
}

impl LayoutContext {
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn is_fresh(&self) -> bool {
        self.passes == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Adds newly seen nodes and resolved edges and drops the ones that went
    /// away. Returns whether the graph shape changed.
    fn sync(&mut self, nodes: &BTreeMap<String, Node>, edges: &BTreeMap<String, Edge>) -> bool {
        self.nodes.retain(|id, _| nodes.contains_key(id));
        for (id, node) in nodes {
            let entry = self.nodes.entry(id.clone()).or_default();
            entry.rank_hint = node.rank.clone();
        }

        let live: HashSet<&str> = edges
            .values()
            .filter(|edge| edge.resolved)
            .map(|edge| edge.id.as_str())
            .collect();
        self.edges.retain(|id, _| live.contains(id.as_str()));
        for edge in edges.values().filter(|edge| edge.resolved) {
            self.edges
                .entry(edge.id.clone())
                .or_insert_with(|| ContextEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    bends: Vec::new(),
                    points: Vec::new(),
                });
        }

        let fingerprint = topology_fingerprint(nodes);
        let changed = self.fingerprint.as_deref() != Some(fingerprint.as_str());
        self.fingerprint = Some(fingerprint);
        changed
    }

    fn run(&mut self, params: &LayoutParams, internet_node_id: &str) {
        let (ranks, directed) = self.assign_ranks(internet_node_id);
        let layer_count = ranks.values().copied().max().unwrap_or(0) + 1;

        let mut layers: Vec<Vec<Slot>> = vec![Vec::new(); layer_count];
        let mut hints: HashMap<Slot, (f64, Option<String>)> = HashMap::new();
        let mut upper: HashMap<Slot, Vec<Slot>> = HashMap::new();
        let mut lower: HashMap<Slot, Vec<Slot>> = HashMap::new();

        for (id, node) in &self.nodes {
            let slot = Slot::Node(id.clone());
            let rank = ranks.get(id).copied().unwrap_or(0);
            let hint = if node.placed { node.x } else { f64::INFINITY };
            hints.insert(slot.clone(), (hint, node.rank_hint.clone()));
            layers[rank].push(slot);
        }

        for (edge_id, from, to) in &directed {
            let from_rank = ranks.get(from).copied().unwrap_or(0);
            let to_rank = ranks.get(to).copied().unwrap_or(0);
            let span = to_rank.saturating_sub(from_rank);
            let previous = self.edges.get(edge_id).map(|edge| &edge.bends);

            let mut chain_prev = Slot::Node(from.clone());
            for index in 0..span.saturating_sub(1) {
                let slot = Slot::Bend {
                    edge: edge_id.clone(),
                    index,
                };
                let hint = previous
                    .filter(|bends| bends.len() + 1 == span)
                    .map(|bends| bends[index].x)
                    .unwrap_or(f64::INFINITY);
                hints.insert(slot.clone(), (hint, None));
                layers[from_rank + index + 1].push(slot.clone());
                lower.entry(chain_prev.clone()).or_default().push(slot.clone());
                upper.entry(slot.clone()).or_default().push(chain_prev);
                chain_prev = slot;
            }
            let end = Slot::Node(to.clone());
            lower.entry(chain_prev.clone()).or_default().push(end.clone());
            upper.entry(end).or_default().push(chain_prev);
        }

        for layer in &mut layers {
            layer.sort_by(|a, b| {
                let (ha, ra) = &hints[a];
                let (hb, rb) = &hints[b];
                ha.total_cmp(hb).then_with(|| ra.cmp(rb)).then_with(|| a.cmp(b))
            });
        }

        minimise_crossings(&mut layers, &upper, &lower, params.ordering_passes);
        self.place(&layers, &directed, params);
        self.passes += 1;
    }

    /// Longest-path ranking over an acyclic orientation of the edges. Returns
    /// the ranks and, per non-loop edge, its `(id, upper, lower)` orientation.
    fn assign_ranks(
        &self,
        internet_node_id: &str,
    ) -> (HashMap<String, usize>, Vec<(String, String, String)>) {
        let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in self.edges.values() {
            if edge.source != edge.target {
                successors
                    .entry(edge.source.as_str())
                    .or_default()
                    .push(edge.target.as_str());
            }
        }

        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut back_edges: HashSet<(String, String)> = HashSet::new();
        for id in self.nodes.keys() {
            mark_back_edges(id, &successors, &mut state, &mut back_edges);
        }

        let mut directed = Vec::new();
        for (id, edge) in &self.edges {
            if edge.source == edge.target {
                continue;
            }
            let reversed = edge.target == internet_node_id
                || (edge.source != internet_node_id
                    && back_edges.contains(&(edge.source.clone(), edge.target.clone())));
            if reversed {
                directed.push((id.clone(), edge.target.clone(), edge.source.clone()));
            } else {
                directed.push((id.clone(), edge.source.clone(), edge.target.clone()));
            }
        }

        let mut ranks: HashMap<String, usize> =
            self.nodes.keys().map(|id| (id.clone(), 0)).collect();
        for _ in 0..=self.nodes.len() {
            let mut changed = false;
            for (_, from, to) in &directed {
                let from_rank = ranks.get(from).copied().unwrap_or(0);
                let to_rank = ranks.entry(to.clone()).or_insert(0);
                if *to_rank < from_rank + 1 {
                    *to_rank = from_rank + 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Every edge touching the internet node points away from it, so it
        // already sits on rank 0; push everything else one rank down.
        if self.nodes.contains_key(internet_node_id) {
            for (id, rank) in ranks.iter_mut() {
                if id != internet_node_id {
                    *rank += 1;
                }
            }
        }

        (ranks, directed)
    }

    fn place(&mut self, layers: &[Vec<Slot>], directed: &[(String, String, String)], params: &LayoutParams) {
        let slot_width = |slot: &Slot| match slot {
            Slot::Node(_) => params.node_width,
            Slot::Bend { .. } => 0.0,
        };

        let layer_widths: Vec<f64> = layers
            .iter()
            .map(|layer| {
                let widths: f64 = layer.iter().map(slot_width).sum();
                let gaps = params.node_separation * layer.len().saturating_sub(1) as f64;
                widths + gaps
            })
            .collect();
        let widest = layer_widths.iter().copied().fold(0.0_f64, f64::max);

        let mut bend_points: HashMap<(String, usize), Point> = HashMap::new();
        for (rank, layer) in layers.iter().enumerate() {
            let y = rank as f64 * (params.node_height + params.rank_separation)
                + params.node_height / 2.0;
            let mut cursor = (widest - layer_widths[rank]) / 2.0;

            for slot in layer {
                let width = slot_width(slot);
                let x = cursor + width / 2.0;
                cursor += width + params.node_separation;

                match slot {
                    Slot::Node(id) => {
                        if let Some(node) = self.nodes.get_mut(id) {
                            node.x = x;
                            node.y = y;
                            node.width = params.node_width;
                            node.height = params.node_height;
                            node.placed = true;
                        }
                    }
                    Slot::Bend { edge, index } => {
                        bend_points.insert((edge.clone(), *index), Point::new(x, y));
                    }
                }
            }
        }

        let orientation: HashMap<&str, (&str, &str)> = directed
            .iter()
            .map(|(id, from, to)| (id.as_str(), (from.as_str(), to.as_str())))
            .collect();

        for (id, edge) in self.edges.iter_mut() {
            let Some(source) = self.nodes.get(&edge.source) else {
                continue;
            };
            let Some(target) = self.nodes.get(&edge.target) else {
                continue;
            };

            if edge.source == edge.target {
                edge.bends.clear();
                edge.points = self_loop_points(source);
                continue;
            }

            let (from, _) = orientation
                .get(id.as_str())
                .copied()
                .unwrap_or((edge.source.as_str(), edge.target.as_str()));

            edge.bends = (0..)
                .map_while(|index| bend_points.get(&(id.clone(), index)).copied())
                .collect();

            let (upper, lower) = if from == edge.source {
                (source, target)
            } else {
                (target, source)
            };
            let mut points = Vec::with_capacity(edge.bends.len() + 2);
            points.push(Point::new(upper.x, upper.y));
            points.extend(edge.bends.iter().copied());
            points.push(Point::new(lower.x, lower.y));
            if from != edge.source {
                points.reverse();
            }
            edge.points = points;
        }
    }

    /// Copies the context's geometry onto the caller's nodes and edges,
    /// shifted into the viewport, and reports the bounding box.
    fn apply(
        &mut self,
        nodes: &mut BTreeMap<String, Node>,
        edges: &mut BTreeMap<String, Edge>,
        frame: Frame,
    ) -> BoundingBox {
        let mut min_x = f64::MAX;
        let mut max_x = f64::MIN;
        let mut min_y = f64::MAX;
        let mut max_y = f64::MIN;
        for node in self.nodes.values() {
            min_x = min_x.min(node.x - node.width / 2.0);
            max_x = max_x.max(node.x + node.width / 2.0);
            min_y = min_y.min(node.y - node.height / 2.0);
            max_y = max_y.max(node.y + node.height / 2.0);
        }
        for point in self.edges.values().flat_map(|edge| &edge.points) {
            min_x = min_x.min(point.x);
            max_x = max_x.max(point.x);
            min_y = min_y.min(point.y);
            max_y = max_y.max(point.y);
        }
        if min_x > max_x || min_y > max_y {
            return BoundingBox::EMPTY;
        }

        let drawing_width = max_x - min_x;
        let drawing_height = max_y - min_y;
        let dx = frame.margins.left - min_x + centering(frame.width, drawing_width);
        let dy = frame.margins.top - min_y + centering(frame.height, drawing_height);

        for (id, node) in nodes.iter_mut() {
            if let Some(placed) = self.nodes.get(id) {
                node.x = placed.x + dx;
                node.y = placed.y + dy;
                node.width = placed.width;
                node.height = placed.height;
            }
        }
        for (id, edge) in edges.iter_mut() {
            edge.points = match self.edges.get(id) {
                Some(routed) => routed.points.iter().map(|p| p.offset(dx, dy)).collect(),
                None => Vec::new(),
            };
        }

        self.frame = Some(frame);
        BoundingBox::of_nodes(nodes.values())
    }
}

fn centering(available: f64, used: f64) -> f64 {
    if used < available {
        (available - used) / 2.0
    } else {
        0.0
    }
}

fn self_loop_points(node: &ContextNode) -> Vec<Point> {
    let reach = node.width * 0.75;
    let lift = node.height / 2.0;
    vec![
        Point::new(node.x, node.y),
        Point::new(node.x + reach, node.y - lift),
        Point::new(node.x + reach, node.y + lift),
        Point::new(node.x, node.y),
    ]
}

fn mark_back_edges<'a>(
    id: &'a str,
    successors: &BTreeMap<&'a str, Vec<&'a str>>,
    state: &mut HashMap<&'a str, u8>,
    back_edges: &mut HashSet<(String, String)>,
) {
    if state.contains_key(id) {
        return;
    }
    state.insert(id, 1);
    if let Some(next) = successors.get(id) {
        for &target in next {
            match state.get(target) {
                Some(1) => {
                    back_edges.insert((id.to_string(), target.to_string()));
                }
                Some(_) => {}
                None => mark_back_edges(target, successors, state, back_edges),
            }
        }
    }
    state.insert(id, 2);
}

fn count_crossings(layers: &[Vec<Slot>], lower: &HashMap<Slot, Vec<Slot>>) -> usize {
    let mut total = 0;
    for pair in layers.windows(2) {
        let below: HashMap<&Slot, usize> = pair[1].iter().enumerate().map(|(i, s)| (s, i)).collect();
        let mut segments = Vec::new();
        for (from_pos, slot) in pair[0].iter().enumerate() {
            for target in lower.get(slot).into_iter().flatten() {
                if let Some(&to_pos) = below.get(target) {
                    segments.push((from_pos, to_pos));
                }
            }
        }
        segments.sort_unstable();
        total += count_inversions(&segments, pair[1].len());
    }
    total
}

/// Segment pairs that cross between two layers. `segments` must be sorted by
/// upper then lower position; a Fenwick tree over lower positions counts, for
/// each segment, the earlier ones landing strictly to its right.
fn count_inversions(segments: &[(usize, usize)], width: usize) -> usize {
    let mut tree = vec![0usize; width + 1];
    let mut total = 0;
    for (seen, &(_, to)) in segments.iter().enumerate() {
        let mut at_or_left = 0;
        let mut i = to + 1;
        while i > 0 {
            at_or_left += tree[i];
            i -= i & i.wrapping_neg();
        }
        total += seen - at_or_left;

        let mut i = to + 1;
        while i <= width {
            tree[i] += 1;
            i += i & i.wrapping_neg();
        }
    }
    total
}

/// Reorders one layer by the mean position of its neighbors in `fixed`.
/// Slots without such neighbors keep their current index, and ties keep the
/// current order.
fn reorder_layer(layer: &mut Vec<Slot>, fixed: &[Slot], neighbors: &HashMap<Slot, Vec<Slot>>) {
    let fixed_pos: HashMap<&Slot, f64> = fixed.iter().enumerate().map(|(i, s)| (s, i as f64)).collect();
    let mut keyed: Vec<(f64, Slot)> = layer
        .drain(..)
        .enumerate()
        .map(|(index, slot)| {
            let positions: Vec<f64> = neighbors
                .get(&slot)
                .into_iter()
                .flatten()
                .filter_map(|n| fixed_pos.get(n).copied())
                .collect();
            let key = if positions.is_empty() {
                index as f64
            } else {
                positions.iter().sum::<f64>() / positions.len() as f64
            };
            (key, slot)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    layer.extend(keyed.into_iter().map(|(_, slot)| slot));
}

/// Down-then-up barycenter sweeps, kept only while they strictly reduce
/// crossings. An ordering that is already optimal is left untouched.
fn minimise_crossings(
    layers: &mut Vec<Vec<Slot>>,
    upper: &HashMap<Slot, Vec<Slot>>,
    lower: &HashMap<Slot, Vec<Slot>>,
    max_passes: usize,
) {
    let mut best = count_crossings(layers, lower);
    for _ in 0..max_passes {
        if best == 0 {
            break;
        }
        let mut candidate = layers.clone();
        for i in 1..candidate.len() {
            let (fixed, rest) = candidate.split_at_mut(i);
            reorder_layer(&mut rest[0], &fixed[i - 1], upper);
        }
        for i in (0..candidate.len().saturating_sub(1)).rev() {
            let (head, tail) = candidate.split_at_mut(i + 1);
            reorder_layer(&mut head[i], &tail[0], lower);
        }

        let crossings = count_crossings(&candidate, lower);
        if crossings >= best {
            break;
        }
        best = crossings;
        *layers = candidate;
    }
}

/// Lays out topologies, keeping one [`LayoutContext`] per topology id.
#[derive(Debug, Clone, Default)]
pub struct LayoutEngine {
    config: ChartConfig,
    contexts: HashMap<String, LayoutContext>,
}

impl LayoutEngine {
    pub fn new(config: ChartConfig) -> Self {
        Self {
            config,
            contexts: HashMap::new(),
        }
    }

    pub fn context(&self, topology_id: &str) -> Option<&LayoutContext> {
        self.contexts.get(topology_id)
    }

    /// Drops the cached context; the next layout of this topology starts fresh.
    pub fn invalidate(&mut self, topology_id: &str) -> bool {
        self.contexts.remove(topology_id).is_some()
    }

    /// Positions `nodes` and routes resolved `edges` inside a `width` x
    /// `height` area offset by `margins`. Returns [`BoundingBox::EMPTY`] and
    /// leaves everything untouched when there is nothing to lay out or the
    /// graph exceeds the node ceiling.
    #[allow(clippy::too_many_arguments)]
    pub fn layout(
        &mut self,
        topology_id: &str,
        nodes: &mut BTreeMap<String, Node>,
        edges: &mut BTreeMap<String, Edge>,
        width: f64,
        height: f64,
        scale: NodeScale,
        margins: &Margins,
    ) -> BoundingBox {
        if nodes.len() > self.config.max_nodes {
            debug!(
                topology = topology_id,
                nodes = nodes.len(),
                max = self.config.max_nodes,
                "too many nodes to lay out"
            );
            return BoundingBox::EMPTY;
        }
        if nodes.is_empty() {
            return BoundingBox::EMPTY;
        }

        let params = LayoutParams::new(&self.config, scale);
        let context = self.contexts.entry(topology_id.to_string()).or_default();
        let reshaped = context.sync(nodes, edges);

        if context.is_fresh() {
            debug!(topology = topology_id, "running layout twice to reduce jitter on initial layout");
            context.run(&params, &self.config.internet_node_id);
        }
        context.run(&params, &self.config.internet_node_id);
        debug!(
            topology = topology_id,
            passes = context.passes(),
            reshaped,
            "graph layout done"
        );

        context.apply(
            nodes,
            edges,
            Frame {
                width,
                height,
                margins: *margins,
            },
        )
    }

    /// Re-applies the last computed geometry without running a pass. Only
    /// valid while the graph shape is unchanged; returns `None` otherwise.
    pub fn restore(
        &mut self,
        topology_id: &str,
        nodes: &mut BTreeMap<String, Node>,
        edges: &mut BTreeMap<String, Edge>,
    ) -> Option<BoundingBox> {
        let context = self.contexts.get_mut(topology_id)?;
        let frame = context.frame?;
        if context.fingerprint.as_deref() != Some(topology_fingerprint(nodes).as_str()) {
            return None;
        }
        Some(context.apply(nodes, edges, frame))
    }
}
