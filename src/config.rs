use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const MAX_NODES_DEFAULT: usize = 100;
const MIN_SCALE_DEFAULT: f64 = 0.1;
const MAX_SCALE_DEFAULT: f64 = 2.0;

/// Space kept free around the drawing, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 100.0,
            left: 40.0,
            right: 40.0,
            bottom: 20.0,
        }
    }
}

/// Inclusive zoom bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleExtent {
    pub min: f64,
    pub max: f64,
}

impl ScaleExtent {
    pub fn clamp(&self, scale: f64) -> f64 {
        scale.max(self.min).min(self.max)
    }
}

impl Default for ScaleExtent {
    fn default() -> Self {
        Self {
            min: MIN_SCALE_DEFAULT,
            max: MAX_SCALE_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Graphs with more nodes than this are not laid out at all.
    pub max_nodes: usize,
    pub margins: Margins,
    pub scale_extent: ScaleExtent,
    /// Node width and height, in node-scale units.
    pub node_size: f64,
    pub node_separation: f64,
    pub rank_separation: f64,
    /// Pseudo node pinned above every other node when present.
    pub internet_node_id: String,
    /// Upper bound on crossing-reduction sweeps per layout pass.
    pub ordering_passes: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            max_nodes: MAX_NODES_DEFAULT,
            margins: Margins::default(),
            scale_extent: ScaleExtent::default(),
            node_size: 2.25,
            node_separation: 1.0,
            rank_separation: 2.0,
            internet_node_id: "theinternet".to_string(),
            ordering_passes: 8,
        }
    }
}

impl ChartConfig {
    /// Defaults overridden by `TOPOVIEW_*` environment variables. Unset or
    /// unparsable variables keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_nodes: env_or("TOPOVIEW_MAX_NODES", defaults.max_nodes),
            scale_extent: ScaleExtent {
                min: env_or("TOPOVIEW_MIN_SCALE", defaults.scale_extent.min),
                max: env_or("TOPOVIEW_MAX_SCALE", defaults.scale_extent.max),
            },
            ..defaults
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(fallback)
}
