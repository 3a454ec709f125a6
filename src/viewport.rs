use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Margins, ScaleExtent};
use crate::graph::Point;
use crate::layout::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub scale: f64,
    pub translate: Point,
    pub user_has_adjusted: bool,
}

/// A zoom or pan gesture, carrying the resulting transform verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportEvent {
    pub scale: f64,
    pub translate: Point,
}

/// Zoom that fits `bbox` into `width` x `height`, never above natural size.
pub fn zoom_factor(bbox: &BoundingBox, width: f64, height: f64) -> f64 {
    let x_factor = width / bbox.width;
    let y_factor = height / bbox.height;
    x_factor.min(y_factor).min(1.0)
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    state: ViewportState,
    extent: ScaleExtent,
    margins: Margins,
}

impl ViewportController {
    pub fn new(extent: ScaleExtent, margins: Margins) -> Self {
        Self {
            state: Self::initial_state(&margins),
            extent,
            margins,
        }
    }

    fn initial_state(margins: &Margins) -> ViewportState {
        ViewportState {
            scale: 1.0,
            translate: Point::new(margins.left, margins.top),
            user_has_adjusted: false,
        }
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn scale(&self) -> f64 {
        self.state.scale
    }

    pub fn translate(&self) -> Point {
        self.state.translate
    }

    pub fn user_has_adjusted(&self) -> bool {
        self.state.user_has_adjusted
    }

    /// Auto-fits the viewport to a fresh layout. Does nothing once the user
    /// has zoomed or panned, or when there is no layout. Returns whether the
    /// viewport changed.
    pub fn fit(&mut self, bbox: &BoundingBox, width: f64, height: f64) -> bool {
        if self.state.user_has_adjusted || bbox.is_empty() {
            return false;
        }

        let mut adjusted = false;
        let zoom = self.extent.clamp(zoom_factor(bbox, width, height));
        if zoom != self.state.scale {
            self.state.scale = zoom;
            adjusted = true;
        }

        if bbox.left < 0.0 {
            self.state.translate.x = -bbox.left * self.state.scale + self.margins.left;
            adjusted = true;
        }
        if bbox.top < 0.0 {
            self.state.translate.y = -bbox.top * self.state.scale + self.margins.top;
            adjusted = true;
        }

        if adjusted {
            debug!(
                scale = self.state.scale,
                translate_x = self.state.translate.x,
                translate_y = self.state.translate.y,
                "adjust graph"
            );
        }
        adjusted
    }

    /// The user is now in charge until the next [`reset`](Self::reset).
    pub fn user_adjusted(&mut self, event: ViewportEvent) {
        self.state = ViewportState {
            scale: event.scale,
            translate: event.translate,
            user_has_adjusted: true,
        };
    }

    /// Called on topology or grouping changes; the next layout fits again.
    pub fn reset(&mut self) {
        self.state = Self::initial_state(&self.margins);
    }
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new(ScaleExtent::default(), Margins::default())
    }
}
