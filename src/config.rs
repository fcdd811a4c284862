//! Engine configuration.
//!
//! Every knob the interaction layer and the link pipeline consult lives here,
//! and the whole structure is handed to the engine at construction. It can be
//! built in code with the `with_*` setters or deserialized (missing fields
//! take their defaults).

use serde::{Deserialize, Serialize};

/// Behaviour switches and tuning constants for a [`DiagramEngine`](crate::DiagramEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mouse-wheel zoom enabled
    pub allow_canvas_zoom: bool,
    /// Panning the canvas by dragging empty space enabled
    pub allow_canvas_translation: bool,
    /// Wheel up zooms in
    pub inverse_zoom: bool,
    /// Links missing a source or target survive the end of a gesture
    pub allow_loose_links: bool,
    /// Route links around nodes with the grid search instead of curves
    pub smart_routing: bool,
    /// Snap grid in world units; 0 disables snapping
    pub grid_size: f32,
    /// Lower zoom bound in percent
    pub min_zoom: f32,
    /// Optional upper zoom bound in percent
    pub max_zoom: Option<f32>,
    /// Wheel delta divisor for trackpad pinch events
    pub pinch_divisor: f32,
    /// Wheel delta divisor for regular wheel events
    pub wheel_divisor: f32,
    /// Endpoints closer than this along the dominant axis are joined by a straight line
    pub straight_threshold: f32,
    /// Control-point offset used by newly created links
    pub default_curviness: f32,
    /// Offset applied to both axes of a label's midpoint
    pub label_offset: f32,
    /// World-space radius for port hit testing
    pub port_hit_radius: f32,
    /// World-space radius for point hit testing
    pub point_hit_radius: f32,
    /// World-space distance for link hit testing
    pub link_hit_distance: f32,
    pub routing: RoutingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_canvas_zoom: true,
            allow_canvas_translation: true,
            inverse_zoom: true,
            allow_loose_links: true,
            smart_routing: false,
            grid_size: 0.0,
            min_zoom: 10.0,
            max_zoom: None,
            pinch_divisor: 3.0,
            wheel_divisor: 60.0,
            straight_threshold: 50.0,
            default_curviness: 50.0,
            label_offset: 20.0,
            port_hit_radius: 8.0,
            point_hit_radius: 6.0,
            link_hit_distance: 6.0,
            routing: RoutingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loose_links(mut self, allow: bool) -> Self {
        self.allow_loose_links = allow;
        self
    }

    pub fn with_grid_size(mut self, grid_size: f32) -> Self {
        self.grid_size = grid_size.max(0.0);
        self
    }

    pub fn with_smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = enabled;
        self
    }

    pub fn with_inverse_zoom(mut self, inverse: bool) -> Self {
        self.inverse_zoom = inverse;
        self
    }

    pub fn with_canvas_zoom(mut self, allow: bool) -> Self {
        self.allow_canvas_zoom = allow;
        self
    }

    pub fn with_canvas_translation(mut self, allow: bool) -> Self {
        self.allow_canvas_translation = allow;
        self
    }

    pub fn with_zoom_bounds(mut self, min: f32, max: Option<f32>) -> Self {
        self.min_zoom = min;
        self.max_zoom = max;
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }
}

/// Tuning for the obstacle-avoiding router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// World units per routing grid cell
    pub scaling_factor: f32,
    /// Allow diagonal moves (8-connected grid)
    pub allow_diagonal: bool,
    /// Extra world-space padding around each node obstacle
    pub obstacle_margin: f32,
    /// Merge runs of collinear cells into single segments
    pub compress_path: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            scaling_factor: 5.0,
            allow_diagonal: true,
            obstacle_margin: 0.0,
            compress_path: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.allow_loose_links);
        assert!(config.inverse_zoom);
        assert_eq!(config.min_zoom, 10.0);
        assert_eq!(config.grid_size, 0.0);
        assert_eq!(config.routing.scaling_factor, 5.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "allow_loose_links": false, "routing": { "allow_diagonal": false } }"#)
                .unwrap();
        assert!(!config.allow_loose_links);
        assert!(!config.routing.allow_diagonal);
        assert_eq!(config.routing.scaling_factor, 5.0);
        assert_eq!(config.wheel_divisor, 60.0);
    }

    #[test]
    fn test_builder_clamps_grid() {
        let config = EngineConfig::new().with_grid_size(-5.0).with_loose_links(false);
        assert_eq!(config.grid_size, 0.0);
        assert!(!config.allow_loose_links);
    }
}
