//! Snap grid: coordinate snapping and the background line pattern.

use crate::geometry::{Coords, Dimensions};

/// Snap a coordinate to the nearest multiple of `grid_size`.
///
/// Halfway values round up. A grid size of zero (or less) disables snapping
/// and returns `value` unchanged.
pub fn snap_to_grid(value: f32, grid_size: f32) -> f32 {
    if grid_size <= 0.0 {
        return value;
    }
    grid_size * ((value + grid_size / 2.0) / grid_size).floor()
}

/// [`snap_to_grid`] on both axes.
pub fn snap_coords(coords: Coords, grid_size: f32) -> Coords {
    Coords::new(snap_to_grid(coords.x, grid_size), snap_to_grid(coords.y, grid_size))
}

/// Generate SVG path commands for the background grid
///
/// Lines follow the viewport: spacing scales with the zoom factor and the
/// pattern shifts with the offset, wrapping so the grid looks infinite.
///
/// # Arguments
/// * `canvas` - Canvas size in pixels
/// * `zoom` - Zoom factor (1.0 at 100%)
/// * `offset` - Viewport offset in pixels
/// * `grid_size` - Grid spacing in world units
///
/// # Returns
/// SVG path commands (e.g., "M 24 0 L 24 600 M 48 0 L 48 600..."), empty
/// when the lines would be closer than 4 pixels or the grid is off
pub fn generate_grid_commands(canvas: Dimensions, zoom: f32, offset: Coords, grid_size: f32) -> String {
    let spacing = grid_size * zoom;
    if spacing < 4.0 {
        return String::new();
    }

    let start_x = offset.x.rem_euclid(spacing);
    let start_y = offset.y.rem_euclid(spacing);

    let mut commands = String::new();
    let mut x = start_x;
    while x < canvas.width + spacing {
        if !commands.is_empty() {
            commands.push(' ');
        }
        commands.push_str(&format!("M {} 0 L {} {}", x, x, canvas.height));
        x += spacing;
    }
    let mut y = start_y;
    while y < canvas.height + spacing {
        commands.push(' ');
        commands.push_str(&format!("M 0 {} L {} {}", y, canvas.width, y));
        y += spacing;
    }
    commands
}
