//! Link path geometry: straight and curved paths between two endpoints,
//! polylines through routed or user-placed points, label placement and
//! distance queries for hit testing.

use crate::geometry::Coords;

/// Drawable geometry of one link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkPath {
    Straight { from: Coords, to: Coords },
    Curve(CubicBezier),
    Polyline(Vec<Coords>),
}

impl LinkPath {
    /// SVG path data.
    ///
    /// # Returns
    /// A path string such as `"M 10 20 C 60 20 90 80 140 80"`; empty for a
    /// polyline without points
    pub fn to_svg(&self) -> String {
        match self {
            LinkPath::Straight { from, to } => {
                format!("M {} {} L {} {}", from.x, from.y, to.x, to.y)
            }
            LinkPath::Curve(c) => format!(
                "M {} {} C {} {} {} {} {} {}",
                c.p0.x, c.p0.y, c.p1.x, c.p1.y, c.p2.x, c.p2.y, c.p3.x, c.p3.y
            ),
            LinkPath::Polyline(points) => {
                let mut out = String::new();
                for (i, p) in points.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    let cmd = if i == 0 { 'M' } else { 'L' };
                    out.push_str(&format!("{} {} {}", cmd, p.x, p.y));
                }
                out
            }
        }
    }

    pub fn start(&self) -> Option<Coords> {
        match self {
            LinkPath::Straight { from, .. } => Some(*from),
            LinkPath::Curve(c) => Some(c.p0),
            LinkPath::Polyline(points) => points.first().copied(),
        }
    }

    pub fn end(&self) -> Option<Coords> {
        match self {
            LinkPath::Straight { to, .. } => Some(*to),
            LinkPath::Curve(c) => Some(c.p3),
            LinkPath::Polyline(points) => points.last().copied(),
        }
    }

    /// Minimum distance from `point` to the drawn path.
    pub fn distance_to(&self, point: Coords) -> f32 {
        match self {
            LinkPath::Straight { from, to } => distance_to_line_segment_sq(point, *from, *to).sqrt(),
            LinkPath::Curve(c) => distance_to_bezier(point, c, 20),
            LinkPath::Polyline(points) => match points.len() {
                0 => f32::MAX,
                1 => point.distance_sq(points[0]).sqrt(),
                _ => points
                    .windows(2)
                    .map(|w| distance_to_line_segment_sq(point, w[0], w[1]))
                    .fold(f32::MAX, f32::min)
                    .sqrt(),
            },
        }
    }
}

/// Default link geometry between two endpoints.
///
/// Endpoints closer than `straight_threshold` along the dominant axis are
/// joined by a straight segment. Otherwise a cubic curve is produced whose
/// control points are pushed `curviness` along the dominant axis only.
///
/// # Arguments
/// * `first`, `last` - Endpoint coordinates
/// * `curviness` - Control-point offset (default: 50.0)
/// * `straight_threshold` - Dominant-axis distance below which the link is straight (default: 50.0)
pub fn generate_link_path(first: Coords, last: Coords, curviness: f32, straight_threshold: f32) -> LinkPath {
    let horizontal = is_horizontal(first, last);
    let along = if horizontal {
        (first.x - last.x).abs()
    } else {
        (first.y - last.y).abs()
    };
    if along < straight_threshold {
        return LinkPath::Straight {
            from: first,
            to: last,
        };
    }
    LinkPath::Curve(generate_curve(first, last, curviness))
}

/// The dominant axis of the segment is X.
pub fn is_horizontal(first: Coords, last: Coords) -> bool {
    (first.x - last.x).abs() > (first.y - last.y).abs()
}

/// Symmetric cubic curve with the control offset applied on the dominant axis.
pub fn generate_curve(first: Coords, last: Coords, curviness: f32) -> CubicBezier {
    let (cx, cy) = if is_horizontal(first, last) {
        (curviness, 0.0)
    } else {
        (0.0, curviness)
    };
    CubicBezier {
        p0: first,
        p1: Coords::new(first.x + cx, first.y + cy),
        p2: Coords::new(last.x - cx, last.y - cy),
        p3: last,
    }
}

/// Label anchor: the midpoint of the endpoints shifted by `offset` on both axes.
pub fn label_position(first: Coords, last: Coords, offset: f32) -> Coords {
    Coords::new(
        (first.x + last.x) / 2.0 + offset,
        (first.y + last.y) / 2.0 + offset,
    )
}

/// Incline of the segment in degrees, folded into `[0, 180)`. Vertical
/// segments report 0.
pub fn label_incline(first: Coords, last: Coords) -> f32 {
    let dx = last.x - first.x;
    let dy = last.y - first.y;
    if dx == 0.0 {
        return 0.0;
    }
    let angle = (dy / dx).atan().to_degrees();
    if angle < 0.0 {
        angle + 180.0
    } else {
        angle
    }
}

/// Cubic bezier curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    pub p0: Coords, // Start point
    pub p1: Coords, // Control point 1
    pub p2: Coords, // Control point 2
    pub p3: Coords, // End point
}

impl CubicBezier {
    /// Evaluate the bezier curve at parameter t (0.0 to 1.0)
    pub fn eval(&self, t: f32) -> Coords {
        let t2 = t * t;
        let t3 = t2 * t;
        let mt = 1.0 - t;
        let mt2 = mt * mt;
        let mt3 = mt2 * mt;

        let x = mt3 * self.p0.x + 3.0 * mt2 * t * self.p1.x + 3.0 * mt * t2 * self.p2.x + t3 * self.p3.x;
        let y = mt3 * self.p0.y + 3.0 * mt2 * t * self.p1.y + 3.0 * mt * t2 * self.p2.y + t3 * self.p3.y;

        Coords::new(x, y)
    }
}

/// Calculate squared distance from a point to a line segment
fn distance_to_line_segment_sq(point: Coords, a: Coords, b: Coords) -> f32 {
    let ab = (b.x - a.x, b.y - a.y);
    let ap = (point.x - a.x, point.y - a.y);

    let ab_len_sq = ab.0 * ab.0 + ab.1 * ab.1;

    if ab_len_sq < f32::EPSILON {
        // Degenerate segment (a == b)
        return ap.0 * ap.0 + ap.1 * ap.1;
    }

    // Project point onto line, clamped to segment
    let t = ((ap.0 * ab.0 + ap.1 * ab.1) / ab_len_sq).clamp(0.0, 1.0);
    let closest = Coords::new(a.x + t * ab.0, a.y + t * ab.1);
    point.distance_sq(closest)
}

/// Calculate the minimum distance from a point to a cubic bezier curve
///
/// Samples the curve at regular intervals and measures against the chords.
///
/// # Arguments
/// * `point` - The point to measure distance from
/// * `bezier` - The bezier curve
/// * `num_samples` - Number of samples (0 means the default of 20)
pub fn distance_to_bezier(point: Coords, bezier: &CubicBezier, num_samples: usize) -> f32 {
    let num_samples = if num_samples == 0 { 20 } else { num_samples };

    let mut min_dist_sq = f32::MAX;
    let mut prev = bezier.eval(0.0);

    for i in 1..=num_samples {
        let t = i as f32 / num_samples as f32;
        let curr = bezier.eval(t);
        min_dist_sq = min_dist_sq.min(distance_to_line_segment_sq(point, prev, curr));
        prev = curr;
    }

    min_dist_sq.sqrt()
}
