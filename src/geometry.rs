//! Zone geometry: polygon/line membership tests over a track's centroid.
//!
//! Grounded on the teacher's [`crate::utils::bbox`] module, which represents
//! detector boxes as `geo` polygons and hand-rolls clipping rather than
//! reaching for a generic GIS library's full API. Zones here keep the same
//! posture: vertices are stored as plain `(f32, f32)` pairs and the
//! containment test is a hand-written ray cast, not `geo`'s `Contains`,
//! because the edge-exact behavior needs to match what this system has
//! always done (`spec.md` §4.3.1 leaves edge behavior unspecified on purpose).

use crate::errors::Errors;
use std::cell::RefCell;

/// A 2D point; always a bounding box centroid in pixel or percentage space.
pub type Point = (f32, f32);

#[inline]
pub fn midpoint(bbox: (f32, f32, f32, f32)) -> Point {
    let (x1, y1, x2, y2) = bbox;
    ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateType {
    Absolute,
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Above,
    Below,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    OneWay,
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

/// Which sign pattern of `(c_p, c_q)` counts as a valid enter crossing.
///
/// The source's `line_crossing()` gives `above`/`right` the same sign
/// pattern and `below`/`left` the other; typed directions
/// (`left_to_right`, `top_to_bottom`, ...) aren't named in the original, so
/// this mapping is this crate's own resolution of that open point (see
/// `DESIGN.md`): `left_to_right`/`top_to_bottom` behave like `right`/`above`,
/// `right_to_left`/`bottom_to_top` behave like `left`/`below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossPattern {
    /// valid enter iff c_p < 0 && c_q > 0
    A,
    /// valid enter iff c_p > 0 && c_q < 0
    B,
}

fn cross_pattern(side: Side, direction: Direction) -> CrossPattern {
    match direction {
        Direction::LeftToRight | Direction::TopToBottom => CrossPattern::A,
        Direction::RightToLeft | Direction::BottomToTop => CrossPattern::B,
        Direction::Bidirectional | Direction::OneWay => match side {
            Side::Above | Side::Right => CrossPattern::A,
            Side::Below | Side::Left => CrossPattern::B,
        },
    }
}

#[derive(Debug, Clone)]
pub enum Geometry {
    Polygon { points: Vec<Point> },
    Line { a: Point, b: Point, side: Side, direction: Direction },
}

/// Even-odd ray cast, ported line-for-line from the Python original so the
/// edge-exact behavior (left deliberately unspecified by `spec.md`) matches
/// what operators have observed in production rather than a textbook
/// variant that happens to disagree on vertex-touching cases.
fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let (x, y) = point;
    let n = polygon.len();
    let mut inside = false;
    let (mut p1x, mut p1y) = polygon[0];
    let mut xinters = 0.0_f32;
    for i in 1..=n {
        let (p2x, p2y) = polygon[i % n];
        if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
            if p1y != p2y {
                xinters = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
            }
            if p1x == p2x || x <= xinters {
                inside = !inside;
            }
        }
        p1x = p2x;
        p1y = p2y;
    }
    inside
}

#[inline]
fn cross2d(u: Point, v: Point) -> f32 {
    u.0 * v.1 - u.1 * v.0
}

/// Returns `true` iff `(prev, curr)` crosses segment `(a, b)` in the
/// polarity that `side`/`direction` call a valid enter (`spec.md` §4.3.1).
fn line_crossing(prev: Point, curr: Point, a: Point, b: Point, side: Side, direction: Direction) -> bool {
    let line_vec = (b.0 - a.0, b.1 - a.1);
    let prev_vec = (prev.0 - a.0, prev.1 - a.1);
    let curr_vec = (curr.0 - a.0, curr.1 - a.1);
    let c_p = cross2d(line_vec, prev_vec);
    let c_q = cross2d(line_vec, curr_vec);
    if c_p * c_q >= 0.0 {
        return false;
    }
    match cross_pattern(side, direction) {
        CrossPattern::A => c_p < 0.0 && c_q > 0.0,
        CrossPattern::B => c_p > 0.0 && c_q < 0.0,
    }
}

/// Immutable zone definition, per `spec.md` §3. Percentage coordinates are
/// resolved lazily against the frame size of the first `evaluate` call and
/// re-resolved whenever that size changes.
#[derive(Debug)]
pub struct Zone {
    pub zone_id: String,
    pub name: String,
    pub coordinate_type: CoordinateType,
    geometry: Geometry,
    pub enter_threshold: u32,
    pub exit_threshold: u32,
    pub active: bool,
    resolved: RefCell<Option<((u32, u32), Geometry)>>,
}

impl Zone {
    pub fn new_polygon(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        coordinate_type: CoordinateType,
        points: Vec<Point>,
        enter_threshold: u32,
        exit_threshold: u32,
        active: bool,
    ) -> Result<Self, Errors> {
        let zone_id = zone_id.into();
        if points.len() < 3 {
            return Err(Errors::InvalidZone(
                zone_id,
                "polygon zone must have at least 3 points".into(),
            ));
        }
        Ok(Self {
            zone_id,
            name: name.into(),
            coordinate_type,
            geometry: Geometry::Polygon { points },
            enter_threshold: enter_threshold.max(1),
            exit_threshold: exit_threshold.max(1),
            active,
            resolved: RefCell::new(None),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_line(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        coordinate_type: CoordinateType,
        a: Point,
        b: Point,
        side: Side,
        direction: Direction,
        enter_threshold: u32,
        exit_threshold: u32,
        active: bool,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            name: name.into(),
            coordinate_type,
            geometry: Geometry::Line { a, b, side, direction },
            enter_threshold: enter_threshold.max(1),
            exit_threshold: exit_threshold.max(1),
            active,
            resolved: RefCell::new(None),
        }
    }

    fn resolve(&self, frame_w: u32, frame_h: u32) -> Geometry {
        if let Some((size, geom)) = self.resolved.borrow().as_ref() {
            if *size == (frame_w, frame_h) {
                return geom.clone();
            }
        }
        let scale = |p: &Point| -> Point {
            match self.coordinate_type {
                CoordinateType::Absolute => *p,
                CoordinateType::Percentage => (
                    p.0 * frame_w as f32 / 100.0,
                    p.1 * frame_h as f32 / 100.0,
                ),
            }
        };
        let resolved_geom = match &self.geometry {
            Geometry::Polygon { points } => Geometry::Polygon {
                points: points.iter().map(scale).collect(),
            },
            Geometry::Line { a, b, side, direction } => Geometry::Line {
                a: scale(a),
                b: scale(b),
                side: *side,
                direction: *direction,
            },
        };
        *self.resolved.borrow_mut() = Some(((frame_w, frame_h), resolved_geom.clone()));
        resolved_geom
    }

    /// `in_raw` for the current frame: centroid inside polygon, or a
    /// just-occurred valid-enter line crossing between `prev` and `curr`.
    pub fn in_raw(&self, prev_centroid: Point, curr_centroid: Point, frame_w: u32, frame_h: u32) -> bool {
        match self.resolve(frame_w, frame_h) {
            Geometry::Polygon { points } => point_in_polygon(curr_centroid, &points),
            Geometry::Line { a, b, side, direction } => {
                line_crossing(prev_centroid, curr_centroid, a, b, side, direction)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_contains_center() {
        let z = Zone::new_polygon(
            "z1",
            "square",
            CoordinateType::Absolute,
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            1,
            1,
            true,
        )
        .unwrap();
        assert!(z.in_raw((50.0, 50.0), (50.0, 50.0), 100, 100));
        assert!(!z.in_raw((150.0, 150.0), (150.0, 150.0), 100, 100));
    }

    #[test]
    fn percentage_zone_resolves_against_frame_size() {
        let z = Zone::new_polygon(
            "z1",
            "left-half",
            CoordinateType::Percentage,
            vec![(0.0, 0.0), (50.0, 0.0), (50.0, 100.0), (0.0, 100.0)],
            1,
            1,
            true,
        )
        .unwrap();
        assert!(z.in_raw((100.0, 100.0), (100.0, 100.0), 1000, 1000));
        assert!(!z.in_raw((600.0, 100.0), (600.0, 100.0), 1000, 1000));
        // re-resolves when frame size changes
        assert!(z.in_raw((40.0, 10.0), (40.0, 10.0), 100, 100));
    }

    #[test]
    fn line_crossing_left_to_right() {
        let z = Zone::new_line(
            "l1",
            "gate",
            CoordinateType::Absolute,
            (0.0, 50.0),
            (100.0, 50.0),
            Side::Above,
            Direction::LeftToRight,
            1,
            1,
            true,
        );
        assert!(z.in_raw((10.0, 40.0), (10.0, 60.0), 100, 100));
        assert!(z.in_raw((90.0, 40.0), (90.0, 60.0), 100, 100));
        assert!(!z.in_raw((10.0, 60.0), (10.0, 40.0), 100, 100));
    }
}
