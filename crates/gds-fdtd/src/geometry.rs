//! Planar geometry primitives shared by the extractors and the assembler
//!
//! All coordinates here are physical (µm), already scaled from the layout
//! grid. Containment is delegated to `geo`.

use geo::algorithm::orient::Direction as Winding;
use geo::{Coord, Intersects, LineString, Orient, Polygon};
use serde::{Deserialize, Serialize};

/// A 2D vertex `[x, y]`
pub type Vertex = [f64; 2];

/// Port orientation, restricted to the four cardinal directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Direction {
    /// 0°, pointing +x
    East,
    /// 90°, pointing +y
    North,
    /// 180°, pointing -x
    West,
    /// 270°, pointing -y
    South,
}

impl Direction {
    pub fn degrees(&self) -> u16 {
        match self {
            Direction::East => 0,
            Direction::North => 90,
            Direction::West => 180,
            Direction::South => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Direction::East),
            90 => Some(Direction::North),
            180 => Some(Direction::West),
            270 => Some(Direction::South),
            _ => None,
        }
    }

    /// True for the directions along a positive axis (0° and 90°)
    pub fn is_positive(&self) -> bool {
        matches!(self, Direction::East | Direction::North)
    }

    /// True when the direction runs along x
    pub fn is_horizontal(&self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }
}

impl TryFrom<u16> for Direction {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Direction::from_degrees(value)
            .ok_or_else(|| format!("{value} is not a cardinal direction (0, 90, 180, 270)"))
    }
}

impl From<Direction> for u16 {
    fn from(direction: Direction) -> Self {
        direction.degrees()
    }
}

/// Axis selection for [`dilate_1d`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Xy,
}

/// Axis-aligned bounding box as `(min, max)`, or `None` for an empty list
pub fn bounding_box(vertices: &[Vertex]) -> Option<(Vertex, Vertex)> {
    let first = vertices.first()?;
    let mut min = *first;
    let mut max = *first;
    for v in &vertices[1..] {
        min[0] = min[0].min(v[0]);
        min[1] = min[1].min(v[1]);
        max[0] = max[0].max(v[0]);
        max[1] = max[1].max(v[1]);
    }
    Some((min, max))
}

/// Grow (or shrink, for negative `extension`) the bounding box of `vertices`
/// uniformly on every side.
///
/// Only the bounding box is considered, so any polygon collapses to a
/// rectangle. Corners come back as bottom-left, bottom-right, top-right,
/// top-left.
pub fn dilate(vertices: &[Vertex], extension: f64) -> Vec<Vertex> {
    let Some((min, max)) = bounding_box(vertices) else {
        return Vec::new();
    };
    let (x_min, y_min) = (min[0] - extension, min[1] - extension);
    let (x_max, y_max) = (max[0] + extension, max[1] + extension);
    vec![[x_min, y_min], [x_max, y_min], [x_max, y_max], [x_min, y_max]]
}

/// Push both ends of a two-point segment outward by `|extension|` along the
/// chosen axis, keeping the segment's orientation.
pub fn dilate_1d(segment: [Vertex; 2], extension: f64, axis: Axis) -> [Vertex; 2] {
    let ext = extension.abs();
    let [mut a, mut b] = segment;
    if matches!(axis, Axis::X | Axis::Xy) {
        let sign = if a[0] < b[0] { 1.0 } else { -1.0 };
        a[0] -= ext * sign;
        b[0] += ext * sign;
    }
    if matches!(axis, Axis::Y | Axis::Xy) {
        let sign = if a[1] < b[1] { 1.0 } else { -1.0 };
        a[1] -= ext * sign;
        b[1] += ext * sign;
    }
    [a, b]
}

/// Rectangle of cross-section `width` centered on `center`, reaching `buffer`
/// outward along `direction`.
pub fn calculate_polygon_extension(
    center: Vertex,
    width: f64,
    direction: Direction,
    buffer: f64,
) -> [Vertex; 4] {
    let [x, y] = center;
    let half = width / 2.0;
    match direction {
        Direction::East => [
            [x, y + half],
            [x + buffer, y + half],
            [x + buffer, y - half],
            [x, y - half],
        ],
        Direction::West => [
            [x, y + half],
            [x - buffer, y + half],
            [x - buffer, y - half],
            [x, y - half],
        ],
        Direction::North => [
            [x - half, y],
            [x - half, y + buffer],
            [x + half, y + buffer],
            [x + half, y],
        ],
        Direction::South => [
            [x - half, y],
            [x - half, y - buffer],
            [x + half, y - buffer],
            [x + half, y],
        ],
    }
}

pub(crate) fn to_geo_polygon(vertices: &[Vertex]) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = vertices.iter().map(|v| Coord { x: v[0], y: v[1] }).collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Inclusive containment: points on an edge or vertex count as inside.
pub fn is_point_inside_polygon(point: Vertex, polygon: &[Vertex]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    to_geo_polygon(polygon).intersects(&Coord {
        x: point[0],
        y: point[1],
    })
}

fn open_ring(ring: &LineString<f64>) -> Vec<Vertex> {
    let mut vertices: Vec<Vertex> = ring.coords().map(|c| [c.x, c.y]).collect();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

/// Index of the vertex with the largest x
fn rightmost(ring: &[Vertex]) -> usize {
    (0..ring.len())
        .max_by(|&i, &j| ring[i][0].total_cmp(&ring[j][0]))
        .unwrap_or(0)
}

fn cross(o: Vertex, a: Vertex, b: Vertex) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// True when segment `a`-`b` properly crosses an edge of `ring`. Edges that
/// share an end point with the segment never count.
fn crosses_ring(ring: &[Vertex], a: Vertex, b: Vertex) -> bool {
    (0..ring.len()).any(|i| {
        let (c, d) = (ring[i], ring[(i + 1) % ring.len()]);
        if [c, d].iter().any(|p| *p == a || *p == b) {
            return false;
        }
        cross(a, b, c) * cross(a, b, d) < 0.0 && cross(c, d, a) * cross(c, d, b) < 0.0
    })
}

/// Outline of `polygon` as a single ring with every hole kept.
///
/// Each hole is joined to the outer contour by a zero-width cut from its
/// rightmost vertex to the nearest contour vertex the cut can reach without
/// leaving the material. The closing vertex is dropped.
pub fn to_simple_polygon(polygon: &Polygon<f64>) -> Vec<Vertex> {
    if polygon.interiors().is_empty() {
        return open_ring(polygon.exterior());
    }
    let polygon = polygon.orient(Winding::Default);
    let mut ring = open_ring(polygon.exterior());
    let mut holes: Vec<Vec<Vertex>> = polygon
        .interiors()
        .iter()
        .map(open_ring)
        .filter(|h| h.len() >= 3)
        .collect();
    holes.sort_by(|a, b| b[rightmost(b)][0].total_cmp(&a[rightmost(a)][0]));

    for (k, hole) in holes.iter().enumerate() {
        let j = rightmost(hole);
        let m = hole[j];
        let mut candidates: Vec<usize> = (0..ring.len()).collect();
        let distance = |i: usize| (ring[i][0] - m[0]).hypot(ring[i][1] - m[1]);
        candidates.sort_by(|&a, &b| distance(a).total_cmp(&distance(b)));
        let reachable = |i: usize| {
            let p = ring[i];
            let mid = Coord {
                x: (p[0] + m[0]) / 2.0,
                y: (p[1] + m[1]) / 2.0,
            };
            !crosses_ring(&ring, m, p)
                && holes[k..].iter().all(|h| !crosses_ring(h, m, p))
                && polygon.intersects(&mid)
        };
        let Some(i) = candidates
            .iter()
            .copied()
            .find(|&i| reachable(i))
            .or_else(|| candidates.first().copied())
        else {
            continue;
        };

        let mut joined = Vec::with_capacity(ring.len() + hole.len() + 2);
        joined.extend_from_slice(&ring[..=i]);
        joined.extend_from_slice(&hole[j..]);
        joined.extend_from_slice(&hole[..=j]);
        joined.extend_from_slice(&ring[i..]);
        ring = joined;
    }
    ring
}
