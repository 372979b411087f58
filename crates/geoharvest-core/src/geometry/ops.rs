//! Derived geometry operations: bounding box, centroid, containment, winding.

use super::{Coord, Geometry, Polygon};

/// Returns the axis-aligned bounding box as a [`Geometry::Envelope`], or
/// `None` for a geometry without vertices.
pub fn bounding_box(geometry: &Geometry) -> Option<Geometry> {
    let mut coords = geometry.coords();
    let first = *coords.next()?;
    let (mut min, mut max) = (Coord::new(first.x, first.y), Coord::new(first.x, first.y));

    for c in coords {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }

    Some(Geometry::Envelope { min, max })
}

/// Returns the vertex mean of the geometry.
///
/// Ring closing vertices are not counted twice, holes are ignored, and an
/// envelope is treated as the line between its corners.
pub fn centroid(geometry: &Geometry) -> Option<Coord> {
    match geometry {
        Geometry::Point(c) => Some(Coord::new(c.x, c.y)),
        Geometry::LineString(points) => vertex_mean(points.iter()),
        Geometry::Polygon(p) => vertex_mean(open_ring(&p.exterior).iter()),
        Geometry::MultiPolygon(polys) => {
            vertex_mean(polys.iter().flat_map(|p| open_ring(&p.exterior).iter()))
        }
        Geometry::Envelope { min, max } => centroid(&Geometry::LineString(vec![*min, *max])),
    }
}

fn vertex_mean<'a>(points: impl Iterator<Item = &'a Coord>) -> Option<Coord> {
    let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
    for p in points {
        sx += p.x;
        sy += p.y;
        n += 1;
    }
    (n > 0).then(|| Coord::new(sx / n as f64, sy / n as f64))
}

fn open_ring(ring: &[Coord]) -> &[Coord] {
    match ring {
        [first, .., last] if first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Tests whether a point lies inside a geometry using the even-odd rule.
///
/// Points and lines contain nothing; holes are respected.
pub fn contains_point(geometry: &Geometry, point: &Coord) -> bool {
    match geometry {
        Geometry::Point(_) | Geometry::LineString(_) => false,
        Geometry::Polygon(p) => polygon_contains(p, point),
        Geometry::MultiPolygon(polys) => polys.iter().any(|p| polygon_contains(p, point)),
        Geometry::Envelope { min, max } => {
            point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
        }
    }
}

fn polygon_contains(polygon: &Polygon, point: &Coord) -> bool {
    ring_contains(&polygon.exterior, point)
        && !polygon
            .interiors
            .iter()
            .any(|hole| ring_contains(hole, point))
}

fn ring_contains(ring: &[Coord], point: &Coord) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (&ring[i], &ring[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Shoelace signed area; positive for counter-clockwise rings.
pub fn signed_area(ring: &[Coord]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = &ring[i];
        let b = &ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Rewinds polygons so exterior rings are counter-clockwise and holes clockwise.
pub fn normalize_winding(geometry: Geometry) -> Geometry {
    match geometry {
        Geometry::Polygon(p) => Geometry::Polygon(normalize_polygon(p)),
        Geometry::MultiPolygon(polys) => {
            Geometry::MultiPolygon(polys.into_iter().map(normalize_polygon).collect())
        }
        other => other,
    }
}

fn normalize_polygon(mut polygon: Polygon) -> Polygon {
    if signed_area(&polygon.exterior) < 0.0 {
        polygon.exterior.reverse();
    }
    for hole in &mut polygon.interiors {
        if signed_area(hole) > 0.0 {
            hole.reverse();
        }
    }
    polygon
}
