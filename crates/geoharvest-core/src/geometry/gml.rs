//! Recursive-descent parser for GML 2/3 geometry elements.
//!
//! Each grammar rule takes the element it describes and the [`GmlContext`]
//! inherited from its ancestors. `srsName` and `srsDimension` attributes found
//! on the way down produce a new context for the subtree; nothing is shared
//! between calls.
//!
//! Top-level dispatch recognizes `Polygon`, `Rectangle`, `Surface`,
//! `MultiSurface`, `CompositeSurface`, GML 2 `MultiPolygon`, `Point`,
//! `LineString`, `Curve` and `Envelope`. Any other element yields `Ok(None)`
//! so the caller can fall back to a bounding box.

use crate::xml::XmlElement;

use super::crs::Crs;
use super::ops::normalize_winding;
use super::{Coord, Geometry, GeometryError, Polygon};

/// Caller-supplied defaults for a parse.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// CRS name used when no ancestor carries `srsName`. Defaults to `EPSG:4326`.
    pub crs: Option<String>,
    /// Coordinate tuple size used when no ancestor carries `srsDimension`.
    pub stride: Option<usize>,
}

impl ParseOptions {
    pub fn with_crs(crs: impl Into<String>) -> Self {
        Self {
            crs: Some(crs.into()),
            stride: None,
        }
    }
}

/// Inherited parse state: the source CRS and the coordinate tuple size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmlContext {
    pub crs: Crs,
    pub stride: usize,
}

impl Default for GmlContext {
    fn default() -> Self {
        Self {
            crs: Crs::default(),
            stride: 2,
        }
    }
}

impl GmlContext {
    /// Builds the root context from caller options.
    pub fn from_options(options: &ParseOptions) -> Result<Self, GeometryError> {
        let crs = match &options.crs {
            Some(name) => Crs::from_name(name)?,
            None => Crs::default(),
        };
        let stride = options.stride.unwrap_or(2);
        if !(2..=3).contains(&stride) {
            return Err(GeometryError::InvalidCoordinate(format!(
                "unsupported dimension {stride}"
            )));
        }
        Ok(Self { crs, stride })
    }

    /// Returns the context for `node`'s subtree, applying its own
    /// `srsName`/`srsDimension` overrides.
    pub fn descend(&self, node: &XmlElement) -> Result<Self, GeometryError> {
        let mut ctx = *self;
        if let Some(name) = node.attr("srsName") {
            ctx.crs = Crs::from_name(name)?;
        }
        if let Some(dim) = node.attr("srsDimension") {
            ctx.stride = match dim.trim().parse::<usize>() {
                Ok(d @ 2..=3) => d,
                _ => {
                    return Err(GeometryError::InvalidCoordinate(format!(
                        "unsupported srsDimension '{dim}'"
                    )));
                }
            };
        }
        Ok(ctx)
    }
}

/// Parses a GML geometry element into a canonical geometry in WGS84.
///
/// Polygon rings come back with canonical winding: exterior rings
/// counter-clockwise, interior rings clockwise.
///
/// # Errors
///
/// Grammar violations (wrong child counts, too few points, bad coordinate
/// tokens, unsupported CRS) are returned as [`GeometryError`].
pub fn parse(node: &XmlElement, options: &ParseOptions) -> Result<Option<Geometry>, GeometryError> {
    let ctx = GmlContext::from_options(options)?;
    parse_with_context(node, &ctx)
}

/// Same as [`parse`], starting from an explicit context.
pub fn parse_with_context(
    node: &XmlElement,
    ctx: &GmlContext,
) -> Result<Option<Geometry>, GeometryError> {
    let geometry = match node.name.as_str() {
        "Polygon" | "Rectangle" => Geometry::Polygon(polygon(node, ctx)?),
        "Surface" => Geometry::MultiPolygon(surface(node, ctx)?),
        "MultiSurface" | "CompositeSurface" | "MultiPolygon" => {
            Geometry::MultiPolygon(multi_surface(node, ctx)?)
        }
        "Point" => Geometry::Point(point(node, ctx)?),
        "LineString" => Geometry::LineString(line(node, ctx)?),
        "Curve" => Geometry::LineString(curve(node, ctx)?),
        "Envelope" => envelope(node, ctx)?,
        _ => return Ok(None),
    };
    Ok(Some(normalize_winding(geometry)))
}

/// Finds the first element below `property` that the top-level dispatch
/// understands and parses it. Used for feature properties such as
/// `<app:geom><gml:MultiSurface>...`.
pub fn parse_property(
    property: &XmlElement,
    options: &ParseOptions,
) -> Result<Option<Geometry>, GeometryError> {
    let ctx = GmlContext::from_options(options)?.descend(property)?;
    for child in &property.children {
        if let Some(geometry) = parse_with_context(child, &ctx)? {
            return Ok(Some(geometry));
        }
    }
    Ok(None)
}

/// `pos` / `posList` leaf.
fn positions(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    let (ctx, tuples) = source_positions(node, ctx)?;
    tuples.iter().map(|tuple| transform(&ctx, tuple)).collect()
}

/// Tuples of a `pos` / `posList` leaf in source coordinates, with the leaf's
/// own context.
fn source_positions(
    node: &XmlElement,
    ctx: &GmlContext,
) -> Result<(GmlContext, Vec<Vec<f64>>), GeometryError> {
    let ctx = ctx.descend(node)?;
    let values = node
        .text
        .split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                GeometryError::InvalidCoordinate(format!("'{token}' in <{}>", node.name))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() % ctx.stride != 0 {
        return Err(GeometryError::InvalidCoordinate(format!(
            "<{}> has {} values, not a multiple of dimension {}",
            node.name,
            values.len(),
            ctx.stride
        )));
    }

    let tuples = values.chunks(ctx.stride).map(<[f64]>::to_vec).collect();
    Ok((ctx, tuples))
}

/// GML 2 `coordinates` leaf. Tuples are separated by `ts` (whitespace by
/// default), values by `cs` (`,` by default), and `decimal` marks the
/// fraction (`.` by default).
fn coordinates(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    let ctx = ctx.descend(node)?;
    let cs = node.attr("cs").filter(|cs| !cs.is_empty()).unwrap_or(",");
    let decimal = node.attr("decimal").filter(|d| !d.is_empty()).unwrap_or(".");
    let tuples: Vec<&str> = match node.attr("ts").filter(|ts| !ts.trim().is_empty()) {
        Some(ts) => node
            .text
            .split(ts)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect(),
        None => node.text.split_whitespace().collect(),
    };

    tuples
        .into_iter()
        .map(|tuple| {
            let values = tuple
                .split(cs)
                .map(|v| {
                    let v = v.trim();
                    let parsed = if decimal == "." {
                        v.parse::<f64>()
                    } else {
                        v.replace(decimal, ".").parse::<f64>()
                    };
                    parsed.map_err(|_| {
                        GeometryError::InvalidCoordinate(format!("'{tuple}' in <coordinates>"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if !(2..=3).contains(&values.len()) {
                return Err(GeometryError::InvalidCoordinate(format!(
                    "'{tuple}' in <coordinates>"
                )));
            }
            transform(&ctx, &values)
        })
        .collect()
}

fn transform(ctx: &GmlContext, tuple: &[f64]) -> Result<Coord, GeometryError> {
    let (x, y) = ctx.crs.to_wgs84(tuple[0], tuple[1])?;
    Ok(Coord {
        x,
        y,
        z: tuple.get(2).copied(),
    })
}

/// `Point`: exactly one `pos` (or GML 2 `coordinates`) child.
fn point(node: &XmlElement, ctx: &GmlContext) -> Result<Coord, GeometryError> {
    let ctx = ctx.descend(node)?;
    let leaves: Vec<&XmlElement> = node
        .children
        .iter()
        .filter(|c| c.name == "pos" || c.name == "coordinates")
        .collect();

    if leaves.len() != 1 {
        return Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "exactly one <pos>".to_string(),
            found: leaves.len(),
        });
    }

    let leaf = leaves[0];
    let mut coords = if leaf.name == "pos" {
        positions(leaf, &ctx)?
    } else {
        coordinates(leaf, &ctx)?
    };

    if coords.len() != 1 {
        return Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "exactly one position".to_string(),
            found: coords.len(),
        });
    }
    Ok(coords.remove(0))
}

/// `LinearRing` / `LineString` / line segments: one `posList`, or a sequence
/// of `pos`, `Point` or `pointProperty` children. Yields at least one point.
fn line(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    let ctx = ctx.descend(node)?;
    let mut points = Vec::new();

    if let Some(list) = node.child("posList") {
        points = positions(list, &ctx)?;
    } else if let Some(list) = node.child("coordinates") {
        points = coordinates(list, &ctx)?;
    } else {
        for child in &node.children {
            match child.name.as_str() {
                "pos" => points.extend(positions(child, &ctx)?),
                "Point" => points.push(point(child, &ctx)?),
                "pointProperty" | "pointRep" => {
                    let inner = ctx.descend(child)?;
                    let p = child.child("Point").ok_or_else(|| GeometryError::MissingElement {
                        parent: child.name.clone(),
                        child: "Point".to_string(),
                    })?;
                    points.push(point(p, &inner)?);
                }
                _ => {}
            }
        }
    }

    if points.is_empty() {
        return Err(GeometryError::TooFewPoints {
            element: node.name.clone(),
            required: 1,
            found: 0,
        });
    }
    Ok(points)
}

/// Appends `next` to `acc`, dropping its first point when it repeats the
/// last point already collected.
fn append_dedup(acc: &mut Vec<Coord>, next: Vec<Coord>) {
    let mut iter = next.into_iter().peekable();
    if let (Some(last), Some(first)) = (acc.last(), iter.peek()) {
        if last == first {
            iter.next();
        }
    }
    acc.extend(iter);
}

/// `Curve`: concatenation of its `segments` children.
fn curve(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    let ctx = ctx.descend(node)?;
    let segments = node
        .child("segments")
        .ok_or_else(|| GeometryError::MissingElement {
            parent: node.name.clone(),
            child: "segments".to_string(),
        })?;
    let seg_ctx = ctx.descend(segments)?;

    let mut points = Vec::new();
    for segment in &segments.children {
        append_dedup(&mut points, line(segment, &seg_ctx)?);
    }

    if points.is_empty() {
        return Err(GeometryError::TooFewPoints {
            element: node.name.clone(),
            required: 1,
            found: 0,
        });
    }
    Ok(points)
}

/// Any linear element that may appear inside a `curveMember`.
fn curve_like(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    match node.name.as_str() {
        "Curve" => curve(node, ctx),
        "OrientableCurve" => {
            let ctx = ctx.descend(node)?;
            let base = node
                .child("baseCurve")
                .ok_or_else(|| GeometryError::MissingElement {
                    parent: node.name.clone(),
                    child: "baseCurve".to_string(),
                })?;
            let inner = single_child(base)?;
            let mut points = curve_like(inner, &ctx.descend(base)?)?;
            if node.attr("orientation") == Some("-") {
                points.reverse();
            }
            Ok(points)
        }
        "CompositeCurve" => {
            let ctx = ctx.descend(node)?;
            let mut points = Vec::new();
            for member in node.children_named("curveMember") {
                let inner = single_child(member)?;
                append_dedup(&mut points, curve_like(inner, &ctx.descend(member)?)?);
            }
            Ok(points)
        }
        _ => line(node, ctx),
    }
}

fn single_child(node: &XmlElement) -> Result<&XmlElement, GeometryError> {
    match node.children.as_slice() {
        [only] => Ok(only),
        other => Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "exactly one child".to_string(),
            found: other.len(),
        }),
    }
}

/// A ring holder (`exterior`, `interior`, `outerBoundaryIs`, `innerBoundaryIs`)
/// containing a `LinearRing` or a curve-member based `Ring`. Requires ≥4 points.
fn ring(holder: &XmlElement, ctx: &GmlContext) -> Result<Vec<Coord>, GeometryError> {
    let ctx = ctx.descend(holder)?;
    let node = single_child(holder)?;

    let points = match node.name.as_str() {
        "Ring" => {
            let ring_ctx = ctx.descend(node)?;
            let mut points = Vec::new();
            for member in node.children_named("curveMember") {
                let inner = single_child(member)?;
                append_dedup(&mut points, curve_like(inner, &ring_ctx.descend(member)?)?);
            }
            points
        }
        _ => line(node, &ctx)?,
    };

    if points.len() < 4 {
        return Err(GeometryError::TooFewPoints {
            element: node.name.clone(),
            required: 4,
            found: points.len(),
        });
    }
    Ok(points)
}

/// `Polygon` / `Rectangle` / `PolygonPatch`: one exterior, zero or more interiors.
fn polygon(node: &XmlElement, ctx: &GmlContext) -> Result<Polygon, GeometryError> {
    let ctx = ctx.descend(node)?;
    let exteriors: Vec<&XmlElement> = node
        .children
        .iter()
        .filter(|c| c.name == "exterior" || c.name == "outerBoundaryIs")
        .collect();

    if exteriors.len() != 1 {
        return Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "exactly one exterior ring".to_string(),
            found: exteriors.len(),
        });
    }

    let exterior = ring(exteriors[0], &ctx)?;
    let interiors = node
        .children
        .iter()
        .filter(|c| c.name == "interior" || c.name == "innerBoundaryIs")
        .map(|holder| ring(holder, &ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Polygon {
        exterior,
        interiors,
    })
}

/// `Surface`: one or more patches.
fn surface(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Polygon>, GeometryError> {
    let ctx = ctx.descend(node)?;
    let patches = node
        .children
        .iter()
        .find(|c| matches!(c.name.as_str(), "patches" | "polygonPatches"))
        .ok_or_else(|| GeometryError::MissingElement {
            parent: node.name.clone(),
            child: "patches".to_string(),
        })?;
    let patch_ctx = ctx.descend(patches)?;

    let polygons = patches
        .children
        .iter()
        .filter(|c| matches!(c.name.as_str(), "PolygonPatch" | "Rectangle" | "Triangle"))
        .map(|patch| polygon(patch, &patch_ctx))
        .collect::<Result<Vec<_>, _>>()?;

    if polygons.is_empty() {
        return Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "at least one patch".to_string(),
            found: 0,
        });
    }
    Ok(polygons)
}

/// `MultiSurface` / `CompositeSurface` / GML 2 `MultiPolygon`: recursively
/// aggregates `Surface` and `Polygon` members.
fn multi_surface(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Polygon>, GeometryError> {
    let ctx = ctx.descend(node)?;
    let mut polygons = Vec::new();

    for member in &node.children {
        match member.name.as_str() {
            "surfaceMember" | "surfaceMembers" | "polygonMember" | "polygonMembers" => {
                let member_ctx = ctx.descend(member)?;
                for inner in &member.children {
                    polygons.extend(surface_member(inner, &member_ctx)?);
                }
            }
            _ => {}
        }
    }

    if polygons.is_empty() {
        return Err(GeometryError::WrongChildCount {
            element: node.name.clone(),
            expected: "at least one polygon member".to_string(),
            found: 0,
        });
    }
    Ok(polygons)
}

fn surface_member(node: &XmlElement, ctx: &GmlContext) -> Result<Vec<Polygon>, GeometryError> {
    match node.name.as_str() {
        "Polygon" | "Rectangle" => Ok(vec![polygon(node, ctx)?]),
        "Surface" => surface(node, ctx),
        "MultiSurface" | "CompositeSurface" | "MultiPolygon" => multi_surface(node, ctx),
        "OrientableSurface" => {
            let ctx = ctx.descend(node)?;
            let base = node
                .child("baseSurface")
                .ok_or_else(|| GeometryError::MissingElement {
                    parent: node.name.clone(),
                    child: "baseSurface".to_string(),
                })?;
            surface_member(single_child(base)?, &ctx.descend(base)?)
        }
        _ => Ok(Vec::new()),
    }
}

/// `Envelope` with `lowerCorner`/`upperCorner` (or two `pos` children).
///
/// A projected box is not axis-aligned once in WGS84, so all four corners are
/// transformed and the result is their bounding box.
fn envelope(node: &XmlElement, ctx: &GmlContext) -> Result<Geometry, GeometryError> {
    let ctx = ctx.descend(node)?;

    let corner = |name: &str| -> Result<(GmlContext, Vec<f64>), GeometryError> {
        let leaf = node.child(name).ok_or_else(|| GeometryError::MissingElement {
            parent: node.name.clone(),
            child: name.to_string(),
        })?;
        let (leaf_ctx, mut tuples) = source_positions(leaf, &ctx)?;
        if tuples.len() != 1 {
            return Err(GeometryError::WrongChildCount {
                element: name.to_string(),
                expected: "exactly one position".to_string(),
                found: tuples.len(),
            });
        }
        Ok((leaf_ctx, tuples.remove(0)))
    };

    let (corner_ctx, lower, upper) = if node.child("lowerCorner").is_some() {
        let (corner_ctx, lower) = corner("lowerCorner")?;
        let (_, upper) = corner("upperCorner")?;
        (corner_ctx, lower, upper)
    } else {
        let mut tuples = Vec::new();
        let mut corner_ctx = ctx;
        for pos in node.children_named("pos") {
            let (leaf_ctx, leaf_tuples) = source_positions(pos, &ctx)?;
            corner_ctx = leaf_ctx;
            tuples.extend(leaf_tuples);
        }
        if tuples.len() != 2 {
            return Err(GeometryError::WrongChildCount {
                element: node.name.clone(),
                expected: "two corners".to_string(),
                found: tuples.len(),
            });
        }
        let upper = tuples.remove(1);
        (corner_ctx, tuples.remove(0), upper)
    };

    let mut min = Coord::new(f64::INFINITY, f64::INFINITY);
    let mut max = Coord::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (first, second) in [
        (lower[0], lower[1]),
        (lower[0], upper[1]),
        (upper[0], lower[1]),
        (upper[0], upper[1]),
    ] {
        let c = transform(&corner_ctx, &[first, second])?;
        min = Coord::new(min.x.min(c.x), min.y.min(c.y));
        max = Coord::new(max.x.max(c.x), max.y.max(c.y));
    }

    Ok(Geometry::Envelope { min, max })
}
