//! Canonical geometry model, GML parsing and CRS transformation.
//!
//! All geometries produced here are expressed in WGS84 longitude/latitude
//! ([`crs::TARGET_CRS`]). Parsing is pure: the same element tree and options
//! always yield the same geometry, and nothing is cached across calls.

pub mod crs;
pub mod geojson;
pub mod gml;
pub mod ops;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crs::{Crs, TARGET_CRS};
pub use gml::{GmlContext, ParseOptions, parse};

/// Errors raised while parsing or transforming a geometry.
///
/// These are record-level: the mapper that requested the geometry decides on
/// a fallback (usually the bounding box); the parser never substitutes one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// An element had a different number of relevant children than allowed.
    #[error("<{element}> expects {expected}, found {found}")]
    WrongChildCount {
        element: String,
        expected: String,
        found: usize,
    },

    /// A point list was shorter than the element requires.
    #[error("<{element}> requires at least {required} points, found {found}")]
    TooFewPoints {
        element: String,
        required: usize,
        found: usize,
    },

    /// A coordinate token or tuple could not be used.
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// The coordinate reference system is not supported.
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// A required child element is absent.
    #[error("<{parent}> has no <{child}>")]
    MissingElement { parent: String, child: String },

    /// A GeoJSON value could not be interpreted.
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),
}

/// A single position, longitude/latitude in degrees with optional height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }
}

/// A polygon with one exterior ring and any number of holes.
///
/// Rings are closed (first point equals last point).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    #[serde(default)]
    pub interiors: Vec<Vec<Coord>>,
}

/// Canonical geometry in the target CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
    /// Axis-aligned box given by its lower-left and upper-right corners.
    Envelope { min: Coord, max: Coord },
}

impl Geometry {
    /// Returns the geometry type name as used in GeoJSON (envelopes export as polygons).
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) | Geometry::Envelope { .. } => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Iterates over every vertex of the geometry, ring closing points included.
    pub fn coords(&self) -> Box<dyn Iterator<Item = &Coord> + '_> {
        match self {
            Geometry::Point(c) => Box::new(std::iter::once(c)),
            Geometry::LineString(points) => Box::new(points.iter()),
            Geometry::Polygon(p) => Box::new(polygon_coords(p)),
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flat_map(polygon_coords)),
            Geometry::Envelope { min, max } => Box::new([min, max].into_iter()),
        }
    }
}

fn polygon_coords(p: &Polygon) -> impl Iterator<Item = &Coord> {
    p.exterior.iter().chain(p.interiors.iter().flatten())
}

/// Spatial information attached to a canonical document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryInformation {
    /// The geometry in the target CRS.
    pub geometry: Geometry,
    pub centroid: Coord,
    /// Always a [`Geometry::Envelope`].
    pub bounding_box: Geometry,
    /// Name of the CRS the source geometry was expressed in.
    pub crs_used: String,
}

impl GeometryInformation {
    /// Derives bounding box and centroid for an already transformed geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::TooFewPoints`] when the geometry has no vertices.
    pub fn from_geometry(
        geometry: Geometry,
        crs_used: impl Into<String>,
    ) -> Result<Self, GeometryError> {
        let empty = || GeometryError::TooFewPoints {
            element: geometry.type_name().to_string(),
            required: 1,
            found: 0,
        };
        let bounding_box = ops::bounding_box(&geometry).ok_or_else(empty)?;
        let centroid = ops::centroid(&geometry).ok_or_else(empty)?;

        Ok(Self {
            geometry,
            centroid,
            bounding_box,
            crs_used: crs_used.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_information_from_polygon() {
        let polygon = Geometry::Polygon(Polygon {
            exterior: vec![
                Coord::new(0.0, 0.0),
                Coord::new(4.0, 0.0),
                Coord::new(4.0, 2.0),
                Coord::new(0.0, 2.0),
                Coord::new(0.0, 0.0),
            ],
            interiors: vec![],
        });

        let info = GeometryInformation::from_geometry(polygon, "EPSG:25832").unwrap();
        assert_eq!(info.centroid, Coord::new(2.0, 1.0));
        assert_eq!(
            info.bounding_box,
            Geometry::Envelope {
                min: Coord::new(0.0, 0.0),
                max: Coord::new(4.0, 2.0),
            }
        );
        assert_eq!(info.crs_used, "EPSG:25832");
    }

    #[test]
    fn test_geometry_information_rejects_empty() {
        let err = GeometryInformation::from_geometry(Geometry::LineString(vec![]), TARGET_CRS)
            .unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPoints { found: 0, .. }));
    }

    #[test]
    fn test_geometry_serde_shape() {
        let json = serde_json::to_value(Geometry::Point(Coord::new(1.0, 2.0))).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"]["x"], 1.0);

        let back: Geometry = serde_json::from_value(json).unwrap();
        assert_eq!(back, Geometry::Point(Coord::new(1.0, 2.0)));
    }
}
