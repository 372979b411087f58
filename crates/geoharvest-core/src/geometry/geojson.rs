//! GeoJSON import and export for canonical geometries.
//!
//! Catalog APIs such as CKAN embed dataset extents as GeoJSON strings. Those
//! are already WGS84 longitude/latitude, so import only validates and rewinds.

use serde_json::{Value, json};

use super::ops::normalize_winding;
use super::{Coord, Geometry, GeometryError, Polygon};

/// Converts a canonical geometry to a GeoJSON geometry object.
///
/// Envelopes are exported as closed rectangular polygons.
pub fn to_geojson(geometry: &Geometry) -> Value {
    match geometry {
        Geometry::Point(c) => json!({ "type": "Point", "coordinates": position(c) }),
        Geometry::LineString(points) => json!({
            "type": "LineString",
            "coordinates": points.iter().map(position).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_rings(p) }),
        Geometry::MultiPolygon(polys) => json!({
            "type": "MultiPolygon",
            "coordinates": polys.iter().map(polygon_rings).collect::<Vec<_>>(),
        }),
        Geometry::Envelope { min, max } => {
            let ring = [
                (min.x, min.y),
                (max.x, min.y),
                (max.x, max.y),
                (min.x, max.y),
                (min.x, min.y),
            ];
            json!({
                "type": "Polygon",
                "coordinates": [ring.iter().map(|&(x, y)| json!([x, y])).collect::<Vec<_>>()],
            })
        }
    }
}

fn position(c: &Coord) -> Value {
    match c.z {
        Some(z) => json!([c.x, c.y, z]),
        None => json!([c.x, c.y]),
    }
}

fn polygon_rings(p: &Polygon) -> Vec<Vec<Value>> {
    std::iter::once(&p.exterior)
        .chain(p.interiors.iter())
        .map(|ring| ring.iter().map(position).collect())
        .collect()
}

/// Parses a GeoJSON geometry object (`Point`, `LineString`, `Polygon`,
/// `MultiPolygon`) into a canonical geometry with normalized winding.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeoJson`] for unknown types or malformed
/// coordinate arrays, and [`GeometryError::TooFewPoints`] for short rings.
pub fn from_geojson(value: &Value) -> Result<Geometry, GeometryError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeometryError::InvalidGeoJson("missing \"type\"".to_string()))?;
    let coords = value
        .get("coordinates")
        .ok_or_else(|| GeometryError::InvalidGeoJson("missing \"coordinates\"".to_string()))?;

    let geometry = match kind {
        "Point" => Geometry::Point(read_position(coords)?),
        "LineString" => Geometry::LineString(read_positions(coords)?),
        "Polygon" => Geometry::Polygon(read_polygon(coords)?),
        "MultiPolygon" => Geometry::MultiPolygon(
            as_array(coords)?
                .iter()
                .map(read_polygon)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => {
            return Err(GeometryError::InvalidGeoJson(format!(
                "unsupported type \"{other}\""
            )));
        }
    };

    Ok(normalize_winding(geometry))
}

fn as_array(value: &Value) -> Result<&Vec<Value>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| GeometryError::InvalidGeoJson(format!("expected array, got {value}")))
}

fn read_position(value: &Value) -> Result<Coord, GeometryError> {
    let items = as_array(value)?;
    let number = |i: usize| {
        items
            .get(i)
            .and_then(Value::as_f64)
            .ok_or_else(|| GeometryError::InvalidCoordinate(value.to_string()))
    };
    let (x, y) = (number(0)?, number(1)?);
    if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
        return Err(GeometryError::InvalidCoordinate(value.to_string()));
    }
    Ok(Coord {
        x,
        y,
        z: items.get(2).and_then(Value::as_f64),
    })
}

fn read_positions(value: &Value) -> Result<Vec<Coord>, GeometryError> {
    as_array(value)?.iter().map(read_position).collect()
}

fn read_polygon(value: &Value) -> Result<Polygon, GeometryError> {
    let mut rings = as_array(value)?
        .iter()
        .map(|ring| {
            let points = read_positions(ring)?;
            if points.len() < 4 {
                return Err(GeometryError::TooFewPoints {
                    element: "LinearRing".to_string(),
                    required: 4,
                    found: points.len(),
                });
            }
            Ok(points)
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();

    let exterior = rings
        .next()
        .ok_or_else(|| GeometryError::InvalidGeoJson("polygon without rings".to_string()))?;

    Ok(Polygon {
        exterior,
        interiors: rings.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ops::signed_area;

    #[test]
    fn test_from_geojson_polygon_rewinds() {
        let value = json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [0, 1], [1, 1], [1, 0], [0, 0]]]
        });
        let Geometry::Polygon(p) = from_geojson(&value).unwrap() else {
            panic!("expected polygon");
        };
        assert!(signed_area(&p.exterior) > 0.0);
    }

    #[test]
    fn test_from_geojson_point_with_height() {
        let geometry = from_geojson(&json!({"type": "Point", "coordinates": [8.5, 50.1, 120.0]}))
            .unwrap();
        assert_eq!(
            geometry,
            Geometry::Point(Coord {
                x: 8.5,
                y: 50.1,
                z: Some(120.0)
            })
        );
    }

    #[test]
    fn test_from_geojson_rejects_unknown_type() {
        let err = from_geojson(&json!({"type": "GeometryCollection", "coordinates": []}))
            .unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeoJson(_)));
    }

    #[test]
    fn test_from_geojson_rejects_short_ring() {
        let err = from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [1, 1], [0, 0]]]
        }))
        .unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPoints { found: 3, .. }));
    }

    #[test]
    fn test_to_geojson_envelope_is_closed_polygon() {
        let value = to_geojson(&Geometry::Envelope {
            min: Coord::new(6.0, 47.0),
            max: Coord::new(15.0, 55.0),
        });
        assert_eq!(value["type"], "Polygon");
        let ring = value["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
    }

    #[test]
    fn test_geojson_export_then_import_multipolygon() {
        let original = from_geojson(&json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0, 0], [1, 0], [1, 1], [0, 0]]],
                [[[5, 5], [6, 5], [6, 6], [5, 5]]]
            ]
        }))
        .unwrap();
        assert_eq!(from_geojson(&to_geojson(&original)).unwrap(), original);
    }
}
