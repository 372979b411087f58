//! OGC Web Services helpers shared by the CSW and WFS clients.

use geoharvest_core::error::AppError;
use geoharvest_core::geometry::{Coord, Crs, Geometry, GeometryError};
use geoharvest_core::xml::XmlElement;

/// Text of an OWS `ExceptionReport`, joined over all exceptions.
pub fn exception_message(root: &XmlElement) -> String {
    let mut texts = Vec::new();
    root.find_all("ExceptionText", &mut texts);
    let message = texts
        .iter()
        .map(|t| t.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if message.is_empty() {
        "root element is ExceptionReport".to_string()
    } else {
        format!("ExceptionReport: {message}")
    }
}

/// Checks the root of a capabilities document.
///
/// # Errors
///
/// Returns `AppError::CapabilitiesError` when the root is an exception report
/// or any element other than `expected`.
pub fn expect_capabilities(root: &XmlElement, expected: &str) -> Result<(), AppError> {
    if root.name == "ExceptionReport" {
        return Err(AppError::CapabilitiesError(exception_message(root)));
    }
    if root.name != expected {
        return Err(AppError::CapabilitiesError(format!(
            "expected <{expected}>, found <{}>",
            root.name
        )));
    }
    Ok(())
}

/// Checks the root of a response page. Exception reports become client errors
/// so they count against the resource, not the job.
pub fn expect_response(root: &XmlElement, expected: &str) -> Result<(), AppError> {
    if root.name == "ExceptionReport" {
        return Err(AppError::ClientError(exception_message(root)));
    }
    if root.name != expected {
        return Err(AppError::XmlError(format!(
            "expected <{expected}>, found <{}>",
            root.name
        )));
    }
    Ok(())
}

/// Reads an `ows:BoundingBox` or `ows:WGS84BoundingBox` into a WGS84 envelope.
///
/// The corners are given in the axis order of the box's `crs` attribute; a
/// `WGS84BoundingBox`, or a box without `crs`, is longitude/latitude.
pub fn bounding_box(element: &XmlElement) -> Result<Geometry, GeometryError> {
    let crs = match element.attr("crs") {
        Some(name) if element.name != "WGS84BoundingBox" => Crs::from_name(name)?,
        _ => Crs::default(),
    };

    let corner = |name: &str| -> Result<(f64, f64), GeometryError> {
        let text = element
            .child_text(name)
            .ok_or_else(|| GeometryError::MissingElement {
                parent: element.name.clone(),
                child: name.to_string(),
            })?;
        let values = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| GeometryError::InvalidCoordinate(token.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            [first, second] => crs.to_wgs84(*first, *second),
            _ => Err(GeometryError::InvalidCoordinate(format!(
                "<{name}> needs two values, found '{text}'"
            ))),
        }
    };

    let (x1, y1) = corner("LowerCorner")?;
    let (x2, y2) = corner("UpperCorner")?;
    Ok(Geometry::Envelope {
        min: Coord::new(x1.min(x2), y1.min(y2)),
        max: Coord::new(x1.max(x2), y1.max(y2)),
    })
}
