//! Coordinate reference systems and their transformation to WGS84.
//!
//! Every coordinate parsed from a source document is pushed through
//! [`Crs::to_wgs84`] as soon as it is read, so canonical geometries are always
//! longitude/latitude in `EPSG:4326` regardless of what the source used.
//!
//! Supported families:
//!
//! - geographic WGS84 and ETRS89 (identity up to axis order)
//! - Web Mercator (spherical inverse)
//! - UTM on GRS80 (ETRS89) and WGS84 (inverse Transverse Mercator series)
//! - Gauss-Krüger zones 2 to 5 on DHDN/Bessel, followed by a 7-parameter
//!   Helmert shift to WGS84
//!
//! Axis order follows the usual GML convention: short `EPSG:xxxx` names are
//! read easting/longitude first, URN and `/def/crs/` URI forms use the axis
//! order declared by the EPSG registry (latitude first for geographic systems,
//! northing first for Gauss-Krüger).

use std::f64::consts::PI;
use std::fmt;

use super::GeometryError;

/// The canonical target CRS name.
pub const TARGET_CRS: &str = "EPSG:4326";

/// Reference ellipsoid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in metres.
    pub a: f64,
    /// Flattening.
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_222_101,
    };
    pub const BESSEL: Ellipsoid = Ellipsoid {
        a: 6_377_397.155,
        f: 1.0 / 299.152_812_8,
    };

    fn e2(&self) -> f64 {
        self.f * (2.0 - self.f)
    }
}

/// Order in which a source document lists the two horizontal axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    /// Longitude/easting first.
    EastNorth,
    /// Latitude/northing first.
    NorthEast,
}

/// A supported source coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    /// WGS84 geographic (`EPSG:4326`, `CRS:84`).
    Wgs84 { axis: AxisOrder },
    /// ETRS89 geographic (`EPSG:4258`). Treated as identical to WGS84.
    Etrs89 { axis: AxisOrder },
    /// Spherical Web Mercator (`EPSG:3857`, `EPSG:900913`).
    WebMercator,
    /// Universal Transverse Mercator.
    Utm {
        code: u32,
        zone: u8,
        north: bool,
        ellipsoid: Ellipsoid,
    },
    /// Gauss-Krüger on DHDN (`EPSG:31466` to `EPSG:31469`).
    GaussKrueger { code: u32, zone: u8, axis: AxisOrder },
}

impl Default for Crs {
    fn default() -> Self {
        Crs::Wgs84 {
            axis: AxisOrder::EastNorth,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg_code())
    }
}

impl Crs {
    /// Resolves a CRS from any of the naming forms used in GML `srsName`
    /// attributes and capability documents.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] for names that cannot be
    /// parsed or codes outside the supported set.
    pub fn from_name(name: &str) -> Result<Crs, GeometryError> {
        let trimmed = name.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower == "crs:84" || lower.ends_with(":crs84") || lower.ends_with("/crs84") {
            return Ok(Crs::Wgs84 {
                axis: AxisOrder::EastNorth,
            });
        }

        let (code, registry_order) = if let Some(rest) = lower.strip_prefix("epsg:") {
            (rest.to_string(), false)
        } else if lower.starts_with("urn:") {
            let last = lower.rsplit(':').next().unwrap_or_default();
            (last.to_string(), true)
        } else if lower.contains("/def/crs/epsg/") {
            let last = lower.rsplit('/').next().unwrap_or_default();
            (last.to_string(), true)
        } else if let Some((_, rest)) = lower.split_once("epsg.xml#") {
            (rest.to_string(), false)
        } else {
            return Err(GeometryError::UnsupportedCrs(trimmed.to_string()));
        };

        let code: u32 = code
            .parse()
            .map_err(|_| GeometryError::UnsupportedCrs(trimmed.to_string()))?;

        Self::from_epsg(code, registry_order)
            .ok_or_else(|| GeometryError::UnsupportedCrs(trimmed.to_string()))
    }

    /// Maps an EPSG code to a CRS. `registry_order` selects the axis order
    /// declared by the EPSG registry instead of the easting-first convention.
    pub fn from_epsg(code: u32, registry_order: bool) -> Option<Crs> {
        let geographic_axis = if registry_order {
            AxisOrder::NorthEast
        } else {
            AxisOrder::EastNorth
        };

        match code {
            4326 => Some(Crs::Wgs84 {
                axis: geographic_axis,
            }),
            4258 => Some(Crs::Etrs89 {
                axis: geographic_axis,
            }),
            3857 | 900913 => Some(Crs::WebMercator),
            25828..=25838 => Some(Crs::Utm {
                code,
                zone: (code - 25800) as u8,
                north: true,
                ellipsoid: Ellipsoid::GRS80,
            }),
            32601..=32660 => Some(Crs::Utm {
                code,
                zone: (code - 32600) as u8,
                north: true,
                ellipsoid: Ellipsoid::WGS84,
            }),
            32701..=32760 => Some(Crs::Utm {
                code,
                zone: (code - 32700) as u8,
                north: false,
                ellipsoid: Ellipsoid::WGS84,
            }),
            31466..=31469 => Some(Crs::GaussKrueger {
                code,
                zone: (code - 31464) as u8,
                axis: geographic_axis,
            }),
            _ => None,
        }
    }

    /// The EPSG code of this CRS.
    pub fn epsg_code(&self) -> u32 {
        match self {
            Crs::Wgs84 { .. } => 4326,
            Crs::Etrs89 { .. } => 4258,
            Crs::WebMercator => 3857,
            Crs::Utm { code, .. } | Crs::GaussKrueger { code, .. } => *code,
        }
    }

    /// Transforms one coordinate pair, given in document axis order, into
    /// WGS84 `(longitude, latitude)` degrees.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidCoordinate`] when the input is not
    /// finite or the result falls outside the valid longitude/latitude range.
    pub fn to_wgs84(&self, first: f64, second: f64) -> Result<(f64, f64), GeometryError> {
        if !first.is_finite() || !second.is_finite() {
            return Err(GeometryError::InvalidCoordinate(format!(
                "non-finite coordinate ({first}, {second})"
            )));
        }

        let (lon, lat) = match *self {
            Crs::Wgs84 { axis } | Crs::Etrs89 { axis } => match axis {
                AxisOrder::EastNorth => (first, second),
                AxisOrder::NorthEast => (second, first),
            },
            Crs::WebMercator => web_mercator_inverse(first, second),
            Crs::Utm {
                zone,
                north,
                ellipsoid,
                ..
            } => {
                let lon0 = f64::from(zone) * 6.0 - 183.0;
                let false_northing = if north { 0.0 } else { 10_000_000.0 };
                transverse_mercator_inverse(
                    first,
                    second,
                    &ellipsoid,
                    lon0,
                    0.9996,
                    500_000.0,
                    false_northing,
                )
            }
            Crs::GaussKrueger { zone, axis, .. } => {
                let (easting, northing) = match axis {
                    AxisOrder::EastNorth => (first, second),
                    AxisOrder::NorthEast => (second, first),
                };
                let lon0 = f64::from(zone) * 3.0;
                let false_easting = f64::from(zone) * 1_000_000.0 + 500_000.0;
                let (lon, lat) = transverse_mercator_inverse(
                    easting,
                    northing,
                    &Ellipsoid::BESSEL,
                    lon0,
                    1.0,
                    false_easting,
                    0.0,
                );
                dhdn_to_wgs84(lon, lat)
            }
        };

        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) || lon.is_nan() {
            return Err(GeometryError::InvalidCoordinate(format!(
                "({first}, {second}) in {self} is outside the valid range"
            )));
        }

        Ok((lon, lat))
    }
}

fn web_mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    const R: f64 = 6_378_137.0;
    let lon = (x / R).to_degrees();
    let lat = (2.0 * (y / R).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Inverse Transverse Mercator projection (Snyder, USGS PP 1395, eq. 8-18ff).
///
/// Returns `(longitude, latitude)` in degrees on the given ellipsoid.
#[allow(clippy::too_many_arguments)]
fn transverse_mercator_inverse(
    easting: f64,
    northing: f64,
    ellipsoid: &Ellipsoid,
    lon0_deg: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
) -> (f64, f64) {
    let a = ellipsoid.a;
    let e2 = ellipsoid.e2();
    let ep2 = e2 / (1.0 - e2);

    let m = (northing - false_northing) / k0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));

    let sqrt_1_e2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let w = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = a / w.sqrt();
    let r1 = a * (1.0 - e2) / w.powf(1.5);
    let d = (easting - false_easting) / (n1 * k0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos_phi1;

    (lon0_deg + lon.to_degrees(), lat.to_degrees())
}

/// DHDN to WGS84 Helmert parameters (EPSG:1777, coordinate frame rotation).
const DHDN_HELMERT: Helmert = Helmert {
    tx: 598.1,
    ty: 73.7,
    tz: 418.2,
    rx_arcsec: 0.202,
    ry_arcsec: 0.045,
    rz_arcsec: -2.455,
    scale_ppm: 6.7,
};

struct Helmert {
    tx: f64,
    ty: f64,
    tz: f64,
    rx_arcsec: f64,
    ry_arcsec: f64,
    rz_arcsec: f64,
    scale_ppm: f64,
}

impl Helmert {
    fn apply(&self, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
        let arcsec = PI / (180.0 * 3600.0);
        let rx = self.rx_arcsec * arcsec;
        let ry = self.ry_arcsec * arcsec;
        let rz = self.rz_arcsec * arcsec;
        let m = 1.0 + self.scale_ppm * 1e-6;

        (
            self.tx + m * (x + rz * y - ry * z),
            self.ty + m * (-rz * x + y + rx * z),
            self.tz + m * (ry * x - rx * y + z),
        )
    }
}

fn dhdn_to_wgs84(lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let (x, y, z) = geodetic_to_cartesian(lon_deg, lat_deg, &Ellipsoid::BESSEL);
    let (x, y, z) = DHDN_HELMERT.apply(x, y, z);
    cartesian_to_geodetic(x, y, z, &Ellipsoid::WGS84)
}

fn geodetic_to_cartesian(lon_deg: f64, lat_deg: f64, ellipsoid: &Ellipsoid) -> (f64, f64, f64) {
    let e2 = ellipsoid.e2();
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let n = ellipsoid.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();

    (
        n * lat.cos() * lon.cos(),
        n * lat.cos() * lon.sin(),
        n * (1.0 - e2) * lat.sin(),
    )
}

fn cartesian_to_geodetic(x: f64, y: f64, z: f64, ellipsoid: &Ellipsoid) -> (f64, f64) {
    let e2 = ellipsoid.e2();
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let n = ellipsoid.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let h = p / lat.cos() - n;
        let next = z.atan2(p * (1.0 - e2 * n / (n + h)));
        if (next - lat).abs() < 1e-12 {
            lat = next;
            break;
        }
        lat = next;
    }

    (lon.to_degrees(), lat.to_degrees())
}
