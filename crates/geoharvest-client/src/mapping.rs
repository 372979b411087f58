//! Field helpers shared by the protocol mappers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geoharvest_core::Codelists;

/// Parses the timestamp shapes catalogs publish: RFC 3339, naive ISO
/// date-times (assumed UTC) and plain dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Resolves a license id or URI to its title, keeping unknown values as given.
pub fn resolve_license(codelists: &Codelists, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(
        codelists
            .license_title(raw)
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string()),
    )
}

/// Returns the trimmed value, or `None` if it is blank.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
