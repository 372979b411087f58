//! Reference tables used by mappers.
//!
//! [`Codelists`] is built once at process start and handed to mappers behind
//! an `Arc`; it is never mutated afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Update frequency of a dataset.
///
/// Codes from DCAT-AP frequency URIs, ISO 19115 `MD_MaintenanceFrequencyCode`
/// and free-text CKAN values all map here. Anything unrecognized becomes
/// [`Periodicity::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    Continuous,
    Daily,
    Weekly,
    Fortnightly,
    Monthly,
    Quarterly,
    Biannually,
    Annually,
    Irregular,
    AsNeeded,
    NotPlanned,
    #[default]
    Unknown,
}

impl Periodicity {
    /// Maps a source code to a periodicity. Matching ignores case and a
    /// leading URI path.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        let code = code.rsplit(['/', '#']).next().unwrap_or(code);
        match code.to_ascii_lowercase().as_str() {
            "continual" | "continuous" | "cont" | "update_cont" => Periodicity::Continuous,
            "daily" | "daily_2" => Periodicity::Daily,
            "weekly" => Periodicity::Weekly,
            "fortnightly" | "biweekly" => Periodicity::Fortnightly,
            "monthly" => Periodicity::Monthly,
            "quarterly" => Periodicity::Quarterly,
            "biannually" | "annual_2" | "semiannual" => Periodicity::Biannually,
            "annually" | "annual" | "yearly" => Periodicity::Annually,
            "irregular" | "irreg" => Periodicity::Irregular,
            "asneeded" | "as_needed" => Periodicity::AsNeeded,
            "notplanned" | "not_planned" | "never" => Periodicity::NotPlanned,
            _ => Periodicity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Continuous => "continuous",
            Periodicity::Daily => "daily",
            Periodicity::Weekly => "weekly",
            Periodicity::Fortnightly => "fortnightly",
            Periodicity::Monthly => "monthly",
            Periodicity::Quarterly => "quarterly",
            Periodicity::Biannually => "biannually",
            Periodicity::Annually => "annually",
            Periodicity::Irregular => "irregular",
            Periodicity::AsNeeded => "as_needed",
            Periodicity::NotPlanned => "not_planned",
            Periodicity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable lookup tables shared by all mappers of a process.
#[derive(Debug, Clone, Default)]
pub struct Codelists {
    licenses: HashMap<String, String>,
}

impl Codelists {
    /// Builds the standard tables.
    pub fn new() -> Self {
        let licenses = [
            ("cc-by-4.0", "Creative Commons Attribution 4.0 International"),
            ("cc-by-sa-4.0", "Creative Commons Attribution-ShareAlike 4.0 International"),
            ("cc-by-nd-4.0", "Creative Commons Attribution-NoDerivatives 4.0 International"),
            ("cc-zero", "Creative Commons Zero 1.0 Universal"),
            ("cc0-1.0", "Creative Commons Zero 1.0 Universal"),
            ("odc-odbl", "Open Data Commons Open Database License"),
            ("odc-by", "Open Data Commons Attribution License"),
            ("dl-de-by-2.0", "Datenlizenz Deutschland Namensnennung 2.0"),
            ("dl-de-zero-2.0", "Datenlizenz Deutschland Zero 2.0"),
            ("iodl-2.0", "Italian Open Data License 2.0"),
            ("ogl-uk-3.0", "Open Government Licence v3.0"),
            ("other-closed", "Other (not open)"),
        ]
        .into_iter()
        .map(|(id, title)| (id.to_string(), title.to_string()))
        .collect();

        Self { licenses }
    }

    /// Adds or replaces a license entry, for deployment-specific tables.
    pub fn with_license(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        self.licenses.insert(normalize(&id.into()), title.into());
        self
    }

    /// Resolves a license id to its title. Matching ignores case and a
    /// leading URI path; unknown ids return `None`.
    pub fn license_title(&self, id: &str) -> Option<&str> {
        self.licenses.get(&normalize(id)).map(String::as_str)
    }
}

fn normalize(id: &str) -> String {
    let id = id.trim().trim_end_matches('/');
    id.rsplit('/').next().unwrap_or(id).to_ascii_lowercase()
}
