//! Configuration types for geoharvest components.
//!
//! Defaults are hardcoded and can be overridden from the environment
//! (`HARVEST_CONCURRENCY`, `HARVEST_PAGE_SIZE`, `HTTP_TIMEOUT_SECS`,
//! `HTTP_MAX_RETRIES`) or per source in `sources.toml`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// HTTP client configuration for source requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            user_agent: format!("geoharvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Defaults overridden by `HTTP_TIMEOUT_SECS` and `HTTP_MAX_RETRIES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(retries) = env_parse::<u32>("HTTP_MAX_RETRIES") {
            config.max_retries = retries;
        }
        config
    }
}

/// Crawl configuration shared by every job of one process.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Number of resources crawled in parallel.
    pub concurrency: usize,
    /// Records requested per page.
    pub page_size: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            page_size: 100,
        }
    }
}

impl HarvestConfig {
    /// Defaults overridden by `HARVEST_CONCURRENCY` and `HARVEST_PAGE_SIZE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("HARVEST_CONCURRENCY") {
            config = config.with_concurrency(n);
        }
        if let Some(n) = env_parse::<usize>("HARVEST_PAGE_SIZE") {
            config = config.with_page_size(n);
        }
        config
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = raw.as_str(), "Ignoring unparsable environment value");
            None
        }
    }
}

// =============================================================================
// Source Configuration (sources.toml)
// =============================================================================

/// Harvest protocol of a source.
///
/// Determines which protocol client is built for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// CKAN action API (default).
    #[default]
    Ckan,
    /// OGC Catalogue Service for the Web 2.0.2.
    Csw,
    /// OGC Web Feature Service 2.0.0.
    Wfs,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ckan => write!(f, "ckan"),
            Self::Csw => write!(f, "csw"),
            Self::Wfs => write!(f, "wfs"),
        }
    }
}

impl FromStr for ProtocolType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ckan" => Ok(Self::Ckan),
            "csw" => Ok(Self::Csw),
            "wfs" => Ok(Self::Wfs),
            _ => Err(AppError::ConfigError(format!(
                "Unknown protocol type: '{}'. Valid options: ckan, csw, wfs",
                s
            ))),
        }
    }
}

/// Default enabled status when not specified in configuration.
fn default_enabled() -> bool {
    true
}

/// Root configuration structure for sources.toml.
///
/// # Example
///
/// ```toml
/// [[catalogs]]
/// id = "geoportal"
/// title = "State geoportal"
///
/// [[sources]]
/// name = "roads-wfs"
/// url = "https://geo.example.org/wfs"
/// type = "wfs"
/// catalog_id = "geoportal"
/// source_kind = "registry"
/// deny = ["test-*"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Catalogs that harvested entities can be stamped with.
    #[serde(default)]
    pub catalogs: Vec<CatalogEntry>,
    /// Array of source configurations.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl SourcesConfig {
    /// Returns only enabled sources.
    ///
    /// Sources with `enabled = false` are excluded from batch harvesting.
    pub fn enabled_sources(&self) -> Vec<&SourceEntry> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Find a source by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// A catalog definition in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub publisher: Option<String>,
}

/// A single source entry in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Human-readable source name, used for `--source <name>` lookup and logging.
    pub name: String,

    /// Service endpoint URL.
    pub url: String,

    /// Protocol: ckan, csw, or wfs. Defaults to `ckan`.
    #[serde(rename = "type", default)]
    pub protocol: ProtocolType,

    /// Whether this source is enabled for batch harvesting. Defaults to `true`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub description: Option<String>,

    /// Catalog stamped on every harvested entity. Defaults to the source name.
    pub catalog_id: Option<String>,

    /// Source kind used to rank duplicates (`registry`, `catalog`, `seed`, ...).
    pub source_kind: Option<String>,

    pub page_size: Option<usize>,

    pub max_concurrent: Option<usize>,

    /// Glob patterns an identifier must match (when non-empty).
    #[serde(default)]
    pub allow: Vec<String>,

    /// Glob patterns that reject an identifier. Deny wins over allow.
    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub dry_run: bool,

    /// Preferred language for multilingual fields. Defaults to `"en"`.
    pub language: Option<String>,

    /// CRS assumed for geometries without `srsName`.
    pub crs: Option<String>,

    /// Protocol-specific record filter (CKAN `fq`).
    pub filter: Option<String>,

    pub username: Option<String>,

    pub password: Option<String>,

    pub proxy: Option<String>,
}

impl SourceEntry {
    /// Returns the preferred language, defaulting to `"en"`.
    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en")
    }

    /// Returns the catalog id, defaulting to the source name.
    pub fn catalog_id(&self) -> &str {
        self.catalog_id.as_deref().unwrap_or(&self.name)
    }

    /// Returns the source kind, defaulting to `"catalog"`.
    pub fn source_kind(&self) -> &str {
        self.source_kind.as_deref().unwrap_or("catalog")
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "sources.toml";

/// Returns the default configuration directory path: `~/.config/geoharvest/`
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("geoharvest"))
}

/// Returns the default configuration file path: `~/.config/geoharvest/sources.toml`
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# geoharvest source configuration
#
# Usage:
#   geoharvest harvest                    # Harvest all enabled sources
#   geoharvest harvest --source govdata   # Harvest one source by name
#   geoharvest harvest https://...        # Harvest a single URL (ignores this file)
#
# type = "ckan" | "csw" | "wfs"
# source_kind ranks duplicates during reconcile: registry > catalog > seed
# allow/deny take glob patterns over record identifiers; deny wins.

[[catalogs]]
id = "govdata"
title = "GovData"

[[sources]]
name = "govdata"
url = "https://www.govdata.de/ckan"
type = "ckan"
catalog_id = "govdata"
source_kind = "catalog"
description = "German federal open data portal"
enabled = false
"#;

/// Load source configuration from a TOML file.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No configuration file found at the default path
/// * `Err(e)` - Configuration file exists but is invalid, or a custom path is missing
///
/// If no configuration file exists at the default path, a template file is
/// created so users have something to edit.
pub fn load_sources_config(path: Option<PathBuf>) -> Result<Option<SourcesConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: SourcesConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
