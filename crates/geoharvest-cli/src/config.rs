use clap::{Parser, Subcommand};
use geoharvest_core::ProtocolType;
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    // Use VERGEN_GIT_SHA for the commit hash (with safe slicing)
    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"); // YYYY-MM-DD
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "geoharvest")]
#[command(
    author,
    version = version_info(),
    about = "Harvester for geospatial and open data sources"
)]
#[command(after_help = "Examples:
  geoharvest harvest https://geo.example.org/wfs --protocol wfs
  geoharvest harvest --source govdata --output govdata.jsonl
  geoharvest reconcile govdata.jsonl geoportal.jsonl --output index.jsonl
  geoharvest sources

Environment:
  HARVEST_CONCURRENCY, HARVEST_PAGE_SIZE  - crawl defaults
  HTTP_TIMEOUT_SECS, HTTP_MAX_RETRIES     - request behaviour
  RUST_LOG                                - log filter (default: info)")]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest records from CKAN, CSW or WFS sources
    #[command(after_help = "Examples:
  geoharvest harvest                                    # Harvest all enabled sources from config
  geoharvest harvest https://geo.example.org/csw -p csw # Harvest a single URL
  geoharvest harvest --source govdata                   # Harvest a source by name from config
  geoharvest harvest --config ~/custom.toml             # Use custom config file
  geoharvest harvest --dry-run                          # Map records without writing them")]
    Harvest {
        /// URL of a single source to harvest
        #[arg(value_name = "URL")]
        source_url: Option<String>,

        /// Harvest a specific source by name from config file
        #[arg(short, long, value_name = "NAME", conflicts_with = "source_url")]
        source: Option<String>,

        /// Custom path to sources.toml configuration file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Protocol of the URL given on the command line
        #[arg(short, long, default_value = "ckan")]
        protocol: ProtocolType,

        /// Catalog id stamped on documents harvested from a URL
        #[arg(long, value_name = "ID", requires = "source_url")]
        catalog: Option<String>,

        /// Map records without writing them to the index
        #[arg(long)]
        dry_run: bool,

        /// JSON-lines file receiving index operations (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Merge duplicates across harvest outputs into final index operations
    #[command(after_help = "Example: geoharvest reconcile a.jsonl b.jsonl --policy merge.toml")]
    Reconcile {
        /// JSON-lines files written by `harvest`, oldest first
        #[arg(required = true, value_name = "FILE")]
        input: Vec<PathBuf>,

        /// JSON-lines file receiving the reconciled operations (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// TOML merge policy overriding the built-in source ranking
        #[arg(long, value_name = "PATH")]
        policy: Option<PathBuf>,

        /// Output of the previous reconcile, so merged documents whose id
        /// changes are deleted under their old id
        #[arg(long, value_name = "FILE")]
        previous: Option<PathBuf>,
    },
    /// List the sources of the configuration file
    Sources {
        /// Custom path to sources.toml configuration file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}
