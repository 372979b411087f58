use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use geoharvest_client::SourceClientFactoryEnum;
use geoharvest_core::dedup::dedup_key;
use geoharvest_core::{
    BatchHarvestSummary, BufferedSink, CanonicalDocument, Codelists, Deduplicator, HarvestConfig,
    HarvestJob, HarvestResult, HarvestService, HttpConfig, IndexBackend, IndexOperation,
    MappedEntity, MergePolicy, ProtocolType, SourceEntry, SourcesConfig, StaticCatalogRegistry,
    TracingReporter, build_buckets, load_sources_config,
};

mod config;
mod jsonl;

use config::{Command, Config};
use jsonl::{JsonlIndex, read_operations};

type Harvester =
    HarvestService<SourceClientFactoryEnum, BufferedSink<JsonlIndex>, StaticCatalogRegistry>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::parse();

    match config.command {
        Command::Harvest {
            source_url,
            source,
            config: config_path,
            protocol,
            catalog,
            dry_run,
            output,
        } => {
            let target = match (source_url, source) {
                (Some(url), _) => HarvestTarget::Url {
                    url,
                    protocol,
                    catalog,
                },
                (None, Some(name)) => HarvestTarget::Named(name),
                (None, None) => HarvestTarget::AllEnabled,
            };
            handle_harvest(target, config_path, dry_run, output.as_deref()).await?;
        }
        Command::Reconcile {
            input,
            output,
            policy,
            previous,
        } => {
            reconcile(&input, output.as_deref(), policy.as_deref(), previous.as_deref()).await?;
        }
        Command::Sources { config: config_path } => {
            list_sources(config_path)?;
        }
    }

    Ok(())
}

// =============================================================================
// Harvest
// =============================================================================

/// What the harvest command was asked to crawl.
enum HarvestTarget {
    /// A single URL given on the command line; the configuration is not consulted.
    Url {
        url: String,
        protocol: ProtocolType,
        catalog: Option<String>,
    },
    /// A named source from the configuration file.
    Named(String),
    /// Every enabled source of the configuration file.
    AllEnabled,
}

async fn handle_harvest(
    target: HarvestTarget,
    config_path: Option<PathBuf>,
    dry_run: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let harvest_config = HarvestConfig::from_env();
    let factory = SourceClientFactoryEnum::new(HttpConfig::from_env(), Arc::new(Codelists::new()));
    let index = JsonlIndex::open(output).context("Failed to open harvest output")?;
    let cancel_token = cancel_on_ctrl_c();
    let reporter = TracingReporter;

    match target {
        HarvestTarget::Url {
            url,
            protocol,
            catalog,
        } => {
            let name = source_name_from_url(&url);
            let catalog_id = catalog.unwrap_or_else(|| name.clone());
            let mut registry = StaticCatalogRegistry::new();
            registry.ensure(&catalog_id);

            let job = HarvestJob::new(name, protocol, url)
                .with_catalog(catalog_id)
                .with_page_size(harvest_config.page_size)
                .with_concurrency(harvest_config.concurrency)
                .with_dry_run(dry_run);

            let service = HarvestService::with_config(
                factory,
                BufferedSink::new(index),
                registry,
                harvest_config,
            );
            let result = service
                .run_cancellable(&job, &reporter, cancel_token)
                .await;
            finish_job(&job.name, &job.source_url, &result)
        }

        HarvestTarget::Named(name) => {
            let sources = require_config(config_path)?;
            let source = sources
                .find_by_name(&name)
                .ok_or_else(|| anyhow::anyhow!("Source '{}' not found in configuration", name))?;

            if !source.enabled {
                info!(
                    "Note: Source '{}' is marked as disabled in configuration",
                    name
                );
            }

            let service = harvester(factory, index, &sources, harvest_config.clone());
            let job = HarvestJob::from_source(source, &harvest_config);
            let job = if dry_run { job.with_dry_run(true) } else { job };
            let result = service
                .run_cancellable(&job, &reporter, cancel_token)
                .await;
            finish_job(&source.name, &source.url, &result)
        }

        HarvestTarget::AllEnabled => {
            let mut sources = require_config(config_path)?;
            if dry_run {
                sources.sources.iter_mut().for_each(|s| s.dry_run = true);
            }

            let enabled: Vec<&SourceEntry> = sources.enabled_sources();
            if enabled.is_empty() {
                info!("No enabled sources found in configuration.");
                info!("Add sources to ~/.config/geoharvest/sources.toml or use: geoharvest harvest <url>");
                return Ok(());
            }

            info!("═══════════════════════════════════════════════════════");
            info!("Starting batch harvest of {} sources", enabled.len());
            info!("═══════════════════════════════════════════════════════");

            let service = harvester(factory, index, &sources, harvest_config);
            let summary = service
                .batch_harvest_with_progress_cancellable(&enabled, &reporter, cancel_token)
                .await;

            print_batch_summary(&summary);
            Ok(())
        }
    }
}

fn harvester(
    factory: SourceClientFactoryEnum,
    index: JsonlIndex,
    sources: &SourcesConfig,
    harvest_config: HarvestConfig,
) -> Harvester {
    let mut registry = StaticCatalogRegistry::from_entries(&sources.catalogs);
    for source in &sources.sources {
        registry.ensure(source.catalog_id());
    }
    HarvestService::with_config(factory, BufferedSink::new(index), registry, harvest_config)
}

fn require_config(config_path: Option<PathBuf>) -> anyhow::Result<SourcesConfig> {
    load_sources_config(config_path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No configuration file found. Create ~/.config/geoharvest/sources.toml or use --config"
        )
    })
}

/// Returns a token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests...");
            child.cancel();
        }
    });
    token
}

/// Source name for a URL harvested without configuration: its host.
fn source_name_from_url(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    if host.is_empty() {
        "source".to_string()
    } else {
        host.to_lowercase()
    }
}

/// Prints the summary of a single job and turns a failed run into an error.
fn finish_job(name: &str, url: &str, result: &HarvestResult) -> anyhow::Result<()> {
    let report = &result.summary;

    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("Harvest {}: {} ({})", result.state, name, url);
    info!("═══════════════════════════════════════════════════════");
    info!("  Documents:           {}", result.count);
    info!("  Indexed:             {}", report.indexed);
    info!("  Skipped:             {}", report.skipped());
    info!("  Warnings:            {}", report.warning_count());
    for warning in &report.warnings {
        warn!("  - [{}] {}", warning.category, warning.message);
    }
    for app_error in &report.app_errors {
        error!("  - {}", app_error);
    }
    info!("═══════════════════════════════════════════════════════");

    if result.cancelled {
        info!("Harvest was cancelled; output holds the documents mapped so far.");
    }

    if let Some(err) = &result.error {
        anyhow::bail!("Harvest of '{}' failed: {}", name, err);
    }
    if result.requires_rollback() {
        anyhow::bail!("Harvest of '{}' recorded application errors", name);
    }
    Ok(())
}

/// Print a summary of batch harvesting results.
fn print_batch_summary(summary: &BatchHarvestSummary) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("BATCH HARVEST COMPLETE");
    info!("═══════════════════════════════════════════════════════");
    info!("  Sources processed:   {}", summary.total_sources());
    info!("  Successful:          {}", summary.successful_count());
    info!("  Failed:              {}", summary.failed_count());
    info!("  Total documents:     {}", summary.total_documents());

    if summary.failed_count() > 0 {
        info!("───────────────────────────────────────────────────────");
        info!("Failed sources:");
        for result in summary.results.iter().filter(|r| !r.is_success()) {
            if let Some(err) = &result.error {
                error!("  - {}: {}", result.source_name, err);
            }
        }
    }
    info!("═══════════════════════════════════════════════════════");
}

// =============================================================================
// Reconcile
// =============================================================================

async fn reconcile(
    inputs: &[PathBuf],
    output: Option<&Path>,
    policy: Option<&Path>,
    previous: Option<&Path>,
) -> anyhow::Result<()> {
    let policy = match policy {
        Some(path) => MergePolicy::load(path)?,
        None => MergePolicy::default(),
    };

    let mut operations = Vec::new();
    for input in inputs {
        operations.extend(
            read_operations(input).with_context(|| format!("Failed to read {}", input.display()))?,
        );
    }
    let entities = entities_from_operations(operations);

    let indexed_ids = match previous {
        Some(path) => indexed_ids(
            read_operations(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => HashMap::new(),
    };

    let buckets = build_buckets(entities, &indexed_ids);
    let merged = buckets.iter().filter(|b| b.entities.len() > 1).count();
    let operations = Deduplicator::new(policy).reconcile_all(&buckets);
    let deletes = operations.iter().filter(|op| op.is_delete()).count();

    let index = JsonlIndex::open(output).context("Failed to open reconcile output")?;
    let written = index.apply(operations).await?;

    info!(
        buckets = buckets.len(),
        merged,
        deletes,
        written,
        "Reconcile complete"
    );
    Ok(())
}

/// Documents left standing after replaying `operations` in order, in
/// first-indexed order. A later `index` replaces an earlier one with the same id.
fn latest_documents(operations: Vec<IndexOperation>) -> Vec<CanonicalDocument> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut documents: Vec<Option<CanonicalDocument>> = Vec::new();

    for operation in operations {
        match operation {
            IndexOperation::Index { id, document } => match positions.get(&id) {
                Some(&position) => documents[position] = Some(document),
                None => {
                    positions.insert(id, documents.len());
                    documents.push(Some(document));
                }
            },
            IndexOperation::Delete { id } => {
                if let Some(&position) = positions.get(&id) {
                    documents[position] = None;
                }
            }
        }
    }

    documents.into_iter().flatten().collect()
}

fn entities_from_operations(operations: Vec<IndexOperation>) -> Vec<MappedEntity> {
    latest_documents(operations)
        .into_iter()
        .map(|document| MappedEntity {
            identifier: document.identifier.clone(),
            source: document.metadata.source.clone(),
            collection_id: document.metadata.catalog_id.clone(),
            document,
            original_text: String::new(),
        })
        .collect()
}

/// Dedup key to current index id, from a previous reconcile output.
fn indexed_ids(operations: Vec<IndexOperation>) -> HashMap<String, String> {
    entities_from_operations(operations)
        .into_iter()
        .map(|entity| (dedup_key(&entity), entity.document.id))
        .collect()
}

// =============================================================================
// Sources
// =============================================================================

fn list_sources(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let sources = require_config(config_path)?;

    if sources.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!();
    println!("  {:<20} {:<6} {:<10} {:<12} URL", "NAME", "TYPE", "KIND", "CATALOG");
    for source in &sources.sources {
        println!(
            "{} {:<20} {:<6} {:<10} {:<12} {}",
            if source.enabled { " " } else { "-" },
            source.name,
            source.protocol,
            source.source_kind(),
            source.catalog_id(),
            source.url
        );
    }
    println!();
    println!(
        "{} of {} sources enabled",
        sources.enabled_sources().len(),
        sources.sources.len()
    );

    Ok(())
}
