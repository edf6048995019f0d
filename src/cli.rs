use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::auth::Token;
use crate::config::{Config, OutputFormat};
use crate::error::StoryMapError;
use crate::lark::types::{FieldSchema, PerformanceMetrics, Record};
use crate::lark::{LarkClient, TableLocation};
use crate::output::{self, PhaseProgress, EXTRACT_PHASES, TREE_PHASES};
use crate::tree::{Forest, TreeBuilder};

#[derive(Parser)]
#[command(name = "storymap")]
#[command(author, version, about = "User story maps from Lark Bitable tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (toml, json or yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write results to a file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Args)]
struct LarkArgs {
    #[arg(long, env = "LARK_APP_ID")]
    app_id: Option<String>,

    #[arg(long, env = "LARK_APP_SECRET", hide_env_values = true)]
    app_secret: Option<String>,

    /// Records per page (server cap 500)
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the schema and all records of one table as a JSON snapshot
    Extract {
        /// Table URL, e.g. https://acme.larksuite.com/wiki/{token}?table={id}
        #[arg(short, long)]
        url: String,

        #[command(flatten)]
        lark: LarkArgs,
    },

    /// Fetch one or more tables and build the story forest
    Tree {
        /// Table URLs, fetched concurrently and merged into one forest
        #[arg(short, long, required = true, num_args = 1..)]
        url: Vec<String>,

        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        #[command(flatten)]
        lark: LarkArgs,
    },

    /// Write a default configuration file
    Init {
        #[arg(default_value = "storymap.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Build the story forest from a saved snapshot or records file
    Analyze {
        file: PathBuf,

        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },
}

#[derive(Serialize)]
struct ExtractionInfo {
    timestamp: DateTime<Utc>,
    source_url: String,
    locator_token: String,
    table_id: String,
    extractor_version: &'static str,
}

#[derive(Serialize)]
struct SnapshotSummary {
    total_fields: usize,
    total_records: usize,
}

#[derive(Serialize)]
struct TableSnapshot {
    extraction_info: ExtractionInfo,
    table_schema: Vec<FieldSchema>,
    table_records: Vec<Record>,
    summary: SnapshotSummary,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        if let Commands::Init { path, force } = &self.command {
            return init_config(path, *force);
        }

        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Extract { url, lark } => self.execute_extract(&config, url, lark).await,
            Commands::Tree { url, format, lark } => {
                self.execute_tree(&config, url, *format, lark).await
            }
            Commands::Analyze { file, format } => self.execute_analyze(&config, file, *format),
            Commands::Init { .. } => Ok(()),
        }
    }

    async fn execute_extract(&self, config: &Config, url: &str, lark: &LarkArgs) -> Result<()> {
        let location = TableLocation::parse(url)?;
        info!(
            "Extracting table {} from {:?} {}",
            location.table_id, location.kind, location.token
        );

        let client = lark_client(config, lark)?;

        let progress = PhaseProgress::start(EXTRACT_PHASES);
        let Some(schema) = client
            .fetch_table_schema(&location.token, &location.table_id)
            .await
        else {
            progress.fail("schema unavailable");
            bail!(
                "Could not fetch the schema of table {}; check the URL and app permissions",
                location.table_id
            );
        };
        let progress = progress.advance();
        let records = client
            .fetch_table_records(&location.token, &location.table_id, lark.page_size)
            .await;
        progress.finish();

        if records.is_empty() {
            warn!("Table {} returned no records", location.table_id);
        }

        let snapshot = TableSnapshot {
            extraction_info: ExtractionInfo {
                timestamp: Utc::now(),
                source_url: url.to_string(),
                locator_token: location.token.clone(),
                table_id: location.table_id.clone(),
                extractor_version: env!("CARGO_PKG_VERSION"),
            },
            summary: SnapshotSummary {
                total_fields: schema.items.len(),
                total_records: records.len(),
            },
            table_schema: schema.items,
            table_records: records,
        };
        info!(
            "Extracted {} fields and {} records",
            snapshot.summary.total_fields, snapshot.summary.total_records
        );

        let mut writer = self.writer()?;
        output::write_json(&snapshot, self.pretty || config.output.pretty, &mut writer)?;
        writer.flush()?;

        log_metrics(&client.performance_metrics().await);
        Ok(())
    }

    async fn execute_tree(
        &self,
        config: &Config,
        urls: &[String],
        format: Option<OutputFormat>,
        lark: &LarkArgs,
    ) -> Result<()> {
        let locations = urls
            .iter()
            .map(|url| TableLocation::parse(url))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let builder = TreeBuilder::new(&config.tree)?;
        let client = lark_client(config, lark)?;

        let progress = PhaseProgress::start(TREE_PHASES);
        let fetches = locations.iter().map(|location| {
            client.fetch_table_records(&location.token, &location.table_id, lark.page_size)
        });
        let batches = join_all(fetches).await;

        let mut records = Vec::new();
        for (location, batch) in locations.iter().zip(batches) {
            if batch.is_empty() {
                warn!(
                    "No records from table {} ({}); the forest may be incomplete",
                    location.table_id, location.token
                );
            }
            records.extend(batch);
        }

        let progress = progress.advance();
        let forest = match builder.build(&records) {
            Ok(forest) => forest,
            Err(err) => {
                progress.fail(&err.to_string());
                return Err(build_failure(err));
            }
        };
        progress.finish();

        let metrics = client.performance_metrics().await;
        log_metrics(&metrics);
        self.emit(config, &forest, format, Some(&metrics))
    }

    fn execute_analyze(
        &self,
        config: &Config,
        file: &Path,
        format: Option<OutputFormat>,
    ) -> Result<()> {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid JSON", file.display()))?;
        let records = records_from_snapshot(value)?;
        info!("Loaded {} records from {}", records.len(), file.display());

        let forest = TreeBuilder::new(&config.tree)?
            .build(&records)
            .map_err(build_failure)?;
        self.emit(config, &forest, format, None)
    }

    fn emit(
        &self,
        config: &Config,
        forest: &Forest,
        format: Option<OutputFormat>,
        metrics: Option<&PerformanceMetrics>,
    ) -> Result<()> {
        let format = format.unwrap_or(config.output.format);
        debug!(
            "Emitting {} nodes from {} roots as {format:?}",
            forest.node_count(),
            forest.roots.len()
        );

        if format == OutputFormat::Summary && self.output.is_none() {
            output::print_summary(forest, metrics);
            return Ok(());
        }

        let mut writer = self.writer()?;
        output::export_forest(
            forest,
            format,
            self.pretty || config.output.pretty,
            &config.jira,
            &mut writer,
        )?;
        writer.flush()?;
        Ok(())
    }

    fn writer(&self) -> Result<Box<dyn Write>> {
        match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                info!("Writing output to: {}", path.display());
                Ok(Box::new(BufWriter::new(file)))
            }
            None => Ok(Box::new(io::stdout().lock())),
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    Config::default().save(path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Flags win over the environment, which wins over the config file.
fn lark_client(config: &Config, lark: &LarkArgs) -> Result<LarkClient> {
    let app_id = lark
        .app_id
        .clone()
        .or_else(|| config.lark.app_id.clone())
        .filter(|id| !id.trim().is_empty())
        .context("Lark app id missing: pass --app-id, set LARK_APP_ID or add app-id to [lark]")?;
    let app_secret = lark
        .app_secret
        .clone()
        .or_else(|| config.lark.app_secret.clone())
        .filter(|secret| !secret.trim().is_empty())
        .map(Token::from)
        .context(
            "Lark app secret missing: pass --app-secret, set LARK_APP_SECRET or add app-secret to [lark]",
        )?;

    Ok(LarkClient::new(&config.lark, app_id, app_secret)?)
}

fn build_failure(err: StoryMapError) -> anyhow::Error {
    if err.is_structural() {
        anyhow::Error::new(err)
            .context("Story records are structurally inconsistent; fix the parent links in the table")
    } else {
        anyhow::Error::new(err)
    }
}

fn log_metrics(metrics: &PerformanceMetrics) {
    info!(
        "API metrics: {} requests, {} failed, success {:.1}%, avg {:.0}ms, {} token refreshes, {} rate-limit waits, uptime {:.1}s",
        metrics.requests_total,
        metrics.requests_failed,
        metrics.success_rate * 100.0,
        metrics.avg_response_time * 1000.0,
        metrics.auth_refreshes,
        metrics.rate_limit_hits,
        metrics.uptime
    );
}

/// Accepts an extract snapshot, a raw `{"items": [...]}` page, or a bare
/// record array.
fn records_from_snapshot(value: Value) -> Result<Vec<Record>> {
    let records = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map
            .remove("table_records")
            .or_else(|| map.remove("items"))
        {
            Some(records) => records,
            None => bail!("Expected a 'table_records' or 'items' array"),
        },
        _ => bail!("Expected a JSON array of records or a snapshot object"),
    };

    serde_json::from_value(records).context("Records are not in the Bitable record shape")
}
