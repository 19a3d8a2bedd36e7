//! NCR - node repository maintenance CLI
//!
//! The `ncr` command drives the batch pipelines in `ncr-sync` against the
//! SurrealDB-backed node repository, search index and event store.
//!
//! ## Commands
//!
//! - `reindex-nodes`: push every indexed node into the search index
//! - `sync-nodes`: reconcile every node with its event history
//! - `sync-node`: reconcile a single node
//! - `get-node`: print one node as JSON
//! - `export-nodes`: write nodes as JSON lines

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use ncr_state::{
    AggregateResolver, Capability, Context, EventSourcedResolver, KindRegistry, RecordKind,
    RecordKindSelector, RecordRef, Repository, SearchIndex, SurrealHandle,
};
use ncr_sync::{
    LineProgress, NoProgress, Outcome, Pipeline, PipelineConfig, ProgressSink, RunReport,
    SyncMode, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "ncr")]
#[command(author = "Gdbots Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reindex, sync and export nodes in the node repository", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines (and the final report as JSON)
    #[arg(long, global = true)]
    json: bool,

    /// Kind registry file
    #[arg(long, global = true, env = "NCR_REGISTRY", default_value = ".ncr/kinds.json")]
    registry: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Tenant and extra context for an operation.
#[derive(Args, Debug, Clone, Default)]
struct ContextArgs {
    /// Tenant id to use for this operation
    #[arg(long, env = "NCR_TENANT_ID", default_value = "")]
    tenant_id: String,

    /// Context to provide to the repository (JSON, or base64-encoded JSON)
    #[arg(long)]
    context: Option<String>,
}

/// Pacing for batch operations.
#[derive(Args, Debug, Clone)]
struct BatchArgs {
    /// Number of nodes per batch (1-2000)
    #[arg(long, env = "NCR_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Milliseconds to pause between batches (10-600000)
    #[arg(long, env = "NCR_BATCH_DELAY", default_value_t = DEFAULT_BATCH_DELAY_MS)]
    batch_delay: u64,
}

impl Default for BatchArgs {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY_MS,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reindex nodes into the search index
    ReindexNodes {
        /// Kind to reindex, e.g. "acme:article" (default: every indexed kind)
        kind: Option<String>,

        #[command(flatten)]
        batch: BatchArgs,

        /// Keep going when a batch chunk fails to index
        #[arg(long)]
        skip_errors: bool,

        /// Stream and count nodes without indexing them
        #[arg(long)]
        dry_run: bool,

        /// Skip the traffic confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[command(flatten)]
        ctx: ContextArgs,
    },

    /// Sync nodes with their event history
    SyncNodes {
        /// Kind to sync (default: every node kind)
        kind: Option<String>,

        #[command(flatten)]
        batch: BatchArgs,

        /// Keep going when a batch chunk fails to index
        #[arg(long)]
        skip_errors: bool,

        /// Skip the traffic confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[command(flatten)]
        ctx: ContextArgs,
    },

    /// Sync a single node with its event history
    SyncNode {
        /// Node ref, e.g. "acme:article:123"
        node_ref: String,

        /// Rebuild from the full history instead of the stored snapshot
        #[arg(long)]
        no_snapshot: bool,

        #[command(flatten)]
        ctx: ContextArgs,
    },

    /// Print a single node as JSON
    GetNode {
        /// Node ref, e.g. "acme:article:123"
        node_ref: String,

        /// Request a strongly consistent read
        #[arg(long)]
        consistent: bool,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,

        #[command(flatten)]
        ctx: ContextArgs,
    },

    /// Export nodes as JSON lines
    ExportNodes {
        /// Kind to export (default: every node kind)
        kind: Option<String>,

        #[command(flatten)]
        batch: BatchArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        ctx: ContextArgs,
    },
}

/// Collaborators every command runs against.
struct Backends {
    repository: Arc<dyn Repository>,
    index: Arc<dyn SearchIndex>,
    resolver: Arc<dyn AggregateResolver>,
    registry: Arc<KindRegistry>,
}

impl Backends {
    async fn connect(registry_path: &Path) -> Result<Self> {
        let registry = Arc::new(
            KindRegistry::from_json_file(registry_path)
                .with_context(|| format!("Failed to load kind registry {}", registry_path.display()))?,
        );
        let handle = SurrealHandle::setup_from_env()
            .await
            .context("Failed to connect to NCR database")?;

        Ok(Self {
            repository: Arc::new(handle.repository()),
            index: Arc::new(handle.search_index()),
            resolver: Arc::new(EventSourcedResolver::new(
                Arc::new(handle.event_store()),
                registry.clone(),
            )),
            registry,
        })
    }

    fn pipeline(&self, config: PipelineConfig, progress: Arc<dyn ProgressSink>) -> Pipeline {
        Pipeline::new(
            self.repository.clone(),
            self.index.clone(),
            self.resolver.clone(),
            self.registry.clone(),
            config,
        )
        .with_progress(progress)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ncr_sync::init_tracing(cli.json, level);

    let progress: Arc<dyn ProgressSink> = Arc::new(LineProgress::new(console(cli.json)));

    match cli.command {
        Commands::ReindexNodes {
            kind,
            batch,
            skip_errors,
            dry_run,
            yes,
            ctx,
        } => {
            let selector = selector(kind.as_deref(), Capability::Indexed)?;
            let Some(backends) = confirm_then_connect(
                &cli.registry,
                &format!("Reindexing nodes for qname \"{selector}\""),
                yes,
                std::io::stdin().lock(),
                console(cli.json),
            )
            .await?
            else {
                return Ok(());
            };
            let config = PipelineConfig::builder()
                .batch_size(batch.batch_size)
                .batch_delay_ms(batch.batch_delay)
                .skip_errors(skip_errors)
                .dry_run(dry_run)
                .build()?;
            let report = cmd_reindex(
                &backends.pipeline(config, progress),
                &selector,
                &build_context(&ctx)?,
            )
            .await?;
            write_report(&mut std::io::stdout(), &report, cli.json)
        }
        Commands::SyncNodes {
            kind,
            batch,
            skip_errors,
            yes,
            ctx,
        } => {
            let selector = selector(kind.as_deref(), Capability::Node)?;
            let Some(backends) = confirm_then_connect(
                &cli.registry,
                &format!("Syncing nodes for qname \"{selector}\""),
                yes,
                std::io::stdin().lock(),
                console(cli.json),
            )
            .await?
            else {
                return Ok(());
            };
            let config = PipelineConfig::builder()
                .batch_size(batch.batch_size)
                .batch_delay_ms(batch.batch_delay)
                .skip_errors(skip_errors)
                .build()?;
            let report = cmd_sync(
                &backends.pipeline(config, progress),
                &selector,
                &build_context(&ctx)?,
            )
            .await?;
            write_report(&mut std::io::stdout(), &report, cli.json)
        }
        Commands::SyncNode {
            node_ref,
            no_snapshot,
            ctx,
        } => {
            let backends = Backends::connect(&cli.registry).await?;
            let pipeline = backends.pipeline(PipelineConfig::default(), Arc::new(NoProgress));
            let mode = if no_snapshot {
                SyncMode::Rebuild
            } else {
                SyncMode::Snapshot
            };
            cmd_sync_node(
                &pipeline,
                &node_ref,
                mode,
                &build_context(&ctx)?,
                &mut std::io::stdout(),
            )
            .await
        }
        Commands::GetNode {
            node_ref,
            consistent,
            pretty,
            ctx,
        } => {
            let backends = Backends::connect(&cli.registry).await?;
            let pipeline = backends.pipeline(PipelineConfig::default(), Arc::new(NoProgress));
            let found = cmd_get_node(
                &pipeline,
                &node_ref,
                consistent,
                pretty,
                &build_context(&ctx)?,
                &mut std::io::stdout(),
            )
            .await?;
            if !found {
                eprintln!("Node [{node_ref}] not found.");
            }
            Ok(())
        }
        Commands::ExportNodes {
            kind,
            batch,
            output,
            ctx,
        } => {
            let selector = selector(kind.as_deref(), Capability::Node)?;
            let config = PipelineConfig::builder()
                .batch_size(batch.batch_size)
                .batch_delay_ms(batch.batch_delay)
                .build()?;
            let backends = Backends::connect(&cli.registry).await?;
            let pipeline = backends.pipeline(config, Arc::new(NoProgress));
            let ctx = build_context(&ctx)?;

            let report = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let mut out = std::io::BufWriter::new(file);
                    cmd_export(&pipeline, &selector, &ctx, &mut out).await?
                }
                None => cmd_export(&pipeline, &selector, &ctx, &mut std::io::stdout()).await?,
            };
            // stdout may carry the export itself
            eprintln!("{}", report.summary());
            Ok(())
        }
    }
}

/// Parse an optional kind argument into a selector.
fn selector(kind: Option<&str>, capability: Capability) -> Result<RecordKindSelector> {
    let kind = kind
        .map(|k| k.parse::<RecordKind>())
        .transpose()
        .context("Invalid kind")?;
    Ok(RecordKindSelector::from_option(kind, capability))
}

/// Build the run context: `--context` (JSON or base64 JSON) with the tenant
/// id layered on top.
fn build_context(args: &ContextArgs) -> Result<Context> {
    let raw = args.context.as_deref().unwrap_or("").trim();
    let json = if raw.is_empty() {
        "{}".to_string()
    } else if raw.contains('{') {
        raw.to_string()
    } else {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .context("--context is neither JSON nor base64")?;
        String::from_utf8(bytes).context("--context base64 payload is not UTF-8")?
    };

    let value: serde_json::Value =
        serde_json::from_str(&json).context("--context is not valid JSON")?;
    let ctx = Context::new()
        .merge_json(value)
        .context("--context must be a JSON object")?;
    Ok(ctx.with_tenant(args.tenant_id.clone()))
}

/// Ask before adding bulk traffic. Anything but yes declines.
fn confirm_traffic<R: BufRead, W: Write>(mut input: R, mut out: W) -> Result<bool> {
    write!(
        out,
        "Have you prepared your node repository and your devops team for the added traffic? [y/N] "
    )?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let confirmed = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    if !confirmed {
        writeln!(out, "Aborting read of nodes.")?;
    }
    Ok(confirmed)
}

/// Announce a bulk run and connect once the operator agrees. `None` when
/// the prompt was declined; nothing has been opened at that point.
async fn confirm_then_connect<R: BufRead, W: Write>(
    registry_path: &Path,
    banner: &str,
    yes: bool,
    input: R,
    mut out: W,
) -> Result<Option<Backends>> {
    writeln!(out, "{banner}")?;
    if !yes && !confirm_traffic(input, &mut out)? {
        return Ok(None);
    }
    Backends::connect(registry_path).await.map(Some)
}

/// Human-facing output. With `--json`, stdout is reserved for the report.
fn console(json: bool) -> Box<dyn Write + Send> {
    if json {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    }
}

fn write_report<W: Write>(out: &mut W, report: &RunReport, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(report)?)?;
    } else {
        writeln!(out)?;
        writeln!(out, "{}", report.summary())?;
        if report.has_failures() {
            writeln!(
                out,
                "{} failed, {} unindexed, {} failed chunks",
                report.stats.failed, report.stats.unindexed, report.stats.failed_chunks
            )?;
        }
    }
    Ok(())
}

async fn cmd_reindex(
    pipeline: &Pipeline,
    selector: &RecordKindSelector,
    ctx: &Context,
) -> Result<RunReport> {
    info!(selector = %selector, "reindexing nodes");
    let report = pipeline
        .reindex(selector, ctx)
        .await
        .context("Reindex failed")?;
    Ok(report)
}

async fn cmd_sync(
    pipeline: &Pipeline,
    selector: &RecordKindSelector,
    ctx: &Context,
) -> Result<RunReport> {
    info!(selector = %selector, "syncing nodes");
    let report = pipeline.sync(selector, ctx).await.context("Sync failed")?;
    Ok(report)
}

async fn cmd_sync_node<W: Write>(
    pipeline: &Pipeline,
    node_ref: &str,
    mode: SyncMode,
    ctx: &Context,
    out: &mut W,
) -> Result<()> {
    let record_ref: RecordRef = node_ref.parse().context("Invalid node ref")?;
    let reconciled = pipeline
        .sync_one(&record_ref, mode, ctx)
        .await
        .with_context(|| format!("Failed to sync node {record_ref}"))?;

    writeln!(out, "{}", serde_json::to_string_pretty(&reconciled.record)?)?;
    match reconciled.outcome {
        Outcome::Synced => writeln!(out, "Synced node \"{record_ref}\".")?,
        Outcome::Matched => writeln!(out, "Node \"{record_ref}\" already up to date.")?,
    }
    Ok(())
}

/// Returns `false` when the node does not exist.
async fn cmd_get_node<W: Write>(
    pipeline: &Pipeline,
    node_ref: &str,
    consistent: bool,
    pretty: bool,
    ctx: &Context,
    out: &mut W,
) -> Result<bool> {
    let record_ref: RecordRef = node_ref.parse().context("Invalid node ref")?;
    let Some(record) = pipeline.get_one(&record_ref, consistent, ctx).await? else {
        return Ok(false);
    };

    let text = if pretty {
        serde_json::to_string_pretty(&record)?
    } else {
        serde_json::to_string(&record)?
    };
    writeln!(out, "{text}")?;
    Ok(true)
}

async fn cmd_export<W: Write + Send>(
    pipeline: &Pipeline,
    selector: &RecordKindSelector,
    ctx: &Context,
    out: &mut W,
) -> Result<RunReport> {
    let report = pipeline
        .export(selector, ctx, out)
        .await
        .context("Export failed")?;
    Ok(report)
}
