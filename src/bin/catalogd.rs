//! CLI binary for pdf-catalog.
//!
//! A thin shim over the library crate: maps flags and `CATALOG_*` variables
//! to a `PipelineConfig`, opens the ledger and the asset directory, and runs
//! the HTTP server or a one-off maintenance command.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_catalog::{
    server::{create_router, AppState},
    AssetStore, CatalogLifecycle, CatalogRepository, FilesystemAssetStore, IngestFailure,
    IngestProgressCallback, IngestReport, IngestRequest, IngestStage, Ingestor, PdfiumRasterizer,
    PipelineConfig, ProgressTracker, ReconcileOptions, SqliteLedger,
};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner until the page count is known, then
/// a bar with one log line per skipped page.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Validating upload…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            errors: AtomicUsize::new(0),
        }
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rasterising");
        self.bar.reset_eta();
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: IngestStage) {
        let msg = match stage {
            IngestStage::Validating => "validating upload",
            IngestStage::UploadingOriginal => "storing original",
            IngestStage::Rasterizing => "rasterising",
            IngestStage::GeneratingThumbnail => "thumbnail",
            IngestStage::Finalizing => "finalizing",
            IngestStage::Completed | IngestStage::Failed => return,
        };
        self.bar.set_message(msg);
    }

    fn on_catalog_created(&self, catalog_id: i64) {
        self.bar
            .println(format!("{} Catalog {}", cyan("◆"), bold(&catalog_id.to_string())));
    }

    fn on_pages_discovered(&self, total_pages: usize, total_batches: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} pages in {total_batches} batches"))
        ));
    }

    fn on_batch_start(&self, batch: usize, total_batches: usize) {
        self.bar.set_message(format!("batch {batch}/{total_batches}"));
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let mut cut: String = error.chars().take(79).collect();
            cut.push('\u{2026}');
            cut
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_ingest_complete(&self, report: &IngestReport) {
        self.bar.finish_and_clear();
        let skipped = self.errors.load(Ordering::SeqCst);
        if skipped == 0 {
            eprintln!(
                "{} {} pages stored",
                green("✔"),
                bold(&report.total_pages.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages stored  ({} skipped)",
                cyan("⚠"),
                bold(&report.total_pages.to_string()),
                report.requested_pages,
                red(&skipped.to_string())
            );
        }
    }

    fn on_ingest_failed(&self, failure: &IngestFailure) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), failure);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP API, storing assets under ./assets
  catalogd serve --bind 0.0.0.0:8080

  # Ingest one file locally
  catalogd ingest brochure.pdf --category ropa --description "Winter line"

  # Preview what reconciliation would repair
  catalogd reconcile --dry-run

  # Delete a catalog and its stored objects
  catalogd delete 42

ENVIRONMENT VARIABLES:
  CATALOG_DB              SQLite ledger path
  CATALOG_ASSETS_DIR      Root directory of the asset store
  CATALOG_PUBLIC_URL      Base URL that asset URLs are built from
  CATALOG_BIND            Listen address for `serve`
  CATALOG_PDFIUM_LIB      Directory (or file) of the pdfium shared library
  RUST_LOG                Overrides the log filter
"#;

/// Ingest PDF catalogs: rasterise pages, store assets, keep the ledger in sync.
#[derive(Parser, Debug)]
#[command(
    name = "catalogd",
    version,
    about = "PDF catalog ingestion service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CATALOG_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StorageArgs {
    /// SQLite ledger file.
    #[arg(long, global = true, env = "CATALOG_DB", default_value = "catalogs.db")]
    db: PathBuf,

    /// Root directory of the filesystem asset store.
    #[arg(long, global = true, env = "CATALOG_ASSETS_DIR", default_value = "assets")]
    assets_dir: PathBuf,

    /// Base URL that stored objects are reachable under.
    #[arg(
        long,
        global = true,
        env = "CATALOG_PUBLIC_URL",
        default_value = "http://localhost:8080/assets"
    )]
    public_url: String,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Pixel width every page is rendered at.
    #[arg(long, global = true, env = "CATALOG_TARGET_WIDTH", default_value_t = 1200)]
    target_width: u32,

    /// JPEG quality for pages (1–100).
    #[arg(long, global = true, env = "CATALOG_PAGE_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    page_quality: u8,

    /// Thumbnail width in pixels.
    #[arg(long, global = true, env = "CATALOG_THUMBNAIL_WIDTH", default_value_t = 300)]
    thumbnail_width: u32,

    /// JPEG quality for the thumbnail (1–100).
    #[arg(long, global = true, env = "CATALOG_THUMBNAIL_QUALITY", default_value_t = 70,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    thumbnail_quality: u8,

    /// Pages rendered per batch.
    #[arg(long, global = true, env = "CATALOG_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    /// Largest accepted upload, in MiB.
    #[arg(long, global = true, env = "CATALOG_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,

    /// First segment of every object key.
    #[arg(long, global = true, env = "CATALOG_KEY_PREFIX", default_value = "catalogs")]
    key_prefix: String,

    /// Directory (or file) of the pdfium shared library.
    #[arg(long, global = true, env = "CATALOG_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// PDF user password for encrypted uploads.
    #[arg(long, global = true, env = "CATALOG_PDF_PASSWORD")]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "CATALOG_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },

    /// Ingest one PDF and print the report.
    Ingest {
        file: PathBuf,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        category: String,

        /// Submitting user, recorded on the catalog.
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        version: Option<String>,

        /// Tag as key=value; repeatable.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// Repair disagreements between the asset store and the ledger.
    Reconcile {
        /// Report without changing anything.
        #[arg(long)]
        dry_run: bool,

        /// Fail catalogs stuck in `processing` for this long; 0 disables.
        #[arg(long, default_value_t = 60)]
        stale_minutes: i64,
    },

    /// Delete a catalog and its stored objects.
    Delete { id: i64 },
}

fn parse_tag(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for a local ingest.
    let quiet_ingest = matches!(
        &cli.command,
        Command::Ingest { json: false, no_progress: false, .. }
    );
    let filter = if cli.verbose {
        "debug"
    } else if quiet_ingest {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli.pipeline)?;
    let repo: Arc<dyn CatalogRepository> = Arc::new(
        SqliteLedger::new(&cli.storage.db)
            .with_context(|| format!("Failed to open ledger {:?}", cli.storage.db))?,
    );
    tokio::fs::create_dir_all(&cli.storage.assets_dir)
        .await
        .with_context(|| format!("Failed to create asset directory {:?}", cli.storage.assets_dir))?;
    let store: Arc<dyn AssetStore> = Arc::new(FilesystemAssetStore::new(
        cli.storage.assets_dir.clone(),
        cli.storage.public_url.clone(),
    ));

    match cli.command {
        Command::Serve { bind } => {
            let ingestor = build_ingestor(config, repo, store)?;
            let state = Arc::new(AppState::new(ingestor, ProgressTracker::new()));
            let router = create_router(state, Some(cli.storage.assets_dir.clone()));

            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;
            info!("Listening on {}", bind);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }

        Command::Ingest {
            file,
            description,
            category,
            user,
            version,
            tags,
            json,
            no_progress,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.pdf".to_string());
            let request = IngestRequest {
                bytes,
                filename,
                description,
                category,
                user_id: user,
                content_type: None,
                version,
                tags: tags.into_iter().collect::<BTreeMap<_, _>>(),
            };

            let ingestor = build_ingestor(config, repo, store)?;
            let report = if json || no_progress {
                ingestor
                    .ingest(request, &pdf_catalog::NoopProgressCallback, Uuid::new_v4())
                    .await
            } else {
                ingestor
                    .ingest(request, &CliProgressCallback::new(), Uuid::new_v4())
                    .await
            }
            .context("Ingestion failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else {
                print_report(&report);
            }
        }

        Command::Reconcile {
            dry_run,
            stale_minutes,
        } => {
            let lifecycle = CatalogLifecycle::new(repo, store, config.key_prefix.clone());
            let options = ReconcileOptions {
                dry_run,
                stale_after: (stale_minutes > 0).then(|| chrono::Duration::minutes(stale_minutes)),
            };
            let report = lifecycle
                .reconcile_orphans(&options)
                .await
                .context("Reconciliation failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        }

        Command::Delete { id } => {
            let lifecycle = CatalogLifecycle::new(repo, store, config.key_prefix.clone());
            let report = lifecycle
                .delete_catalog(id)
                .await
                .with_context(|| format!("Failed to delete catalog {id}"))?;
            eprintln!(
                "{} Catalog {} deleted, {} assets removed",
                green("✔"),
                id,
                report.assets_removed
            );
            for e in &report.store_errors {
                eprintln!("  {} {}  {}", red("✗"), e.key, dim(&e.error));
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .target_width_px(args.target_width)
        .page_quality(args.page_quality)
        .thumbnail_width_px(args.thumbnail_width)
        .thumbnail_quality(args.thumbnail_quality)
        .batch_size(args.batch_size)
        .max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024))
        .key_prefix(args.key_prefix.clone());
    if let Some(ref path) = args.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    builder.build().context("Invalid configuration")
}

fn build_ingestor(
    config: PipelineConfig,
    repo: Arc<dyn CatalogRepository>,
    store: Arc<dyn AssetStore>,
) -> Result<Ingestor> {
    let rasterizer = PdfiumRasterizer::new(&config);
    rasterizer
        .bind_eagerly()
        .context("Failed to load the pdfium library")?;
    Ok(Ingestor::new(config, repo, store, Arc::new(rasterizer)))
}

fn print_report(report: &IngestReport) {
    println!("Catalog:    {}", report.catalog_id);
    println!("Pages:      {}/{}", report.total_pages, report.requested_pages);
    println!("Elapsed:    {}ms", report.elapsed_ms);
    println!("Original:   {}", report.original_url);
    if let Some(ref url) = report.thumbnail_url {
        println!("Thumbnail:  {}", url);
    }
    if let Some(ref err) = report.thumbnail_error {
        println!("Thumbnail:  {}", red(err));
    }
    for skipped in &report.skipped_pages {
        println!("  {} {}", red("✗"), skipped);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
