use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use dtf_composer_core::config::{ComposeConfig, PackMode};
use dtf_composer_core::manifest::to_json;
use dtf_composer_core::model::ResolvedItem;
use dtf_composer_core::pipeline::{compose_job, compose_layout, CancelToken, JobSpec, JobStatus};
use dtf_composer_core::sizing::SizingProfile;
use dtf_composer_core::storage::Storage;
use globset::{Glob, GlobSetBuilder};
use serde::Deserialize;
use tracing::{error, info};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "dtf-composer",
    about = "Compose DTF print bases from a resolved picklist job",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Show progress bars (disable with --no-progress or --quiet)
    #[arg(long, default_value_t = true, action=ArgAction::Set, global=true, help_heading = "Logging/UX")]
    progress: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: size, pack, render, write artifacts
    Compose(ComposeArgs),
    /// Layout-only: compute placements and export the manifest (no rasters)
    Layout(ComposeArgs),
}

#[derive(Parser, Debug, Clone)]
struct ComposeArgs {
    // Input/Output
    /// Job description file (YAML)
    #[arg(help_heading = "Input/Output")]
    job: PathBuf,
    /// Directory holding source artwork
    #[arg(short, long, default_value = "assets", help_heading = "Input/Output")]
    assets: PathBuf,
    /// Output root (artifacts land under tenant/<tenant>/outputs/<job>/)
    #[arg(short, long, default_value = "out", help_heading = "Input/Output")]
    out_dir: PathBuf,
    /// Include patterns (glob). If set, only artwork matching any pattern is usable
    #[arg(long, help_heading = "Input/Output")]
    include: Vec<String>,
    /// Exclude patterns (glob). Matching artwork is rejected
    #[arg(long, help_heading = "Input/Output")]
    exclude: Vec<String>,

    // Machine
    /// Override the job's packing mode: sequence | optimize
    #[arg(long, help_heading = "Machine")]
    mode: Option<String>,
    /// Override the machine's usable width (mm)
    #[arg(long, help_heading = "Machine")]
    usable_width: Option<f64>,
    /// Override the machine's max base length (mm)
    #[arg(long, help_heading = "Machine")]
    max_length: Option<f64>,
    /// Override the machine's minimum artwork DPI
    #[arg(long, help_heading = "Machine")]
    min_dpi: Option<u32>,
    /// Override the side margin (mm)
    #[arg(long, help_heading = "Machine")]
    side_margin: Option<f64>,
    /// Override the inter-item margin (mm)
    #[arg(long, help_heading = "Machine")]
    inter_margin: Option<f64>,
    /// Allow 90-degree rotation of items (accepted; the engine does not
    /// rotate in this revision)
    #[arg(long, default_value_t = false, help_heading = "Machine")]
    allow_rotate: bool,

    // Render
    /// Raster DPI of rendered bases
    #[arg(long, default_value_t = 300, help_heading = "Render")]
    render_dpi: u32,
    /// Pin clock-derived manifest fields for byte-stable reruns
    #[arg(long, default_value_t = false, help_heading = "Render")]
    reproducible: bool,
    /// Soft job deadline in seconds (0 disables)
    #[arg(long, default_value_t = 300, help_heading = "Render")]
    deadline: u64,

    // Export
    /// Compute the layout and manifest but write no artifacts
    #[arg(long, default_value_t = false, help_heading = "Export")]
    dry_run: bool,
    /// Also write the manifest JSON to this path
    #[arg(long, help_heading = "Export")]
    manifest_out: Option<PathBuf>,
}

/// Job description as checked in next to the picklist.
#[derive(Debug, Deserialize)]
struct JobFile {
    tenant: String,
    job: String,
    #[serde(default)]
    machine: Option<MachineFile>,
    #[serde(default)]
    mode: Option<String>,
    profiles: Vec<SizingProfile>,
    items: Vec<JobItem>,
}

#[derive(Debug, Deserialize)]
struct MachineFile {
    usable_width_mm: f64,
    max_length_mm: f64,
    min_dpi: u32,
}

#[derive(Debug, Deserialize)]
struct JobItem {
    sku: String,
    /// Artwork path relative to the assets directory.
    artwork: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
    /// Artwork DPI as recorded by the resolver.
    #[serde(default = "default_dpi")]
    dpi: u32,
}

fn default_quantity() -> u32 {
    1
}
fn default_dpi() -> u32 {
    300
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Compose(args) => run(args, cli.progress && !cli.quiet, false),
        Commands::Layout(args) => run(args, false, true),
    }
}

fn run(args: &ComposeArgs, show_progress: bool, layout_only: bool) -> anyhow::Result<()> {
    let job: JobFile = serde_yaml::from_str(
        &fs::read_to_string(&args.job)
            .with_context(|| format!("read job file {}", args.job.display()))?,
    )
    .with_context(|| format!("parse job file {}", args.job.display()))?;

    let cfg = build_config(args, &job)?;
    let allowed = gather_artwork(&args.assets, &args.include, &args.exclude)?;
    let items = resolve_items(&job, &args.assets, &allowed, show_progress)?;
    info!(
        tenant = %job.tenant,
        job = %job.job,
        items = items.len(),
        mode = ?cfg.mode,
        "job resolved"
    );

    if layout_only || args.dry_run {
        let out = compose_layout(&items, job.profiles.clone(), &cfg).map_err(|errors| {
            for e in &errors {
                error!(code = e.kind(), error = %e, "layout failed");
            }
            anyhow::anyhow!("layout failed with {} error(s)", errors.len())
        })?;
        let json = serde_json::to_string_pretty(&to_json(&out.manifest))?;
        match &args.manifest_out {
            Some(path) => {
                fs::write(path, &json).with_context(|| format!("write {}", path.display()))?;
                info!(?path, bases = out.layout.bases.len(), "manifest written");
            }
            None => println!("{json}"),
        }
        return Ok(());
    }

    let store = JobStorage {
        assets_root: args.assets.clone(),
        out_root: args.out_dir.clone(),
    };
    let spec = JobSpec::new(job.tenant.clone(), job.job.clone(), items, job.profiles, cfg);
    let outcome = compose_job(&spec, &store, &CancelToken::new());

    if let Some(path) = &args.manifest_out {
        let json = serde_json::to_string_pretty(&to_json(&outcome.manifest))?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    }

    match outcome.status {
        JobStatus::Completed => {
            info!(
                bases = outcome.manifest.packing.total_bases,
                total_length_mm = outcome.manifest.packing.total_length_mm,
                avg_utilization = outcome.manifest.packing.avg_utilization,
                artifacts = outcome.manifest.outputs.artifacts.len(),
                "job completed"
            );
            Ok(())
        }
        JobStatus::Failed => {
            for e in &outcome.manifest.errors {
                error!(code = %e.code, "{}", e.message);
            }
            anyhow::bail!(
                "job {} failed with {} error(s)",
                spec.job_id,
                outcome.manifest.errors.len()
            )
        }
    }
}

fn build_config(args: &ComposeArgs, job: &JobFile) -> anyhow::Result<ComposeConfig> {
    let mut builder = ComposeConfig::builder();
    if let Some(m) = &job.machine {
        builder = builder.machine(m.usable_width_mm, m.max_length_mm, m.min_dpi);
    }
    let mut cfg = builder
        .render_dpi(args.render_dpi)
        .reproducible(args.reproducible)
        .allow_rotate(args.allow_rotate)
        .soft_deadline_secs((args.deadline > 0).then_some(args.deadline))
        .build();
    if let Some(w) = args.usable_width {
        cfg.machine.usable_width_mm = w;
    }
    if let Some(l) = args.max_length {
        cfg.machine.max_length_mm = l;
    }
    if let Some(dpi) = args.min_dpi {
        cfg.machine.min_dpi = dpi;
    }
    if let Some(side) = args.side_margin {
        cfg.margins.side_mm = side;
    }
    if let Some(inter) = args.inter_margin {
        cfg.margins.inter_item_mm = inter;
    }
    let mode_str = args.mode.as_deref().or(job.mode.as_deref());
    if let Some(s) = mode_str {
        cfg.mode = s
            .parse::<PackMode>()
            .map_err(|_| anyhow::anyhow!("unknown mode: {s} (expected sequence | optimize)"))?;
    }
    Ok(cfg)
}

/// Artwork paths under `root` (relative, slash-separated) that pass the
/// include/exclude globs and look like raster images.
fn gather_artwork(
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Vec<String>> {
    let mut inc_set = None;
    if !include.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in include {
            b.add(Glob::new(pat)?);
        }
        inc_set = Some(b.build()?);
    }
    let mut exc_set = None;
    if !exclude.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in exclude {
            b.add(Glob::new(pat)?);
        }
        exc_set = Some(b.build()?);
    }
    let mut list: Vec<String> = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let p = entry.path();
        if !p.is_file() || !is_image(p) {
            continue;
        }
        let rel = match p.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if let Some(s) = &inc_set {
            if !s.is_match(&rel) {
                continue;
            }
        }
        if let Some(s) = &exc_set {
            if s.is_match(&rel) {
                continue;
            }
        }
        list.push(rel);
    }
    list.sort();
    Ok(list)
}

fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

/// Expands job items into resolved items: one record per physical print,
/// with pixel dimensions probed from the artwork headers.
fn resolve_items(
    job: &JobFile,
    assets: &Path,
    allowed: &[String],
    show_progress: bool,
) -> anyhow::Result<Vec<ResolvedItem>> {
    use indicatif::{ProgressBar, ProgressStyle};
    let bar = if show_progress {
        let b = ProgressBar::new(job.items.len() as u64);
        b.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} probing {pos}/{len} [{elapsed_precise}] {wide_msg}",
            )
            .expect("valid template"),
        );
        Some(b)
    } else {
        None
    };

    let mut resolved = Vec::new();
    let mut position: u32 = 0;
    for item in &job.items {
        if let Some(b) = &bar {
            b.set_message(item.artwork.clone());
        }
        if !allowed.iter().any(|a| a == &item.artwork) {
            anyhow::bail!(
                "artwork '{}' for sku '{}' not found under {} (or filtered out)",
                item.artwork,
                item.sku,
                assets.display()
            );
        }
        let path = assets.join(&item.artwork);
        let (w, h) = image::image_dimensions(&path)
            .with_context(|| format!("probe artwork {}", path.display()))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        for _ in 0..item.quantity.max(1) {
            position += 1;
            resolved.push(ResolvedItem {
                id: format!("{}-{position}", job.job),
                sku: item.sku.clone(),
                picklist_position: position,
                artwork_width_px: w,
                artwork_height_px: h,
                artwork_dpi: item.dpi,
                artwork_format: format.clone(),
                artwork_handle: item.artwork.clone(),
            });
        }
        if let Some(b) = &bar {
            b.inc(1);
        }
    }
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    Ok(resolved)
}

/// Reads artwork from the assets directory and writes artifacts under the
/// output root. The two trees are separate namespaces behind one contract.
struct JobStorage {
    assets_root: PathBuf,
    out_root: PathBuf,
}

impl Storage for JobStorage {
    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.assets_root.join(key))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.out_root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.out_root.join(key))
    }
}

/// `RUST_LOG` wins when set; otherwise the default level follows the
/// `-q`/`-v` flags.
fn init_tracing(quiet: bool, verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
