//! Pipeline driver: orchestrates sizing → packing → rendering → writes →
//! manifest for one job.
//!
//! The driver is a linear stage sequence; packing is inherently serial, so
//! nothing inside a job is pipelined. Failures never cross the boundary as
//! panics or bare `Err`s: `compose_job` always returns a [`JobOutcome`]
//! whose manifest carries the aggregated structured errors.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::ComposeConfig;
use crate::error::ComposeError;
use crate::manifest::{JobError, Manifest, OutputsReport, PackingReport, SizingReport};
use crate::model::{PackLayout, ResolvedItem, SizedItem};
use crate::packer::pack_items;
use crate::render::{render_base, RenderedBase};
use crate::sizing::{size_items, ProfileSet, SizeWarning, SizingProfile};
use crate::storage::{
    artifact_key, manifest_key, read_with_retry, write_with_retry, RetryPolicy, Storage,
};

/// Everything the core consumes to run one job. Collaborator data (items,
/// profiles) is snapshotted here at job start.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub tenant_id: String,
    pub job_id: String,
    pub items: Vec<ResolvedItem>,
    pub profiles: Vec<SizingProfile>,
    pub config: ComposeConfig,
    pub retry: RetryPolicy,
}

impl JobSpec {
    pub fn new(
        tenant_id: impl Into<String>,
        job_id: impl Into<String>,
        items: Vec<ResolvedItem>,
        profiles: Vec<SizingProfile>,
        config: ComposeConfig,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_id: job_id.into(),
            items,
            profiles,
            config,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative cancellation flag, observed between stages and between
/// bases. A base that is mid-render completes or is discarded whole.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Terminal result of a job. Either all base artifacts were written, or
/// none were and `manifest.errors` says why.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub manifest: Manifest,
}

struct Limits<'a> {
    started: Instant,
    deadline: Option<Duration>,
    cancel: &'a CancelToken,
}

impl Limits<'_> {
    fn check(&self) -> crate::error::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if self.started.elapsed() > deadline {
                return Err(ComposeError::Timeout {
                    deadline_secs: deadline.as_secs(),
                });
            }
        }
        Ok(())
    }
}

/// Runs the full pipeline for one job and writes artifacts plus the
/// manifest through `store`.
#[instrument(skip_all, fields(tenant = %spec.tenant_id, job = %spec.job_id))]
pub fn compose_job(spec: &JobSpec, store: &dyn Storage, cancel: &CancelToken) -> JobOutcome {
    let started = Instant::now();
    let limits = Limits {
        started,
        deadline: spec.config.soft_deadline_secs.map(Duration::from_secs),
        cancel,
    };
    match run_stages(spec, store, &limits) {
        Ok(outcome) => outcome,
        Err(failure) => {
            let errors: Vec<JobError> = failure.errors.iter().map(JobError::from).collect();
            for e in &failure.errors {
                warn!(code = e.kind(), error = %e, "job failed");
            }
            let sizing = failure.sizing.unwrap_or_else(|| {
                let invalid = failure.errors.iter().filter(|e| is_item_error(e)).count();
                SizingReport::new(spec.items.len(), invalid, Vec::new())
            });
            JobOutcome {
                status: JobStatus::Failed,
                manifest: Manifest::failed(
                    &spec.config,
                    sizing,
                    errors,
                    elapsed_secs(started, &spec.config),
                ),
            }
        }
    }
}

/// Computes sized items and placements without touching artwork bytes or
/// storage. The geometry twin of `compose_job`, used by tests and dry runs.
pub fn compose_layout(
    items: &[ResolvedItem],
    profiles: Vec<SizingProfile>,
    cfg: &ComposeConfig,
) -> std::result::Result<LayoutOutput, Vec<ComposeError>> {
    cfg.validate().map_err(|e| vec![e])?;
    if items.is_empty() {
        return Err(vec![ComposeError::Empty]);
    }
    let started = Instant::now();
    let profiles = ProfileSet::new(profiles);
    let (sized, warnings) = size_items(items, &profiles, cfg)?;
    let layout = pack_items(&sized, cfg).map_err(|e| vec![e])?;
    let manifest = Manifest {
        mode: cfg.mode,
        machine: cfg.machine,
        margins: cfg.margins,
        processing_time_seconds: elapsed_secs(started, cfg),
        sizing: SizingReport::new(items.len(), 0, warnings.clone()),
        packing: PackingReport::from_layout(cfg.mode, &layout),
        outputs: OutputsReport {
            artifacts: Vec::new(),
        },
        errors: Vec::new(),
    };
    Ok(LayoutOutput {
        layout,
        warnings,
        manifest,
    })
}

#[derive(Debug)]
pub struct LayoutOutput {
    pub layout: PackLayout,
    pub warnings: Vec<SizeWarning>,
    pub manifest: Manifest,
}

struct Failure {
    errors: Vec<ComposeError>,
    sizing: Option<SizingReport>,
}

impl Failure {
    fn one(e: ComposeError) -> Self {
        Self {
            errors: vec![e],
            sizing: None,
        }
    }
}

fn run_stages(
    spec: &JobSpec,
    store: &dyn Storage,
    limits: &Limits<'_>,
) -> std::result::Result<JobOutcome, Failure> {
    spec.config.validate().map_err(Failure::one)?;
    if spec.items.is_empty() {
        return Err(Failure::one(ComposeError::Empty));
    }

    // Stage 1: size every item against the profile snapshot.
    let profiles = ProfileSet::new(spec.profiles.clone());
    let (sized, warnings) = size_items(&spec.items, &profiles, &spec.config).map_err(|errors| {
        let sizing = SizingReport::new(spec.items.len(), errors.len(), Vec::new());
        Failure {
            errors,
            sizing: Some(sizing),
        }
    })?;
    let sizing_report = SizingReport::new(spec.items.len(), 0, warnings);
    limits.check().map_err(Failure::one)?;

    // Stage 2: pack.
    let layout = pack_items(&sized, &spec.config).map_err(Failure::one)?;
    info!(
        bases = layout.bases.len(),
        placements = layout.placement_count(),
        "packing complete"
    );
    limits.check().map_err(Failure::one)?;

    // Stage 3: render every base in memory. Nothing is written yet, so a
    // failure here leaves storage untouched.
    let artwork = load_artwork(&sized, store, spec.retry).map_err(Failure::one)?;
    let mut rendered: Vec<RenderedBase> = Vec::with_capacity(layout.bases.len());
    for base in &layout.bases {
        limits.check().map_err(Failure::one)?;
        rendered.push(render_base(base, &artwork, &spec.config).map_err(Failure::one)?);
    }

    // Stage 4: write artifacts, then the manifest. All or nothing.
    let artifacts = write_artifacts(spec, store, &rendered).map_err(Failure::one)?;

    let manifest = Manifest {
        mode: spec.config.mode,
        machine: spec.config.machine,
        margins: spec.config.margins,
        processing_time_seconds: elapsed_secs(limits.started, &spec.config),
        sizing: sizing_report,
        packing: PackingReport::from_layout(spec.config.mode, &layout),
        outputs: OutputsReport {
            artifacts: artifacts.clone(),
        },
        errors: Vec::new(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| {
        Failure::one(ComposeError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            e,
        )))
    })?;
    let key = manifest_key(&spec.tenant_id, &spec.job_id);
    if let Err(e) = write_with_retry(store, &key, &manifest_bytes, spec.retry) {
        cleanup(store, &artifacts);
        return Err(Failure::one(e));
    }

    info!(
        artifacts = artifacts.len(),
        seconds = manifest.processing_time_seconds,
        "job completed"
    );
    Ok(JobOutcome {
        status: JobStatus::Completed,
        manifest,
    })
}

/// Reads and decodes each distinct artwork handle once.
fn load_artwork(
    sized: &[SizedItem],
    store: &dyn Storage,
    retry: RetryPolicy,
) -> crate::error::Result<HashMap<String, DynamicImage>> {
    let mut artwork = HashMap::new();
    for s in sized {
        let handle = &s.item.artwork_handle;
        if artwork.contains_key(handle) {
            continue;
        }
        let bytes = read_with_retry(store, handle, retry)?;
        let img = image::load_from_memory(&bytes)?;
        artwork.insert(handle.clone(), img);
    }
    Ok(artwork)
}

fn write_artifacts(
    spec: &JobSpec,
    store: &dyn Storage,
    rendered: &[RenderedBase],
) -> crate::error::Result<Vec<String>> {
    let mut written: Vec<String> = Vec::with_capacity(rendered.len());
    for page in rendered {
        let key = artifact_key(&spec.tenant_id, &spec.job_id, page.index);
        if let Err(e) = write_with_retry(store, &key, &page.png, spec.retry) {
            cleanup(store, &written);
            return Err(e);
        }
        written.push(key);
    }
    Ok(written)
}

/// Best-effort removal of partially written artifacts so a failed job
/// leaves no output behind.
fn cleanup(store: &dyn Storage, keys: &[String]) {
    for key in keys {
        if let Err(e) = store.remove(key) {
            warn!(key = %key, error = %e, "failed to clean up artifact");
        }
    }
}

fn elapsed_secs(started: Instant, cfg: &ComposeConfig) -> f64 {
    if cfg.reproducible {
        0.0
    } else {
        started.elapsed().as_secs_f64()
    }
}

fn is_item_error(e: &ComposeError) -> bool {
    matches!(
        e,
        ComposeError::NoProfile { .. }
            | ComposeError::LowDpi { .. }
            | ComposeError::UnsupportedFormat { .. }
            | ComposeError::ItemExceedsMaxLength { .. }
            | ComposeError::ItemExceedsBase { .. }
    )
}
