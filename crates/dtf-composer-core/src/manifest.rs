//! Job manifest: the authoritative audit record of every sizing and
//! placement decision, serialized as JSON alongside the rendered bases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Machine, Margins, PackMode};
use crate::error::ComposeError;
use crate::model::PackLayout;
use crate::sizing::{SizeWarning, WARN_SCALED_DOWN};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub mode: PackMode,
    pub machine: Machine,
    pub margins: Margins,
    pub processing_time_seconds: f64,
    pub sizing: SizingReport,
    pub packing: PackingReport,
    pub outputs: OutputsReport,
    pub errors: Vec<JobError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingReport {
    pub total_items: usize,
    pub valid_items: usize,
    pub invalid_items: usize,
    pub scaled_items: usize,
    pub warnings: Vec<SizeWarning>,
}

impl SizingReport {
    pub fn new(total_items: usize, invalid_items: usize, mut warnings: Vec<SizeWarning>) -> Self {
        warnings.sort_by_key(|w| w.picklist_position);
        let scaled_items = warnings
            .iter()
            .filter(|w| w.code == WARN_SCALED_DOWN)
            .count();
        Self {
            total_items,
            valid_items: total_items - invalid_items,
            invalid_items,
            scaled_items,
            warnings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingReport {
    pub mode: PackMode,
    pub total_bases: usize,
    pub total_length_mm: f64,
    pub avg_utilization: f64,
    pub bases: Vec<BaseReport>,
}

impl PackingReport {
    pub fn from_layout(mode: PackMode, layout: &PackLayout) -> Self {
        Self {
            mode,
            total_bases: layout.bases.len(),
            total_length_mm: layout.total_length_mm(),
            avg_utilization: layout.avg_utilization(),
            bases: layout
                .bases
                .iter()
                .map(|b| BaseReport {
                    index: b.index,
                    width_mm: b.width_mm,
                    length_mm: b.content_length_mm,
                    utilization: b.utilization(),
                    items_count: b.placements.len(),
                    placements: b
                        .placements
                        .iter()
                        .map(|p| PlacementReport {
                            item_id: p.item_id.clone(),
                            sku: p.sku.clone(),
                            picklist_position: p.picklist_position,
                            x_mm: p.rect.x,
                            y_mm: p.rect.y,
                            width_mm: p.rect.w,
                            height_mm: p.rect.h,
                            scale_applied: p.scale_applied,
                            rotated: p.rotated,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn empty(mode: PackMode) -> Self {
        Self {
            mode,
            total_bases: 0,
            total_length_mm: 0.0,
            avg_utilization: 0.0,
            bases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseReport {
    pub index: u32,
    pub width_mm: f64,
    pub length_mm: f64,
    pub utilization: f64,
    pub items_count: usize,
    pub placements: Vec<PlacementReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementReport {
    pub item_id: String,
    pub sku: String,
    pub picklist_position: u32,
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
    pub scale_applied: f64,
    pub rotated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsReport {
    pub artifacts: Vec<String>,
}

/// Structured error entry, persisted verbatim on the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl From<&ComposeError> for JobError {
    fn from(e: &ComposeError) -> Self {
        Self {
            code: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl Manifest {
    /// Manifest for a job that never produced artifacts.
    pub fn failed(
        cfg: &crate::config::ComposeConfig,
        sizing: SizingReport,
        errors: Vec<JobError>,
        processing_time_seconds: f64,
    ) -> Self {
        Self {
            mode: cfg.mode,
            machine: cfg.machine,
            margins: cfg.margins,
            processing_time_seconds,
            sizing,
            packing: PackingReport::empty(cfg.mode),
            outputs: OutputsReport {
                artifacts: Vec::new(),
            },
            errors,
        }
    }
}

/// Serialize the manifest as a JSON value.
pub fn to_json(manifest: &Manifest) -> Value {
    serde_json::to_value(manifest).unwrap_or(Value::Null)
}
