//! Sizing engine: projects raw artwork into target print dimensions.
//!
//! Profile selection is by longest normalized SKU prefix with an optional
//! per-tenant default; scaling preserves aspect and falls back to the usable
//! base width when a target width does not fit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ComposeConfig;
use crate::error::ComposeError;
use crate::model::{ArtworkFormat, ResolvedItem, SizedItem, EPS_MM};

pub const MM_PER_INCH: f64 = 25.4;

/// Maps a SKU prefix to a target print width. At most one profile per
/// tenant carries `is_default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingProfile {
    pub sku_prefix: String,
    pub target_width_mm: f64,
    #[serde(default)]
    pub is_default: bool,
}

/// Immutable snapshot of a tenant's profiles, taken at job start so
/// mid-job catalog edits cannot affect sizing.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    /// `(normalized_prefix, profile)`, longest prefix first.
    profiles: Vec<(String, SizingProfile)>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<SizingProfile>) -> Self {
        let mut profiles: Vec<(String, SizingProfile)> = profiles
            .into_iter()
            .map(|p| (normalize_sku(&p.sku_prefix), p))
            .collect();
        profiles.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { profiles }
    }

    /// Longest-prefix match on the normalized SKU, falling back to the
    /// default profile.
    pub fn select(&self, sku: &str) -> Option<&SizingProfile> {
        let norm = normalize_sku(sku);
        self.profiles
            .iter()
            .find(|(prefix, _)| !prefix.is_empty() && norm.starts_with(prefix.as_str()))
            .map(|(_, p)| p)
            .or_else(|| {
                self.profiles
                    .iter()
                    .find(|(_, p)| p.is_default)
                    .map(|(_, p)| p)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Lowercase and strip `-`, `_` and spaces.
pub fn normalize_sku(sku: &str) -> String {
    sku.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Non-fatal sizing note, recorded on the manifest in picklist order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeWarning {
    pub sku: String,
    pub picklist_position: u32,
    pub code: String,
    pub message: String,
}

pub const WARN_SCALED_DOWN: &str = "SCALED_DOWN_TO_FIT_WIDTH";

/// Sizes a single item against the machine and the tenant's profiles.
///
/// Any returned warning is appended to `warnings`; a hard violation fails
/// the item (and with it, the job).
pub fn size_item(
    item: &ResolvedItem,
    profiles: &ProfileSet,
    cfg: &ComposeConfig,
    warnings: &mut Vec<SizeWarning>,
) -> crate::error::Result<SizedItem> {
    item.artwork_format
        .parse::<ArtworkFormat>()
        .map_err(|_| ComposeError::UnsupportedFormat {
            sku: item.sku.clone(),
            format: item.artwork_format.clone(),
        })?;

    let profile = profiles
        .select(&item.sku)
        .ok_or_else(|| ComposeError::NoProfile {
            sku: item.sku.clone(),
        })?;

    if item.artwork_dpi < cfg.machine.min_dpi {
        return Err(ComposeError::LowDpi {
            sku: item.sku.clone(),
            dpi: item.artwork_dpi,
            min_dpi: cfg.machine.min_dpi,
        });
    }

    let raw_width_mm = item.artwork_width_px as f64 * MM_PER_INCH / item.artwork_dpi as f64;
    let raw_height_mm = item.artwork_height_px as f64 * MM_PER_INCH / item.artwork_dpi as f64;

    let k = profile.target_width_mm / raw_width_mm;
    let mut width_mm = profile.target_width_mm;
    let mut height_mm = raw_height_mm * k;
    let mut scale = k;

    let usable = cfg.usable_margin_width_mm();
    if width_mm > usable + EPS_MM {
        let k2 = usable / width_mm;
        width_mm *= k2;
        height_mm *= k2;
        scale *= k2;
        warnings.push(SizeWarning {
            sku: item.sku.clone(),
            picklist_position: item.picklist_position,
            code: WARN_SCALED_DOWN.into(),
            message: format!(
                "scaled down {:.1}% to fit the {:.1} mm usable width",
                (1.0 - k2) * 100.0,
                usable
            ),
        });
    }

    if height_mm + 2.0 * cfg.margins.side_mm > cfg.machine.max_length_mm + EPS_MM {
        return Err(ComposeError::ItemExceedsMaxLength {
            sku: item.sku.clone(),
            height_mm,
            max_length_mm: cfg.machine.max_length_mm,
        });
    }

    debug!(
        sku = %item.sku,
        position = item.picklist_position,
        width_mm,
        height_mm,
        scale,
        "item sized"
    );

    Ok(SizedItem {
        item: item.clone(),
        final_width_mm: width_mm,
        final_height_mm: height_mm,
        scale_applied: scale,
    })
}

/// Sizes every item, in picklist order.
///
/// There is no skip-and-continue: one invalid item poisons the job, and
/// all per-item failures are aggregated so the caller can report them
/// together.
pub fn size_items(
    items: &[ResolvedItem],
    profiles: &ProfileSet,
    cfg: &ComposeConfig,
) -> std::result::Result<(Vec<SizedItem>, Vec<SizeWarning>), Vec<ComposeError>> {
    let mut sized = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for item in items {
        match size_item(item, profiles, cfg, &mut warnings) {
            Ok(s) => sized.push(s),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok((sized, warnings))
    } else {
        Err(errors)
    }
}
