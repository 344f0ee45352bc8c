use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Comparison tolerance for millimeter coordinates.
pub const EPS_MM: f64 = 1e-6;

/// Axis-aligned rectangle in millimeters. `x,y` is top-left; `w,h` are sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RectMm {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RectMm {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
    /// Exclusive right edge coordinate (`x + w`).
    pub fn right(&self) -> f64 {
        self.x + self.w
    }
    /// Exclusive bottom edge coordinate (`y + h`).
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }
    pub fn area(&self) -> f64 {
        self.w * self.h
    }
    /// Grow by `d` on all four sides. Negative `d` shrinks.
    pub fn inflate(&self, d: f64) -> RectMm {
        RectMm::new(self.x - d, self.y - d, self.w + 2.0 * d, self.h + 2.0 * d)
    }
    /// True if the interiors overlap by more than the shared tolerance.
    pub fn intersects(&self, other: &RectMm) -> bool {
        self.x + EPS_MM < other.right()
            && other.x + EPS_MM < self.right()
            && self.y + EPS_MM < other.bottom()
            && other.y + EPS_MM < self.bottom()
    }
    /// Returns true if `r` is fully inside `self`, within tolerance.
    pub fn contains(&self, r: &RectMm) -> bool {
        r.x + EPS_MM >= self.x
            && r.y + EPS_MM >= self.y
            && r.right() <= self.right() + EPS_MM
            && r.bottom() <= self.bottom() + EPS_MM
    }
}

/// Raster formats accepted for placed artwork.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkFormat {
    Png,
    Jpeg,
}

impl FromStr for ArtworkFormat {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(()),
        }
    }
}

/// One picklist line after upstream resolution.
///
/// Quantity is already expanded by the resolver; the core always sees one
/// record per physical print. `picklist_position` preserves the 1-based
/// reading order of the source picklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub id: String,
    pub sku: String,
    pub picklist_position: u32,
    pub artwork_width_px: u32,
    pub artwork_height_px: u32,
    pub artwork_dpi: u32,
    /// Raw format string from the resolver (e.g. "png"); validated by sizing.
    pub artwork_format: String,
    /// Opaque storage key the renderer uses to fetch artwork bytes.
    pub artwork_handle: String,
}

/// A resolved item projected into final print dimensions.
#[derive(Debug, Clone)]
pub struct SizedItem {
    pub item: ResolvedItem,
    pub final_width_mm: f64,
    pub final_height_mm: f64,
    /// Total scale relative to the raw mm projection at the artwork's DPI.
    pub scale_applied: f64,
}

impl SizedItem {
    pub fn area_mm2(&self) -> f64 {
        self.final_width_mm * self.final_height_mm
    }
}

/// One item committed to one base at exact millimeter coordinates.
#[derive(Debug, Clone)]
pub struct Placement {
    pub item_id: String,
    pub sku: String,
    pub picklist_position: u32,
    pub rect: RectMm,
    pub scale_applied: f64,
    pub rotated: bool,
    pub artwork_handle: String,
}

/// One print canvas: fixed width, bounded length, a list of placements.
#[derive(Debug, Clone)]
pub struct Base {
    /// 1-based, monotonically increasing within a job.
    pub index: u32,
    pub width_mm: f64,
    /// Maximum `y + h` over placements so far.
    pub content_length_mm: f64,
    pub placements: Vec<Placement>,
}

impl Base {
    /// Sum of placement areas over the base area, in [0, 1].
    pub fn utilization(&self) -> f64 {
        if self.content_length_mm <= EPS_MM {
            return 0.0;
        }
        let used: f64 = self.placements.iter().map(|p| p.rect.area()).sum();
        used / (self.width_mm * self.content_length_mm)
    }
}

/// Result of the packing stage: finalized bases in emission order.
#[derive(Debug, Clone)]
pub struct PackLayout {
    pub bases: Vec<Base>,
}

impl PackLayout {
    pub fn total_length_mm(&self) -> f64 {
        self.bases.iter().map(|b| b.content_length_mm).sum()
    }
    pub fn avg_utilization(&self) -> f64 {
        if self.bases.is_empty() {
            return 0.0;
        }
        self.bases.iter().map(|b| b.utilization()).sum::<f64>() / self.bases.len() as f64
    }
    pub fn placement_count(&self) -> usize {
        self.bases.iter().map(|b| b.placements.len()).sum()
    }
}
