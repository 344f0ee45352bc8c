//! Base renderer: composites placed artwork onto print-ready raster pages.
//!
//! The output coordinate system is millimeters mapped to pixels at the
//! configured render DPI. Placements are drawn at their exact committed
//! coordinates and exact sized dimensions; source transparency is copied
//! through untouched and nothing else is drawn (no background, no marks).

use std::collections::HashMap;

use image::codecs::png::PngEncoder;
use image::{imageops, DynamicImage, RgbaImage};
use tracing::debug;

use crate::config::ComposeConfig;
use crate::error::{ComposeError, Result};
use crate::model::Base;
use crate::sizing::MM_PER_INCH;

pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    (mm / MM_PER_INCH * dpi as f64).round() as u32
}

/// One rendered artifact, ready to hand to storage.
#[derive(Debug)]
pub struct RenderedBase {
    pub index: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub png: Vec<u8>,
}

/// Renders one finalized base. `artwork` maps artwork handles to decoded
/// images; every handle referenced by the base's placements must be
/// present.
///
/// Output is deterministic for identical inputs: the PNG stream carries no
/// clock- or environment-derived fields.
pub fn render_base(
    base: &Base,
    artwork: &HashMap<String, DynamicImage>,
    cfg: &ComposeConfig,
) -> Result<RenderedBase> {
    let dpi = cfg.render_dpi;
    let width_px = mm_to_px(base.width_mm, dpi);
    let height_px = mm_to_px(base.content_length_mm + cfg.margins.side_mm, dpi);
    let mut canvas = RgbaImage::new(width_px, height_px);

    for p in &base.placements {
        let src = artwork
            .get(&p.artwork_handle)
            .ok_or_else(|| ComposeError::RenderFail {
                base_index: base.index,
                reason: format!("no artwork loaded for handle '{}'", p.artwork_handle),
            })?;
        let dw = mm_to_px(p.rect.w, dpi).max(1);
        let dh = mm_to_px(p.rect.h, dpi).max(1);
        let resized = imageops::resize(&src.to_rgba8(), dw, dh, imageops::FilterType::Lanczos3);
        let dx = mm_to_px(p.rect.x, dpi);
        let dy = mm_to_px(p.rect.y, dpi);
        blit_rgba(&resized, &mut canvas, dx, dy);
        debug!(
            base = base.index,
            sku = %p.sku,
            dx, dy, dw, dh,
            "placement drawn"
        );
    }

    let mut png = Vec::new();
    canvas
        .write_with_encoder(PngEncoder::new(&mut png))
        .map_err(|e| ComposeError::RenderFail {
            base_index: base.index,
            reason: format!("png encoding failed: {e}"),
        })?;
    Ok(RenderedBase {
        index: base.index,
        width_px,
        height_px,
        png,
    })
}

/// Copy `src` into `canvas` at `(dx, dy)` with bounds guards. Placements
/// never overlap, so a straight pixel copy preserves source alpha.
fn blit_rgba(src: &RgbaImage, canvas: &mut RgbaImage, dx: u32, dy: u32) {
    let (cw, ch) = canvas.dimensions();
    for (xx, yy, px) in src.enumerate_pixels() {
        if dx + xx < cw && dy + yy < ch {
            canvas.put_pixel(dx + xx, dy + yy, *px);
        }
    }
}
