//! Packing engine: places sized items onto fixed-width bases.
//!
//! The two strategies (`sequence`, `optimize`) share one per-base loop and
//! differ only in the pre-ordering applied to the items. Bases are emitted
//! strictly in order; once the loop moves past a base its placement set is
//! immutable, and items are never backtracked across bases.

pub mod skyline;

use tracing::{info, warn};

use crate::config::{ComposeConfig, PackMode};
use crate::error::{ComposeError, Result};
use crate::model::{Base, PackLayout, Placement, RectMm, SizedItem};
use self::skyline::Skyline;

/// A base that is still accepting placements, together with the skyline it
/// owns. The skyline is dropped when the base is finalized.
struct OpenBase {
    base: Base,
    skyline: Skyline,
}

impl OpenBase {
    fn new(index: u32, cfg: &ComposeConfig) -> Self {
        Self {
            base: Base {
                index,
                width_mm: cfg.machine.usable_width_mm,
                content_length_mm: 0.0,
                placements: Vec::new(),
            },
            skyline: Skyline::new(
                cfg.machine.usable_width_mm,
                cfg.machine.max_length_mm,
                cfg.margins.side_mm,
                cfg.margins.inter_item_mm,
            ),
        }
    }
}

enum Fit {
    Placed,
    NoRoom,
    Collision,
}

/// Item indices in placement order for the given mode.
///
/// `sequence` follows ascending picklist position. `optimize` sorts by
/// descending area, then descending height, then ascending picklist
/// position so ties stay stable across runs.
fn order_items(items: &[SizedItem], mode: PackMode) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    match mode {
        PackMode::Sequence => {
            order.sort_by_key(|&i| items[i].item.picklist_position);
        }
        PackMode::Optimize => {
            order.sort_by(|&a, &b| {
                let (ia, ib) = (&items[a], &items[b]);
                ib.area_mm2()
                    .total_cmp(&ia.area_mm2())
                    .then(ib.final_height_mm.total_cmp(&ia.final_height_mm))
                    .then(ia.item.picklist_position.cmp(&ib.item.picklist_position))
            });
        }
    }
    order
}

/// Packs sized items into bases. Fails with `ItemExceedsBase` when an item
/// cannot be placed even on a fresh base, and with `InternalCollision` if
/// the anti-overlap failsafe cannot recover by rolling over.
pub fn pack_items(items: &[SizedItem], cfg: &ComposeConfig) -> Result<PackLayout> {
    if items.is_empty() {
        return Err(ComposeError::Empty);
    }
    let order = order_items(items, cfg.mode);
    let mut bases: Vec<Base> = Vec::new();
    let mut open: Option<OpenBase> = None;

    for idx in order {
        place_item(&items[idx], &mut open, &mut bases, cfg)?;
    }
    if let Some(ob) = open.take() {
        bases.push(finalize(ob));
    }
    Ok(PackLayout { bases })
}

fn place_item(
    item: &SizedItem,
    open: &mut Option<OpenBase>,
    bases: &mut Vec<Base>,
    cfg: &ComposeConfig,
) -> Result<()> {
    // A fresh base either fits the item or fails outright below, so this
    // loop runs at most twice: current base, then one retry after rollover.
    loop {
        let next_index = bases.len() as u32 + 1;
        let ob = open.get_or_insert_with(|| OpenBase::new(next_index, cfg));
        let empty = ob.base.placements.is_empty();
        match try_place(item, ob, cfg) {
            Fit::Placed => return Ok(()),
            Fit::NoRoom if empty => {
                return Err(ComposeError::ItemExceedsBase {
                    sku: item.item.sku.clone(),
                    width_mm: item.final_width_mm,
                    height_mm: item.final_height_mm,
                });
            }
            Fit::Collision if empty => {
                return Err(ComposeError::InternalCollision {
                    base_index: ob.base.index,
                    sku: item.item.sku.clone(),
                    skyline: ob.skyline.dump(),
                });
            }
            Fit::NoRoom | Fit::Collision => {
                let done = open.take().expect("open base exists");
                bases.push(finalize(done));
            }
        }
    }
}

fn try_place(item: &SizedItem, ob: &mut OpenBase, cfg: &ComposeConfig) -> Fit {
    let (w, h) = (item.final_width_mm, item.final_height_mm);
    let Some((x, y)) = ob.skyline.find_lowest(w, h) else {
        return Fit::NoRoom;
    };
    let rect = RectMm::new(x, y, w, h);

    // Failsafe: re-verify the half-margin-inflated candidate against every
    // committed placement. Must not fire when the skyline is correct.
    let half = cfg.margins.inter_item_mm / 2.0;
    let inflated = rect.inflate(half);
    if ob
        .base
        .placements
        .iter()
        .any(|p| inflated.intersects(&p.rect.inflate(half)))
    {
        warn!(
            base = ob.base.index,
            sku = %item.item.sku,
            x, y, w, h,
            "collision failsafe fired; rolling base"
        );
        return Fit::Collision;
    }

    ob.skyline.commit(&rect);
    ob.base.content_length_mm = ob.base.content_length_mm.max(rect.bottom());
    ob.base.placements.push(Placement {
        item_id: item.item.id.clone(),
        sku: item.item.sku.clone(),
        picklist_position: item.item.picklist_position,
        rect,
        scale_applied: item.scale_applied,
        rotated: false,
        artwork_handle: item.item.artwork_handle.clone(),
    });
    Fit::Placed
}

fn finalize(ob: OpenBase) -> Base {
    let base = ob.base;
    info!(
        index = base.index,
        items = base.placements.len(),
        length_mm = base.content_length_mm,
        utilization = base.utilization(),
        "base finalized"
    );
    base
}
