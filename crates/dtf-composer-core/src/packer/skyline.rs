use crate::model::{RectMm, EPS_MM};

/// One segment of the skyline: the lowest free Y over `[x, x + w)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkylineSegment {
    pub x: f64,
    pub w: f64,
    pub y: f64,
}

impl SkylineSegment {
    #[inline]
    fn right(&self) -> f64 {
        self.x + self.w
    }
}

/// Upper envelope of everything placed on one base, discretized along X by
/// item boundaries. Segments are contiguous and cover the usable span
/// `[side_margin, width - side_margin]` exactly; adjacent segments with
/// equal height are merged.
///
/// Segment widths are item widths only. The horizontal inter-item margin is
/// applied to the candidate placement coordinate, never baked into a
/// segment, and the committed height already includes the vertical
/// inter-item margin.
#[derive(Debug, Clone)]
pub struct Skyline {
    segments: Vec<SkylineSegment>,
    left: f64,
    right: f64,
    max_length_mm: f64,
    side_margin_mm: f64,
    inter_item_mm: f64,
}

impl Skyline {
    pub fn new(
        usable_width_mm: f64,
        max_length_mm: f64,
        side_margin_mm: f64,
        inter_item_mm: f64,
    ) -> Self {
        let left = side_margin_mm;
        let right = usable_width_mm - side_margin_mm;
        Self {
            segments: vec![SkylineSegment {
                x: left,
                w: right - left,
                y: side_margin_mm,
            }],
            left,
            right,
            max_length_mm,
            side_margin_mm,
            inter_item_mm,
        }
    }

    /// Re-initialize for a fresh base.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.segments.push(SkylineSegment {
            x: self.left,
            w: self.right - self.left,
            y: self.side_margin_mm,
        });
    }

    /// Lowest placement for a `w x h` item: minimum Y, ties broken by
    /// smaller X. Returns `None` when no position keeps the item within the
    /// base length cap.
    ///
    /// Candidate left edges are segment starts, shifted right by the
    /// inter-item margin unless the segment begins at the base's left wall.
    pub fn find_lowest(&self, w: f64, h: f64) -> Option<(f64, f64)> {
        let mut best: Option<(f64, f64)> = None;
        for (i, seg) in self.segments.iter().enumerate() {
            let x = if seg.x <= self.left + EPS_MM {
                self.left
            } else {
                seg.x + self.inter_item_mm
            };
            if x + w > self.right + EPS_MM {
                continue;
            }
            let y = self.clearance_height(i, x, w);
            if y + h + self.side_margin_mm > self.max_length_mm + EPS_MM {
                continue;
            }
            let lower = match best {
                None => true,
                Some((_, best_y)) => y < best_y - EPS_MM,
            };
            if lower {
                best = Some((x, y));
            }
        }
        best
    }

    /// Max segment height over `[x, x + w)` plus the trailing clearance
    /// strip of one inter-item margin (clamped at the right wall). The
    /// strip keeps an item that would end within margin distance of a
    /// taller neighbor from tucking in beside it.
    fn clearance_height(&self, start: usize, x: f64, w: f64) -> f64 {
        let end = (x + w + self.inter_item_mm).min(self.right);
        let mut y = self.side_margin_mm;
        for seg in &self.segments[start..] {
            if seg.x >= end - EPS_MM {
                break;
            }
            if seg.right() <= x + EPS_MM {
                continue;
            }
            y = y.max(seg.y);
        }
        y
    }

    /// Commit a placed rectangle: insert a segment of the item's width at
    /// `bottom + inter_item_margin`, splitting the covered segments at the
    /// rectangle's edges and merging equal-height neighbors afterwards.
    pub fn commit(&mut self, rect: &RectMm) {
        let start = rect.x;
        let end = rect.right();
        let new_y = rect.bottom() + self.inter_item_mm;
        let mut out: Vec<SkylineSegment> = Vec::with_capacity(self.segments.len() + 2);
        let mut inserted = false;
        for seg in &self.segments {
            if seg.right() <= start + EPS_MM {
                out.push(*seg);
            } else if seg.x >= end - EPS_MM {
                if !inserted {
                    out.push(SkylineSegment {
                        x: start,
                        w: end - start,
                        y: new_y,
                    });
                    inserted = true;
                }
                out.push(*seg);
            } else {
                // Overlapped: keep the uncovered flanks.
                if seg.x + EPS_MM < start {
                    out.push(SkylineSegment {
                        x: seg.x,
                        w: start - seg.x,
                        y: seg.y,
                    });
                }
                if !inserted {
                    out.push(SkylineSegment {
                        x: start,
                        w: end - start,
                        y: new_y,
                    });
                    inserted = true;
                }
                if seg.right() > end + EPS_MM {
                    out.push(SkylineSegment {
                        x: end,
                        w: seg.right() - end,
                        y: seg.y,
                    });
                }
            }
        }
        if !inserted {
            out.push(SkylineSegment {
                x: start,
                w: end - start,
                y: new_y,
            });
        }
        self.segments = out;
        self.merge();
    }

    fn merge(&mut self) {
        let mut i = 1;
        while i < self.segments.len() {
            if (self.segments[i - 1].y - self.segments[i].y).abs() <= EPS_MM {
                self.segments[i - 1].w = self.segments[i].right() - self.segments[i - 1].x;
                self.segments.remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn segments(&self) -> &[SkylineSegment] {
        &self.segments
    }

    /// `(x, w, y)` triples for diagnostics.
    pub fn dump(&self) -> Vec<(f64, f64, f64)> {
        self.segments.iter().map(|s| (s.x, s.w, s.y)).collect()
    }
}
