use serde::Serialize;

use crate::geometry::{to_source, Point, ScaleRatio};

pub const QUAD_POINTS: usize = 4;

/// A finalized four-point region. Display points are kept exactly as clicked
/// and are what gets drawn; source points are derived with the ratio that was
/// in effect at click time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedQuad {
    pub display: [Point; QUAD_POINTS],
    pub source: [Point; QUAD_POINTS],
}

/// Outcome of one click, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointAdded {
    /// Slot written, 1-based.
    pub index: usize,
    pub display: Point,
    pub source: Point,
    pub committed: bool,
}

/// Ring buffer of four click points plus the committed quadrilateral.
///
/// Every fourth click closes the current cycle: the slots are snapshotted into
/// the annotation set (replacing what was there) and the cursor restarts.
#[derive(Debug, Clone, Default)]
pub struct AnnotationState {
    slots: [Point; QUAD_POINTS],
    source_slots: [Point; QUAD_POINTS],
    cursor: usize,
    committed: Vec<CommittedQuad>,
}

impl AnnotationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, display: Point, ratio: ScaleRatio) -> PointAdded {
        let slot = self.cursor % QUAD_POINTS;
        let source = to_source(display, ratio);
        self.slots[slot] = display;
        self.source_slots[slot] = source;
        self.cursor += 1;

        let committed = self.cursor == QUAD_POINTS;
        if committed {
            self.committed.clear();
            self.committed.push(CommittedQuad {
                display: self.slots,
                source: self.source_slots,
            });
            self.cursor = 0;
        }

        PointAdded {
            index: slot + 1,
            display,
            source,
            committed,
        }
    }

    pub fn reset(&mut self) {
        self.slots = [Point::default(); QUAD_POINTS];
        self.source_slots = [Point::default(); QUAD_POINTS];
        self.cursor = 0;
        self.committed.clear();
    }

    /// True when any slot of the in-progress buffer holds a non-zero point.
    pub fn has_pending_points(&self) -> bool {
        self.slots.iter().any(|p| !p.is_zero())
    }

    /// The slots placed in the current cycle.
    pub fn pending_points(&self) -> &[Point] {
        &self.slots[..self.cursor]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn committed(&self) -> &[CommittedQuad] {
        &self.committed
    }
}
