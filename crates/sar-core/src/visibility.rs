//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Fog-of-war bitmap. Cells only ever go from unscanned to scanned within a session.

use parking_lot::RwLock;
use sar_msg::CellCoord;
use tracing::trace;

use crate::world::WorldGrid;

#[derive(Debug)]
struct VisibilityInner {
    scanned: Vec<bool>,
    count: usize,
    /// Cells revealed since the last broadcast drained them.
    delta: Vec<CellCoord>,
}

/// Owns the scanned/unscanned state of every world cell.
#[derive(Debug)]
pub struct VisibilityTracker {
    world: WorldGrid,
    inner: RwLock<VisibilityInner>,
}

impl VisibilityTracker {
    pub fn new(world: WorldGrid) -> Self {
        Self {
            world,
            inner: RwLock::new(VisibilityInner {
                scanned: vec![false; world.cell_count()],
                count: 0,
                delta: Vec::new(),
            }),
        }
    }

    pub fn world(&self) -> &WorldGrid {
        &self.world
    }

    /// Mark every in-bounds cell as scanned and return the ones newly revealed.
    ///
    /// Out-of-bounds cells are skipped. The whole batch is applied under a single
    /// write lock so readers see either none or all of it.
    pub fn mark_scanned<I>(&self, cells: I) -> Vec<CellCoord>
    where
        I: IntoIterator<Item = CellCoord>,
    {
        let indexed: Vec<(usize, CellCoord)> = cells
            .into_iter()
            .filter_map(|cell| self.world.index(cell).map(|index| (index, cell)))
            .collect();
        if indexed.is_empty() {
            return Vec::new();
        }

        let mut inner = self.inner.write();
        let mut revealed = Vec::new();
        for (index, cell) in indexed {
            if !inner.scanned[index] {
                inner.scanned[index] = true;
                inner.count += 1;
                revealed.push(cell);
            }
        }
        inner.delta.extend_from_slice(&revealed);
        trace!(revealed = revealed.len(), total = inner.count, "cells scanned");
        revealed
    }

    pub fn is_scanned(&self, x: i64, y: i64) -> bool {
        match self.world.index(CellCoord::new(x, y)) {
            Some(index) => self.inner.read().scanned[index],
            None => false,
        }
    }

    pub fn is_cell_scanned(&self, cell: CellCoord) -> bool {
        self.is_scanned(cell.x, cell.y)
    }

    pub fn scanned_count(&self) -> usize {
        self.inner.read().count
    }

    /// Fraction of all cells scanned, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        let total = self.world.cell_count();
        if total == 0 {
            return 0.0;
        }
        self.inner.read().count as f64 / total as f64
    }

    /// Every scanned cell in row-major order.
    pub fn scanned_cells(&self) -> Vec<CellCoord> {
        let inner = self.inner.read();
        inner
            .scanned
            .iter()
            .enumerate()
            .filter(|(_, scanned)| **scanned)
            .map(|(index, _)| self.world.cell_at(index))
            .collect()
    }

    /// Drain the cells revealed since the previous call.
    pub fn take_delta(&self) -> Vec<CellCoord> {
        std::mem::take(&mut self.inner.write().delta)
    }

    /// Clear the bitmap for a new session, then reveal the `corner × corner` base block.
    pub fn reset(&self, corner: u32) {
        {
            let mut inner = self.inner.write();
            inner.scanned.iter_mut().for_each(|cell| *cell = false);
            inner.count = 0;
            inner.delta.clear();
        }
        self.reveal_corner(corner);
    }

    pub fn reveal_corner(&self, corner: u32) {
        let corner = i64::from(corner);
        let cells = (0..corner).flat_map(|y| (0..corner).map(move |x| CellCoord::new(x, y)));
        self.mark_scanned(cells);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> VisibilityTracker {
        VisibilityTracker::new(WorldGrid::new(4, 10.0))
    }

    #[test]
    fn marking_is_idempotent() {
        let tracker = tracker();
        let first = tracker.mark_scanned([CellCoord::new(1, 1), CellCoord::new(1, 1)]);
        assert_eq!(first, vec![CellCoord::new(1, 1)]);
        assert!(tracker.mark_scanned([CellCoord::new(1, 1)]).is_empty());
        assert_eq!(tracker.scanned_count(), 1);
        assert!(tracker.is_scanned(1, 1));
    }

    #[test]
    fn out_of_bounds_cells_are_ignored() {
        let tracker = tracker();
        let revealed = tracker.mark_scanned([
            CellCoord::new(-1, 0),
            CellCoord::new(4, 4),
            CellCoord::new(0, 9),
            CellCoord::new(3, 3),
        ]);
        assert_eq!(revealed, vec![CellCoord::new(3, 3)]);
        assert!(!tracker.is_scanned(-1, 0));
        assert!(!tracker.is_scanned(100, 100));
    }

    #[test]
    fn coverage_never_decreases() {
        let tracker = tracker();
        let batches = [
            vec![CellCoord::new(0, 0)],
            vec![CellCoord::new(0, 0), CellCoord::new(1, 0)],
            vec![CellCoord::new(7, 7)],
            vec![],
            vec![CellCoord::new(2, 2), CellCoord::new(3, 3), CellCoord::new(1, 0)],
        ];
        let mut previous = tracker.coverage();
        for batch in batches {
            tracker.mark_scanned(batch);
            let current = tracker.coverage();
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, 4.0 / 16.0);
    }

    #[test]
    fn delta_drains_once() {
        let tracker = tracker();
        tracker.mark_scanned([CellCoord::new(0, 0), CellCoord::new(2, 1)]);
        assert_eq!(tracker.take_delta().len(), 2);
        assert!(tracker.take_delta().is_empty());
        tracker.mark_scanned([CellCoord::new(0, 0), CellCoord::new(3, 0)]);
        assert_eq!(tracker.take_delta(), vec![CellCoord::new(3, 0)]);
    }

    #[test]
    fn reset_restores_only_the_base_corner() {
        let tracker = tracker();
        tracker.mark_scanned([CellCoord::new(3, 3)]);
        tracker.reset(2);
        assert_eq!(tracker.scanned_count(), 4);
        assert!(!tracker.is_scanned(3, 3));
        assert_eq!(
            tracker.scanned_cells(),
            vec![
                CellCoord::new(0, 0),
                CellCoord::new(1, 0),
                CellCoord::new(0, 1),
                CellCoord::new(1, 1)
            ]
        );
    }
}
