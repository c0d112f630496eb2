//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Static partition of the disaster zone into visibility cells.

use sar_common::WorldConfig;
use sar_msg::{CellCoord, Position};

/// Square grid of `grid_size × grid_size` cells, each `cell_size` world units wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldGrid {
    grid_size: u32,
    cell_size: f64,
}

impl WorldGrid {
    /// # Panics
    /// Panics if `grid_size` is zero or `cell_size` is not a positive number; use
    /// [`WorldGrid::from_config`] with a validated config on runtime paths.
    pub fn new(grid_size: u32, cell_size: f64) -> Self {
        assert!(grid_size > 0, "grid_size must be positive");
        assert!(
            cell_size.is_finite() && cell_size > 0.0,
            "cell_size must be positive"
        );
        Self {
            grid_size,
            cell_size,
        }
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        Self {
            grid_size: config.grid_size.max(1),
            cell_size: if config.cell_size.is_finite() && config.cell_size > 0.0 {
                config.cell_size
            } else {
                1.0
            },
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn cell_count(&self) -> usize {
        let n = self.grid_size as usize;
        n * n
    }

    /// World extent along one axis.
    pub fn extent(&self) -> f64 {
        self.grid_size as f64 * self.cell_size
    }

    pub fn contains(&self, cell: CellCoord) -> bool {
        let n = i64::from(self.grid_size);
        (0..n).contains(&cell.x) && (0..n).contains(&cell.y)
    }

    /// Row-major bitmap index, `None` outside the grid.
    pub fn index(&self, cell: CellCoord) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        Some(cell.y as usize * self.grid_size as usize + cell.x as usize)
    }

    pub fn cell_at(&self, index: usize) -> CellCoord {
        let n = self.grid_size as usize;
        CellCoord::new((index % n) as i64, (index / n) as i64)
    }

    /// Cell containing `position`; `None` for non-finite or out-of-world positions.
    pub fn cell_of(&self, position: Position) -> Option<CellCoord> {
        if !position.is_finite() {
            return None;
        }
        let cell = CellCoord::new(
            (position.x / self.cell_size).floor() as i64,
            (position.y / self.cell_size).floor() as i64,
        );
        self.contains(cell).then_some(cell)
    }

    pub fn cell_center(&self, cell: CellCoord) -> Position {
        Position::new(
            (cell.x as f64 + 0.5) * self.cell_size,
            (cell.y as f64 + 0.5) * self.cell_size,
        )
    }

    /// Square sensor footprint of `radius` cells around `position`, clipped to the grid.
    pub fn footprint(&self, position: Position, radius: u32) -> Vec<CellCoord> {
        let Some(center) = self.cell_of(position) else {
            return Vec::new();
        };
        let r = i64::from(radius);
        let mut cells = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                let cell = CellCoord::new(center.x + dx, center.y + dy);
                if self.contains(cell) {
                    cells.push(cell);
                }
            }
        }
        cells
    }
}

impl Default for WorldGrid {
    fn default() -> Self {
        Self::from_config(&WorldConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_of_divides_by_cell_size() {
        let world = WorldGrid::new(30, 500.0);
        assert_eq!(
            world.cell_of(Position::new(100.0, 100.0)),
            Some(CellCoord::new(0, 0))
        );
        assert_eq!(
            world.cell_of(Position::new(14_999.0, 500.0)),
            Some(CellCoord::new(29, 1))
        );
        assert_eq!(world.cell_of(Position::new(15_000.0, 0.0)), None);
        assert_eq!(world.cell_of(Position::new(-0.5, 0.0)), None);
        assert_eq!(world.cell_of(Position::new(f64::NAN, 0.0)), None);
    }

    #[test]
    fn index_round_trips_through_cell_at() {
        let world = WorldGrid::new(4, 10.0);
        let cell = CellCoord::new(3, 2);
        let index = world.index(cell).unwrap();
        assert_eq!(index, 11);
        assert_eq!(world.cell_at(index), cell);
        assert_eq!(world.index(CellCoord::new(4, 0)), None);
    }

    #[test]
    fn footprint_is_clipped_at_the_corner() {
        let world = WorldGrid::new(30, 500.0);
        let corner = world.footprint(Position::new(10.0, 10.0), 2);
        assert_eq!(corner.len(), 9);
        let open = world.footprint(world.cell_center(CellCoord::new(10, 10)), 2);
        assert_eq!(open.len(), 25);
        assert!(world.footprint(Position::new(-900.0, 0.0), 2).is_empty());
    }
}
