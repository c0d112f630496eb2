//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use rand::prelude::*;
use sar_msg::{HeatSignature, Position};

use crate::visibility::VisibilityTracker;
use crate::world::WorldGrid;

/// Signatures are kept this far from the world edge.
const EDGE_PADDING: f64 = 1000.0;

/// Static thermal reference data for one session.
#[derive(Debug, Clone, Default)]
pub struct HeatField {
    signatures: Vec<HeatSignature>,
}

impl HeatField {
    pub fn generate(world: &WorldGrid, count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let extent = world.extent();
        let (low, high) = if extent > 2.0 * EDGE_PADDING {
            (EDGE_PADDING, extent - EDGE_PADDING)
        } else {
            (0.0, extent)
        };
        let signatures = (0..count)
            .map(|n| HeatSignature {
                id: format!("heat-{n}"),
                x: rng.gen_range(low..high),
                y: rng.gen_range(low..high),
                intensity: rng.gen_range(0.5..=1.0),
                size: rng.gen_range(300.0..=800.0),
            })
            .collect();
        Self { signatures }
    }

    pub fn all(&self) -> &[HeatSignature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Signatures whose cell has been scanned.
    pub fn visible(&self, visibility: &VisibilityTracker) -> Vec<HeatSignature> {
        let world = visibility.world();
        self.signatures
            .iter()
            .filter(|signature| {
                world
                    .cell_of(Position::new(signature.x, signature.y))
                    .is_some_and(|cell| visibility.is_cell_scanned(cell))
            })
            .cloned()
            .collect()
    }
}
