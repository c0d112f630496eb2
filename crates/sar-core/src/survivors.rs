//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use sar_msg::{DetectionReport, Survivor};
use tracing::{debug, info};

use crate::error::EngineError;

/// Outcome of registering a detection.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// First sighting; the stored record is returned.
    Created(Survivor),
    /// The id was already known and the stored record was left untouched.
    Duplicate,
}

impl Registration {
    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Outcome of assigning a rescuer.
#[derive(Debug, Clone, PartialEq)]
pub enum RescueAssignment {
    /// A rescuer was set or replaced. `previous` is the drone it replaced.
    Assigned {
        survivor: Survivor,
        previous: Option<String>,
    },
    /// The same drone was already assigned.
    Unchanged,
    /// The survivor has been rescued; assignments are closed.
    AlreadyRescued,
}

/// Detected survivors keyed by id, in detection order.
#[derive(Debug, Default)]
pub struct SurvivorRegistry {
    survivors: RwLock<IndexMap<String, Survivor>>,
}

impl SurvivorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a detection. Registering a known id is a no-op; the first record wins.
    pub fn register_detection(
        &self,
        detection: &DetectionReport,
        detected_by: &str,
        detected_at: DateTime<Utc>,
    ) -> Registration {
        let mut survivors = self.survivors.write();
        if survivors.contains_key(&detection.id) {
            debug!(survivor = %detection.id, drone = detected_by, "duplicate detection ignored");
            return Registration::Duplicate;
        }
        let survivor = Survivor {
            id: detection.id.clone(),
            x: detection.x,
            y: detection.y,
            confidence: detection.confidence.clamp(0.0, 1.0),
            detected_by: detected_by.to_owned(),
            detected_at,
            rescuer: None,
            rescued: false,
        };
        survivors.insert(survivor.id.clone(), survivor.clone());
        info!(survivor = %survivor.id, drone = detected_by, confidence = survivor.confidence, "survivor registered");
        Registration::Created(survivor)
    }

    pub fn assign_rescue(
        &self,
        survivor_id: &str,
        drone_id: &str,
    ) -> Result<RescueAssignment, EngineError> {
        let mut survivors = self.survivors.write();
        let survivor = survivors
            .get_mut(survivor_id)
            .ok_or_else(|| EngineError::survivor_not_found(survivor_id))?;
        if survivor.rescued {
            return Ok(RescueAssignment::AlreadyRescued);
        }
        if survivor.rescuer.as_deref() == Some(drone_id) {
            return Ok(RescueAssignment::Unchanged);
        }
        let previous = survivor.rescuer.replace(drone_id.to_owned());
        debug!(survivor = survivor_id, drone = drone_id, ?previous, "rescuer assigned");
        Ok(RescueAssignment::Assigned {
            survivor: survivor.clone(),
            previous,
        })
    }

    /// Mark a survivor rescued. Returns `None` when it was already rescued.
    ///
    /// The rescuing drone is recorded only if no rescuer had been assigned.
    pub fn mark_rescued(
        &self,
        survivor_id: &str,
        drone_id: &str,
    ) -> Result<Option<Survivor>, EngineError> {
        let mut survivors = self.survivors.write();
        let survivor = survivors
            .get_mut(survivor_id)
            .ok_or_else(|| EngineError::survivor_not_found(survivor_id))?;
        if survivor.rescued {
            return Ok(None);
        }
        survivor.rescued = true;
        survivor.rescuer.get_or_insert_with(|| drone_id.to_owned());
        info!(survivor = survivor_id, drone = drone_id, "survivor rescued");
        Ok(Some(survivor.clone()))
    }

    pub fn list(&self) -> Vec<Survivor> {
        self.survivors.read().values().cloned().collect()
    }

    pub fn get(&self, survivor_id: &str) -> Option<Survivor> {
        self.survivors.read().get(survivor_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.survivors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.survivors.read().is_empty()
    }

    pub fn rescued_count(&self) -> usize {
        self.survivors.read().values().filter(|s| s.rescued).count()
    }

    pub fn clear(&self) {
        self.survivors.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(id: &str, confidence: f64) -> DetectionReport {
        DetectionReport {
            id: id.into(),
            x: 1200.0,
            y: 800.0,
            confidence,
        }
    }

    #[test]
    fn first_detection_wins() {
        let registry = SurvivorRegistry::new();
        let first = registry.register_detection(&detection("s-1", 0.9), "D-1", Utc::now());
        assert!(first.is_created());
        let second = registry.register_detection(&detection("s-1", 0.4), "D-2", Utc::now());
        assert_eq!(second, Registration::Duplicate);

        let stored = registry.get("s-1").unwrap();
        assert_eq!(stored.detected_by, "D-1");
        assert_eq!(stored.confidence, 0.9);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn confidence_is_clamped() {
        let registry = SurvivorRegistry::new();
        let Registration::Created(survivor) =
            registry.register_detection(&detection("s-1", 1.7), "D-1", Utc::now())
        else {
            panic!("expected a new survivor");
        };
        assert_eq!(survivor.confidence, 1.0);
    }

    #[test]
    fn assignment_is_idempotent_per_drone() {
        let registry = SurvivorRegistry::new();
        registry.register_detection(&detection("s-1", 0.9), "D-1", Utc::now());

        let assigned = registry.assign_rescue("s-1", "D-2").unwrap();
        assert!(matches!(assigned, RescueAssignment::Assigned { previous: None, .. }));
        assert_eq!(
            registry.assign_rescue("s-1", "D-2").unwrap(),
            RescueAssignment::Unchanged
        );
        let reassigned = registry.assign_rescue("s-1", "D-3").unwrap();
        assert!(matches!(
            reassigned,
            RescueAssignment::Assigned { previous: Some(ref p), .. } if p == "D-2"
        ));
        assert!(registry.assign_rescue("s-404", "D-1").is_err());
    }

    #[test]
    fn rescue_is_terminal() {
        let registry = SurvivorRegistry::new();
        registry.register_detection(&detection("s-1", 0.9), "D-1", Utc::now());
        registry.assign_rescue("s-1", "D-2").unwrap();

        let rescued = registry.mark_rescued("s-1", "D-5").unwrap().unwrap();
        assert!(rescued.rescued);
        assert_eq!(rescued.rescuer.as_deref(), Some("D-2"));
        assert!(registry.mark_rescued("s-1", "D-5").unwrap().is_none());
        assert_eq!(
            registry.assign_rescue("s-1", "D-7").unwrap(),
            RescueAssignment::AlreadyRescued
        );
        assert!(matches!(
            registry.mark_rescued("s-2", "D-1"),
            Err(EngineError::NotFound { .. })
        ));
        assert_eq!(registry.rescued_count(), 1);
    }
}
