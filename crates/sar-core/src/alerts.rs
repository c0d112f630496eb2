//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bounded alert history. Readers look at the tail; nothing is ever popped.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use sar_msg::{Alert, AlertKind, AlertPayload};
use tracing::info;

/// Default number of retained alerts.
pub const DEFAULT_ALERT_CAPACITY: usize = 20;

#[derive(Debug)]
struct AlertLog {
    entries: VecDeque<Alert>,
    next_sequence: u64,
}

/// Ring buffer of the most recent alerts with strictly increasing sequence numbers.
#[derive(Debug)]
pub struct AlertBus {
    capacity: usize,
    log: Mutex<AlertLog>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            log: Mutex::new(AlertLog {
                entries: VecDeque::with_capacity(capacity),
                next_sequence: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an alert, evicting the oldest once full. Never waits on readers.
    pub fn publish(
        &self,
        kind: AlertKind,
        message: impl Into<String>,
        payload: AlertPayload,
    ) -> Alert {
        let mut log = self.log.lock();
        let alert = Alert {
            sequence: log.next_sequence,
            kind,
            message: message.into(),
            payload,
            created_at: Utc::now(),
        };
        log.next_sequence += 1;
        if log.entries.len() == self.capacity {
            log.entries.pop_front();
        }
        log.entries.push_back(alert.clone());
        drop(log);
        info!(sequence = alert.sequence, kind = ?alert.kind, message = %alert.message, "alert published");
        alert
    }

    /// Last `n` alerts, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let log = self.log.lock();
        let skip = log.entries.len().saturating_sub(n);
        log.entries.iter().skip(skip).cloned().collect()
    }

    /// Retained alerts with a sequence greater than `sequence`, oldest first.
    pub fn since(&self, sequence: u64) -> Vec<Alert> {
        self.log
            .lock()
            .entries
            .iter()
            .filter(|alert| alert.sequence > sequence)
            .cloned()
            .collect()
    }

    /// Sequence of the newest alert, 0 before anything was published.
    pub fn latest_sequence(&self) -> u64 {
        self.log.lock().next_sequence - 1
    }

    pub fn len(&self) -> usize {
        self.log.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().entries.is_empty()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}
