use crate::solax::telemetry::{AggregatedTelemetry, UnitTelemetry};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Aggregated summary and per-unit records from one poll cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregated: AggregatedTelemetry,
    /// Index is unit position - 1.
    pub units: Vec<UnitTelemetry>,
}

impl Snapshot {
    /// Unit at 1-based `position`, if the bank has one there.
    pub fn unit(&self, position: usize) -> Option<&UnitTelemetry> {
        position.checked_sub(1).and_then(|i| self.units.get(i))
    }
}

/// Latest published snapshot. One writer replaces it wholesale; readers
/// get a consistent `Arc<Snapshot>` without blocking the writer.
#[derive(Clone)]
pub struct TelemetryStore {
    current: Arc<ArcSwap<Snapshot>>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(Snapshot::default())),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, aggregated: AggregatedTelemetry, units: Vec<UnitTelemetry>) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot {
            sequence: self.current.load().sequence + 1,
            updated_at: Some(Utc::now()),
            aggregated,
            units,
        });
        self.current.store(snapshot.clone());
        snapshot
    }
}
