// # History Sink Trait
//
// Append-only time series of connectivity transitions. The reconciler only
// appends when the state store reports an actual change, so the series
// holds one point per transition rather than one per event.
//
// ## Implementations
//
// - InfluxDB line protocol: `connlog-influx` crate
// - In-memory: `MemoryHistorySink` (tests and embedding)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EntityKind;

/// One historical connectivity point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub online: bool,
    pub time: DateTime<Utc>,
}

impl HistoryPoint {
    /// Create a new history point
    pub fn new(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        online: bool,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            online,
            time,
        }
    }
}

/// Trait for time-series history writers
///
/// # Failure
///
/// A failed append is returned to the caller. The current state has
/// already been written at that point; the event is redelivered but the
/// state store then reports no change, so that point is lost.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Append one point
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Point accepted by the backend
    /// - `Err(Error)`: Backend unreachable or rejected the write
    async fn append(&self, point: &HistoryPoint) -> Result<(), crate::Error>;
}
