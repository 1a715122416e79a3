// # History Sinks
//
// In-memory implementation of HistorySink. The InfluxDB writer lives in
// the `connlog-influx` crate.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::event::EntityKind;
use crate::traits::history_sink::{HistoryPoint, HistorySink};

/// History sink that keeps every point in memory
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistorySink {
    points: Arc<RwLock<Vec<HistoryPoint>>>,
}

impl MemoryHistorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All points in append order
    pub async fn points(&self) -> Vec<HistoryPoint> {
        self.points.read().await.clone()
    }

    /// Points of a single entity in append order
    pub async fn points_for(&self, kind: EntityKind, entity_id: &str) -> Vec<HistoryPoint> {
        self.points
            .read()
            .await
            .iter()
            .filter(|p| p.entity_kind == kind && p.entity_id == entity_id)
            .cloned()
            .collect()
    }

    /// Number of stored points
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    /// Check if no point was appended
    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl HistorySink for MemoryHistorySink {
    async fn append(&self, point: &HistoryPoint) -> Result<(), Error> {
        tracing::trace!(
            entity_id = %point.entity_id,
            kind = %point.entity_kind,
            online = point.online,
            "Appending history point"
        );
        self.points.write().await.push(point.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_points_keep_append_order() {
        let sink = MemoryHistorySink::new();
        let t0 = Utc::now();

        sink.append(&HistoryPoint::new(EntityKind::Device, "dev-1", false, t0))
            .await
            .unwrap();
        sink.append(&HistoryPoint::new(EntityKind::Hub, "hub-1", true, t0))
            .await
            .unwrap();
        sink.append(&HistoryPoint::new(EntityKind::Device, "dev-1", true, t0))
            .await
            .unwrap();

        assert_eq!(sink.len().await, 3);
        let device_points = sink.points_for(EntityKind::Device, "dev-1").await;
        assert_eq!(
            device_points.iter().map(|p| p.online).collect::<Vec<_>>(),
            vec![false, true]
        );
    }
}
