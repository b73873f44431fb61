use crate::model::{TrackerPage, TrackerQuery, TrackerRecord, TrackerUpdate};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracker::{DeviceId, DeviceStatus};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

/// Latest state per tracker, keyed by device ID.
#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    trackers: Arc<RwLock<HashMap<DeviceId, TrackerRecord>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an update. A new tracker starts `in_storage` unless the update
    /// says otherwise; a missing fix keeps the last known position and an
    /// absent meter ID keeps the linked meter.
    pub async fn upsert(&self, update: TrackerUpdate, now: DateTime<Utc>) -> TrackerRecord {
        let mut trackers = self.trackers.write().await;

        match trackers.get_mut(&update.device_id) {
            Some(existing) => {
                if let Some(coords) = update.coordinates {
                    existing.latitude = Some(coords.latitude());
                    existing.longitude = Some(coords.longitude());
                }
                if let Some(status) = update.status {
                    existing.status = status;
                }
                if let Some(meter_id) = update.meter_id {
                    existing.meter_id = meter_id;
                }
                existing.battery_level = update.battery_level;
                existing.reported_at = update.reported_at;
                existing.last_updated = now;
                debug!("Updated tracker {}", existing.device_id);
                existing.clone()
            }
            None => {
                let record = TrackerRecord {
                    id: Uuid::new_v4(),
                    device_id: update.device_id.clone(),
                    latitude: update.coordinates.map(|c| c.latitude()),
                    longitude: update.coordinates.map(|c| c.longitude()),
                    battery_level: update.battery_level,
                    status: update.status.unwrap_or(DeviceStatus::InStorage),
                    meter_id: update.meter_id.flatten(),
                    reported_at: update.reported_at,
                    last_updated: now,
                };
                info!("Registered new tracker {}", record.device_id);
                trackers.insert(update.device_id, record.clone());
                record
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.trackers.read().await.len()
    }

    /// Returns one page of matching trackers, most recently updated first.
    pub async fn list(&self, query: &TrackerQuery) -> TrackerPage {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = query.offset.unwrap_or(0);

        let trackers = self.trackers.read().await;
        let mut matching: Vec<TrackerRecord> = trackers
            .values()
            .filter(|r| {
                query
                    .device_id
                    .as_deref()
                    .map_or(true, |id| r.device_id.as_str() == id)
            })
            .filter(|r| {
                query
                    .status
                    .as_deref()
                    .map_or(true, |status| r.status.as_str() == status)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        let total = matching.len();
        let records = matching.into_iter().skip(offset).take(limit).collect();
        TrackerPage {
            records,
            total,
            limit,
            offset,
        }
    }
}
