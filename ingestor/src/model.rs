use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracker::model::Coordinates;
use tracker::{DeviceId, DeviceStatus};
use uuid::Uuid;

/// A tracker update after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerUpdate {
    pub device_id: DeviceId,
    pub coordinates: Option<Coordinates>,
    pub battery_level: u8,
    pub status: Option<DeviceStatus>,
    /// `None` leaves the stored meter untouched; `Some(None)` clears it.
    pub meter_id: Option<Option<String>>,
    pub reported_at: DateTime<Utc>,
}

/// Latest known state of one tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerRecord {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub battery_level: u8,
    pub status: DeviceStatus,
    pub meter_id: Option<String>,
    pub reported_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Response body for an accepted update
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub data: TrackerRecord,
}

/// One page of a tracker listing. `total` counts every match, not just this page.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerPage {
    pub records: Vec<TrackerRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl TrackerPage {
    pub fn has_more(&self) -> bool {
        self.offset.saturating_add(self.limit) < self.total
    }
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct TrackersResponse {
    pub data: Vec<TrackerRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl From<TrackerPage> for TrackersResponse {
    fn from(page: TrackerPage) -> Self {
        Self {
            has_more: page.has_more(),
            data: page.records,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackerQuery {
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
