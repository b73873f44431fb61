use crate::errors::{Error, Result};
use crate::model::TrackerUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracker::model::Coordinates;
use tracker::{DeviceId, DeviceStatus};

const BATTERY_MIN: i64 = 0;
const BATTERY_MAX: i64 = 100;

/// Body as posted, before any field is trusted.
#[derive(Debug, Deserialize)]
struct RawUpdate {
    device_id: Option<String>,
    latitude: Option<Value>,
    longitude: Option<Value>,
    battery_level: Option<Value>,
    status: Option<String>,
    timestamp: Option<i64>,
    #[serde(default, deserialize_with = "present")]
    meter_id: Option<Option<String>>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Validates a tracker update body.
///
/// `latitude`/`longitude` may both be null (no fix); `status` and
/// `meter_id` may be absent. An empty `meter_id` clears the stored one.
pub fn validate(body: &[u8], received_at: DateTime<Utc>) -> Result<TrackerUpdate> {
    let raw: RawUpdate = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("Malformed JSON body: {}", e)))?;

    let (Some(device_id), Some(battery_level)) = (raw.device_id, raw.battery_level) else {
        return Err(Error::Validation(
            "Missing required fields: device_id, battery_level".to_string(),
        ));
    };

    let device_id = DeviceId::new(device_id)?;
    let coordinates = coordinates(raw.latitude, raw.longitude)?;

    let battery_level = match battery_level.as_i64() {
        Some(level) if (BATTERY_MIN..=BATTERY_MAX).contains(&level) => level as u8,
        _ => {
            return Err(Error::Validation(format!(
                "Battery level must be an integer between {} and {}",
                BATTERY_MIN, BATTERY_MAX
            )))
        }
    };

    let status = raw
        .status
        .map(|s| s.parse::<DeviceStatus>())
        .transpose()?;

    let reported_at = match raw.timestamp {
        Some(ts) => DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| Error::Validation(format!("Timestamp {} out of range", ts)))?,
        None => received_at,
    };

    let meter_id = raw
        .meter_id
        .map(|m| m.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()));

    Ok(TrackerUpdate {
        device_id,
        coordinates,
        battery_level,
        status,
        meter_id,
        reported_at,
    })
}

fn coordinates(latitude: Option<Value>, longitude: Option<Value>) -> Result<Option<Coordinates>> {
    let is_absent = |v: &Option<Value>| matches!(v, None | Some(Value::Null));

    if is_absent(&latitude) && is_absent(&longitude) {
        return Ok(None);
    }

    match (
        latitude.as_ref().and_then(Value::as_f64),
        longitude.as_ref().and_then(Value::as_f64),
    ) {
        (Some(lat), Some(lon)) => Coordinates::new(lat, lon)
            .map(Some)
            .map_err(|_| Error::Validation("Invalid latitude or longitude values".to_string())),
        _ => Err(Error::Validation(
            "Latitude and longitude must be numbers".to_string(),
        )),
    }
}
