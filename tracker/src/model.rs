use crate::errors::{Error, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LATITUDE_MIN: f64 = -90.0;
const LATITUDE_MAX: f64 = 90.0;
const LONGITUDE_MIN: f64 = -180.0;
const LONGITUDE_MAX: f64 = 180.0;

/// Device identifier: three uppercase ASCII letters followed by three digits, e.g. `GPS001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let bytes = id.as_bytes();
        let well_formed = bytes.len() == 6
            && bytes[..3].iter().all(u8::is_ascii_uppercase)
            && bytes[3..].iter().all(u8::is_ascii_digit);

        if !well_formed {
            return Err(Error::InvalidDeviceId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of the tracked asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    InTransit,
    #[default]
    InStorage,
    InstalledOff,
    Detached,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 4] = [
        DeviceStatus::InTransit,
        DeviceStatus::InStorage,
        DeviceStatus::InstalledOff,
        DeviceStatus::Detached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::InTransit => "in_transit",
            DeviceStatus::InStorage => "in_storage",
            DeviceStatus::InstalledOff => "installed_off",
            DeviceStatus::Detached => "detached",
        }
    }

    /// Tag byte used in the persisted record.
    pub fn tag(&self) -> u8 {
        match self {
            DeviceStatus::InTransit => 0,
            DeviceStatus::InStorage => 1,
            DeviceStatus::InstalledOff => 2,
            DeviceStatus::Detached => 3,
        }
    }
}

impl TryFrom<u8> for DeviceStatus {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        DeviceStatus::ALL
            .into_iter()
            .find(|s| s.tag() == tag)
            .ok_or_else(|| Error::InvalidStatus(format!("tag {}", tag)))
    }
}

impl FromStr for DeviceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidStatus(s.to_string()))
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate pair that is always within the WGS84 ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    /// Out-of-range or non-finite values are a receiver fault and are never clamped.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(LATITUDE_MIN..=LATITUDE_MAX).contains(&latitude) {
            return Err(Error::HardwareFault(format!(
                "Latitude {} out of range [{}, {}]",
                latitude, LATITUDE_MIN, LATITUDE_MAX
            )));
        }
        if !(LONGITUDE_MIN..=LONGITUDE_MAX).contains(&longitude) {
            return Err(Error::HardwareFault(format!(
                "Longitude {} out of range [{}, {}]",
                longitude, LONGITUDE_MIN, LONGITUDE_MAX
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Outcome of one acquisition window; `coordinates` is `None` when no fix was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinates: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn acquired(coordinates: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinates: Some(coordinates),
            timestamp,
        }
    }

    pub fn not_acquired(timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinates: None,
            timestamp,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.coordinates.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    level_percent: u8,
    anomaly: bool,
    pub timestamp: DateTime<Utc>,
}

impl BatteryReading {
    /// Clamps a raw gauge value into [0, 100], flagging the reading when clamping was needed.
    pub fn from_raw(raw: i32, timestamp: DateTime<Utc>) -> Self {
        let clamped = raw.clamp(0, 100);
        Self {
            level_percent: clamped as u8,
            anomaly: clamped != raw,
            timestamp,
        }
    }

    /// Reading used when the gauge could not be read at all.
    pub fn unavailable(timestamp: DateTime<Utc>) -> Self {
        Self {
            level_percent: 0,
            anomaly: true,
            timestamp,
        }
    }

    pub fn level_percent(&self) -> u8 {
        self.level_percent
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly
    }
}

/// One telemetry report. Built once per cycle and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WirePacket", into = "WirePacket")]
pub struct TelemetryPacket {
    device_id: DeviceId,
    coordinates: Option<Coordinates>,
    battery_level: u8,
    status: DeviceStatus,
    timestamp: DateTime<Utc>,
}

impl TelemetryPacket {
    /// Builds a packet. The timestamp is truncated to whole seconds, the
    /// resolution of the wire format.
    pub fn new(
        device_id: DeviceId,
        fix: Option<&LocationFix>,
        battery: &BatteryReading,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            coordinates: fix.and_then(|f| f.coordinates),
            battery_level: battery.level_percent(),
            status,
            timestamp: timestamp.trunc_subsecs(0),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }

    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// JSON body posted to the uplink endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePacket {
    device_id: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    battery_level: u8,
    status: DeviceStatus,
    timestamp: i64,
}

impl From<TelemetryPacket> for WirePacket {
    fn from(packet: TelemetryPacket) -> Self {
        Self {
            device_id: packet.device_id.into(),
            latitude: packet.coordinates.map(|c| c.latitude),
            longitude: packet.coordinates.map(|c| c.longitude),
            battery_level: packet.battery_level,
            status: packet.status,
            timestamp: packet.timestamp.timestamp(),
        }
    }
}

impl TryFrom<WirePacket> for TelemetryPacket {
    type Error = Error;

    fn try_from(wire: WirePacket) -> Result<Self> {
        let coordinates = match (wire.latitude, wire.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)?),
            (None, None) => None,
            _ => {
                return Err(Error::HardwareFault(
                    "latitude and longitude must both be present or both null".to_string(),
                ))
            }
        };
        if wire.battery_level > 100 {
            return Err(Error::SensorAnomaly {
                raw: i32::from(wire.battery_level),
            });
        }
        let timestamp = DateTime::from_timestamp(wire.timestamp, 0).ok_or_else(|| {
            Error::HardwareFault(format!("timestamp {} out of range", wire.timestamp))
        })?;

        Ok(Self {
            device_id: DeviceId::new(wire.device_id)?,
            coordinates,
            battery_level: wire.battery_level,
            status: wire.status,
            timestamp,
        })
    }
}

/// Why the scheduler picked a given sleep duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    StatusBase(DeviceStatus),
    DeliveryFailed,
    CriticalBattery,
}

impl fmt::Display for SleepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepReason::StatusBase(status) => write!(f, "base interval for {}", status),
            SleepReason::DeliveryFailed => f.write_str("extended after failed delivery"),
            SleepReason::CriticalBattery => f.write_str("critical battery"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub sleep_duration_secs: u64,
    pub reason: SleepReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap()
    }

    #[test]
    fn test_valid_device_id() {
        assert!(DeviceId::new("GPS001").is_ok());
        assert!(DeviceId::new("ABC999").is_ok());
    }

    #[test]
    fn test_invalid_device_ids() {
        for id in ["gps001", "GPS01", "GPS0011", "GP5001", "", "GPSABC", "ÄBC123"] {
            assert!(
                matches!(DeviceId::new(id), Err(Error::InvalidDeviceId(_))),
                "{} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "installed_off".parse::<DeviceStatus>().unwrap(),
            DeviceStatus::InstalledOff
        );
        assert!(matches!(
            "parked".parse::<DeviceStatus>(),
            Err(Error::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_status_tags() {
        for status in DeviceStatus::ALL {
            assert_eq!(DeviceStatus::try_from(status.tag()).unwrap(), status);
        }
        assert!(DeviceStatus::try_from(4).is_err());
    }

    #[test]
    fn test_coordinates_boundaries() {
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
        assert!(matches!(
            Coordinates::new(90.0001, 0.0),
            Err(Error::HardwareFault(_))
        ));
        assert!(matches!(
            Coordinates::new(0.0, -180.5),
            Err(Error::HardwareFault(_))
        ));
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_battery_clamping() {
        let high = BatteryReading::from_raw(130, ts());
        assert_eq!(high.level_percent(), 100);
        assert!(high.is_anomaly());

        let low = BatteryReading::from_raw(-4, ts());
        assert_eq!(low.level_percent(), 0);
        assert!(low.is_anomaly());

        let normal = BatteryReading::from_raw(85, ts());
        assert_eq!(normal.level_percent(), 85);
        assert!(!normal.is_anomaly());
    }

    #[test]
    fn test_wire_format_without_fix() {
        let packet = TelemetryPacket::new(
            DeviceId::new("GPS001").unwrap(),
            None,
            &BatteryReading::from_raw(5, ts()),
            DeviceStatus::InStorage,
            ts(),
        );

        let json: serde_json::Value = serde_json::from_slice(&packet.encode().unwrap()).unwrap();
        assert_eq!(json["device_id"], "GPS001");
        assert!(json["latitude"].is_null());
        assert!(json["longitude"].is_null());
        assert_eq!(json["battery_level"], 5);
        assert_eq!(json["status"], "in_storage");
        assert_eq!(json["timestamp"], 1_760_000_000);
    }

    #[test]
    fn test_subsecond_timestamp_truncated() {
        let precise = DateTime::from_timestamp(1_760_000_000, 721_704_884).unwrap();
        let packet = TelemetryPacket::new(
            DeviceId::new("GPS001").unwrap(),
            None,
            &BatteryReading::from_raw(60, precise),
            DeviceStatus::InTransit,
            precise,
        );

        assert_eq!(packet.timestamp(), ts());
        let decoded = TelemetryPacket::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_rejects_half_fix() {
        let body = br#"{"device_id":"GPS001","latitude":10.0,"longitude":null,"battery_level":50,"status":"detached","timestamp":1}"#;
        assert!(TelemetryPacket::decode(body).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_battery() {
        let body = br#"{"device_id":"GPS001","latitude":null,"longitude":null,"battery_level":101,"status":"detached","timestamp":1}"#;
        assert!(TelemetryPacket::decode(body).is_err());
    }
}
