use crate::backoff::BackoffPolicy;
use crate::errors::{Error, Result};
use crate::model::{DeviceId, DeviceStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sleep bounds and per-status report intervals, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepPolicy {
    pub min_secs: u64,
    pub max_secs: u64,
    pub in_transit_secs: u64,
    pub in_storage_secs: u64,
    pub installed_off_secs: u64,
    pub detached_secs: u64,
    /// How far toward `max_secs` a failed delivery stretches the base interval (0..=100).
    pub failure_extension_percent: u8,
}

impl SleepPolicy {
    pub fn base_secs(&self, status: DeviceStatus) -> u64 {
        match status {
            DeviceStatus::InTransit => self.in_transit_secs,
            DeviceStatus::InStorage => self.in_storage_secs,
            DeviceStatus::InstalledOff => self.installed_off_secs,
            DeviceStatus::Detached => self.detached_secs,
        }
    }
}

impl Default for SleepPolicy {
    fn default() -> Self {
        Self {
            min_secs: 60,
            max_secs: 3_000,
            in_transit_secs: 300,
            in_storage_secs: 1_800,
            installed_off_secs: 2_700,
            detached_secs: 600,
            failure_extension_percent: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsConfig {
    pub acquisition_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkConfig {
    pub url: String,
    pub max_network_retries: u32,
    pub max_session_retries: u32,
    pub max_send_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: u32,
    pub attach_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub power_down_timeout_ms: u64,
}

impl UplinkConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/tracker-update".to_string(),
            max_network_retries: 3,
            max_session_retries: 3,
            max_send_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            backoff_multiplier: 2,
            attach_timeout_ms: 30_000,
            session_timeout_ms: 15_000,
            send_timeout_ms: 10_000,
            power_down_timeout_ms: 5_000,
        }
    }
}

/// Everything the duty cycle consumes from the provisioning layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub device_id: String,
    /// Battery percentage strictly below which the device runs degraded cycles.
    pub low_battery_threshold: u8,
    pub battery_read_timeout_ms: u64,
    pub sleep: SleepPolicy,
    pub gps: GpsConfig,
    pub uplink: UplinkConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device_id: "GPS001".to_string(),
            low_battery_threshold: 10,
            battery_read_timeout_ms: 2_000,
            sleep: SleepPolicy::default(),
            gps: GpsConfig::default(),
            uplink: UplinkConfig::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfiguration(msg.into())
}

impl TrackerConfig {
    /// Rejects configurations the duty cycle cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        self.device_id()?;

        let url = self.uplink.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(format!(
                "Uplink URL must be http(s), got '{}'",
                self.uplink.url
            )));
        }

        let sleep = &self.sleep;
        if sleep.min_secs == 0 {
            return Err(invalid("Minimum sleep must be greater than zero"));
        }
        if sleep.min_secs > sleep.max_secs {
            return Err(invalid(format!(
                "Minimum sleep {}s exceeds maximum sleep {}s",
                sleep.min_secs, sleep.max_secs
            )));
        }
        for status in DeviceStatus::ALL {
            let base = sleep.base_secs(status);
            if base < sleep.min_secs || base > sleep.max_secs {
                return Err(invalid(format!(
                    "Sleep for {} ({}s) out of range [{}, {}]",
                    status, base, sleep.min_secs, sleep.max_secs
                )));
            }
        }
        if sleep.failure_extension_percent > 100 {
            return Err(invalid(format!(
                "Failure extension {}% exceeds 100%",
                sleep.failure_extension_percent
            )));
        }

        if self.low_battery_threshold > 100 {
            return Err(invalid(format!(
                "Low battery threshold {} exceeds 100",
                self.low_battery_threshold
            )));
        }

        if self.battery_read_timeout_ms == 0 {
            return Err(invalid("Battery read timeout must be non-zero"));
        }

        if self.gps.acquisition_timeout_ms == 0 || self.gps.poll_interval_ms == 0 {
            return Err(invalid("GPS timeout and poll interval must be non-zero"));
        }

        let uplink = &self.uplink;
        if uplink.max_network_retries == 0
            || uplink.max_session_retries == 0
            || uplink.max_send_retries == 0
        {
            return Err(invalid("Retry ceilings must allow at least one attempt"));
        }
        if uplink.attach_timeout_ms == 0
            || uplink.session_timeout_ms == 0
            || uplink.send_timeout_ms == 0
            || uplink.power_down_timeout_ms == 0
        {
            return Err(invalid("Uplink timeouts must be non-zero"));
        }
        if uplink.backoff_multiplier == 0 {
            return Err(invalid("Backoff multiplier must be at least 1"));
        }
        if uplink.backoff_base_ms > uplink.backoff_max_ms {
            return Err(invalid(format!(
                "Backoff base {}ms exceeds backoff cap {}ms",
                uplink.backoff_base_ms, uplink.backoff_max_ms
            )));
        }

        Ok(())
    }

    pub fn device_id(&self) -> Result<DeviceId> {
        DeviceId::new(self.device_id.clone())
            .map_err(|_| invalid(format!("Malformed device ID '{}'", self.device_id)))
    }

    pub fn battery_read_timeout(&self) -> Duration {
        Duration::from_millis(self.battery_read_timeout_ms)
    }

    pub fn gps_timeout(&self) -> Duration {
        Duration::from_millis(self.gps.acquisition_timeout_ms)
    }

    pub fn gps_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gps.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_sleep_above_max() {
        let mut config = TrackerConfig::default();
        config.sleep.min_secs = 4_000;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_malformed_device_id() {
        let config = TrackerConfig {
            device_id: "gps-1".to_string(),
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_status_interval_outside_bounds() {
        let mut config = TrackerConfig::default();
        config.sleep.in_transit_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = TrackerConfig::default();
        config.uplink.max_send_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_hardware_timeouts_rejected() {
        let mut config = TrackerConfig::default();
        config.battery_read_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.uplink.power_down_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut config = TrackerConfig::default();
        config.uplink.url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_base_above_cap() {
        let mut config = TrackerConfig::default();
        config.uplink.backoff_base_ms = 10_000;
        assert!(config.validate().is_err());
    }
}
