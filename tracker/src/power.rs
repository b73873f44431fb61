use crate::clock::Clock;
use crate::errors::Error;
use crate::hal::BatteryGauge;
use crate::model::BatteryReading;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct PowerMonitor<G, C> {
    gauge: G,
    clock: C,
    low_battery_threshold: u8,
    read_timeout: Duration,
}

impl<G: BatteryGauge, C: Clock> PowerMonitor<G, C> {
    pub fn new(gauge: G, clock: C, low_battery_threshold: u8, read_timeout: Duration) -> Self {
        Self {
            gauge,
            clock,
            low_battery_threshold,
            read_timeout,
        }
    }

    /// Reads the gauge. The result is always within [0, 100]; out-of-range
    /// values are clamped and flagged, and a failed or hung read reports 0 so
    /// the cycle falls back to the energy-saving path.
    pub async fn read_level(&mut self) -> BatteryReading {
        let timestamp = self.clock.now();

        match timeout(self.read_timeout, self.gauge.read_percent()).await {
            Ok(Ok(raw)) => {
                let reading = BatteryReading::from_raw(raw, timestamp);
                if reading.is_anomaly() {
                    warn!(
                        "{}, clamped to {}%",
                        Error::SensorAnomaly { raw },
                        reading.level_percent()
                    );
                } else {
                    debug!("Battery at {}%", reading.level_percent());
                }
                reading
            }
            Ok(Err(e)) => {
                warn!("Battery gauge read failed, assuming empty: {}", e);
                BatteryReading::unavailable(timestamp)
            }
            Err(_) => {
                warn!(
                    "Battery gauge gave no answer within {}ms, assuming empty",
                    self.read_timeout.as_millis()
                );
                BatteryReading::unavailable(timestamp)
            }
        }
    }

    pub fn is_critical(&self, level: u8) -> bool {
        level < self.low_battery_threshold
    }
}
