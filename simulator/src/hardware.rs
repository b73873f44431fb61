//! Randomised stand-ins for the tracker's GNSS receiver, fuel gauge and
//! cellular modem.

use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};
use tracker::hal::{BatteryGauge, CellularModem, HardwareError, PositionSource, RawPosition};

pub struct SimReceiver {
    rng: StdRng,
    latitude: f64,
    longitude: f64,
    fix_probability: f64,
    glitch_rate: f64,
}

impl SimReceiver {
    pub fn new(rng: StdRng, latitude: f64, longitude: f64, fix_probability: f64, glitch_rate: f64) -> Self {
        Self {
            rng,
            latitude,
            longitude,
            fix_probability,
            glitch_rate,
        }
    }
}

impl PositionSource for SimReceiver {
    async fn poll(&mut self) -> Result<Option<RawPosition>, HardwareError> {
        if !self.rng.gen_bool(self.fix_probability) {
            return Ok(None);
        }

        if self.rng.gen_bool(self.glitch_rate) {
            // Corrupted sentence that slipped past the checksum
            return Ok(Some(RawPosition {
                latitude: self.rng.gen_range(90.5..180.0),
                longitude: self.longitude,
            }));
        }

        // Drift a few hundred metres per fix
        self.latitude = (self.latitude + self.rng.gen_range(-0.003..0.003)).clamp(-90.0, 90.0);
        self.longitude = (self.longitude + self.rng.gen_range(-0.003..0.003)).clamp(-180.0, 180.0);
        Ok(Some(RawPosition {
            latitude: self.latitude,
            longitude: self.longitude,
        }))
    }
}

pub struct SimBattery {
    rng: StdRng,
    level: f64,
    drain_per_read: f64,
    anomaly_rate: f64,
}

impl SimBattery {
    pub fn new(rng: StdRng, start_level: f64, drain_per_read: f64, anomaly_rate: f64) -> Self {
        Self {
            rng,
            level: start_level,
            drain_per_read,
            anomaly_rate,
        }
    }
}

impl BatteryGauge for SimBattery {
    async fn read_percent(&mut self) -> Result<i32, HardwareError> {
        self.level -= self.drain_per_read;
        if self.level <= 0.0 {
            info!("Simulated battery depleted, swapping in a full pack");
            self.level = 100.0;
        }

        if self.rng.gen_bool(self.anomaly_rate) {
            let raw = if self.rng.gen_bool(0.5) {
                self.rng.gen_range(101..160)
            } else {
                self.rng.gen_range(-20..0)
            };
            return Ok(raw);
        }
        Ok(self.level.round() as i32)
    }
}

pub struct SimModem {
    rng: StdRng,
    attach_success: f64,
    session_success: f64,
    offline: bool,
    agent: ureq::Agent,
}

impl SimModem {
    pub fn new(
        rng: StdRng,
        attach_success: f64,
        session_success: f64,
        offline: bool,
        http_timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(http_timeout).build();
        Self {
            rng,
            attach_success,
            session_success,
            offline,
            agent,
        }
    }
}

impl CellularModem for SimModem {
    async fn attach_network(&mut self) -> bool {
        self.rng.gen_bool(self.attach_success)
    }

    async fn open_data_session(&mut self) -> bool {
        self.rng.gen_bool(self.session_success)
    }

    async fn http_post(&mut self, url: &str, body: &[u8]) -> Result<u16, HardwareError> {
        if self.offline {
            let code = if self.rng.gen_bool(0.9) { 200 } else { 503 };
            debug!("Offline modem answering HTTP {} for {} bytes", code, body.len());
            return Ok(code);
        }

        let agent = self.agent.clone();
        let url = url.to_string();
        let body = body.to_vec();
        let response = tokio::task::spawn_blocking(move || {
            agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_bytes(&body)
        })
        .await
        .map_err(|e| HardwareError::Device(format!("modem task failed: {}", e)))?;

        match response {
            Ok(resp) => Ok(resp.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(ureq::Error::Transport(e)) => Err(HardwareError::Io(e.to_string())),
        }
    }

    async fn power_down(&mut self) {
        debug!("Simulated modem powered down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_receiver_without_signal_never_fixes() {
        tokio_test::block_on(async {
            let mut rx = SimReceiver::new(StdRng::seed_from_u64(1), 28.6139, 77.2090, 0.0, 0.0);
            for _ in 0..50 {
                assert!(rx.poll().await.unwrap().is_none());
            }
        });
    }

    #[test]
    fn test_receiver_positions_stay_valid() {
        tokio_test::block_on(async {
            let mut rx = SimReceiver::new(StdRng::seed_from_u64(7), 89.999, 179.999, 1.0, 0.0);
            for _ in 0..200 {
                let pos = rx.poll().await.unwrap().unwrap();
                assert!((-90.0..=90.0).contains(&pos.latitude));
                assert!((-180.0..=180.0).contains(&pos.longitude));
            }
        });
    }

    #[test]
    fn test_battery_drains_and_swaps() {
        tokio_test::block_on(async {
            let mut battery = SimBattery::new(StdRng::seed_from_u64(3), 12.0, 5.0, 0.0);
            assert_eq!(battery.read_percent().await.unwrap(), 7);
            assert_eq!(battery.read_percent().await.unwrap(), 2);
            assert_eq!(battery.read_percent().await.unwrap(), 100);
        });
    }

    #[test]
    fn test_offline_modem_never_touches_network() {
        tokio_test::block_on(async {
            let mut modem = SimModem::new(
                StdRng::seed_from_u64(9),
                1.0,
                1.0,
                true,
                Duration::from_secs(1),
            );
            assert!(modem.attach_network().await);
            let code = modem
                .http_post("http://127.0.0.1:9/unused", b"{}")
                .await
                .unwrap();
            assert!(code == 200 || code == 503);
        });
    }
}
