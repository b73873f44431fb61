use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::hal::PositionSource;
use crate::model::{Coordinates, LocationFix};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct LocationAcquirer<P, C> {
    source: P,
    clock: C,
    poll_interval: Duration,
}

impl<P: PositionSource, C: Clock> LocationAcquirer<P, C> {
    pub fn new(source: P, clock: C, poll_interval: Duration) -> Self {
        Self {
            source,
            clock,
            poll_interval,
        }
    }

    /// Polls the receiver until it reports a position or `timeout` elapses.
    ///
    /// Running out of time yields a fix with no coordinates. Coordinates
    /// outside the valid ranges are a [`Error::HardwareFault`].
    pub async fn acquire_fix(&mut self, timeout: Duration) -> Result<LocationFix> {
        let started = self.clock.now();
        let deadline =
            started + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        let mut polls = 0u32;

        loop {
            let now = self.clock.now();
            let remaining = match (deadline - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    warn!(
                        "{} ({} polls)",
                        Error::AcquisitionTimeout {
                            timeout_ms: timeout.as_millis() as u64
                        },
                        polls
                    );
                    return Ok(LocationFix::not_acquired(now));
                }
            };

            polls += 1;
            match tokio::time::timeout(remaining, self.source.poll()).await {
                Ok(Ok(Some(raw))) => {
                    let coordinates = Coordinates::new(raw.latitude, raw.longitude)?;
                    let now = self.clock.now();
                    info!(
                        "Fix acquired at ({:.5}, {:.5}) after {} polls",
                        coordinates.latitude(),
                        coordinates.longitude(),
                        polls
                    );
                    return Ok(LocationFix::acquired(coordinates, now));
                }
                Ok(Ok(None)) => {
                    debug!("No fix yet (poll {})", polls);
                }
                Ok(Err(e)) => {
                    warn!("Position source read failed (poll {}): {}", polls, e);
                }
                Err(_) => {
                    let now = self.clock.now();
                    warn!(
                        "Position source hung past the acquisition budget ({} polls)",
                        polls
                    );
                    return Ok(LocationFix::not_acquired(now));
                }
            }

            self.clock.sleep(self.poll_interval.min(remaining)).await;
        }
    }

    pub fn source(&self) -> &P {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hal::{HardwareError, RawPosition};

    /// Reports no fix for `warmup` polls, then `position` forever.
    struct WarmingReceiver {
        warmup: u32,
        polls: u32,
        position: Option<RawPosition>,
    }

    impl PositionSource for WarmingReceiver {
        async fn poll(&mut self) -> std::result::Result<Option<RawPosition>, HardwareError> {
            self.polls += 1;
            if self.polls <= self.warmup {
                return Ok(None);
            }
            Ok(self.position)
        }
    }

    fn receiver(warmup: u32, latitude: f64, longitude: f64) -> WarmingReceiver {
        WarmingReceiver {
            warmup,
            polls: 0,
            position: Some(RawPosition {
                latitude,
                longitude,
            }),
        }
    }

    #[test]
    fn test_fix_after_warmup() {
        tokio_test::block_on(async {
            let clock = ManualClock::default();
            let mut acquirer =
                LocationAcquirer::new(receiver(3, 28.6139, 77.2090), clock.clone(), Duration::from_secs(1));

            let fix = acquirer.acquire_fix(Duration::from_secs(60)).await.unwrap();
            let coords = fix.coordinates.unwrap();
            assert_eq!(coords.latitude(), 28.6139);
            assert_eq!(coords.longitude(), 77.2090);
            assert_eq!(clock.sleeps().len(), 3);
        });
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        tokio_test::block_on(async {
            let clock = ManualClock::default();
            let start = clock.now();
            let silent = WarmingReceiver {
                warmup: u32::MAX,
                polls: 0,
                position: None,
            };
            let mut acquirer = LocationAcquirer::new(silent, clock.clone(), Duration::from_millis(1_500));

            let fix = acquirer.acquire_fix(Duration::from_secs(10)).await.unwrap();
            assert!(!fix.is_acquired());
            assert_eq!((clock.now() - start).num_seconds(), 10);
            assert!(acquirer.source().polls >= 7);
        });
    }

    #[test]
    fn test_out_of_range_is_hardware_fault() {
        tokio_test::block_on(async {
            let mut acquirer = LocationAcquirer::new(
                receiver(0, 91.0, 10.0),
                ManualClock::default(),
                Duration::from_secs(1),
            );
            let result = acquirer.acquire_fix(Duration::from_secs(5)).await;
            assert!(matches!(result, Err(Error::HardwareFault(_))));
        });
    }

    struct StuckReceiver;

    impl PositionSource for StuckReceiver {
        async fn poll(&mut self) -> std::result::Result<Option<RawPosition>, HardwareError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_hung_receiver_yields_no_fix() {
        tokio_test::block_on(async {
            let mut acquirer =
                LocationAcquirer::new(StuckReceiver, ManualClock::default(), Duration::from_secs(1));

            let fix = acquirer.acquire_fix(Duration::from_millis(20)).await.unwrap();
            assert!(!fix.is_acquired());
        });
    }
}
