use crate::backoff::{Backoff, BackoffPolicy};
use crate::clock::Clock;
use crate::config::UplinkConfig;
use crate::errors::{Error, Result};
use crate::hal::CellularModem;
use crate::model::TelemetryPacket;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkState {
    Disconnected,
    NetworkAttached,
    DataSessionActive,
    Delivered,
    Failed,
}

/// Bookkeeping for the send stage of the current cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UplinkAttempt {
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub attempts: u32,
    pub status_code: u16,
}

pub struct UplinkClient<M, C> {
    modem: M,
    clock: C,
    config: UplinkConfig,
    state: UplinkState,
    attempt: UplinkAttempt,
}

impl<M: CellularModem, C: Clock> UplinkClient<M, C> {
    pub fn new(modem: M, clock: C, config: UplinkConfig) -> Self {
        Self {
            modem,
            clock,
            config,
            state: UplinkState::Disconnected,
            attempt: UplinkAttempt::default(),
        }
    }

    pub fn state(&self) -> UplinkState {
        self.state
    }

    pub fn last_attempt(&self) -> &UplinkAttempt {
        &self.attempt
    }

    pub fn modem(&self) -> &M {
        &self.modem
    }

    fn policy(&self) -> BackoffPolicy {
        self.config.backoff_policy()
    }

    /// Clears per-cycle state. Backoff never carries over between cycles.
    pub fn begin_cycle(&mut self) {
        self.state = UplinkState::Disconnected;
        self.attempt = UplinkAttempt::default();
    }

    /// Attaches to the cellular network, retrying with backoff up to
    /// `max_network_retries` attempts.
    pub async fn connect_network(&mut self) -> bool {
        let mut backoff = Backoff::new(self.policy(), self.config.max_network_retries);
        let budget = Duration::from_millis(self.config.attach_timeout_ms);

        while backoff.begin_attempt() {
            let attached = timeout(budget, self.modem.attach_network())
                .await
                .unwrap_or(false);
            if attached {
                info!("Network attached (attempt {})", backoff.attempt());
                self.state = UplinkState::NetworkAttached;
                return true;
            }

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "Network attach failed (attempt {}/{}), retrying in {}ms",
                        backoff.attempt(),
                        backoff.max_attempts(),
                        delay.as_millis()
                    );
                    self.clock.sleep(delay).await;
                }
                None => break,
            }
        }

        error!(
            "{}",
            Error::NetworkAttachFailure {
                attempts: backoff.attempt()
            }
        );
        self.state = UplinkState::Failed;
        false
    }

    /// Opens the packet data session. Only valid once the network is attached.
    pub async fn enable_data_session(&mut self) -> bool {
        if self.state != UplinkState::NetworkAttached {
            warn!("Data session requested in state {:?}", self.state);
            return false;
        }

        let mut backoff = Backoff::new(self.policy(), self.config.max_session_retries);
        let budget = Duration::from_millis(self.config.session_timeout_ms);

        while backoff.begin_attempt() {
            let opened = timeout(budget, self.modem.open_data_session())
                .await
                .unwrap_or(false);
            if opened {
                info!("Data session active (attempt {})", backoff.attempt());
                self.state = UplinkState::DataSessionActive;
                return true;
            }

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "Data session failed (attempt {}/{}), retrying in {}ms",
                        backoff.attempt(),
                        backoff.max_attempts(),
                        delay.as_millis()
                    );
                    self.clock.sleep(delay).await;
                }
                None => break,
            }
        }

        error!(
            "{}",
            Error::DataSessionFailure {
                attempts: backoff.attempt()
            }
        );
        self.state = UplinkState::Failed;
        false
    }

    /// Posts the packet. Any non-2xx status, transport error or timeout is
    /// retried; once the ceiling is hit the packet is dropped.
    pub async fn send(&mut self, packet: &TelemetryPacket) -> Result<Delivered> {
        if self.state != UplinkState::DataSessionActive {
            return Err(Error::TransmissionFailure {
                attempts: 0,
                last_error: format!("no data session (state {:?})", self.state),
            });
        }

        let body = packet.encode()?;
        let mut backoff = Backoff::new(self.policy(), self.config.max_send_retries);
        let budget = Duration::from_millis(self.config.send_timeout_ms);

        while backoff.begin_attempt() {
            self.attempt.attempt_count = backoff.attempt();

            let failure = match timeout(budget, self.modem.http_post(&self.config.url, &body)).await
            {
                Ok(Ok(code)) if (200..300).contains(&code) => {
                    info!(
                        "Telemetry delivered for {} (HTTP {}, attempt {})",
                        packet.device_id(),
                        code,
                        backoff.attempt()
                    );
                    self.state = UplinkState::Delivered;
                    self.attempt.last_error = None;
                    return Ok(Delivered {
                        attempts: backoff.attempt(),
                        status_code: code,
                    });
                }
                Ok(Ok(code)) => format!("HTTP {}", code),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no response within {}ms", budget.as_millis()),
            };
            self.attempt.last_error = Some(failure.clone());

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "Send failed (attempt {}/{}): {}. Retrying in {}ms...",
                        backoff.attempt(),
                        backoff.max_attempts(),
                        failure,
                        delay.as_millis()
                    );
                    self.clock.sleep(delay).await;
                }
                None => break,
            }
        }

        self.state = UplinkState::Failed;
        let err = Error::TransmissionFailure {
            attempts: self.attempt.attempt_count,
            last_error: self
                .attempt
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };
        error!("{}; packet dropped", err);
        Err(err)
    }

    /// Runs attach, data session and send in order, stopping at the first
    /// stage that exhausts its retries.
    pub async fn deliver(&mut self, packet: &TelemetryPacket) -> Result<Delivered> {
        self.begin_cycle();

        if !self.connect_network().await {
            return Err(Error::NetworkAttachFailure {
                attempts: self.config.max_network_retries,
            });
        }
        if !self.enable_data_session().await {
            return Err(Error::DataSessionFailure {
                attempts: self.config.max_session_retries,
            });
        }
        self.send(packet).await
    }

    /// Powers the radio down ahead of deep sleep. A modem that does not
    /// acknowledge within `power_down_timeout_ms` is abandoned.
    pub async fn shutdown(&mut self) {
        debug!("Powering down modem");
        let budget = Duration::from_millis(self.config.power_down_timeout_ms);
        if timeout(budget, self.modem.power_down()).await.is_err() {
            warn!(
                "Modem did not power down within {}ms, sleeping anyway",
                budget.as_millis()
            );
        }
        self.state = UplinkState::Disconnected;
    }
}
