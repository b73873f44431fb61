use crate::clock::Clock;
use crate::config::{SleepPolicy, TrackerConfig};
use crate::errors::Result;
use crate::hal::{BatteryGauge, CellularModem, PositionSource};
use crate::location::LocationAcquirer;
use crate::model::{
    BatteryReading, DeviceId, DeviceStatus, LocationFix, ScheduleDecision, SleepReason,
    TelemetryPacket,
};
use crate::power::PowerMonitor;
use crate::state::DeviceStateMachine;
use crate::store::{PersistedRecord, StateStore};
use crate::uplink::{Delivered, UplinkClient};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

/// Picks the next sleep duration. The result always lies within
/// `[policy.min_secs, policy.max_secs]`.
pub fn compute_sleep(
    policy: &SleepPolicy,
    status: DeviceStatus,
    battery_critical: bool,
    delivered: bool,
) -> ScheduleDecision {
    let (min, max) = (policy.min_secs, policy.max_secs.max(policy.min_secs));

    if battery_critical {
        return ScheduleDecision {
            sleep_duration_secs: max,
            reason: SleepReason::CriticalBattery,
        };
    }

    let base = policy.base_secs(status).clamp(min, max);
    if delivered {
        return ScheduleDecision {
            sleep_duration_secs: base,
            reason: SleepReason::StatusBase(status),
        };
    }

    // Widened so very large bounds cannot overflow; the result never exceeds `max`.
    let percent = u128::from(policy.failure_extension_percent.min(100));
    let extension = u128::from(max - base) * percent / 100;
    let extended = u64::try_from(u128::from(base) + extension).unwrap_or(max);
    ScheduleDecision {
        sleep_duration_secs: extended.clamp(min, max),
        reason: SleepReason::DeliveryFailed,
    }
}

/// What happened during one wake cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub battery: BatteryReading,
    pub battery_critical: bool,
    /// `None` when acquisition was skipped for a critical battery.
    pub fix: Option<LocationFix>,
    pub packet: TelemetryPacket,
    pub delivery: Result<Delivered>,
    pub decision: ScheduleDecision,
}

impl CycleReport {
    pub fn delivered(&self) -> bool {
        self.delivery.is_ok()
    }
}

/// Owns every peripheral and drives one wake, act, sleep iteration at a time.
pub struct DutyCycleScheduler<G, P, M, S, C> {
    config: TrackerConfig,
    device_id: DeviceId,
    power: PowerMonitor<G, C>,
    location: LocationAcquirer<P, C>,
    uplink: UplinkClient<M, C>,
    state: DeviceStateMachine,
    store: S,
    clock: C,
    cycle: u64,
    last_success: Option<DateTime<Utc>>,
    persisted: Option<PersistedRecord>,
}

impl<G, P, M, S, C> DutyCycleScheduler<G, P, M, S, C>
where
    G: BatteryGauge,
    P: PositionSource,
    M: CellularModem,
    S: StateStore,
    C: Clock,
{
    /// Validates the configuration and restores the persisted record.
    /// Fails only with `InvalidConfiguration`.
    pub fn new(
        config: TrackerConfig,
        gauge: G,
        position: P,
        modem: M,
        store: S,
        clock: C,
    ) -> Result<Self> {
        config.validate()?;
        let device_id = config.device_id()?;

        let persisted = match store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read persisted state, starting fresh: {}", e);
                None
            }
        };
        let restored = persisted.unwrap_or_default();
        info!(
            "Tracker {} booting with status {} (last delivery: {})",
            device_id,
            restored.status,
            restored
                .last_success
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );

        Ok(Self {
            power: PowerMonitor::new(
                gauge,
                clock.clone(),
                config.low_battery_threshold,
                config.battery_read_timeout(),
            ),
            location: LocationAcquirer::new(position, clock.clone(), config.gps_poll_interval()),
            uplink: UplinkClient::new(modem, clock.clone(), config.uplink.clone()),
            state: DeviceStateMachine::new(restored.status),
            last_success: restored.last_success,
            persisted,
            device_id,
            store,
            clock,
            config,
            cycle: 0,
        })
    }

    pub fn current_status(&self) -> DeviceStatus {
        self.state.current_status()
    }

    /// Applies an externally signalled status change; it is persisted at the
    /// end of the next cycle.
    pub fn set_status(&mut self, raw: &str) -> Result<bool> {
        self.state.set_status_str(raw)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn location(&self) -> &LocationAcquirer<P, C> {
        &self.location
    }

    pub fn uplink(&self) -> &UplinkClient<M, C> {
        &self.uplink
    }

    /// Runs one full cycle and suspends for the chosen duration. Every
    /// failure is absorbed here, so the cycle always ends in a sleep.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let span = info_span!("cycle", n = self.cycle, device = %self.device_id);
        let report = self.execute_cycle().instrument(span).await;

        info!(
            cycle = report.cycle,
            delivered = report.delivered(),
            "Sleeping {}s ({})",
            report.decision.sleep_duration_secs,
            report.decision.reason
        );
        self.clock
            .sleep(Duration::from_secs(report.decision.sleep_duration_secs))
            .await;
        report
    }

    /// Runs `cycles` cycles back to back, or forever when `None`.
    pub async fn run(&mut self, cycles: Option<u64>) {
        let mut completed = 0u64;
        while cycles.map_or(true, |limit| completed < limit) {
            self.run_cycle().await;
            completed += 1;
        }
    }

    async fn execute_cycle(&mut self) -> CycleReport {
        info!("Wake");

        let battery = self.power.read_level().await;
        let battery_critical = self.power.is_critical(battery.level_percent());

        let fix = if battery_critical {
            warn!(
                "Battery critical ({}% < {}%), skipping position fix",
                battery.level_percent(),
                self.config.low_battery_threshold
            );
            None
        } else {
            match self.location.acquire_fix(self.config.gps_timeout()).await {
                Ok(fix) => Some(fix),
                Err(e) => {
                    error!("Position source fault, reporting without fix: {}", e);
                    Some(LocationFix::not_acquired(self.clock.now()))
                }
            }
        };

        let status = self.state.current_status();
        let packet = TelemetryPacket::new(
            self.device_id.clone(),
            fix.as_ref(),
            &battery,
            status,
            self.clock.now(),
        );

        let delivery = self.uplink.deliver(&packet).await;
        self.uplink.shutdown().await;
        if delivery.is_ok() {
            self.last_success = Some(packet.timestamp());
        }

        let decision = compute_sleep(
            &self.config.sleep,
            status,
            battery_critical,
            delivery.is_ok(),
        );
        self.persist();

        CycleReport {
            cycle: self.cycle,
            battery,
            battery_critical,
            fix,
            packet,
            delivery,
            decision,
        }
    }

    fn persist(&mut self) {
        let record = PersistedRecord {
            status: self.state.current_status(),
            last_success: self.last_success,
        };
        if self.persisted == Some(record) {
            return;
        }

        match self.store.save(&record) {
            Ok(()) => self.persisted = Some(record),
            Err(e) => error!("Failed to persist state record: {}", e),
        }
    }
}
