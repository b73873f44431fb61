//! Duty-cycle core of a battery-powered asset tracker.
//!
//! Each wake cycle reads the battery, tries for a position fix, reports a
//! telemetry packet over the cellular uplink and then picks how long to sleep.
//! Hardware is reached only through the traits in [`hal`], [`clock`] and
//! [`store`], so the same core runs against real drivers or fakes.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod errors;
pub mod hal;
pub mod location;
pub mod model;
pub mod power;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod uplink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use errors::{Error, Result};
pub use model::{DeviceId, DeviceStatus, LocationFix, TelemetryPacket};
pub use scheduler::{CycleReport, DutyCycleScheduler};
