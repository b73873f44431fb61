//! Capabilities the duty cycle needs from the board. Real drivers (NMEA
//! receiver, AT-command modem, fuel gauge) and test fakes both implement these.
#![allow(async_fn_in_trait)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("device did not respond")]
    NoResponse,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Device(String),
}

/// Unvalidated coordinates as reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPosition {
    pub latitude: f64,
    pub longitude: f64,
}

pub trait PositionSource {
    /// One read of the receiver; `Ok(None)` while it has no fix yet.
    async fn poll(&mut self) -> Result<Option<RawPosition>, HardwareError>;
}

pub trait BatteryGauge {
    /// Raw state of charge in percent. May lie outside [0, 100] on a misbehaving gauge.
    async fn read_percent(&mut self) -> Result<i32, HardwareError>;
}

pub trait CellularModem {
    async fn attach_network(&mut self) -> bool;

    async fn open_data_session(&mut self) -> bool;

    /// Issues a JSON POST over the active data session and returns the HTTP status.
    async fn http_post(&mut self, url: &str, body: &[u8]) -> Result<u16, HardwareError>;

    async fn power_down(&mut self);
}
