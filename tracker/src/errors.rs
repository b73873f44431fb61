use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No position fix within {timeout_ms}ms")]
    AcquisitionTimeout { timeout_ms: u64 },

    #[error("Battery reading {raw} out of range [0, 100]")]
    SensorAnomaly { raw: i32 },

    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    #[error("Network attach failed after {attempts} attempts")]
    NetworkAttachFailure { attempts: u32 },

    #[error("Data session failed after {attempts} attempts")]
    DataSessionFailure { attempts: u32 },

    #[error("Transmission failed after {attempts} attempts: {last_error}")]
    TransmissionFailure { attempts: u32, last_error: String },

    #[error("Invalid device status: {0}")]
    InvalidStatus(String),

    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a later attempt within the same cycle could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Radio conditions change between attempts
            Error::NetworkAttachFailure { .. } => true,
            Error::DataSessionFailure { .. } => true,
            Error::TransmissionFailure { .. } => true,
            Error::Io(_) => true,

            Error::AcquisitionTimeout { .. } => false,
            Error::SensorAnomaly { .. } => false,
            Error::HardwareFault(_) => false,
            Error::InvalidStatus(_) => false,
            Error::InvalidDeviceId(_) => false,
            Error::InvalidConfiguration(_) => false,
            Error::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(Error::NetworkAttachFailure { attempts: 3 }.is_retryable());
        assert!(Error::TransmissionFailure {
            attempts: 1,
            last_error: "HTTP 503".to_string()
        }
        .is_retryable());
        assert!(!Error::InvalidStatus("parked".to_string()).is_retryable());
        assert!(!Error::InvalidConfiguration("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::SensorAnomaly { raw: 130 };
        assert_eq!(err.to_string(), "Battery reading 130 out of range [0, 100]");
    }
}
