use crate::errors::Result;
use crate::model::DeviceStatus;
use tracing::{debug, info, warn};

/// Validated holder of the device's lifecycle status.
///
/// Transitions come from outside (motion and installation sensors); nothing
/// here changes the status on its own.
#[derive(Debug, Clone, Default)]
pub struct DeviceStateMachine {
    current: DeviceStatus,
}

impl DeviceStateMachine {
    pub fn new(initial: DeviceStatus) -> Self {
        Self { current: initial }
    }

    pub fn current_status(&self) -> DeviceStatus {
        self.current
    }

    /// Returns whether the stored status changed.
    pub fn set_status(&mut self, status: DeviceStatus) -> bool {
        if status == self.current {
            debug!("Status already {}", status);
            return false;
        }
        info!("Status {} -> {}", self.current, status);
        self.current = status;
        true
    }

    /// Parses an externally supplied status name. Unknown names are rejected
    /// and the current status is kept.
    pub fn set_status_str(&mut self, raw: &str) -> Result<bool> {
        match raw.parse::<DeviceStatus>() {
            Ok(status) => Ok(self.set_status(status)),
            Err(e) => {
                warn!("Rejected status update, keeping {}: {}", self.current, e);
                Err(e)
            }
        }
    }

    pub fn set_status_tag(&mut self, tag: u8) -> Result<bool> {
        let status = DeviceStatus::try_from(tag)?;
        Ok(self.set_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn test_invalid_status_keeps_previous() {
        let mut sm = DeviceStateMachine::new(DeviceStatus::InTransit);
        assert!(matches!(
            sm.set_status_str("parked"),
            Err(Error::InvalidStatus(_))
        ));
        assert!(sm.set_status_tag(9).is_err());
        assert_eq!(sm.current_status(), DeviceStatus::InTransit);
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut sm = DeviceStateMachine::default();
        assert_eq!(sm.current_status(), DeviceStatus::InStorage);
        assert!(!sm.set_status_str("in_storage").unwrap());
        assert!(!sm.set_status_str("in_storage").unwrap());
        assert!(sm.set_status_str("detached").unwrap());
        assert_eq!(sm.current_status(), DeviceStatus::Detached);
    }
}
