use thiserror::Error;

/// Failures reported by a device session or its driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// Device unreachable or already claimed by another session.
    #[error("cannot connect to {device}: {reason}")]
    Connection { device: String, reason: String },
    /// Lifecycle call made in the wrong order.
    #[error("{operation} is invalid while the device is {state}")]
    State {
        operation: &'static str,
        state: &'static str,
    },
    /// Device dropped or faulted while streaming.
    #[error("acquisition failed on {device}: {reason}")]
    Acquisition { device: String, reason: String },
}

impl DeviceError {
    pub fn connection(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Connection {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn acquisition(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Acquisition {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
