pub mod acquisition;
pub mod device;
pub mod error;
pub mod signal;

pub use acquisition::{AcquisitionLoop, AcquisitionOutcome};
pub use device::{BoardDriver, DeviceSession, SessionState};
pub use error::{DeviceError, DeviceResult};
pub use signal::*;
