use crate::phase::Phase;
use cue_lib::DeviceError;
use thiserror::Error;

/// Operator input that cannot start a session. Nothing has been opened yet
/// when this is returned, so the operator can simply retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: i64 },
    #[error("settle delay must not be negative, got {0} ms")]
    NegativeSettle(i64),
    #[error("stimulus sequence is empty")]
    NoStimuli,
    #[error("stimulus {0} has an empty identifier")]
    EmptyStimulus(usize),
    #[error("subject name {0:?} cannot be used in file names")]
    BadSubject(String),
    #[error("{stimuli} stimuli x {repeats} repeats is too long a session")]
    TooLong { stimuli: usize, repeats: u32 },
    #[error("device sampling rate {0} Hz does not give a usable sample period")]
    BadSamplingRate(f64),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("acquisition failed mid-session: {0}")]
    Acquisition(#[source] DeviceError),
    #[error("rendering the {phase} phase failed")]
    Render {
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
    #[error("exporting session data failed")]
    Export(#[source] anyhow::Error),
}
