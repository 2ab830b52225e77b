//! Stimulus-cued recording sessions: phase sequencing, trigger logging and
//! export, on top of the acquisition pipeline in `cue-lib`.

pub mod config;
pub mod error;
pub mod export;
pub mod machine;
pub mod phase;
pub mod plan;
pub mod session;
pub mod timer;
pub mod triggers;

pub use config::{read_config, DeviceSpec, DriverKind, SessionConfig, SessionPlan, Stimulus, TimingSpec};
pub use error::{SessionError, ValidationError};
pub use export::{CsvSessionWriter, ExportPaths, SessionManifest};
pub use machine::{PhaseCursor, PhaseMachine, PhaseOutcome, Step};
pub use phase::{Cue, Phase, Renderer};
pub use plan::{planned_timeline, timeline_length_ms, PlannedTrigger};
pub use session::{
    MemoryWriter, SessionController, SessionExport, SessionReport, SessionStatus, SessionWriter,
};
pub use timer::{Canceller, ManualTimer, ThreadTimer, Timer, Wait};
pub use triggers::{Trigger, TriggerRecorder};
