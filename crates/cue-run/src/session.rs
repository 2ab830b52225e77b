//! Session controller: ties the device, the acquisition worker and the phase
//! machine together and guarantees teardown plus export on every exit path.

use crate::config::{SessionConfig, SessionPlan};
use crate::error::SessionError;
use crate::machine::{PhaseMachine, PhaseOutcome};
use crate::phase::Renderer;
use crate::timer::{Timer, Wait};
use crate::triggers::Trigger;
use crossbeam_channel::Sender;
use cue_lib::{
    unix_now, AcquisitionLoop, AcquisitionOutcome, BoardDriver, ChannelLayout, DeviceSession,
    Sample,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Summary of one session, written into the manifest and returned to the
/// caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub subject: String,
    pub status: SessionStatus,
    /// Unix time when streaming started
    pub started_at: f64,
    pub finished_at: f64,
    pub samples: usize,
    pub triggers: usize,
    pub batches: usize,
    pub live_skipped: usize,
    pub layout: ChannelLayout,
    pub failure: Option<String>,
}

/// Both logs of a finished session, handed to the writer after the
/// acquisition worker has been joined.
#[derive(Debug, Clone)]
pub struct SessionExport {
    pub plan: SessionPlan,
    pub layout: ChannelLayout,
    pub samples: Vec<Sample>,
    pub triggers: Vec<Trigger>,
    pub report: SessionReport,
}

/// Persistence collaborator.
pub trait SessionWriter {
    fn export(&mut self, export: &SessionExport) -> anyhow::Result<()>;
}

pub struct SessionController<D: BoardDriver + 'static> {
    plan: SessionPlan,
    session: DeviceSession<D>,
}

impl<D: BoardDriver + 'static> SessionController<D> {
    /// Validate `config`. Nothing is opened when validation fails.
    pub fn new(config: &SessionConfig, driver: D) -> Result<Self, SessionError> {
        let plan = config.validate()?;
        Ok(Self::from_plan(plan, driver))
    }

    /// A [`SessionPlan`] only comes out of [`SessionConfig::validate`], so
    /// this cannot bypass validation.
    pub fn from_plan(plan: SessionPlan, driver: D) -> Self {
        Self {
            plan,
            session: DeviceSession::new(driver),
        }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    /// Run the whole session on the calling thread.
    ///
    /// Cancelling `timer` (from another thread, or through an acquisition
    /// failure) ends the phase sequence early. Once streaming has started
    /// the writer is always called, whatever the outcome. Errors are
    /// reported in this order: render failure, acquisition failure, export
    /// failure.
    pub fn run<T, R, W>(
        self,
        timer: &mut T,
        renderer: &mut R,
        writer: &mut W,
        live: Option<Sender<Sample>>,
    ) -> Result<SessionReport, SessionError>
    where
        T: Timer + ?Sized,
        R: Renderer + ?Sized,
        W: SessionWriter + ?Sized,
    {
        let Self { plan, mut session } = self;
        info!(
            "session for {} on {}: {} stimuli x {} repeats, about {:?}",
            plan.subject(),
            session.device_name(),
            plan.stimuli().len(),
            plan.repeats(),
            plan.expected_duration()
        );

        let layout = session.open()?;
        if let Err(err) = session.start_streaming() {
            if let Err(close_err) = session.close() {
                warn!("closing {} failed: {close_err}", layout.device);
            }
            return Err(err.into());
        }
        let started_at = unix_now();

        let canceller = timer.canceller();
        let acquisition = AcquisitionLoop::spawn(session, live, move |_| canceller.cancel())?;

        let mut machine = PhaseMachine::new(&plan);
        let sequence = if !plan.settle().is_zero() && timer.wait(plan.settle()) == Wait::Cancelled {
            info!("session cancelled while settling");
            Ok(PhaseOutcome::Cancelled)
        } else {
            machine.run(timer, renderer)
        };

        let (samples, failure, batches, live_skipped) = match acquisition.stop() {
            Ok(outcome) => {
                let AcquisitionOutcome {
                    samples,
                    failure,
                    mut session,
                    batches,
                    live_skipped,
                } = outcome;
                if let Err(err) = session.stop_streaming() {
                    warn!("stopping stream on {} failed: {err}", layout.device);
                }
                if let Err(err) = session.close() {
                    warn!("closing {} failed: {err}", layout.device);
                }
                (samples, failure, batches, live_skipped)
            }
            Err(err) => (Vec::new(), Some(err), 0, 0),
        };
        let triggers = machine.into_triggers();

        let (status, failure_text) = match (&sequence, &failure) {
            (Err(err), _) => (SessionStatus::Failed, Some(render_chain(err))),
            (Ok(_), Some(err)) => (SessionStatus::Failed, Some(err.to_string())),
            (Ok(PhaseOutcome::Cancelled), None) => (SessionStatus::Cancelled, None),
            (Ok(PhaseOutcome::Completed), None) => (SessionStatus::Completed, None),
        };
        let report = SessionReport {
            subject: plan.subject().to_string(),
            status,
            started_at,
            finished_at: unix_now(),
            samples: samples.len(),
            triggers: triggers.len(),
            batches,
            live_skipped,
            layout: layout.clone(),
            failure: failure_text,
        };
        info!(
            "session {:?}: {} samples, {} triggers",
            report.status, report.samples, report.triggers
        );

        let export = SessionExport {
            plan,
            layout,
            samples,
            triggers,
            report,
        };
        let exported = writer.export(&export);

        sequence?;
        if let Some(err) = failure {
            if let Err(export_err) = &exported {
                error!("export after acquisition failure also failed: {export_err:#}");
            }
            return Err(SessionError::Acquisition(err));
        }
        exported.map_err(SessionError::Export)?;
        Ok(export.report)
    }
}

fn render_chain(err: &SessionError) -> String {
    match err {
        SessionError::Render { source, .. } => format!("{err}: {source:#}"),
        other => other.to_string(),
    }
}

/// Writer that keeps every export in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub exports: Vec<SessionExport>,
    /// Fail every export with this message
    pub fail_with: Option<String>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&SessionExport> {
        self.exports.last()
    }
}

impl SessionWriter for MemoryWriter {
    fn export(&mut self, export: &SessionExport) -> anyhow::Result<()> {
        self.exports.push(export.clone());
        match &self.fail_with {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}
