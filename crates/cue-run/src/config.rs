use crate::error::ValidationError;
use crate::phase::Phase;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settling delay before the first phase, giving the amplifier time to stabilise.
pub const DEFAULT_SETTLE_MS: i64 = 5000;

/// One entry of the stimulus sequence: what to display and its caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stimulus {
    /// Displayable identifier, usually an image path
    pub id: String,
    pub text: String,
}

impl Stimulus {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Operator-entered timing, kept signed so bad input can be reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSpec {
    pub concentration_ms: i64,
    pub image_ms: i64,
    pub action_ms: i64,
    pub relax_ms: i64,
    pub rest_ms: i64,
    /// Number of full passes over the stimulus sequence
    pub repeats: i64,
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self {
            concentration_ms: 500,
            image_ms: 1000,
            action_ms: 2500,
            relax_ms: 1000,
            rest_ms: 1000,
            repeats: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Synthetic,
    Lsl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    #[serde(default = "default_driver")]
    pub driver: DriverKind,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    #[serde(default)]
    pub seed: u64,
    /// LSL stream type to resolve
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default)]
    pub source_id: Option<String>,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            channels: default_channels(),
            sampling_rate: default_sampling_rate(),
            seed: 0,
            query: default_query(),
            source_id: None,
        }
    }
}

impl DeviceSpec {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.channels == 0 {
            return Err(ValidationError::NotPositive {
                field: "channels",
                value: 0,
            });
        }
        let period = Duration::try_from_secs_f64(1.0 / self.sampling_rate);
        if self.sampling_rate <= 0.0 || !self.sampling_rate.is_finite() || period.is_err() {
            return Err(ValidationError::BadSamplingRate(self.sampling_rate));
        }
        Ok(())
    }
}

fn default_driver() -> DriverKind {
    DriverKind::Synthetic
}

fn default_channels() -> usize {
    8
}

fn default_sampling_rate() -> f64 {
    500.0
}

fn default_query() -> String {
    "EEG".into()
}

fn default_subject() -> String {
    "unnamed".into()
}

fn default_settle_ms() -> i64 {
    DEFAULT_SETTLE_MS
}

/// Session configuration as read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: i64,
    #[serde(default)]
    pub timing: TimingSpec,
    #[serde(default)]
    pub device: DeviceSpec,
    #[serde(default)]
    pub stimuli: Vec<Stimulus>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            settle_ms: DEFAULT_SETTLE_MS,
            timing: TimingSpec::default(),
            device: DeviceSpec::default(),
            stimuli: Vec::new(),
        }
    }
}

/// Validated per-phase durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub concentration: Duration,
    pub image: Duration,
    pub action: Duration,
    pub relax: Duration,
    pub rest: Duration,
}

impl PhaseDurations {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Concentration => self.concentration,
            Phase::Image => self.image,
            Phase::Action => self.action,
            Phase::Relax => self.relax,
            Phase::Rest => self.rest,
        }
    }

    /// Length of one five-phase cycle.
    pub fn cycle(&self) -> Duration {
        Phase::ALL.iter().map(|p| self.for_phase(*p)).sum()
    }

    /// Back to the millisecond form used in config files and manifests.
    pub fn to_timing(&self, repeats: u32) -> TimingSpec {
        let ms = |d: Duration| d.as_millis() as i64;
        TimingSpec {
            concentration_ms: ms(self.concentration),
            image_ms: ms(self.image),
            action_ms: ms(self.action),
            relax_ms: ms(self.relax),
            rest_ms: ms(self.rest),
            repeats: i64::from(repeats),
        }
    }
}

/// Configuration that passed validation; the only input a session accepts.
///
/// Fields are private so a plan can only come out of
/// [`SessionConfig::validate`]:
///
/// ```compile_fail
/// use cue_run::config::SessionPlan;
/// let plan = SessionPlan { subject: String::new(), stimuli: Vec::new() };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    subject: String,
    settle: Duration,
    durations: PhaseDurations,
    repeats: u32,
    stimuli: Vec<Stimulus>,
}

impl SessionPlan {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn durations(&self) -> PhaseDurations {
        self.durations
    }

    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Never empty.
    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }

    /// Triggers a full session records: five per stimulus per pass.
    pub fn expected_triggers(&self) -> usize {
        (Phase::ALL.len() * self.stimuli.len()).saturating_mul(self.repeats as usize)
    }

    /// Settle delay plus every phase of every pass.
    pub fn expected_duration(&self) -> Duration {
        session_length(self.settle, self.durations, self.stimuli.len(), self.repeats)
            .unwrap_or(Duration::MAX)
    }
}

fn session_length(
    settle: Duration,
    durations: PhaseDurations,
    stimuli: usize,
    repeats: u32,
) -> Option<Duration> {
    let cycles = u32::try_from(stimuli).ok()?.checked_mul(repeats)?;
    // The trigger count has to fit in memory indices too.
    Phase::ALL.len().checked_mul(cycles as usize)?;
    durations.cycle().checked_mul(cycles)?.checked_add(settle)
}

fn positive(field: &'static str, value: i64) -> Result<u64, ValidationError> {
    if value > 0 {
        Ok(value as u64)
    } else {
        Err(ValidationError::NotPositive { field, value })
    }
}

impl TimingSpec {
    pub fn durations(&self) -> Result<PhaseDurations, ValidationError> {
        Ok(PhaseDurations {
            concentration: Duration::from_millis(positive(
                "concentration_ms",
                self.concentration_ms,
            )?),
            image: Duration::from_millis(positive("image_ms", self.image_ms)?),
            action: Duration::from_millis(positive("action_ms", self.action_ms)?),
            relax: Duration::from_millis(positive("relax_ms", self.relax_ms)?),
            rest: Duration::from_millis(positive("rest_ms", self.rest_ms)?),
        })
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<SessionPlan, ValidationError> {
        let durations = self.timing.durations()?;
        let repeats = positive("repeats", self.timing.repeats)?;
        let repeats = u32::try_from(repeats).map_err(|_| ValidationError::NotPositive {
            field: "repeats",
            value: self.timing.repeats,
        })?;
        if self.settle_ms < 0 {
            return Err(ValidationError::NegativeSettle(self.settle_ms));
        }
        if self.stimuli.is_empty() {
            return Err(ValidationError::NoStimuli);
        }
        if let Some(index) = self.stimuli.iter().position(|s| s.id.trim().is_empty()) {
            return Err(ValidationError::EmptyStimulus(index));
        }
        let settle = Duration::from_millis(self.settle_ms as u64);
        if session_length(settle, durations, self.stimuli.len(), repeats).is_none() {
            return Err(ValidationError::TooLong {
                stimuli: self.stimuli.len(),
                repeats,
            });
        }
        self.device.validate()?;
        let subject = self.subject.trim();
        let subject = if subject.is_empty() { "unnamed" } else { subject };
        if subject.contains(['/', '\\']) || subject == "." || subject == ".." {
            return Err(ValidationError::BadSubject(subject.to_string()));
        }
        Ok(SessionPlan {
            subject: subject.to_string(),
            settle,
            durations,
            repeats,
            stimuli: self.stimuli.clone(),
        })
    }
}

pub fn read_config(path: &Path) -> Result<SessionConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read session config {}", path.display()))?;
    let config: SessionConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing session config {}", path.display()))?;
    Ok(config)
}
