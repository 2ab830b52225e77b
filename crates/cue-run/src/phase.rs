use crate::config::Stimulus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five sub-states presented for every stimulus, in presentation order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Concentration,
    Image,
    Action,
    Relax,
    Rest,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Concentration,
        Phase::Image,
        Phase::Action,
        Phase::Relax,
        Phase::Rest,
    ];

    pub fn index(&self) -> usize {
        match self {
            Phase::Concentration => 0,
            Phase::Image => 1,
            Phase::Action => 2,
            Phase::Relax => 3,
            Phase::Rest => 4,
        }
    }

    /// Following phase, wrapping from Rest back to Concentration.
    pub fn next(&self) -> Phase {
        Phase::ALL[(self.index() + 1) % Phase::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Concentration => "concentration",
            Phase::Image => "image",
            Phase::Action => "action",
            Phase::Relax => "relax",
            Phase::Rest => "rest",
        }
    }

    /// Only the Image phase shows (and logs) the active stimulus.
    pub fn shows_stimulus(&self) -> bool {
        matches!(self, Phase::Image)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the display should show while a phase is active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cue<'a> {
    /// Green fixation disc
    NeutralMarker,
    Stimulus {
        index: usize,
        stimulus: &'a Stimulus,
    },
    /// White disc
    ActionMarker,
    /// Red disc
    RelaxMarker,
    /// Blank screen
    Silent,
}

impl<'a> Cue<'a> {
    pub fn for_phase(phase: Phase, index: usize, stimulus: &'a Stimulus) -> Self {
        match phase {
            Phase::Concentration => Cue::NeutralMarker,
            Phase::Image => Cue::Stimulus { index, stimulus },
            Phase::Action => Cue::ActionMarker,
            Phase::Relax => Cue::RelaxMarker,
            Phase::Rest => Cue::Silent,
        }
    }

    /// RGB colour of the marker disc, if the cue draws one.
    pub fn marker_rgb(&self) -> Option<[u8; 3]> {
        match self {
            Cue::NeutralMarker => Some([0, 128, 0]),
            Cue::ActionMarker => Some([255, 255, 255]),
            Cue::RelaxMarker => Some([255, 0, 0]),
            Cue::Stimulus { .. } | Cue::Silent => None,
        }
    }
}

/// Display collaborator. Rendering completes before the phase timer starts.
pub trait Renderer {
    fn render(&mut self, cue: &Cue<'_>) -> Result<()>;
}

impl<F> Renderer for F
where
    F: FnMut(&Cue<'_>) -> Result<()>,
{
    fn render(&mut self, cue: &Cue<'_>) -> Result<()> {
        self(cue)
    }
}
