//! Five-phase stimulus sequencer.
//!
//! The machine never sleeps by itself: [`PhaseMachine::start`] and
//! [`PhaseMachine::elapsed`] return the next [`Step`], and whoever owns the
//! [`Timer`] waits it out. Each transition runs to completion before the next
//! wait starts, so exactly one phase is active at a time.

use crate::config::{PhaseDurations, SessionPlan, Stimulus};
use crate::error::SessionError;
use crate::phase::{Cue, Phase, Renderer};
use crate::timer::{Timer, Wait};
use crate::triggers::{Trigger, TriggerRecorder};
use log::{debug, info};
use std::time::Duration;

/// Position in the session: phase, stimulus and repeat cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCursor {
    pub phase: Phase,
    pub stimulus: usize,
    pub repeat: u32,
    durations: PhaseDurations,
    repeats: u32,
    stimulus_count: usize,
}

impl PhaseCursor {
    pub fn new(durations: PhaseDurations, repeats: u32, stimulus_count: usize) -> Self {
        Self {
            phase: Phase::Concentration,
            stimulus: 0,
            repeat: 0,
            durations,
            repeats,
            stimulus_count,
        }
    }

    pub fn duration(&self) -> Duration {
        self.durations.for_phase(self.phase)
    }

    /// Move to the next phase. Returns `false`, leaving the cursor on the
    /// final Rest, when the last pass over the stimuli has finished.
    pub fn advance(&mut self) -> bool {
        let next = self.phase.next();
        if next != Phase::Concentration {
            self.phase = next;
            return true;
        }
        let stimulus = (self.stimulus + 1) % self.stimulus_count;
        if stimulus == 0 {
            if self.repeat + 1 >= self.repeats {
                return false;
            }
            self.repeat += 1;
        }
        self.stimulus = stimulus;
        self.phase = next;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the current phase on screen for this long.
    Wait(Duration),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Running,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Cancelled,
}

pub struct PhaseMachine {
    cursor: PhaseCursor,
    stimuli: Vec<Stimulus>,
    recorder: TriggerRecorder,
    state: MachineState,
}

impl PhaseMachine {
    pub fn new(plan: &SessionPlan) -> Self {
        Self {
            cursor: PhaseCursor::new(plan.durations(), plan.repeats(), plan.stimuli().len()),
            stimuli: plan.stimuli().to_vec(),
            recorder: TriggerRecorder::new(),
            state: MachineState::Idle,
        }
    }

    pub fn cursor(&self) -> &PhaseCursor {
        &self.cursor
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn triggers(&self) -> &[Trigger] {
        self.recorder.export_all()
    }

    pub fn into_triggers(self) -> Vec<Trigger> {
        self.recorder.into_records()
    }

    /// Enter the initial phase. Calling it again after the first time only
    /// reports the current state without rendering or recording.
    pub fn start<R: Renderer + ?Sized>(&mut self, renderer: &mut R) -> Result<Step, SessionError> {
        match self.state {
            MachineState::Idle => {
                self.state = MachineState::Running;
                self.enter(renderer)
            }
            MachineState::Running => Ok(Step::Wait(self.cursor.duration())),
            MachineState::Complete => Ok(Step::Complete),
        }
    }

    /// The current phase's timer fired.
    pub fn elapsed<R: Renderer + ?Sized>(&mut self, renderer: &mut R) -> Result<Step, SessionError> {
        if self.state != MachineState::Running {
            return Ok(Step::Complete);
        }
        if !self.cursor.advance() {
            self.state = MachineState::Complete;
            info!("sequence complete after {} triggers", self.recorder.len());
            return Ok(Step::Complete);
        }
        self.enter(renderer)
    }

    fn enter<R: Renderer + ?Sized>(&mut self, renderer: &mut R) -> Result<Step, SessionError> {
        let phase = self.cursor.phase;
        let index = self.cursor.stimulus;
        let stimulus = &self.stimuli[index];
        renderer
            .render(&Cue::for_phase(phase, index, stimulus))
            .map_err(|source| SessionError::Render { phase, source })?;
        let active = phase.shows_stimulus().then_some((index, stimulus));
        self.recorder.record(phase, active, self.cursor.repeat);
        debug!(
            "{} (stimulus {}, repeat {}) for {:?}",
            phase,
            index,
            self.cursor.repeat,
            self.cursor.duration()
        );
        Ok(Step::Wait(self.cursor.duration()))
    }

    /// Drive the machine to its terminal state, or until the timer is
    /// cancelled. A render failure stops the sequence immediately.
    pub fn run<T, R>(&mut self, timer: &mut T, renderer: &mut R) -> Result<PhaseOutcome, SessionError>
    where
        T: Timer + ?Sized,
        R: Renderer + ?Sized,
    {
        let mut step = self.start(renderer)?;
        loop {
            match step {
                Step::Complete => return Ok(PhaseOutcome::Completed),
                Step::Wait(delay) => match timer.wait(delay) {
                    Wait::Elapsed => step = self.elapsed(renderer)?,
                    Wait::Cancelled => {
                        info!(
                            "sequence cancelled during {} after {} triggers",
                            self.cursor.phase,
                            self.recorder.len()
                        );
                        return Ok(PhaseOutcome::Cancelled);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, TimingSpec};
    use crate::timer::ManualTimer;
    use anyhow::anyhow;

    fn plan(stimuli: &[&str], repeats: i64) -> SessionPlan {
        SessionConfig {
            settle_ms: 0,
            timing: TimingSpec {
                repeats,
                ..TimingSpec::default()
            },
            stimuli: stimuli
                .iter()
                .map(|s| Stimulus::new(format!("{s}.webp"), *s))
                .collect(),
            ..SessionConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn run_to_end(plan: &SessionPlan) -> (PhaseMachine, ManualTimer, Vec<String>) {
        let mut machine = PhaseMachine::new(plan);
        let mut timer = ManualTimer::new();
        let mut cues = Vec::new();
        let mut renderer = |cue: &Cue<'_>| -> anyhow::Result<()> {
            cues.push(match cue {
                Cue::Stimulus { stimulus, .. } => stimulus.text.clone(),
                other => format!("{other:?}"),
            });
            Ok(())
        };
        let outcome = machine.run(&mut timer, &mut renderer).unwrap();
        assert_eq!(outcome, PhaseOutcome::Completed);
        (machine, timer, cues)
    }

    #[test]
    fn two_stimuli_two_repeats() {
        let plan = plan(&["A", "B"], 2);
        let (machine, timer, _) = run_to_end(&plan);
        let triggers = machine.triggers();
        assert_eq!(triggers.len(), 20);
        assert_eq!(triggers.len(), plan.expected_triggers());

        let images: Vec<_> = triggers
            .iter()
            .filter(|t| t.phase == Phase::Image)
            .map(|t| t.stimulus_text.clone().unwrap())
            .collect();
        assert_eq!(images, vec!["A", "B", "A", "B"]);

        let repeats: Vec<_> = triggers
            .iter()
            .filter(|t| t.phase == Phase::Image)
            .map(|t| t.repeat_index)
            .collect();
        assert_eq!(repeats, vec![0, 0, 1, 1]);
        assert!(triggers[..10].iter().all(|t| t.repeat_index == 0));
        assert!(triggers[10..].iter().all(|t| t.repeat_index == 1));

        // Every phase, including the final Rest, waits its full duration.
        assert_eq!(timer.waits().len(), 20);
        assert_eq!(timer.elapsed(), plan.durations().cycle() * 4);
    }

    #[test]
    fn phase_names_repeat_with_period_five() {
        let plan = plan(&["A", "B", "C"], 3);
        let (machine, _, _) = run_to_end(&plan);
        for (i, trigger) in machine.triggers().iter().enumerate() {
            assert_eq!(trigger.phase, Phase::ALL[i % 5]);
            assert_eq!(trigger.repeat_index as usize, i / 15);
            if trigger.phase == Phase::Image {
                assert_eq!(trigger.stimulus_index, Some((i / 5) % 3));
            } else {
                assert_eq!(trigger.stimulus_index, None);
                assert_eq!(trigger.stimulus_text, None);
            }
        }
    }

    #[test]
    fn single_pass_has_no_trailing_concentration() {
        let plan = plan(&["A", "B"], 1);
        let (machine, _, cues) = run_to_end(&plan);
        let triggers = machine.triggers();
        assert_eq!(triggers.len(), 10);
        assert_eq!(triggers.last().unwrap().phase, Phase::Rest);
        assert_eq!(cues.last().unwrap(), "Silent");
        assert_eq!(machine.state(), MachineState::Complete);
        assert_eq!(machine.cursor().phase, Phase::Rest);
    }

    #[test]
    fn cancel_stops_without_further_triggers() {
        let plan = plan(&["A"], 5);
        let mut machine = PhaseMachine::new(&plan);
        let mut timer = ManualTimer::cancel_after(7);
        let mut renderer = |_: &Cue<'_>| -> anyhow::Result<()> { Ok(()) };
        let outcome = machine.run(&mut timer, &mut renderer).unwrap();
        assert_eq!(outcome, PhaseOutcome::Cancelled);
        assert_eq!(machine.triggers().len(), 8);
        assert_eq!(machine.state(), MachineState::Running);
    }

    #[test]
    fn render_failure_is_fatal() {
        let plan = plan(&["A"], 1);
        let mut machine = PhaseMachine::new(&plan);
        let mut timer = ManualTimer::new();
        let mut renderer = |cue: &Cue<'_>| -> anyhow::Result<()> {
            match cue {
                Cue::ActionMarker => Err(anyhow!("display lost")),
                _ => Ok(()),
            }
        };
        let err = machine.run(&mut timer, &mut renderer).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Render {
                phase: Phase::Action,
                ..
            }
        ));
        assert_eq!(machine.triggers().len(), 2);
    }

    #[test]
    fn stepping_by_hand_matches_durations() {
        let plan = plan(&["A"], 1);
        let mut machine = PhaseMachine::new(&plan);
        let mut renderer = |_: &Cue<'_>| -> anyhow::Result<()> { Ok(()) };
        let mut steps = vec![machine.start(&mut renderer).unwrap()];
        while let Some(Step::Wait(_)) = steps.last() {
            steps.push(machine.elapsed(&mut renderer).unwrap());
        }
        let expected: Vec<Step> = Phase::ALL
            .iter()
            .map(|p| Step::Wait(plan.durations().for_phase(*p)))
            .chain(std::iter::once(Step::Complete))
            .collect();
        assert_eq!(steps, expected);
        assert_eq!(machine.elapsed(&mut renderer).unwrap(), Step::Complete);
        assert_eq!(machine.triggers().len(), 5);
    }
}
