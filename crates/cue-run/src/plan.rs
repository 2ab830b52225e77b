use crate::config::SessionPlan;
use crate::machine::PhaseCursor;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};

/// Expected trigger onset, computed from the configured durations alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTrigger {
    /// Milliseconds after the first phase starts (the settle delay is not
    /// included)
    pub offset_ms: u64,
    pub phase: Phase,
    pub stimulus_index: Option<usize>,
    pub stimulus_text: Option<String>,
    pub repeat_index: u32,
    pub duration_ms: u64,
}

/// Timeline a full session should reproduce, modulo timer jitter.
pub fn planned_timeline(plan: &SessionPlan) -> Vec<PlannedTrigger> {
    let mut cursor = PhaseCursor::new(plan.durations(), plan.repeats(), plan.stimuli().len());
    let mut timeline = Vec::with_capacity(plan.expected_triggers());
    let mut offset_ms = 0u64;
    loop {
        let duration_ms = cursor.duration().as_millis() as u64;
        let active = cursor
            .phase
            .shows_stimulus()
            .then(|| &plan.stimuli()[cursor.stimulus]);
        timeline.push(PlannedTrigger {
            offset_ms,
            phase: cursor.phase,
            stimulus_index: active.map(|_| cursor.stimulus),
            stimulus_text: active.map(|s| s.text.clone()),
            repeat_index: cursor.repeat,
            duration_ms,
        });
        offset_ms += duration_ms;
        if !cursor.advance() {
            return timeline;
        }
    }
}

/// Time from the first phase onset until the final Rest ends.
pub fn timeline_length_ms(timeline: &[PlannedTrigger]) -> u64 {
    timeline
        .last()
        .map_or(0, |last| last.offset_ms + last.duration_ms)
}
