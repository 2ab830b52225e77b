use crate::config::Stimulus;
use crate::phase::Phase;
use cue_lib::{unix_now, MonotonicStamp};
use serde::{Deserialize, Serialize};

/// One timestamped phase onset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub timestamp: f64,
    pub phase: Phase,
    pub stimulus_index: Option<usize>,
    pub stimulus_text: Option<String>,
    pub stimulus_id: Option<String>,
    pub repeat_index: u32,
}

/// Append-only trigger log. Only the phase machine writes to it.
#[derive(Debug, Default)]
pub struct TriggerRecorder {
    records: Vec<Trigger>,
    clock: MonotonicStamp,
}

impl TriggerRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the current wall-clock time and append one record.
    pub fn record(
        &mut self,
        phase: Phase,
        active: Option<(usize, &Stimulus)>,
        repeat_index: u32,
    ) -> &Trigger {
        self.record_at(unix_now(), phase, active, repeat_index)
    }

    fn record_at(
        &mut self,
        now: f64,
        phase: Phase,
        active: Option<(usize, &Stimulus)>,
        repeat_index: u32,
    ) -> &Trigger {
        let trigger = Trigger {
            timestamp: self.clock.stamp_at(now),
            phase,
            stimulus_index: active.map(|(index, _)| index),
            stimulus_text: active.map(|(_, s)| s.text.clone()),
            stimulus_id: active.map(|(_, s)| s.id.clone()),
            repeat_index,
        };
        self.records.push(trigger);
        &self.records[self.records.len() - 1]
    }

    pub fn export_all(&self) -> &[Trigger] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Trigger> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
