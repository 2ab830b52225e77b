//! CSV and JSON export bundle.
//!
//! One session produces three files in the output directory, all prefixed
//! with the subject name and suffixed with the local wall-clock stamp taken
//! at export time:
//!
//! - `{subject}_{stamp}.csv` with the samples,
//! - `{subject}_triggers_{stamp}.csv` with the phase onsets,
//! - `{subject}_session_{stamp}.json` with the manifest.

use crate::config::{Stimulus, TimingSpec};
use crate::session::{SessionExport, SessionReport, SessionWriter};
use crate::triggers::Trigger;
use anyhow::{Context, Result};
use chrono::Local;
use csv::{ReaderBuilder, WriterBuilder};
use cue_lib::{ChannelLayout, Sample};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STAMP_FORMAT: &str = "%d_%m_%y_%H_%M_%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub report: SessionReport,
    pub settle_ms: u64,
    pub timing: TimingSpec,
    pub stimuli: Vec<Stimulus>,
    pub samples_file: String,
    pub triggers_file: String,
}

/// Paths of one export bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub samples: PathBuf,
    pub triggers: PathBuf,
    pub manifest: PathBuf,
}

impl ExportPaths {
    pub fn new(out_dir: &Path, subject: &str, stamp: &str) -> Self {
        Self {
            samples: out_dir.join(format!("{subject}_{stamp}.csv")),
            triggers: out_dir.join(format!("{subject}_triggers_{stamp}.csv")),
            manifest: out_dir.join(format!("{subject}_session_{stamp}.json")),
        }
    }
}

pub fn file_stamp() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

/// Writes the export bundle into a directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct CsvSessionWriter {
    out_dir: PathBuf,
    stamp: Option<String>,
    written: Vec<ExportPaths>,
}

impl CsvSessionWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            stamp: None,
            written: Vec::new(),
        }
    }

    /// Use a fixed stamp instead of the current local time.
    pub fn with_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.stamp = Some(stamp.into());
        self
    }

    /// Bundles written so far, oldest first.
    pub fn written(&self) -> &[ExportPaths] {
        &self.written
    }
}

impl SessionWriter for CsvSessionWriter {
    fn export(&mut self, export: &SessionExport) -> Result<()> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating output directory {}", self.out_dir.display()))?;
        let stamp = self.stamp.clone().unwrap_or_else(file_stamp);
        let paths = ExportPaths::new(&self.out_dir, export.plan.subject(), &stamp);

        write_samples_csv(&paths.samples, &export.layout, &export.samples)?;
        write_triggers_csv(&paths.triggers, &export.triggers)?;
        let manifest = SessionManifest {
            report: export.report.clone(),
            settle_ms: export.plan.settle().as_millis() as u64,
            timing: export.plan.durations().to_timing(export.plan.repeats()),
            stimuli: export.plan.stimuli().to_vec(),
            samples_file: file_name(&paths.samples),
            triggers_file: file_name(&paths.triggers),
        };
        write_manifest(&paths.manifest, &manifest)?;
        info!(
            "wrote {} samples to {} and {} triggers to {}",
            export.samples.len(),
            paths.samples.display(),
            export.triggers.len(),
            paths.triggers.display()
        );
        self.written.push(paths);
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn write_samples_csv(path: &Path, layout: &ChannelLayout, samples: &[Sample]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating samples file {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record(layout.column_names())?;
    for sample in samples {
        let mut row = Vec::with_capacity(layout.width() + 1);
        row.push(sample.timestamp.to_string());
        row.extend(sample.values().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_triggers_csv(path: &Path, triggers: &[Trigger]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating triggers file {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record([
        "timestamp",
        "phase",
        "stimulus_index",
        "stimulus_text",
        "stimulus_id",
        "repeat_index",
    ])?;
    for trigger in triggers {
        writer.write_record(&[
            trigger.timestamp.to_string(),
            trigger.phase.to_string(),
            trigger
                .stimulus_index
                .map(|v| v.to_string())
                .unwrap_or_default(),
            trigger.stimulus_text.clone().unwrap_or_default(),
            trigger.stimulus_id.clone().unwrap_or_default(),
            trigger.repeat_index.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_triggers_csv(path: &Path) -> Result<Vec<Trigger>> {
    // No trimming: stimulus captions keep their surrounding whitespace.
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening triggers {}", path.display()))?;
    let mut triggers = Vec::new();
    for row in reader.deserialize::<Trigger>() {
        let parsed = row.with_context(|| format!("parsing triggers in {}", path.display()))?;
        triggers.push(parsed);
    }
    Ok(triggers)
}

pub fn write_manifest(path: &Path, manifest: &SessionManifest) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating manifest {}", path.display()))?;
    serde_json::to_writer_pretty(file, manifest)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<SessionManifest> {
    let file =
        fs::File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
    let manifest = serde_json::from_reader::<_, SessionManifest>(file)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SessionPlan};
    use crate::phase::Phase;
    use crate::session::SessionStatus;
    use cue_lib::RawFrame;
    use tempfile::tempdir;

    fn plan() -> SessionPlan {
        SessionConfig {
            subject: "s01".into(),
            stimuli: vec![Stimulus::new("up.webp", "up")],
            ..SessionConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn export() -> SessionExport {
        let layout = ChannelLayout::new("synthetic-board", 2, 500.0);
        let samples = vec![
            Sample::from_frame(
                100.0,
                RawFrame {
                    biosignal: vec![1.5, -2.0],
                    motion: [0.0, 0.1, 1.0],
                },
            ),
            Sample::from_frame(
                100.25,
                RawFrame {
                    biosignal: vec![3.0, 4.0],
                    motion: [0.0, 0.0, 0.9],
                },
            ),
        ];
        let triggers = vec![
            Trigger {
                timestamp: 100.0,
                phase: Phase::Concentration,
                stimulus_index: None,
                stimulus_text: None,
                stimulus_id: None,
                repeat_index: 0,
            },
            Trigger {
                timestamp: 100.5,
                phase: Phase::Image,
                stimulus_index: Some(0),
                stimulus_text: Some("up".into()),
                stimulus_id: Some("up.webp".into()),
                repeat_index: 0,
            },
        ];
        let report = SessionReport {
            subject: "s01".into(),
            status: SessionStatus::Cancelled,
            started_at: 99.5,
            finished_at: 101.0,
            samples: samples.len(),
            triggers: triggers.len(),
            batches: 2,
            live_skipped: 0,
            layout: layout.clone(),
            failure: None,
        };
        SessionExport {
            plan: plan(),
            layout,
            samples,
            triggers,
            report,
        }
    }

    #[test]
    fn writes_the_bundle_with_subject_and_stamp() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("nested/out");
        let mut writer = CsvSessionWriter::new(&out).with_stamp("17_10_26_09_30_00");
        writer.export(&export()).unwrap();

        let paths = &writer.written()[0];
        assert_eq!(paths.samples, out.join("s01_17_10_26_09_30_00.csv"));
        assert_eq!(paths.triggers, out.join("s01_triggers_17_10_26_09_30_00.csv"));

        let samples = fs::read_to_string(&paths.samples).unwrap();
        let mut lines = samples.lines();
        assert_eq!(lines.next(), Some("timestamp,CH1,CH2,ACCx,ACCy,ACCz"));
        assert_eq!(lines.next(), Some("100,1.5,-2,0,0.1,1"));
        assert_eq!(lines.count(), 1);

        let manifest = read_manifest(&paths.manifest).unwrap();
        assert_eq!(manifest.report.status, SessionStatus::Cancelled);
        assert_eq!(manifest.samples_file, "s01_17_10_26_09_30_00.csv");
        assert_eq!(manifest.settle_ms, 5000);
        assert_eq!(manifest.timing, TimingSpec::default());
    }

    #[test]
    fn trigger_csv_leaves_absent_stimulus_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("triggers.csv");
        let bundle = export();
        write_triggers_csv(&path, &bundle.triggers).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("100,concentration,,,,0"));
        assert_eq!(read_triggers_csv(&path).unwrap(), bundle.triggers);
    }

    #[test]
    fn padded_captions_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("triggers.csv");
        let trigger = Trigger {
            timestamp: 12.5,
            phase: Phase::Image,
            stimulus_index: Some(3),
            stimulus_text: Some("  turn left ".into()),
            stimulus_id: Some(" left.webp".into()),
            repeat_index: 2,
        };
        write_triggers_csv(&path, std::slice::from_ref(&trigger)).unwrap();
        assert_eq!(read_triggers_csv(&path).unwrap(), vec![trigger]);
    }

    #[test]
    fn stamp_has_six_fields() {
        assert_eq!(file_stamp().split('_').count(), 6);
    }
}
