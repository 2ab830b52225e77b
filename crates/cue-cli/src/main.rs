use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cue_lib::device::synthetic::{SyntheticBoard, SyntheticConfig};
use cue_lib::BoardDriver;
use cue_run::{
    config::DeviceSpec, planned_timeline, read_config, timeline_length_ms, CsvSessionWriter, Cue,
    DriverKind, ManualTimer, Renderer, SessionConfig, SessionController, ThreadTimer, Timer,
};
use log::{info, warn};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "cue",
    version,
    about = "CUE: stimulus-cued biosignal session recorder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recording session and write samples, triggers and manifest to --out
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        repeats: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        settle_ms: Option<i64>,
        /// Fire every phase timer immediately instead of waiting
        #[arg(long)]
        dry_run: bool,
        /// Fixed file stamp instead of the local time (DD_MM_YY_HH_MM_SS)
        #[arg(long)]
        stamp: Option<String>,
    },
    /// Validate a session config and print it as JSON
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the planned trigger timeline as JSON lines
    Plan {
        #[arg(long)]
        config: PathBuf,
    },
    /// List acquisition devices that can be opened
    Devices {
        #[arg(long, default_value = "EEG")]
        query: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            out,
            subject,
            repeats,
            settle_ms,
            dry_run,
            stamp,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(subject) = subject {
                cfg.subject = subject;
            }
            if let Some(repeats) = repeats {
                cfg.timing.repeats = repeats;
            }
            if let Some(settle_ms) = settle_ms {
                cfg.settle_ms = settle_ms;
            }
            cmd_run(&cfg, &out, dry_run, stamp)?
        }
        Commands::Validate { config } => cmd_validate(&config)?,
        Commands::Plan { config } => cmd_plan(&config)?,
        Commands::Devices { query } => cmd_devices(&query)?,
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    read_config(path).with_context(|| format!("loading {}", path.display()))
}

/// Renders cues to the log; a display front end plugs in here.
struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, cue: &Cue<'_>) -> Result<()> {
        match cue {
            Cue::Stimulus { index, stimulus } => {
                info!("stimulus {index}: {} ({})", stimulus.text, stimulus.id)
            }
            Cue::Silent => info!("blank"),
            other => {
                if let Some([r, g, b]) = other.marker_rgb() {
                    info!("marker #{r:02x}{g:02x}{b:02x}");
                }
            }
        }
        Ok(())
    }
}

fn build_driver(spec: &DeviceSpec) -> Result<Box<dyn BoardDriver>> {
    match spec.driver {
        DriverKind::Synthetic => Ok(Box::new(SyntheticBoard::new(SyntheticConfig {
            channels: spec.channels,
            sampling_rate: spec.sampling_rate,
            seed: spec.seed,
            ..SyntheticConfig::default()
        }))),
        #[cfg(feature = "lsl")]
        DriverKind::Lsl => Ok(Box::new(cue_lib::device::lsl::LslBoard::new(
            spec.query.clone(),
            spec.source_id.clone(),
            spec.sampling_rate,
        ))),
        #[cfg(not(feature = "lsl"))]
        DriverKind::Lsl => Err(anyhow!(
            "LSL driver requested but cue was built without the `lsl` feature"
        )),
    }
}

fn cmd_run(cfg: &SessionConfig, out: &Path, dry_run: bool, stamp: Option<String>) -> Result<()> {
    let driver = build_driver(&cfg.device)?;
    let controller = SessionController::new(cfg, driver)?;
    let mut writer = CsvSessionWriter::new(out);
    if let Some(stamp) = stamp {
        writer = writer.with_stamp(stamp);
    }
    let mut timer: Box<dyn Timer> = if dry_run {
        Box::new(ManualTimer::new())
    } else {
        Box::new(ThreadTimer::new())
    };
    let result = controller.run(timer.as_mut(), &mut LogRenderer, &mut writer, None);
    for paths in writer.written() {
        info!("manifest written to {}", paths.manifest.display());
    }
    let report = result?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let cfg = load_config(path)?;
    let plan = cfg.validate()?;
    let summary = serde_json::json!({
        "subject": plan.subject(),
        "settle_ms": plan.settle().as_millis() as u64,
        "timing": plan.durations().to_timing(plan.repeats()),
        "device": cfg.device,
        "stimuli": plan.stimuli(),
        "expected_triggers": plan.expected_triggers(),
        "expected_duration_ms": plan.expected_duration().as_millis() as u64,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_plan(path: &Path) -> Result<()> {
    let plan = load_config(path)?.validate()?;
    let timeline = planned_timeline(&plan);
    info!(
        "{} onsets over {} ms after a {} ms settle",
        timeline.len(),
        timeline_length_ms(&timeline),
        plan.settle().as_millis()
    );
    for trigger in &timeline {
        println!("{}", serde_json::to_string(trigger)?);
    }
    Ok(())
}

#[cfg(feature = "lsl")]
fn cmd_devices(query: &str) -> Result<()> {
    let streams = cue_lib::device::lsl::discover(query)?;
    if streams.is_empty() {
        warn!("no LSL streams of type {query} found");
    }
    for stream in streams {
        let line = serde_json::json!({
            "driver": "lsl",
            "name": stream.name,
            "source_id": stream.source_id,
            "channels": stream.channels,
            "sampling_rate": stream.fs,
        });
        println!("{line}");
    }
    Ok(())
}

#[cfg(not(feature = "lsl"))]
fn cmd_devices(query: &str) -> Result<()> {
    warn!("built without the `lsl` feature, not searching for {query} streams");
    let spec = DeviceSpec::default();
    let line = serde_json::json!({
        "driver": "synthetic",
        "name": "synthetic-board",
        "channels": spec.channels,
        "sampling_rate": spec.sampling_rate,
    });
    println!("{line}");
    Ok(())
}
