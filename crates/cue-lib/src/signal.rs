use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of motion (accelerometer) axes reported by every supported board.
pub const MOTION_AXES: usize = 3;

/// Channel layout discovered when a device is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayout {
    /// Human readable device name
    pub device: String,
    /// Number of biosignal (EEG) channels
    pub biosignal_channels: usize,
    /// Uniform sampling frequency in Hz
    pub sampling_rate: f64,
}

impl ChannelLayout {
    pub fn new(device: impl Into<String>, biosignal_channels: usize, sampling_rate: f64) -> Self {
        Self {
            device: device.into(),
            biosignal_channels,
            sampling_rate,
        }
    }

    /// Values per frame: biosignal channels followed by the motion axes.
    pub fn width(&self) -> usize {
        self.biosignal_channels + MOTION_AXES
    }

    /// Time between two consecutive samples, `None` when the rate does not
    /// give a representable period.
    pub fn sample_period(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.sampling_rate).ok()
    }

    /// Export column names: `timestamp, CH1..CHn, ACCx, ACCy, ACCz`.
    pub fn column_names(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.width() + 1);
        columns.push("timestamp".to_string());
        columns.extend((1..=self.biosignal_channels).map(|i| format!("CH{i}")));
        columns.extend(["ACCx", "ACCy", "ACCz"].iter().map(|s| s.to_string()));
        columns
    }
}

/// One raw frame as delivered by a driver, before it is timestamped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub biosignal: Vec<f64>,
    pub motion: [f64; MOTION_AXES],
}

/// One timestamped acquisition reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the UNIX epoch at the moment of the read call
    pub timestamp: f64,
    pub biosignal: Vec<f64>,
    pub motion: [f64; MOTION_AXES],
}

impl Sample {
    pub fn from_frame(timestamp: f64, frame: RawFrame) -> Self {
        Self {
            timestamp,
            biosignal: frame.biosignal,
            motion: frame.motion,
        }
    }

    /// Row in export column order, without the timestamp.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.biosignal.iter().copied().chain(self.motion.iter().copied())
    }
}

/// Wall-clock seconds since the UNIX epoch, shared by samples and triggers.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

/// Wall-clock stamps that never go backwards, even if the system clock is
/// stepped back between two reads.
#[derive(Debug, Clone)]
pub struct MonotonicStamp {
    last: f64,
}

impl MonotonicStamp {
    pub fn new() -> Self {
        Self { last: f64::MIN }
    }

    pub fn stamp(&mut self) -> f64 {
        self.stamp_at(unix_now())
    }

    /// Stamp for a clock reading of `now`, clamped to the previous stamp.
    pub fn stamp_at(&mut self, now: f64) -> f64 {
        self.last = now.max(self.last);
        self.last
    }
}

impl Default for MonotonicStamp {
    fn default() -> Self {
        Self::new()
    }
}
