use super::BoardDriver;
use crate::error::{DeviceError, DeviceResult};
use crate::signal::{ChannelLayout, RawFrame};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const BOARD_NAME: &str = "synthetic-board";

/// Shared flag modelling exclusive access to one physical device.
#[derive(Debug, Clone, Default)]
pub struct ClaimToken(Arc<AtomicBool>);

impl ClaimToken {
    fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub channels: usize,
    pub sampling_rate: f64,
    pub seed: u64,
    /// Report a dropped connection once this many frames were produced.
    pub fail_after: Option<u64>,
    /// Refuse `connect()` as if the device were out of range.
    pub unreachable: bool,
    /// Stream without ever producing a frame.
    pub stalled: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            sampling_rate: 500.0,
            seed: 0,
            fail_after: None,
            unreachable: false,
            stalled: false,
        }
    }
}

/// Signal generator paced by the wall clock: 10 Hz alpha plus noise on every
/// biosignal channel, gravity on the z axis.
pub struct SyntheticBoard {
    config: SyntheticConfig,
    claim: ClaimToken,
    connected: bool,
    stream_start: Option<Instant>,
    produced: u64,
    rng: StdRng,
}

impl SyntheticBoard {
    pub fn new(config: SyntheticConfig) -> Self {
        Self::with_claim(config, ClaimToken::default())
    }

    pub fn with_claim(config: SyntheticConfig, claim: ClaimToken) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            claim,
            connected: false,
            stream_start: None,
            produced: 0,
            rng,
        }
    }

    /// Frames produced since streaming began.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn due(&self) -> u64 {
        match self.stream_start {
            Some(start) => (start.elapsed().as_secs_f64() * self.config.sampling_rate) as u64,
            None => 0,
        }
    }

    fn frame(&mut self, index: u64) -> RawFrame {
        let t = index as f64 / self.config.sampling_rate;
        let biosignal = (0..self.config.channels)
            .map(|ch| {
                let phase = ch as f64 * 0.3;
                20.0 * (TAU * 10.0 * t + phase).sin() + self.rng.gen_range(-5.0..5.0)
            })
            .collect();
        let motion = [
            self.rng.gen_range(-0.02..0.02),
            self.rng.gen_range(-0.02..0.02),
            1.0 + self.rng.gen_range(-0.02..0.02),
        ];
        RawFrame { biosignal, motion }
    }
}

impl BoardDriver for SyntheticBoard {
    fn name(&self) -> String {
        BOARD_NAME.to_string()
    }

    fn connect(&mut self) -> DeviceResult<ChannelLayout> {
        if self.config.unreachable {
            return Err(DeviceError::connection(BOARD_NAME, "device not reachable"));
        }
        if !self.claim.try_claim() {
            return Err(DeviceError::connection(BOARD_NAME, "device already claimed"));
        }
        self.connected = true;
        Ok(ChannelLayout::new(
            BOARD_NAME,
            self.config.channels,
            self.config.sampling_rate,
        ))
    }

    fn begin_stream(&mut self) -> DeviceResult<()> {
        self.stream_start = Some(Instant::now());
        self.produced = 0;
        Ok(())
    }

    fn pending(&mut self) -> DeviceResult<usize> {
        if self.config.stalled || self.stream_start.is_none() {
            return Ok(0);
        }
        let mut due = self.due();
        if let Some(limit) = self.config.fail_after {
            if self.produced >= limit {
                return Err(DeviceError::acquisition(BOARD_NAME, "connection lost"));
            }
            due = due.min(limit);
        }
        Ok(due.saturating_sub(self.produced) as usize)
    }

    fn pull(&mut self, count: usize) -> DeviceResult<Vec<RawFrame>> {
        let available = self.pending()?;
        let take = count.min(available) as u64;
        let first = self.produced;
        let frames = (first..first + take).map(|i| self.frame(i)).collect();
        self.produced += take;
        Ok(frames)
    }

    fn end_stream(&mut self) -> DeviceResult<()> {
        self.stream_start = None;
        Ok(())
    }

    fn disconnect(&mut self) -> DeviceResult<()> {
        if self.connected {
            self.connected = false;
            self.claim.release();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_board_refuses_connection() {
        let mut board = SyntheticBoard::new(SyntheticConfig {
            unreachable: true,
            ..SyntheticConfig::default()
        });
        assert!(matches!(
            board.connect(),
            Err(DeviceError::Connection { .. })
        ));
    }

    #[test]
    fn stalled_board_never_has_pending_frames() {
        let mut board = SyntheticBoard::new(SyntheticConfig {
            stalled: true,
            ..SyntheticConfig::default()
        });
        board.connect().unwrap();
        board.begin_stream().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(board.pending().unwrap(), 0);
    }

    #[test]
    fn fail_after_caps_output_then_errors() {
        let mut board = SyntheticBoard::new(SyntheticConfig {
            sampling_rate: 2000.0,
            fail_after: Some(5),
            ..SyntheticConfig::default()
        });
        board.connect().unwrap();
        board.begin_stream().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(board.pending().unwrap(), 5);
        assert_eq!(board.pull(100).unwrap().len(), 5);
        assert!(matches!(
            board.pending(),
            Err(DeviceError::Acquisition { .. })
        ));
    }

    #[test]
    fn disconnect_releases_claim() {
        let claim = ClaimToken::default();
        let mut board = SyntheticBoard::with_claim(SyntheticConfig::default(), claim.clone());
        board.connect().unwrap();
        assert!(claim.is_claimed());
        board.disconnect().unwrap();
        assert!(!claim.is_claimed());
    }
}
