//! Device session lifecycle on top of a vendor driver.
//!
//! A [`DeviceSession`] owns exactly one [`BoardDriver`] and enforces the
//! `open → start_streaming → read_available* → stop_streaming → close` order.
//! Teardown calls are idempotent so partial-failure shutdown paths can call
//! them unconditionally.

#[cfg(feature = "lsl")]
pub mod lsl;
pub mod synthetic;

use crate::error::{DeviceError, DeviceResult};
use crate::signal::{ChannelLayout, RawFrame, MOTION_AXES};
use log::{debug, info, warn};

/// Minimal contract a vendor driver has to fulfil.
pub trait BoardDriver: Send {
    /// Name used in logs and error messages.
    fn name(&self) -> String;
    /// Claim the device and report its layout.
    fn connect(&mut self) -> DeviceResult<ChannelLayout>;
    fn begin_stream(&mut self) -> DeviceResult<()>;
    /// Number of frames that can be pulled right now without blocking.
    fn pending(&mut self) -> DeviceResult<usize>;
    /// Pull at most `count` frames, oldest first.
    fn pull(&mut self, count: usize) -> DeviceResult<Vec<RawFrame>>;
    fn end_stream(&mut self) -> DeviceResult<()>;
    /// Release the claim on the device.
    fn disconnect(&mut self) -> DeviceResult<()>;
}

impl<T: BoardDriver + ?Sized> BoardDriver for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }
    fn connect(&mut self) -> DeviceResult<ChannelLayout> {
        (**self).connect()
    }
    fn begin_stream(&mut self) -> DeviceResult<()> {
        (**self).begin_stream()
    }
    fn pending(&mut self) -> DeviceResult<usize> {
        (**self).pending()
    }
    fn pull(&mut self, count: usize) -> DeviceResult<Vec<RawFrame>> {
        (**self).pull(count)
    }
    fn end_stream(&mut self) -> DeviceResult<()> {
        (**self).end_stream()
    }
    fn disconnect(&mut self) -> DeviceResult<()> {
        (**self).disconnect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    Streaming,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::Streaming => "streaming",
        }
    }
}

pub struct DeviceSession<D: BoardDriver> {
    driver: D,
    state: SessionState,
    layout: Option<ChannelLayout>,
}

impl<D: BoardDriver> DeviceSession<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: SessionState::Closed,
            layout: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Layout discovered by the last successful `open()`.
    pub fn layout(&self) -> Option<&ChannelLayout> {
        self.layout.as_ref()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn device_name(&self) -> String {
        self.driver.name()
    }

    pub fn open(&mut self) -> DeviceResult<ChannelLayout> {
        if self.state != SessionState::Closed {
            return Err(self.state_error("open"));
        }
        let layout = self.driver.connect()?;
        if layout.sampling_rate <= 0.0
            || !layout.sampling_rate.is_finite()
            || layout.sample_period().is_none()
        {
            let _ = self.driver.disconnect();
            return Err(DeviceError::connection(
                self.driver.name(),
                format!("reported invalid sample rate {}", layout.sampling_rate),
            ));
        }
        if layout.biosignal_channels == 0 {
            let _ = self.driver.disconnect();
            return Err(DeviceError::connection(
                self.driver.name(),
                "reported no biosignal channels",
            ));
        }
        info!(
            "opened {} ({} channels + {} motion axes @ {:.1} Hz)",
            layout.device, layout.biosignal_channels, MOTION_AXES, layout.sampling_rate
        );
        self.state = SessionState::Open;
        self.layout = Some(layout.clone());
        Ok(layout)
    }

    pub fn start_streaming(&mut self) -> DeviceResult<()> {
        if self.state != SessionState::Open {
            return Err(self.state_error("start_streaming"));
        }
        self.driver.begin_stream()?;
        self.state = SessionState::Streaming;
        debug!("{} streaming", self.driver.name());
        Ok(())
    }

    /// Every frame not yet consumed, never blocking and never more than the
    /// driver reported as pending.
    pub fn read_available(&mut self) -> DeviceResult<Vec<RawFrame>> {
        if self.state != SessionState::Streaming {
            return Err(self.state_error("read_available"));
        }
        let pending = self.driver.pending()?;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let frames = self.driver.pull(pending)?;
        if frames.len() > pending {
            return Err(DeviceError::acquisition(
                self.driver.name(),
                format!("driver returned {} frames, {} requested", frames.len(), pending),
            ));
        }
        let expected = self
            .layout
            .as_ref()
            .map(|layout| layout.biosignal_channels)
            .unwrap_or_default();
        if let Some(bad) = frames.iter().find(|f| f.biosignal.len() != expected) {
            return Err(DeviceError::acquisition(
                self.driver.name(),
                format!(
                    "frame carries {} biosignal values, layout has {}",
                    bad.biosignal.len(),
                    expected
                ),
            ));
        }
        Ok(frames)
    }

    pub fn stop_streaming(&mut self) -> DeviceResult<()> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        self.state = SessionState::Open;
        self.driver.end_stream()?;
        debug!("{} stopped streaming", self.driver.name());
        Ok(())
    }

    pub fn close(&mut self) -> DeviceResult<()> {
        if let Err(err) = self.stop_streaming() {
            warn!("stopping stream during close failed: {err}");
        }
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.driver.disconnect()?;
        info!("closed {}", self.driver.name());
        Ok(())
    }

    fn state_error(&self, operation: &'static str) -> DeviceError {
        DeviceError::State {
            operation,
            state: self.state.as_str(),
        }
    }
}

impl<D: BoardDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing {} on drop failed: {err}", self.driver.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::synthetic::{ClaimToken, SyntheticBoard, SyntheticConfig};
    use super::*;

    fn board() -> SyntheticBoard {
        SyntheticBoard::new(SyntheticConfig {
            channels: 4,
            sampling_rate: 1000.0,
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn open_reports_layout() {
        let mut session = DeviceSession::new(board());
        let layout = session.open().unwrap();
        assert_eq!(layout.biosignal_channels, 4);
        assert_eq!(layout.sampling_rate, 1000.0);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn unusable_sample_rate_is_refused() {
        let claim = ClaimToken::default();
        let board = SyntheticBoard::with_claim(
            SyntheticConfig {
                sampling_rate: 1e-20,
                ..SyntheticConfig::default()
            },
            claim.clone(),
        );
        let mut session = DeviceSession::new(board);
        assert!(matches!(session.open(), Err(DeviceError::Connection { .. })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!claim.is_claimed());
    }

    #[test]
    fn start_before_open_is_state_error() {
        let mut session = DeviceSession::new(board());
        let err = session.start_streaming().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::State {
                operation: "start_streaming",
                state: "closed"
            }
        ));
    }

    #[test]
    fn starting_twice_is_state_error() {
        let mut session = DeviceSession::new(board());
        session.open().unwrap();
        session.start_streaming().unwrap();
        assert!(matches!(
            session.start_streaming(),
            Err(DeviceError::State { .. })
        ));
    }

    #[test]
    fn reading_requires_streaming() {
        let mut session = DeviceSession::new(board());
        session.open().unwrap();
        assert!(matches!(
            session.read_available(),
            Err(DeviceError::State { .. })
        ));
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut session = DeviceSession::new(board());
        session.stop_streaming().unwrap();
        session.close().unwrap();
        session.open().unwrap();
        session.start_streaming().unwrap();
        session.stop_streaming().unwrap();
        session.stop_streaming().unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn claimed_device_refuses_second_session() {
        let claim = ClaimToken::default();
        let config = SyntheticConfig::default();
        let mut first = DeviceSession::new(SyntheticBoard::with_claim(config.clone(), claim.clone()));
        let mut second = DeviceSession::new(SyntheticBoard::with_claim(config, claim));
        first.open().unwrap();
        assert!(matches!(second.open(), Err(DeviceError::Connection { .. })));
        first.close().unwrap();
        second.open().unwrap();
    }

    #[test]
    fn read_available_drains_backlog() {
        let mut session = DeviceSession::new(board());
        session.open().unwrap();
        session.start_streaming().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let frames = session.read_available().unwrap();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.biosignal.len() == 4));
    }
}
