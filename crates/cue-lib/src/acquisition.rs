//! Continuous acquisition worker.
//!
//! The worker thread is the only writer of the sample log. It owns the
//! [`DeviceSession`] while running and hands both back on join, which is the
//! barrier that makes every appended sample visible to the exporter.

use crate::device::{BoardDriver, DeviceSession};
use crate::error::{DeviceError, DeviceResult};
use crate::signal::{ChannelLayout, MonotonicStamp, RawFrame, Sample};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything the worker produced, returned when it is joined.
pub struct AcquisitionOutcome<D: BoardDriver> {
    pub samples: Vec<Sample>,
    /// Fatal device error that ended the loop early, if any.
    pub failure: Option<DeviceError>,
    pub session: DeviceSession<D>,
    pub batches: usize,
    /// Live deliveries skipped because the live channel was full.
    pub live_skipped: usize,
}

pub struct AcquisitionLoop<D: BoardDriver + 'static> {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<AcquisitionOutcome<D>>>,
}

impl<D: BoardDriver + 'static> AcquisitionLoop<D> {
    /// Start draining a streaming session on a dedicated thread.
    ///
    /// `on_failure` runs on the worker thread right after a fatal device
    /// error, before the worker exits.
    pub fn spawn<F>(
        session: DeviceSession<D>,
        live: Option<Sender<Sample>>,
        on_failure: F,
    ) -> DeviceResult<Self>
    where
        F: FnOnce(&DeviceError) + Send + 'static,
    {
        if !session.is_streaming() {
            return Err(DeviceError::State {
                operation: "acquire",
                state: session.state().as_str(),
            });
        }
        let period = session
            .layout()
            .and_then(ChannelLayout::sample_period)
            .unwrap_or(Duration::from_millis(1));
        let (stop_tx, stop_rx) = bounded(1);
        let worker = Worker {
            session,
            live,
            stop_rx,
            period,
            samples: Vec::new(),
            clock: MonotonicStamp::new(),
            batches: 0,
            live_skipped: 0,
        };
        let handle = std::thread::spawn(move || worker.run(on_failure));
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// True once the worker exited on its own (device failure).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the worker, wait for its final drain and take its output.
    pub fn stop(mut self) -> DeviceResult<AcquisitionOutcome<D>> {
        let _ = self.stop_tx.try_send(());
        let handle = self.handle.take().ok_or_else(|| {
            DeviceError::acquisition("acquisition", "worker already joined")
        })?;
        handle
            .join()
            .map_err(|_| DeviceError::acquisition("acquisition", "worker thread panicked"))
    }
}

impl<D: BoardDriver + 'static> Drop for AcquisitionLoop<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
    }
}

struct Worker<D: BoardDriver> {
    session: DeviceSession<D>,
    live: Option<Sender<Sample>>,
    stop_rx: Receiver<()>,
    period: Duration,
    samples: Vec<Sample>,
    clock: MonotonicStamp,
    batches: usize,
    live_skipped: usize,
}

impl<D: BoardDriver> Worker<D> {
    fn run<F>(mut self, on_failure: F) -> AcquisitionOutcome<D>
    where
        F: FnOnce(&DeviceError),
    {
        info!(
            "acquisition started on {} (poll period {:?})",
            self.session.device_name(),
            self.period
        );
        let mut failure = self.poll_until_stopped().err();
        if failure.is_none() {
            // Frames that arrived between the last poll and the stop signal.
            match self.session.read_available() {
                Ok(frames) => self.append(frames),
                Err(err) => failure = Some(err),
            }
        }
        if let Some(err) = &failure {
            error!("acquisition stopped: {err}");
            on_failure(err);
        }
        info!(
            "acquisition finished with {} samples in {} batches",
            self.samples.len(),
            self.batches
        );
        if self.live_skipped > 0 {
            warn!("{} live deliveries skipped", self.live_skipped);
        }
        AcquisitionOutcome {
            samples: self.samples,
            failure,
            session: self.session,
            batches: self.batches,
            live_skipped: self.live_skipped,
        }
    }

    fn poll_until_stopped(&mut self) -> DeviceResult<()> {
        loop {
            if self.stop_requested() {
                return Ok(());
            }
            let frames = self.session.read_available()?;
            if frames.is_empty() {
                match self.stop_rx.recv_timeout(self.period) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => return Ok(()),
                }
            }
            self.append(frames);
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(
            self.stop_rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        )
    }

    fn append(&mut self, frames: Vec<RawFrame>) {
        if frames.is_empty() {
            return;
        }
        // One stamp per read; never earlier than the previous batch.
        let stamp = self.clock.stamp();
        self.batches += 1;
        debug!("batch {} with {} frames", self.batches, frames.len());
        self.samples.reserve(frames.len());
        for frame in frames {
            let sample = Sample::from_frame(stamp, frame);
            self.publish(&sample);
            self.samples.push(sample);
        }
    }

    fn publish(&mut self, sample: &Sample) {
        let Some(live) = &self.live else {
            return;
        };
        match live.try_send(sample.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.live_skipped += 1,
            Err(TrySendError::Disconnected(_)) => {
                debug!("live consumer disconnected");
                self.live = None;
            }
        }
    }
}
