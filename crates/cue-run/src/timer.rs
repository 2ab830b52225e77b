//! One-shot timer service driving the phase machine.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

/// Cancels the pending wait of a timer and every wait after it.
#[derive(Debug, Clone)]
pub struct Canceller(Sender<()>);

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.0.try_send(());
    }
}

pub trait Timer {
    /// Block until `delay` has passed or the timer is cancelled.
    fn wait(&mut self, delay: Duration) -> Wait;
    fn canceller(&self) -> Canceller;
    fn is_cancelled(&self) -> bool;
}

/// Wall-clock timer. Deadlines are chained from the previous deadline, so a
/// slow renderer does not push every later phase back.
pub struct ThreadTimer {
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    cancelled: bool,
    last_deadline: Option<Instant>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = bounded(1);
        Self {
            cancel_tx,
            cancel_rx,
            cancelled: false,
            last_deadline: None,
        }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ThreadTimer {
    fn wait(&mut self, delay: Duration) -> Wait {
        if self.cancelled {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        let deadline = self.last_deadline.unwrap_or(now) + delay;
        self.last_deadline = Some(deadline.max(now));
        match self.cancel_rx.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => Wait::Elapsed,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.cancelled = true;
                Wait::Cancelled
            }
        }
    }

    fn canceller(&self) -> Canceller {
        Canceller(self.cancel_tx.clone())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled || !self.cancel_rx.is_empty()
    }
}

/// Fires every wait immediately and records the requested delays. Used for
/// dry runs and for driving the machine in tests without sleeping.
pub struct ManualTimer {
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    cancelled: bool,
    cancel_after: Option<usize>,
    waits: Vec<Duration>,
}

impl ManualTimer {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = bounded(1);
        Self {
            cancel_tx,
            cancel_rx,
            cancelled: false,
            cancel_after: None,
            waits: Vec::new(),
        }
    }

    /// Cancel instead of firing once `waits` waits have elapsed.
    pub fn cancel_after(waits: usize) -> Self {
        Self {
            cancel_after: Some(waits),
            ..Self::new()
        }
    }

    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }

    /// Simulated time spent waiting so far.
    pub fn elapsed(&self) -> Duration {
        self.waits.iter().sum()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ManualTimer {
    fn wait(&mut self, delay: Duration) -> Wait {
        if self.cancel_rx.try_recv().is_ok() || self.cancel_after == Some(self.waits.len()) {
            self.cancelled = true;
        }
        if self.cancelled {
            return Wait::Cancelled;
        }
        self.waits.push(delay);
        Wait::Elapsed
    }

    fn canceller(&self) -> Canceller {
        Canceller(self.cancel_tx.clone())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled || !self.cancel_rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_timer_waits_roughly_the_delay() {
        let mut timer = ThreadTimer::new();
        let start = Instant::now();
        assert_eq!(timer.wait(Duration::from_millis(30)), Wait::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_wakes_a_pending_wait() {
        let mut timer = ThreadTimer::new();
        let canceller = timer.canceller();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let start = Instant::now();
        assert_eq!(timer.wait(Duration::from_secs(10)), Wait::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(timer.wait(Duration::from_millis(1)), Wait::Cancelled);
    }

    #[test]
    fn chained_deadlines_absorb_slow_callbacks() {
        let mut timer = ThreadTimer::new();
        let start = Instant::now();
        timer.wait(Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(30));
        timer.wait(Duration::from_millis(50));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(125));
    }

    #[test]
    fn manual_timer_records_and_cancels() {
        let mut timer = ManualTimer::cancel_after(2);
        assert_eq!(timer.wait(Duration::from_millis(5)), Wait::Elapsed);
        assert_eq!(timer.wait(Duration::from_millis(7)), Wait::Elapsed);
        assert_eq!(timer.wait(Duration::from_millis(9)), Wait::Cancelled);
        assert_eq!(timer.waits().len(), 2);
        assert_eq!(timer.elapsed(), Duration::from_millis(12));
        assert!(timer.is_cancelled());
    }

    #[test]
    fn manual_timer_honours_external_cancel() {
        let mut timer = ManualTimer::new();
        timer.canceller().cancel();
        assert!(timer.is_cancelled());
        assert_eq!(timer.wait(Duration::from_millis(1)), Wait::Cancelled);
    }
}
