//! **Capture**: the speech-to-text collaborator seen from the session.
//!
//! A `CaptureDevice` is acquired once when the session starts running and released on
//! every exit path (`DeviceGuard` releases it on drop, including when the session future
//! is dropped mid-flight). While started, the device pushes recognition results into the
//! session through its `CaptureSink`.

use crate::error::{SessionError, SessionResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One recognition callback: segments committed as final since the last event, plus the
/// current provisional fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureEvent {
    pub final_segments: Vec<String>,
    pub interim: String,
}

impl CaptureEvent {
    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            final_segments: vec![text.into()],
            interim: String::new(),
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            final_segments: Vec::new(),
            interim: text.into(),
        }
    }

    /// All final segments of this event joined into one delta.
    pub fn finalized_delta(&self) -> String {
        self.final_segments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug)]
pub(crate) enum CaptureMessage {
    Event(CaptureEvent),
    /// The recognizer stopped on its own (browser-style `onend`).
    Ended,
}

/// Where a capture device delivers results. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: mpsc::UnboundedSender<CaptureMessage>,
}

impl CaptureSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CaptureMessage>) -> Self {
        Self { tx }
    }

    pub fn push(&self, event: CaptureEvent) -> SessionResult<()> {
        self.tx
            .send(CaptureMessage::Event(event))
            .map_err(|e| SessionError::ChannelSend(e.to_string()))
    }

    /// Report that recognition ended. The session restarts capture only while listening.
    pub fn ended(&self) -> SessionResult<()> {
        self.tx
            .send(CaptureMessage::Ended)
            .map_err(|e| SessionError::ChannelSend(e.to_string()))
    }
}

/// A microphone + recognizer. `start`/`stop` may be called repeatedly and must be
/// idempotent; `release` frees the device handle for good.
pub trait CaptureDevice: Send {
    /// Take the device handle and remember where to deliver results.
    fn acquire(&mut self, sink: CaptureSink) -> SessionResult<()>;

    fn start(&mut self) -> SessionResult<()>;

    fn stop(&mut self);

    fn release(&mut self) {}
}

/// No microphone: the session runs on explicit submits (and any text pushed through
/// `SessionHandle::capture_sink`).
#[derive(Debug, Default)]
pub struct NoCapture;

impl CaptureDevice for NoCapture {
    fn acquire(&mut self, _sink: CaptureSink) -> SessionResult<()> {
        Ok(())
    }

    fn start(&mut self) -> SessionResult<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Owns the device for the session's lifetime. Tracks whether capture is running so
/// start/stop stay idempotent, and whether the device is usable at all.
pub(crate) struct DeviceGuard {
    device: Box<dyn CaptureDevice>,
    running: bool,
    available: bool,
    ever_started: bool,
    released: bool,
}

impl DeviceGuard {
    pub(crate) fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            running: false,
            available: true,
            ever_started: false,
            released: false,
        }
    }

    pub(crate) fn acquire(&mut self, sink: CaptureSink) -> SessionResult<()> {
        match self.device.acquire(sink) {
            Ok(()) => {
                info!("Capture: device acquired");
                Ok(())
            }
            Err(e) => {
                self.available = false;
                Err(e)
            }
        }
    }

    /// Start capture unless already running. A device that refuses its very first start is
    /// treated as unavailable for the rest of the session. Later failures are transient: the
    /// error is returned and the next call tries again.
    pub(crate) fn start(&mut self) -> SessionResult<()> {
        if self.running || !self.available || self.released {
            return Ok(());
        }
        match self.device.start() {
            Ok(()) => {
                self.running = true;
                self.ever_started = true;
                debug!("Capture: started");
                Ok(())
            }
            Err(e) if !self.ever_started => {
                warn!("Capture: start failed, continuing without speech input: {}", e);
                self.available = false;
                Err(e)
            }
            Err(e) => {
                warn!("Capture: start failed, retrying on next turn: {}", e);
                Err(e)
            }
        }
    }

    /// Restart after the recognizer ended on its own.
    pub(crate) fn restart(&mut self) -> SessionResult<()> {
        self.running = false;
        self.start()
    }

    pub(crate) fn stop(&mut self) {
        if self.running {
            self.device.stop();
            self.running = false;
            debug!("Capture: stopped");
        }
    }

    /// The recognizer stopped by itself; keep the bookkeeping honest.
    pub(crate) fn mark_ended(&mut self) {
        self.running = false;
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.stop();
        self.device.release();
        self.released = true;
        info!("Capture: device released");
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counts {
        starts: AtomicUsize,
        stops: AtomicUsize,
        releases: AtomicUsize,
    }

    struct CountingDevice {
        counts: Arc<Counts>,
        fail_start: bool,
        fail_only_call: Option<usize>,
    }

    impl CaptureDevice for CountingDevice {
        fn acquire(&mut self, _sink: CaptureSink) -> SessionResult<()> {
            Ok(())
        }
        fn start(&mut self) -> SessionResult<()> {
            let call = self.counts.starts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_start || self.fail_only_call == Some(call) {
                return Err(SessionError::Capture("permission denied".into()));
            }
            Ok(())
        }
        fn stop(&mut self) {
            self.counts.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&mut self) {
            self.counts.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn guard(fail_start: bool) -> (DeviceGuard, Arc<Counts>) {
        flaky_guard(fail_start, None)
    }

    fn flaky_guard(fail_start: bool, fail_only_call: Option<usize>) -> (DeviceGuard, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let device = CountingDevice {
            counts: Arc::clone(&counts),
            fail_start,
            fail_only_call,
        };
        (DeviceGuard::new(Box::new(device)), counts)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (mut g, counts) = guard(false);
        g.start().unwrap();
        g.start().unwrap();
        g.stop();
        g.stop();
        assert_eq!(counts.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_disables_device() {
        let (mut g, counts) = guard(true);
        assert!(g.start().is_err());
        assert!(g.start().is_ok());
        assert!(!g.is_running());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_restart_retries_on_next_start() {
        let (mut g, counts) = flaky_guard(false, Some(2));
        g.start().unwrap();
        g.mark_ended();
        assert!(g.restart().is_err());
        assert!(!g.is_running());

        g.stop();
        g.start().unwrap();
        assert!(g.is_running());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn drop_releases_exactly_once() {
        let (mut g, counts) = guard(false);
        g.start().unwrap();
        g.release();
        drop(g);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finalized_delta_joins_non_empty_segments() {
        let ev = CaptureEvent {
            final_segments: vec!["I think".into(), " ".into(), "so".into()],
            interim: String::new(),
        };
        assert_eq!(ev.finalized_delta(), "I think so");
    }
}
