//! Silence and stuck detection for a listening turn.
//!
//! Two independent deadlines per turn:
//! - **silence**: pushed back on every capture event; when it elapses the turn
//!   auto-submits, but only if the transcript is long enough to be an answer.
//! - **stuck**: pushed back only when finalized speech grows; when it elapses the
//!   candidate is considered stuck and the turn is force-completed.
//!
//! The detector only answers "should this turn complete now, and why". It knows nothing
//! about session state; the sequencer decides whether the signal is still relevant.

use crate::session::CompletionTrigger;
use crate::transcript::TranscriptBuffer;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for turn-completion deadlines
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Quiet window after the last capture event (default: 12s)
    pub silence_window: Duration,

    /// Window without new finalized speech before the user is stuck (default: 18s)
    pub stuck_window: Duration,

    /// Effective text must be longer than this for silence to auto-submit (default: 30)
    pub min_answer_chars: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_secs(12),
            stuck_window: Duration::from_secs(18),
            min_answer_chars: 30,
        }
    }
}

impl From<&crate::config::EngineConfig> for DetectorConfig {
    fn from(c: &crate::config::EngineConfig) -> Self {
        Self {
            silence_window: c.silence_window(),
            stuck_window: c.stuck_window(),
            min_answer_chars: c.min_answer_chars,
        }
    }
}

/// Transcript buffer plus the two per-turn deadlines.
#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    buffer: TranscriptBuffer,
    silence_deadline: Option<Instant>,
    stuck_deadline: Option<Instant>,
    is_stuck: bool,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            buffer: TranscriptBuffer::new(),
            silence_deadline: None,
            stuck_deadline: None,
            is_stuck: false,
        }
    }

    /// Clear the transcript, both deadlines and the stuck flag. Nothing is rescheduled
    /// until the first capture event (or `arm_stuck`).
    pub fn on_turn_start(&mut self) {
        self.buffer.reset();
        self.silence_deadline = None;
        self.stuck_deadline = None;
        self.is_stuck = false;
    }

    /// Start the stuck window from `now`, so a candidate who never speaks is still caught.
    pub fn arm_stuck(&mut self, now: Instant) {
        self.stuck_deadline = Some(now + self.config.stuck_window);
    }

    /// Feed one capture event. Returns true if the finalized transcript grew.
    pub fn on_capture_event(&mut self, finalized_delta: &str, interim: &str, now: Instant) -> bool {
        let grew = self.buffer.push_finalized(finalized_delta);
        self.buffer.set_interim(interim);

        self.silence_deadline = Some(now + self.config.silence_window);
        if grew {
            self.is_stuck = false;
            self.stuck_deadline = Some(now + self.config.stuck_window);
        }

        debug!(
            "Detector: capture event (grew: {}, effective: {} chars)",
            grew,
            self.buffer.effective_len()
        );
        grew
    }

    /// Consume the silence deadline if it has elapsed. Yields a completion only when the
    /// transcript is long enough; a short transcript just lets the deadline lapse.
    pub fn poll_silence(&mut self, now: Instant) -> Option<CompletionTrigger> {
        match self.silence_deadline {
            Some(deadline) if now >= deadline => {
                self.silence_deadline = None;
                let len = self.buffer.effective_len();
                if len > self.config.min_answer_chars {
                    Some(CompletionTrigger::Silence)
                } else {
                    debug!("Detector: silence elapsed with {} chars, not submitting", len);
                    None
                }
            }
            _ => None,
        }
    }

    /// Consume the stuck deadline if it has elapsed and raise the stuck flag.
    pub fn poll_stuck(&mut self, now: Instant) -> Option<CompletionTrigger> {
        match self.stuck_deadline {
            Some(deadline) if now >= deadline => {
                self.stuck_deadline = None;
                self.is_stuck = true;
                Some(CompletionTrigger::Stuck)
            }
            _ => None,
        }
    }

    /// Drop both deadlines. Called on every transition out of Listening.
    pub fn cancel(&mut self) {
        self.silence_deadline = None;
        self.stuck_deadline = None;
    }

    pub fn silence_deadline(&self) -> Option<Instant> {
        self.silence_deadline
    }

    pub fn stuck_deadline(&self) -> Option<Instant> {
        self.stuck_deadline
    }

    pub fn is_stuck(&self) -> bool {
        self.is_stuck
    }

    pub fn effective_text(&self) -> String {
        self.buffer.effective_text()
    }

    pub fn buffer(&self) -> &TranscriptBuffer {
        &self.buffer
    }
}
