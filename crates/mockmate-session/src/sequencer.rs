//! **Turn Sequencer**: the session's single owner.
//!
//! One task runs `Sequencer::run` and is the only code that mutates the session. Every
//! asynchronous collaborator (speech, evaluator, opening, capture, deadlines) reports back
//! through a channel, and the loop handles one message at a time:
//!
//! ```text
//!  Initializing ──opening──▶ AwaitingStart ──start──▶ Speaking ◀──────────────┐
//!                                                      │ speech done         │ next question
//!                                                      ▼                     │
//!                                                  Listening ──submit/silence/stuck──▶ Processing
//!                                                                                    │
//!                      Terminated ◀── complete / no question / turn bound / failure ─┘
//! ```
//!
//! Speech and evaluator tasks are tagged with a generation number. A signal from an older
//! generation (a phase that was already left) is dropped, so nothing that finishes late can
//! move the session.

use crate::capture::{CaptureMessage, CaptureSink, DeviceGuard};
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::detector::{Detector, DetectorConfig};
use crate::error::{SessionError, SessionResult};
use crate::evaluator::{EvaluationRequest, EvaluatorClient, Opening, TurnOutcome};
use crate::events::SessionEvent;
use crate::gate::TurnGate;
use crate::ledger::{Ledger, TurnRecord};
use crate::session::{CompletionTrigger, RoundContext, Session, SessionState, TerminationReason};
use crate::speech::{SpeechCoordinator, SpeechPath};
use crate::store::{SessionRecord, SessionStore};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// User-side requests.
#[derive(Debug)]
enum Command {
    Start,
    Submit { artifact: Option<String> },
    Terminate,
}

/// Results of the sequencer's own background tasks.
#[derive(Debug)]
enum Signal {
    Opening(Opening),
    SpeechDone { generation: u64, path: SpeechPath },
    Evaluated { generation: u64, outcome: TurnOutcome },
}

/// Client side of a running session. Cheap to clone; when every handle is dropped the
/// session terminates and releases its resources.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    capture: CaptureSink,
    state: watch::Receiver<Session>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Begin the interview. Sent early (while Initializing), it takes effect as soon as the
    /// opening is ready.
    pub fn start(&self) -> SessionResult<()> {
        self.send(Command::Start)
    }

    /// Explicitly finish the current answer. A no-op outside Listening.
    pub fn submit(&self) -> SessionResult<()> {
        self.send(Command::Submit { artifact: None })
    }

    /// Finish the current answer with an attached artifact, e.g. code for a coding task.
    pub fn submit_with_artifact(&self, artifact: impl Into<String>) -> SessionResult<()> {
        self.send(Command::Submit {
            artifact: Some(artifact.into()),
        })
    }

    pub fn terminate(&self) -> SessionResult<()> {
        self.send(Command::Terminate)
    }

    /// Sink for speech recognition results, for capture sources that live outside the
    /// session (a browser bridge, a console).
    pub fn capture_sink(&self) -> CaptureSink {
        self.capture.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current session state as last published by the sequencer.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().state
    }

    /// Wait until the published session satisfies `pred`.
    pub async fn wait_for(&self, pred: impl FnMut(&Session) -> bool) -> SessionResult<Session> {
        let mut rx = self.state.clone();
        let session = rx.wait_for(pred).await.map_err(|_| SessionError::Closed)?;
        Ok(session.clone())
    }

    fn send(&self, cmd: Command) -> SessionResult<()> {
        self.commands.send(cmd).map_err(|_| SessionError::Closed)
    }
}

/// What `run` returns once the session is over.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub reason: TerminationReason,
    pub turn_index: u32,
    pub asked_questions: Vec<String>,
    pub ledger: Vec<TurnRecord>,
    /// Whether the store accepted the final record in time.
    pub persisted: bool,
}

/// Background task of the current phase; aborted when replaced or dropped.
#[derive(Default)]
struct InFlight(Option<JoinHandle<()>>);

impl InFlight {
    fn replace(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.0.replace(handle) {
            old.abort();
        }
    }

    fn abort(&mut self) {
        if let Some(h) = self.0.take() {
            h.abort();
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.abort();
    }
}

pub struct Sequencer {
    config: EngineConfig,
    session: Session,
    state_tx: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    capture_rx: mpsc::UnboundedReceiver<CaptureMessage>,
    capture_sink: CaptureSink,
    device: DeviceGuard,
    detector: Detector,
    gate: TurnGate,
    ledger: Ledger,
    evaluator: EvaluatorClient,
    speech: Arc<SpeechCoordinator>,
    store: Arc<dyn SessionStore>,
    generation: u64,
    in_flight: InFlight,
    opening: Option<Opening>,
    start_requested: bool,
    termination: Option<TerminationReason>,
}

impl Sequencer {
    /// Create a session in `Initializing` with a fresh UUID.
    pub fn new(
        config: EngineConfig,
        context: RoundContext,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle) {
        Self::with_session_id(uuid::Uuid::new_v4().to_string(), config, context, collaborators)
    }

    pub fn with_session_id(
        session_id: impl Into<String>,
        config: EngineConfig,
        context: RoundContext,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle) {
        let session = Session::new(session_id, context, config.max_turns.max(1));
        let (state_tx, state_rx) = watch::channel(session.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let capture_sink = CaptureSink::new(capture_tx);

        let speech = SpeechCoordinator::new(
            collaborators.synthesis,
            collaborators.sink,
            collaborators.local_speech,
            config.synthesis_timeout(),
            config.speech_watchdog(),
        );

        let evaluator = EvaluatorClient::new(collaborators.evaluator, config.evaluator_timeout());

        let handle = SessionHandle {
            commands: cmd_tx,
            capture: capture_sink.clone(),
            state: state_rx,
            events: events.clone(),
        };

        let sequencer = Self {
            detector: Detector::new(DetectorConfig::from(&config)),
            config,
            session,
            state_tx,
            events,
            commands: cmd_rx,
            signals_tx,
            signals_rx,
            capture_rx,
            capture_sink,
            device: DeviceGuard::new(collaborators.capture),
            gate: TurnGate::new(),
            ledger: Ledger::new(),
            evaluator,
            speech: Arc::new(speech),
            store: collaborators.store,
            generation: 0,
            in_flight: InFlight::default(),
            opening: None,
            start_requested: false,
            termination: None,
        };
        (sequencer, handle)
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Drive the session to termination. Dropping this future mid-flight still releases
    /// the capture device and aborts background work.
    pub async fn run(mut self) -> SessionSummary {
        info!(
            "🎤 Session {} starting ({} / {} / {})",
            self.session.session_id,
            self.session.context.job_role,
            self.session.context.experience_level,
            self.session.context.round_type
        );

        if let Err(e) = self.device.acquire(self.capture_sink.clone()) {
            warn!("Capture: acquire failed, answers need explicit submit: {}", e);
            self.emit(SessionEvent::CaptureUnavailable {
                reason: e.to_string(),
            });
        }
        self.spawn_opening();

        while self.termination.is_none() {
            let silence = self.detector.silence_deadline();
            let stuck = self.detector.stuck_deadline();

            // Capture first: a submit must see every segment recognized before it.
            tokio::select! {
                biased;

                Some(msg) = self.capture_rx.recv() => self.on_capture(msg),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        info!("Session {}: all handles dropped", self.session.session_id);
                        self.terminate(TerminationReason::HandleDropped);
                    }
                },
                Some(signal) = self.signals_rx.recv() => self.on_signal(signal),
                _ = sleep_until_opt(silence) => self.on_silence_deadline(),
                _ = sleep_until_opt(stuck) => self.on_stuck_deadline(),
            }
        }

        self.finish().await
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => match self.session.state {
                SessionState::Initializing => {
                    debug!("Start requested before opening is ready; deferring");
                    self.start_requested = true;
                }
                SessionState::AwaitingStart => self.begin_interview(),
                other => debug!("Start ignored in {}", other),
            },
            Command::Submit { artifact } => {
                if self.session.state == SessionState::Listening {
                    self.complete_turn(CompletionTrigger::Submit, artifact);
                } else {
                    debug!("Submit ignored in {}", self.session.state);
                }
            }
            Command::Terminate => self.terminate(TerminationReason::UserEnded),
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opening(opening) => {
                if self.session.state != SessionState::Initializing {
                    return;
                }
                self.session.opening = opening.greeting.clone();
                self.opening = Some(opening);
                self.transition(SessionState::AwaitingStart);
                if self.start_requested {
                    self.begin_interview();
                }
            }
            Signal::SpeechDone { generation, path } => {
                if generation != self.generation || self.session.state != SessionState::Speaking {
                    debug!("Stale speech signal (gen {}) dropped", generation);
                    return;
                }
                debug!("Speech finished via {:?}", path);
                self.enter_listening();
            }
            Signal::Evaluated {
                generation,
                outcome,
            } => {
                if generation != self.generation
                    || self.session.state != SessionState::Processing
                {
                    debug!("Stale evaluation (gen {}) dropped", generation);
                    return;
                }
                self.on_evaluated(outcome);
            }
        }
    }

    fn on_capture(&mut self, msg: CaptureMessage) {
        match msg {
            CaptureMessage::Event(event) => {
                if self.session.state != SessionState::Listening {
                    debug!("Capture event outside Listening dropped");
                    return;
                }
                let delta = event.finalized_delta();
                self.detector
                    .on_capture_event(&delta, &event.interim, Instant::now());
                self.sync_stuck();
                self.emit(SessionEvent::TranscriptUpdated {
                    text: self.detector.effective_text(),
                });
            }
            CaptureMessage::Ended => {
                self.device.mark_ended();
                if self.session.state == SessionState::Listening {
                    debug!("Capture ended while listening; restarting");
                    if let Err(e) = self.device.restart() {
                        self.emit(SessionEvent::CaptureUnavailable {
                            reason: e.to_string(),
                        });
                    }
                } else {
                    debug!("Capture ended in {}; not restarting", self.session.state);
                }
            }
        }
    }

    fn on_silence_deadline(&mut self) {
        if let Some(trigger) = self.detector.poll_silence(Instant::now()) {
            info!("Silence window elapsed; completing turn");
            self.complete_turn(trigger, None);
        }
    }

    fn on_stuck_deadline(&mut self) {
        if let Some(trigger) = self.detector.poll_stuck(Instant::now()) {
            if self.session.state != SessionState::Listening {
                return;
            }
            info!("Candidate appears stuck; completing turn");
            self.sync_stuck();
            self.publish();
            self.emit(SessionEvent::StuckDetected);
            self.complete_turn(trigger, None);
        }
    }

    /// AwaitingStart → Speaking with the opening and the first question.
    fn begin_interview(&mut self) {
        let Some(opening) = self.opening.take() else {
            return;
        };
        self.session.pose_question(&opening.first_question);
        self.emit(SessionEvent::QuestionPosed {
            turn_index: self.session.turn_index,
            question: opening.first_question.clone(),
            is_hint: false,
        });
        self.enter_speaking(opening.utterance());
    }

    fn enter_speaking(&mut self, text: String) {
        self.device.stop();
        self.detector.cancel();
        self.transition(SessionState::Speaking);

        self.generation += 1;
        let generation = self.generation;
        let speech = Arc::clone(&self.speech);
        let tx = self.signals_tx.clone();
        self.in_flight.replace(tokio::spawn(async move {
            let path = speech.speak(&text).await;
            let _ = tx.send(Signal::SpeechDone { generation, path });
        }));
    }

    fn enter_listening(&mut self) {
        self.detector.on_turn_start();
        self.sync_stuck();
        self.gate.reopen();
        self.transition(SessionState::Listening);
        self.detector.arm_stuck(Instant::now());

        if let Err(e) = self.device.start() {
            self.emit(SessionEvent::CaptureUnavailable {
                reason: e.to_string(),
            });
        }
    }

    /// The detector owns the stuck flag; the session snapshot only mirrors it.
    fn sync_stuck(&mut self) {
        self.session.is_stuck = self.detector.is_stuck();
    }

    /// Listening → Processing. Only the first trigger of a turn gets past the gate.
    fn complete_turn(&mut self, trigger: CompletionTrigger, artifact: Option<String>) {
        if self.session.state != SessionState::Listening {
            return;
        }
        if !self.gate.try_claim() {
            debug!("Turn already completing; {:?} ignored", trigger);
            return;
        }

        self.device.stop();
        self.detector.cancel();
        let transcript = self.detector.effective_text();
        let was_stuck = self.detector.is_stuck();
        let question = self.session.current_question.clone();

        let record = TurnRecord::new(
            question.clone(),
            &transcript,
            artifact.clone(),
            trigger,
            was_stuck,
        );
        let answer = record.answer.clone();
        self.ledger.append(record);
        info!(
            "Turn {} completed by {:?} ({} chars, stuck: {})",
            self.session.turn_index,
            trigger,
            transcript.chars().count(),
            was_stuck
        );
        self.emit(SessionEvent::TurnCompleted {
            turn_index: self.session.turn_index,
            trigger,
        });
        self.transition(SessionState::Processing);

        if self.session.at_turn_limit() {
            info!(
                "Turn bound {} reached; ending interview",
                self.session.max_turns
            );
            self.terminate(TerminationReason::TurnLimit);
            return;
        }

        let request = EvaluationRequest::new(
            question,
            answer,
            &self.session.context,
            self.ledger.as_question_history(),
            was_stuck,
        )
        .with_code_submission(artifact);

        self.generation += 1;
        let generation = self.generation;
        let evaluator = self.evaluator.clone();
        let tx = self.signals_tx.clone();
        self.in_flight.replace(tokio::spawn(async move {
            let outcome = evaluator.evaluate(&request).await;
            let _ = tx.send(Signal::Evaluated {
                generation,
                outcome,
            });
        }));
    }

    fn on_evaluated(&mut self, outcome: TurnOutcome) {
        let reaction = outcome.verbal_reaction.trim().to_string();
        if !reaction.is_empty() {
            self.emit(SessionEvent::AssistantReaction {
                text: reaction.clone(),
                emotion: outcome.detected_emotion.clone(),
            });
        }

        if outcome.degraded {
            self.terminate(TerminationReason::EvaluatorFailed);
            return;
        }
        if outcome.is_interview_complete {
            self.terminate(TerminationReason::InterviewComplete);
            return;
        }
        let Some(next) = outcome.next_question().map(str::to_string) else {
            self.terminate(TerminationReason::NoFurtherQuestion);
            return;
        };

        if !outcome.is_offering_hint {
            self.session.turn_index += 1;
        }
        self.session.pose_question(&next);
        self.emit(SessionEvent::QuestionPosed {
            turn_index: self.session.turn_index,
            question: next.clone(),
            is_hint: outcome.is_offering_hint,
        });
        if outcome.request_coding_task {
            self.emit(SessionEvent::CodingTaskRequested {
                question: next.clone(),
            });
        }

        let text = format!("{} {}", reaction, next).trim().to_string();
        self.enter_speaking(text);
    }

    fn terminate(&mut self, reason: TerminationReason) {
        if self.termination.is_some() {
            return;
        }
        self.detector.cancel();
        self.device.stop();
        self.in_flight.abort();
        self.generation += 1;
        self.termination = Some(reason);
        info!("Session {} terminating: {:?}", self.session.session_id, reason);
        self.transition(SessionState::Terminated);
        self.emit(SessionEvent::Terminated { reason });
    }

    /// Release capture, then persist the final record within the persist timeout.
    async fn finish(mut self) -> SessionSummary {
        self.device.release();

        let reason = self
            .termination
            .unwrap_or(TerminationReason::UserEnded);
        let record = SessionRecord::completed(&self.session, reason, self.ledger.snapshot());
        let persisted = match timeout(self.config.persist_timeout(), self.store.persist(&record)).await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Failed to persist session {}: {}", self.session.session_id, e);
                false
            }
            Err(_) => {
                warn!(
                    "Persisting session {} timed out after {:?}",
                    self.session.session_id,
                    self.config.persist_timeout()
                );
                false
            }
        };

        info!(
            "✅ Session {} finished ({} turns recorded)",
            self.session.session_id,
            self.ledger.len()
        );
        SessionSummary {
            session_id: self.session.session_id.clone(),
            reason,
            turn_index: self.session.turn_index,
            asked_questions: self.session.asked_questions.clone(),
            ledger: record.ledger,
            persisted,
        }
    }

    fn spawn_opening(&mut self) {
        let evaluator = self.evaluator.clone();
        let context = self.session.context.clone();
        let tx = self.signals_tx.clone();
        self.in_flight.replace(tokio::spawn(async move {
            let opening = evaluator.opening(&context).await;
            let _ = tx.send(Signal::Opening(opening));
        }));
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.session.state;
        if from == to {
            return;
        }
        self.session.state = to;
        debug!("Session {}: {} -> {}", self.session.session_id, from, to);
        self.publish();
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.clone());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}
