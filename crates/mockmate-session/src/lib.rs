//! # Mockmate Session - live mock interview engine
//!
//! Runs one spoken interview: the interviewer asks a question, the candidate answers by
//! voice, silence or a stuck candidate closes the turn, an AI evaluator reacts and picks
//! the next question, and the finished session is persisted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Turn Sequencer (1 task)                   │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐    │
//! │  │   Capture    │ → │   Detector   │ → │  TurnGate → Ledger │    │
//! │  │ (device/STT) │   │ silence/stuck│   │   (one per turn)   │    │
//! │  └──────────────┘   └──────────────┘   └────────────────────┘    │
//! │         ↑                                        ↓               │
//! │  ┌──────────────┐                      ┌────────────────────┐    │
//! │  │    Speech    │ ←──── next question ─│  Evaluator client  │    │
//! │  │ remote/local │                      │  (chat completion) │    │
//! │  └──────────────┘                      └────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//!            watch<Session> + broadcast<SessionEvent> → observers
//! ```
//!
//! ```no_run
//! use mockmate_session::{Collaborators, EngineConfig, MemoryStore, RoundContext, Sequencer};
//! # use mockmate_session::{EvaluationRequest, Opening, SessionResult, TurnEvaluator, TurnOutcome};
//! # use std::sync::Arc;
//! # struct MyEvaluator;
//! # #[async_trait::async_trait]
//! # impl TurnEvaluator for MyEvaluator {
//! #     async fn opening(&self, ctx: &RoundContext) -> SessionResult<Opening> { Ok(Opening::fallback(ctx)) }
//! #     async fn evaluate(&self, _r: &EvaluationRequest) -> SessionResult<TurnOutcome> { Ok(TurnOutcome::complete("Thanks")) }
//! # }
//! # async fn demo() {
//! let collaborators = Collaborators::new(Arc::new(MyEvaluator), Arc::new(MemoryStore::new()));
//! let ctx = RoundContext::new("Backend Engineer", "mid", "technical");
//! let (sequencer, handle) = Sequencer::new(EngineConfig::default(), ctx, collaborators);
//! let session = tokio::spawn(sequencer.run());
//! handle.start().unwrap();
//! let summary = session.await.unwrap();
//! # }
//! ```

pub mod capture;
pub mod collaborators;
pub mod config;
pub mod detector;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod gate;
pub mod ledger;
pub mod prompts;
pub mod sequencer;
pub mod session;
pub mod speech;
pub mod store;
pub mod transcript;

pub use capture::{CaptureDevice, CaptureEvent, CaptureSink, NoCapture};
pub use collaborators::Collaborators;
pub use config::{EngineConfig, MockmateConfig, ServiceConfig};
pub use detector::{Detector, DetectorConfig};
pub use error::{SessionError, SessionResult};
pub use evaluator::{
    ChatCompletionEvaluator, EvaluationRequest, EvaluatorClient, Opening, TurnEvaluator,
    TurnOutcome,
};
pub use events::SessionEvent;
pub use gate::TurnGate;
pub use ledger::{Ledger, TurnRecord, NO_RESPONSE_ANSWER, STRUGGLED_ANSWER};
pub use sequencer::{Sequencer, SessionHandle, SessionSummary};
pub use session::{
    CompletionTrigger, RoundContext, Session, SessionState, TerminationReason,
};
#[cfg(feature = "playback")]
pub use speech::RodioSink;
pub use speech::{
    AudioSink, CommandSpeech, DisabledSynthesis, HttpSynthesis, LocalSynthesis,
    NoopLocalSynthesis, NullSink, SpeechCoordinator, SpeechPath, Synthesis, SynthesisService,
};
pub use store::{JsonFileStore, MemoryStore, SessionRecord, SessionStore, SledSessionStore};
pub use transcript::TranscriptBuffer;
