//! The external services a session talks to, bundled for `Sequencer::new`.

use crate::capture::{CaptureDevice, NoCapture};
use crate::config::MockmateConfig;
use crate::error::SessionResult;
use crate::evaluator::{ChatCompletionEvaluator, TurnEvaluator};
use crate::speech::{
    AudioSink, CommandSpeech, DisabledSynthesis, HttpSynthesis, LocalSynthesis,
    NoopLocalSynthesis, NullSink, SynthesisService,
};
use crate::store::{SessionStore, SledSessionStore};
use std::sync::Arc;
use tracing::info;

pub struct Collaborators {
    pub evaluator: Arc<dyn TurnEvaluator>,
    pub store: Arc<dyn SessionStore>,
    pub synthesis: Arc<dyn SynthesisService>,
    pub sink: Arc<dyn AudioSink>,
    pub local_speech: Arc<dyn LocalSynthesis>,
    pub capture: Box<dyn CaptureDevice>,
}

impl Collaborators {
    /// Evaluator and store are required; speech defaults to silent local synthesis and
    /// there is no microphone until `with_capture`.
    pub fn new(evaluator: Arc<dyn TurnEvaluator>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            evaluator,
            store,
            synthesis: Arc::new(DisabledSynthesis),
            sink: Arc::new(NullSink),
            local_speech: Arc::new(NoopLocalSynthesis),
            capture: Box::new(NoCapture),
        }
    }

    pub fn with_synthesis(mut self, synthesis: Arc<dyn SynthesisService>) -> Self {
        self.synthesis = synthesis;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_local_speech(mut self, local: Arc<dyn LocalSynthesis>) -> Self {
        self.local_speech = local;
        self
    }

    pub fn with_capture(mut self, capture: Box<dyn CaptureDevice>) -> Self {
        self.capture = capture;
        self
    }

    /// Production wiring: chat-completion evaluator, sled store, HTTP synthesis, and the
    /// configured local speech command. Audio plays through rodio when built with the
    /// `playback` feature.
    pub fn from_config(config: &MockmateConfig) -> SessionResult<Self> {
        let evaluator = ChatCompletionEvaluator::from_config(&config.services, &config.engine)?;
        let store = SledSessionStore::open_path(&config.services.store_path)?;
        let synthesis = HttpSynthesis::from_config(&config.services, &config.engine)?;

        let local: Arc<dyn LocalSynthesis> = match config
            .services
            .local_tts_command
            .as_deref()
            .and_then(CommandSpeech::parse)
        {
            Some(cmd) => {
                info!("Local speech fallback: {}", cmd.program);
                Arc::new(cmd)
            }
            None => Arc::new(NoopLocalSynthesis),
        };

        #[cfg(feature = "playback")]
        let sink: Arc<dyn AudioSink> = Arc::new(crate::speech::RodioSink);
        #[cfg(not(feature = "playback"))]
        let sink: Arc<dyn AudioSink> = Arc::new(NullSink);

        Ok(Self::new(Arc::new(evaluator), Arc::new(store))
            .with_synthesis(Arc::new(synthesis))
            .with_sink(sink)
            .with_local_speech(local))
    }
}
