//! **Speech output**: the "interviewer speaks" phase.
//!
//! `SpeechCoordinator::speak` asks the remote synthesis service for audio and plays it.
//! When the service requests a fallback, fails, or times out, the text goes to a local,
//! lower-fidelity synthesizer instead. A watchdog bounds the whole phase so the session
//! can never stay in Speaking forever, even if both paths hang.

use crate::config::{EngineConfig, ServiceConfig};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result of a synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    /// Encoded audio (WAV/MP3) ready for an `AudioSink`.
    Audio(Vec<u8>),
    /// The service asks the client to speak locally instead (quota, missing key, ...).
    FallbackRequested,
}

/// Remote text-to-speech service.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, text: &str) -> SessionResult<Synthesis>;
}

/// Plays synthesized audio. Resolves when playback has finished.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> SessionResult<()>;
}

/// Local synthesis capability. Resolves when the utterance is done; may be a no-op.
#[async_trait]
pub trait LocalSynthesis: Send + Sync {
    async fn speak(&self, text: &str) -> SessionResult<()>;
}

/// Synthesis that always defers to the local path. Used when no TTS key is configured.
#[derive(Debug, Default)]
pub struct DisabledSynthesis;

#[async_trait]
impl SynthesisService for DisabledSynthesis {
    async fn synthesize(&self, _text: &str) -> SessionResult<Synthesis> {
        Ok(Synthesis::FallbackRequested)
    }
}

/// Discards audio immediately. Useful headless and in tests.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: Vec<u8>) -> SessionResult<()> {
        debug!("NullSink: dropping {} bytes of audio", audio.len());
        Ok(())
    }
}

/// Local synthesis for constrained environments: finishes immediately.
#[derive(Debug, Default)]
pub struct NoopLocalSynthesis;

#[async_trait]
impl LocalSynthesis for NoopLocalSynthesis {
    async fn speak(&self, text: &str) -> SessionResult<()> {
        debug!("NoopLocalSynthesis: skipping {} chars", text.len());
        Ok(())
    }
}

/// Local synthesis through a system program (`espeak`, `say`, `spd-say`, ...). The text is
/// passed as the last argument; the utterance is done when the process exits.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpeech {
    /// Parse a whitespace-separated command line such as `"espeak -s 160"`.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl LocalSynthesis for CommandSpeech {
    async fn speak(&self, text: &str) -> SessionResult<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| SessionError::Synthesis(format!("{}: {}", self.program, e)))?;
        if !status.success() {
            return Err(SessionError::Synthesis(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Production synthesis backend: OpenAI-compatible `/audio/speech`.
///
/// Maps "speak locally instead" conditions to `Synthesis::FallbackRequested`: no API key,
/// HTTP 429 / 402, or a JSON body of the form `{"fallback": true}`.
#[derive(Debug, Clone)]
pub struct HttpSynthesis {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: Option<String>,
    /// tts-1 (fast) or tts-1-hd.
    pub model: String,
    pub voice: String,
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct FallbackBody {
    #[serde(default)]
    fallback: bool,
}

impl HttpSynthesis {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        request_timeout: Duration,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }

    pub fn from_config(services: &ServiceConfig, engine: &EngineConfig) -> SessionResult<Self> {
        Self::new(
            services.tts_api_url.clone(),
            services.tts_api_key.clone(),
            services.tts_model.clone(),
            services.tts_voice.clone(),
            engine.synthesis_timeout(),
        )
    }
}

#[async_trait]
impl SynthesisService for HttpSynthesis {
    async fn synthesize(&self, text: &str) -> SessionResult<Synthesis> {
        let Some(ref api_key) = self.api_key else {
            return Ok(Synthesis::FallbackRequested);
        };
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Synthesis(e.to_string()))?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::PAYMENT_REQUIRED
        {
            info!("Synthesis: service returned {}, requesting local fallback", status);
            return Ok(Synthesis::FallbackRequested);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SessionError::Synthesis(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }

        let is_json = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let bytes = res
            .bytes()
            .await
            .map_err(|e| SessionError::Synthesis(e.to_string()))?;
        if is_json {
            let parsed: FallbackBody = serde_json::from_slice(&bytes)?;
            if parsed.fallback {
                return Ok(Synthesis::FallbackRequested);
            }
            return Err(SessionError::Synthesis(
                "TTS API returned JSON without audio".to_string(),
            ));
        }
        Ok(Synthesis::Audio(bytes.to_vec()))
    }
}

/// Plays audio on the default output device through rodio. The output stream is not
/// `Send`, so each utterance opens it on a blocking thread and waits for the sink to drain.
/// The sink is shared back to the async side and stopped if `play` is dropped early
/// (watchdog, session teardown), so the interviewer never talks over the next turn.
#[cfg(feature = "playback")]
#[derive(Debug, Default)]
pub struct RodioSink;

/// Stops a rodio sink when dropped, unless playback already finished.
#[cfg(feature = "playback")]
struct StopOnDrop {
    sink: Option<Arc<rodio::Sink>>,
}

#[cfg(feature = "playback")]
impl StopOnDrop {
    fn new(sink: Arc<rodio::Sink>) -> Self {
        Self { sink: Some(sink) }
    }

    fn disarm(&mut self) {
        self.sink = None;
    }
}

#[cfg(feature = "playback")]
impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
            info!("RodioSink: playback stopped early");
        }
    }
}

#[cfg(feature = "playback")]
#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, audio: Vec<u8>) -> SessionResult<()> {
        use rodio::{OutputStream, Sink, Source};
        use std::io::Cursor;

        let (sink_tx, sink_rx) = tokio::sync::oneshot::channel::<Arc<Sink>>();
        let playback = tokio::task::spawn_blocking(move || {
            let (_stream, handle) = OutputStream::try_default()
                .map_err(|e| SessionError::Playback(e.to_string()))?;
            let sink =
                Arc::new(Sink::try_new(&handle).map_err(|e| SessionError::Playback(e.to_string()))?);
            let source = rodio::Decoder::new(Cursor::new(audio))
                .map_err(|e| SessionError::Playback(format!("Decode failed: {}", e)))?;
            sink.append(source.convert_samples::<f32>());
            // Caller already gone: dropping the sink silences it.
            if sink_tx.send(Arc::clone(&sink)).is_err() {
                return Ok(());
            }
            sink.sleep_until_end();
            Ok(())
        });

        let mut guard = sink_rx.await.ok().map(StopOnDrop::new);
        let result = playback
            .await
            .map_err(|e| SessionError::Playback(e.to_string()))?;
        if let Some(g) = guard.as_mut() {
            g.disarm();
        }
        result
    }
}

/// How a speaking phase actually ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechPath {
    /// Remote audio played to the end.
    Remote,
    /// Local synthesis was used (requested fallback or remote failure).
    LocalFallback,
    /// Neither path finished in time; the phase was cut short.
    WatchdogExpired,
    /// Nothing to say.
    Skipped,
}

/// Drives one speaking phase: remote synthesis, playback, local fallback, watchdog.
pub struct SpeechCoordinator {
    remote: Arc<dyn SynthesisService>,
    sink: Arc<dyn AudioSink>,
    local: Arc<dyn LocalSynthesis>,
    synthesis_timeout: Duration,
    watchdog: Duration,
}

impl SpeechCoordinator {
    pub fn new(
        remote: Arc<dyn SynthesisService>,
        sink: Arc<dyn AudioSink>,
        local: Arc<dyn LocalSynthesis>,
        synthesis_timeout: Duration,
        watchdog: Duration,
    ) -> Self {
        Self {
            remote,
            sink,
            local,
            synthesis_timeout,
            watchdog,
        }
    }

    /// Speak `text`. Always resolves, at the latest when the watchdog expires.
    pub async fn speak(&self, text: &str) -> SpeechPath {
        let text = text.trim();
        if text.is_empty() {
            return SpeechPath::Skipped;
        }
        match timeout(self.watchdog, self.speak_inner(text)).await {
            Ok(path) => path,
            Err(_) => {
                warn!(
                    "Speech: watchdog expired after {:?}, moving on",
                    self.watchdog
                );
                SpeechPath::WatchdogExpired
            }
        }
    }

    async fn speak_inner(&self, text: &str) -> SpeechPath {
        let synthesis = match timeout(self.synthesis_timeout, self.remote.synthesize(text)).await {
            Ok(Ok(s)) => Some(s),
            Ok(Err(e)) => {
                warn!("Speech: remote synthesis failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Speech: remote synthesis timed out");
                None
            }
        };

        match synthesis {
            Some(Synthesis::Audio(bytes)) if !bytes.is_empty() => {
                match self.sink.play(bytes).await {
                    Ok(()) => return SpeechPath::Remote,
                    Err(e) => warn!("Speech: playback failed, speaking locally: {}", e),
                }
            }
            Some(Synthesis::Audio(_)) => debug!("Speech: empty audio, speaking locally"),
            Some(Synthesis::FallbackRequested) => info!("Speech: fallback requested"),
            None => {}
        }

        if let Err(e) = self.local.speak(text).await {
            warn!("Speech: local synthesis failed: {}", e);
        }
        SpeechPath::LocalFallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSynthesis(SessionResult<Synthesis>);

    #[async_trait]
    impl SynthesisService for FixedSynthesis {
        async fn synthesize(&self, _text: &str) -> SessionResult<Synthesis> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(SessionError::Synthesis(e.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl AudioSink for CountingSink {
        async fn play(&self, _audio: Vec<u8>) -> SessionResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLocal(AtomicUsize);

    #[async_trait]
    impl LocalSynthesis for CountingLocal {
        async fn speak(&self, _text: &str) -> SessionResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct HangingLocal;

    #[async_trait]
    impl LocalSynthesis for HangingLocal {
        async fn speak(&self, _text: &str) -> SessionResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn coordinator(
        remote: SessionResult<Synthesis>,
        sink: Arc<CountingSink>,
        local: Arc<dyn LocalSynthesis>,
    ) -> SpeechCoordinator {
        SpeechCoordinator::new(
            Arc::new(FixedSynthesis(remote)),
            sink,
            local,
            Duration::from_secs(5),
            Duration::from_secs(45),
        )
    }

    #[tokio::test]
    async fn remote_audio_is_played() {
        let sink = Arc::new(CountingSink::default());
        let local = Arc::new(CountingLocal::default());
        let c = coordinator(Ok(Synthesis::Audio(vec![1, 2, 3])), sink.clone(), local.clone());
        assert_eq!(c.speak("Hello").await, SpeechPath::Remote);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        assert_eq!(local.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_request_skips_playback() {
        let sink = Arc::new(CountingSink::default());
        let local = Arc::new(CountingLocal::default());
        let c = coordinator(Ok(Synthesis::FallbackRequested), sink.clone(), local.clone());
        assert_eq!(c.speak("Hello").await, SpeechPath::LocalFallback);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_falls_back_locally() {
        let sink = Arc::new(CountingSink::default());
        let local = Arc::new(CountingLocal::default());
        let c = coordinator(
            Err(SessionError::Synthesis("connection reset".into())),
            sink.clone(),
            local.clone(),
        );
        assert_eq!(c.speak("Hello").await, SpeechPath::LocalFallback);
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_bounds_a_hanging_fallback() {
        let sink = Arc::new(CountingSink::default());
        let c = coordinator(Ok(Synthesis::FallbackRequested), sink, Arc::new(HangingLocal));
        assert_eq!(c.speak("Hello").await, SpeechPath::WatchdogExpired);
    }

    #[tokio::test]
    async fn blank_text_is_skipped() {
        let sink = Arc::new(CountingSink::default());
        let local = Arc::new(CountingLocal::default());
        let c = coordinator(Ok(Synthesis::Audio(vec![1])), sink.clone(), local.clone());
        assert_eq!(c.speak("   ").await, SpeechPath::Skipped);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_key_requests_fallback() {
        let tts = HttpSynthesis::new(
            "http://127.0.0.1:9",
            None,
            "tts-1",
            "nova",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(tts.synthesize("hi").await.unwrap(), Synthesis::FallbackRequested);
    }

    #[cfg(feature = "playback")]
    #[test]
    fn dropped_playback_guard_stops_the_sink() {
        use rodio::source::SineWave;

        let (sink, mut output) = rodio::Sink::new_idle();
        let sink = Arc::new(sink);
        sink.append(SineWave::new(440.0));
        assert!(!sink.empty());

        drop(StopOnDrop::new(Arc::clone(&sink)));
        for _ in 0..10_000 {
            output.next();
        }
        assert!(sink.empty());
    }

    #[cfg(feature = "playback")]
    #[test]
    fn disarmed_guard_leaves_the_sink_playing() {
        use rodio::source::SineWave;

        let (sink, mut output) = rodio::Sink::new_idle();
        let sink = Arc::new(sink);
        sink.append(SineWave::new(440.0));

        let mut guard = StopOnDrop::new(Arc::clone(&sink));
        guard.disarm();
        drop(guard);
        for _ in 0..10_000 {
            output.next();
        }
        assert!(!sink.empty());
    }

    #[test]
    fn command_line_parsing() {
        let cmd = CommandSpeech::parse("espeak -s 160").unwrap();
        assert_eq!(cmd.program, "espeak");
        assert_eq!(cmd.args, vec!["-s", "160"]);
        assert!(CommandSpeech::parse("   ").is_none());
    }
}
