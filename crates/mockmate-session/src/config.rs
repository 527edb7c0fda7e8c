//! Engine and service configuration.
//!
//! Timing constants for turn detection and the endpoints of the hosted AI services. Every
//! value can come from a TOML file (`MockmateConfig::load`) or from the environment
//! (`MockmateConfig::from_env`); unset or invalid values fall back to the defaults below.

use crate::error::SessionResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_max_turns() -> u32 {
    6
}

fn default_silence_window_ms() -> u64 {
    12_000
}

fn default_stuck_window_ms() -> u64 {
    18_000
}

fn default_min_answer_chars() -> usize {
    30
}

fn default_speech_watchdog_ms() -> u64 {
    45_000
}

fn default_synthesis_timeout_ms() -> u64 {
    15_000
}

fn default_persist_timeout_ms() -> u64 {
    10_000
}

fn default_evaluator_timeout_ms() -> u64 {
    30_000
}

/// Session timing and bounds.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | MOCKMATE_MAX_TURNS | 6 | Fully-advanced turns before the session force-terminates. |
/// | MOCKMATE_SILENCE_WINDOW_MS | 12000 | Quiet window after the last capture event. |
/// | MOCKMATE_STUCK_WINDOW_MS | 18000 | Window without new finalized speech before the user is stuck. |
/// | MOCKMATE_MIN_ANSWER_CHARS | 30 | Transcript length the silence deadline needs to auto-submit. |
/// | MOCKMATE_SPEECH_WATCHDOG_MS | 45000 | Ceiling on one speaking phase, remote and local paths included. |
/// | MOCKMATE_SYNTHESIS_TIMEOUT_MS | 15000 | Ceiling on the remote synthesis request alone. |
/// | MOCKMATE_PERSIST_TIMEOUT_MS | 10000 | Ceiling on the final persistence write. |
/// | MOCKMATE_EVALUATOR_TIMEOUT_MS | 30000 | Ceiling on one evaluator call (opening or turn). |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,
    #[serde(default = "default_stuck_window_ms")]
    pub stuck_window_ms: u64,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    #[serde(default = "default_speech_watchdog_ms")]
    pub speech_watchdog_ms: u64,
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
    #[serde(default = "default_evaluator_timeout_ms")]
    pub evaluator_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            silence_window_ms: default_silence_window_ms(),
            stuck_window_ms: default_stuck_window_ms(),
            min_answer_chars: default_min_answer_chars(),
            speech_watchdog_ms: default_speech_watchdog_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            persist_timeout_ms: default_persist_timeout_ms(),
            evaluator_timeout_ms: default_evaluator_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load from environment. Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_turns: env_parse("MOCKMATE_MAX_TURNS", d.max_turns).max(1),
            silence_window_ms: env_parse("MOCKMATE_SILENCE_WINDOW_MS", d.silence_window_ms),
            stuck_window_ms: env_parse("MOCKMATE_STUCK_WINDOW_MS", d.stuck_window_ms),
            min_answer_chars: env_parse("MOCKMATE_MIN_ANSWER_CHARS", d.min_answer_chars),
            speech_watchdog_ms: env_parse("MOCKMATE_SPEECH_WATCHDOG_MS", d.speech_watchdog_ms),
            synthesis_timeout_ms: env_parse("MOCKMATE_SYNTHESIS_TIMEOUT_MS", d.synthesis_timeout_ms),
            persist_timeout_ms: env_parse("MOCKMATE_PERSIST_TIMEOUT_MS", d.persist_timeout_ms),
            evaluator_timeout_ms: env_parse("MOCKMATE_EVALUATOR_TIMEOUT_MS", d.evaluator_timeout_ms),
        }
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }

    pub fn stuck_window(&self) -> Duration {
        Duration::from_millis(self.stuck_window_ms)
    }

    pub fn speech_watchdog(&self) -> Duration {
        Duration::from_millis(self.speech_watchdog_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluator_timeout_ms)
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_evaluator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "nova".to_string()
}

fn default_store_path() -> String {
    "./data/mockmate_sessions".to_string()
}

/// Endpoints and credentials for the external collaborators.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | EVALUATOR_API_URL | https://api.openai.com/v1 | OpenAI-compatible base URL for turn generation. |
/// | EVALUATOR_API_KEY (or OPENROUTER_API_KEY) | (none) | Bearer key; required by the chat evaluator. |
/// | EVALUATOR_MODEL | gpt-4o-mini | Chat model. |
/// | TTS_API_URL | https://api.openai.com/v1 | OpenAI-compatible base URL for speech synthesis. |
/// | TTS_API_KEY | (none) | When unset, every utterance goes to local synthesis. |
/// | TTS_MODEL / TTS_VOICE | tts-1 / nova | Synthesis model and voice. |
/// | MOCKMATE_LOCAL_TTS_COMMAND | (none) | Local fallback program (e.g. `espeak`); text is the last argument. |
/// | MOCKMATE_STORE_PATH | ./data/mockmate_sessions | Sled directory for finished sessions. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_api_url")]
    pub evaluator_api_url: String,
    #[serde(default)]
    pub evaluator_api_key: Option<String>,
    #[serde(default = "default_evaluator_model")]
    pub evaluator_model: String,
    #[serde(default = "default_api_url")]
    pub tts_api_url: String,
    #[serde(default)]
    pub tts_api_key: Option<String>,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default)]
    pub local_tts_command: Option<String>,
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            evaluator_api_url: default_api_url(),
            evaluator_api_key: None,
            evaluator_model: default_evaluator_model(),
            tts_api_url: default_api_url(),
            tts_api_key: None,
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            local_tts_command: None,
            store_path: default_store_path(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            evaluator_api_url: env_opt_string("EVALUATOR_API_URL").unwrap_or(d.evaluator_api_url),
            evaluator_api_key: env_opt_string("EVALUATOR_API_KEY")
                .or_else(|| env_opt_string("OPENROUTER_API_KEY")),
            evaluator_model: env_opt_string("EVALUATOR_MODEL").unwrap_or(d.evaluator_model),
            tts_api_url: env_opt_string("TTS_API_URL").unwrap_or(d.tts_api_url),
            tts_api_key: env_opt_string("TTS_API_KEY"),
            tts_model: env_opt_string("TTS_MODEL").unwrap_or(d.tts_model),
            tts_voice: env_opt_string("TTS_VOICE").unwrap_or(d.tts_voice),
            local_tts_command: env_opt_string("MOCKMATE_LOCAL_TTS_COMMAND"),
            store_path: env_opt_string("MOCKMATE_STORE_PATH").unwrap_or(d.store_path),
        }
    }
}

/// Full configuration file: `[engine]` and `[services]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockmateConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub services: ServiceConfig,
}

impl MockmateConfig {
    pub fn from_env() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            services: ServiceConfig::from_env(),
        }
    }

    pub fn from_toml_str(raw: &str) -> SessionResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML file. Missing tables and keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_match_interview_timing() {
        let c = EngineConfig::default();
        assert_eq!(c.max_turns, 6);
        assert_eq!(c.silence_window(), Duration::from_secs(12));
        assert_eq!(c.stuck_window(), Duration::from_secs(18));
        assert_eq!(c.min_answer_chars, 30);
        assert_eq!(c.evaluator_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let cfg = MockmateConfig::from_toml_str(
            r#"
            [engine]
            max_turns = 3
            silence_window_ms = 5000

            [services]
            tts_voice = "alloy"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_turns, 3);
        assert_eq!(cfg.engine.silence_window(), Duration::from_secs(5));
        assert_eq!(cfg.engine.stuck_window_ms, 18_000);
        assert_eq!(cfg.services.tts_voice, "alloy");
        assert_eq!(cfg.services.tts_model, "tts-1");
        assert!(cfg.services.evaluator_api_key.is_none());
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let cfg = MockmateConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.engine.max_turns, 6);
        assert_eq!(cfg.services.store_path, "./data/mockmate_sessions");
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = MockmateConfig::from_toml_str("[engine\nmax_turns = ").unwrap_err();
        assert!(matches!(err, crate::error::SessionError::Config(_)));
    }
}
