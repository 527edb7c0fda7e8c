//! Turn evaluation: ask the hosted model what the interviewer does next.
//!
//! `TurnEvaluator` is the raw transport and may fail or hang. `EvaluatorClient` wraps it,
//! bounds every call with a timeout, and never fails: a failed or late opening becomes a
//! canned greeting, a failed or late turn becomes an outcome with
//! `is_interview_complete = true`, so the sequencer's only failure path is the normal
//! Processing → Terminated transition.

use crate::config::{EngineConfig, ServiceConfig};
use crate::error::{SessionError, SessionResult};
use crate::prompts;
use crate::session::RoundContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Everything the evaluator needs to continue the interview consistently. Carries the
/// full question history so a replayed call asks for the same logical continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub question: String,
    pub answer: String,
    pub job_role: String,
    pub experience_level: String,
    pub round_type: String,
    pub resume_text: String,
    pub previous_questions: Vec<String>,
    pub is_stuck: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_submission: Option<String>,
}

impl EvaluationRequest {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        ctx: &RoundContext,
        previous_questions: Vec<String>,
        is_stuck: bool,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            job_role: ctx.job_role.clone(),
            experience_level: ctx.experience_level.clone(),
            round_type: ctx.round_type.clone(),
            resume_text: ctx.resume_text.clone(),
            previous_questions,
            is_stuck,
            code_submission: None,
        }
    }

    pub fn with_code_submission(mut self, code: Option<String>) -> Self {
        self.code_submission = code;
        self
    }
}

/// The evaluator's decision for the next step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnOutcome {
    pub verbal_reaction: String,
    pub detected_emotion: Option<String>,
    pub next_question: Option<String>,
    pub is_interview_complete: bool,
    /// The next question is a hint on the current one; the turn counter stays put.
    pub is_offering_hint: bool,
    pub request_coding_task: bool,
    /// Set by `EvaluatorClient` when this outcome replaces a failed call.
    #[serde(skip)]
    pub degraded: bool,
}

impl TurnOutcome {
    /// A normal follow-up question.
    pub fn question(reaction: impl Into<String>, next_question: impl Into<String>) -> Self {
        Self {
            verbal_reaction: reaction.into(),
            next_question: Some(next_question.into()),
            ..Self::default()
        }
    }

    /// A clarifying hint on the current question.
    pub fn hint(reaction: impl Into<String>, hint_question: impl Into<String>) -> Self {
        Self {
            is_offering_hint: true,
            ..Self::question(reaction, hint_question)
        }
    }

    pub fn complete(reaction: impl Into<String>) -> Self {
        Self {
            verbal_reaction: reaction.into(),
            is_interview_complete: true,
            ..Self::default()
        }
    }

    /// Stand-in for a failed call: ends the interview gracefully.
    pub fn degraded() -> Self {
        Self {
            verbal_reaction: "Thank you, that concludes our interview.".to_string(),
            is_interview_complete: true,
            degraded: true,
            ..Self::default()
        }
    }

    /// The next question, if it has any content.
    pub fn next_question(&self) -> Option<&str> {
        self.next_question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Greeting and first question of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opening {
    pub greeting: String,
    pub first_question: String,
}

impl Opening {
    /// Used when the opening call fails; the interview still starts.
    pub fn fallback(ctx: &RoundContext) -> Self {
        let role = if ctx.job_role.trim().is_empty() {
            "this position".to_string()
        } else {
            format!("the {} position", ctx.job_role.trim())
        };
        Self {
            greeting: format!(
                "Hello, and welcome to your mock interview for {}. Let's get started.",
                role
            ),
            first_question: "Could you start by telling me a little about yourself?".to_string(),
        }
    }

    /// The text spoken when the user presses start.
    pub fn utterance(&self) -> String {
        format!("{} {}", self.greeting.trim(), self.first_question.trim())
            .trim()
            .to_string()
    }
}

/// Raw access to the AI turn-generation service.
#[async_trait]
pub trait TurnEvaluator: Send + Sync {
    async fn opening(&self, ctx: &RoundContext) -> SessionResult<Opening>;

    async fn evaluate(&self, request: &EvaluationRequest) -> SessionResult<TurnOutcome>;
}

/// Infallible, time-bounded facade over a `TurnEvaluator`.
#[derive(Clone)]
pub struct EvaluatorClient {
    inner: Arc<dyn TurnEvaluator>,
    call_timeout: Duration,
}

impl EvaluatorClient {
    pub fn new(inner: Arc<dyn TurnEvaluator>, call_timeout: Duration) -> Self {
        Self {
            inner,
            call_timeout,
        }
    }

    pub async fn opening(&self, ctx: &RoundContext) -> Opening {
        match timeout(self.call_timeout, self.inner.opening(ctx)).await {
            Ok(Ok(o)) if !o.first_question.trim().is_empty() => o,
            Ok(Ok(_)) => {
                warn!("Evaluator: opening had no first question, using fallback");
                Opening::fallback(ctx)
            }
            Ok(Err(e)) => {
                warn!("Evaluator: opening failed, using fallback: {}", e);
                Opening::fallback(ctx)
            }
            Err(_) => {
                warn!(
                    "Evaluator: opening timed out after {:?}, using fallback",
                    self.call_timeout
                );
                Opening::fallback(ctx)
            }
        }
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> TurnOutcome {
        let result = match timeout(self.call_timeout, self.inner.evaluate(request)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Evaluator(format!(
                "no reply within {:?}",
                self.call_timeout
            ))),
        };
        match result {
            Ok(outcome) => {
                debug!(
                    "Evaluator: complete={} hint={} coding={} has_next={}",
                    outcome.is_interview_complete,
                    outcome.is_offering_hint,
                    outcome.request_coding_task,
                    outcome.next_question().is_some()
                );
                outcome
            }
            Err(e) => {
                warn!("Evaluator: call failed, ending interview gracefully: {}", e);
                TurnOutcome::degraded()
            }
        }
    }
}

// OpenAI-compatible request/response for chat completions
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Production evaluator: any OpenAI-compatible `/chat/completions` endpoint (OpenAI,
/// OpenRouter, a local server). The model is asked for a JSON object and the reply is
/// parsed leniently (code fences and surrounding prose are tolerated).
pub struct ChatCompletionEvaluator {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatCompletionEvaluator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionError::Evaluator(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            client,
        })
    }

    /// Build from service config. Fails when no evaluator key is configured.
    pub fn from_config(services: &ServiceConfig, engine: &EngineConfig) -> SessionResult<Self> {
        let key = services
            .evaluator_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SessionError::Config(
                    "Evaluator requires EVALUATOR_API_KEY or OPENROUTER_API_KEY".to_string(),
                )
            })?;
        Self::new(
            services.evaluator_api_url.clone(),
            key,
            services.evaluator_model.clone(),
            engine.evaluator_timeout(),
        )
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    async fn chat(&self, system: &str, user: String) -> SessionResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: Some(0.6),
            max_tokens: Some(512),
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Evaluator(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SessionError::Evaluator(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| SessionError::Evaluator(format!("response parse failed: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SessionError::Evaluator("no choices in response".to_string()))
    }
}

#[async_trait]
impl TurnEvaluator for ChatCompletionEvaluator {
    async fn opening(&self, ctx: &RoundContext) -> SessionResult<Opening> {
        let raw = self
            .chat(prompts::OPENING_SYSTEM, prompts::opening_user_prompt(ctx))
            .await?;
        let opening = parse_json_reply::<Opening>(&raw)?;
        info!("Evaluator: opening ready");
        Ok(opening)
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> SessionResult<TurnOutcome> {
        let raw = self
            .chat(prompts::TURN_SYSTEM, prompts::turn_user_prompt(request))
            .await?;
        parse_json_reply::<TurnOutcome>(&raw)
    }
}

/// Parse a model reply that should be a JSON object, tolerating ```json fences and prose
/// around the object.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> SessionResult<T> {
    let trimmed = raw.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => {
            return Err(SessionError::Evaluator(format!(
                "reply is not a JSON object: {}",
                trimmed.chars().take(120).collect::<String>()
            )))
        }
    };
    serde_json::from_str(body).map_err(|e| SessionError::Evaluator(format!("schema mismatch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEvaluator;

    #[async_trait]
    impl TurnEvaluator for FailingEvaluator {
        async fn opening(&self, _ctx: &RoundContext) -> SessionResult<Opening> {
            Err(SessionError::Evaluator("503".into()))
        }
        async fn evaluate(&self, _request: &EvaluationRequest) -> SessionResult<TurnOutcome> {
            Err(SessionError::Evaluator("connection refused".into()))
        }
    }

    struct HangingEvaluator;

    #[async_trait]
    impl TurnEvaluator for HangingEvaluator {
        async fn opening(&self, _ctx: &RoundContext) -> SessionResult<Opening> {
            std::future::pending().await
        }
        async fn evaluate(&self, _request: &EvaluationRequest) -> SessionResult<TurnOutcome> {
            std::future::pending().await
        }
    }

    fn ctx() -> RoundContext {
        RoundContext::new("Frontend Engineer", "mid", "technical")
    }

    #[tokio::test]
    async fn failed_evaluation_degrades_to_completion() {
        let client = EvaluatorClient::new(Arc::new(FailingEvaluator), Duration::from_secs(30));
        let req = EvaluationRequest::new("Q", "A", &ctx(), vec!["Q".into()], false);
        let outcome = client.evaluate(&req).await;
        assert!(outcome.is_interview_complete);
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn failed_opening_uses_fallback() {
        let client = EvaluatorClient::new(Arc::new(FailingEvaluator), Duration::from_secs(30));
        let opening = client.opening(&ctx()).await;
        assert!(opening.greeting.contains("Frontend Engineer"));
        assert!(!opening.first_question.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_evaluation_times_out_to_completion() {
        let client = EvaluatorClient::new(Arc::new(HangingEvaluator), Duration::from_secs(30));
        let req = EvaluationRequest::new("Q", "A", &ctx(), vec!["Q".into()], false);
        let started = tokio::time::Instant::now();
        let outcome = client.evaluate(&req).await;
        assert!(outcome.degraded);
        assert!(outcome.is_interview_complete);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_opening_times_out_to_fallback() {
        let client = EvaluatorClient::new(Arc::new(HangingEvaluator), Duration::from_secs(5));
        assert_eq!(client.opening(&ctx()).await, Opening::fallback(&ctx()));
    }

    #[test]
    fn parses_fenced_reply() {
        let raw = "Sure!\n```json\n{\"verbalReaction\": \"Nice.\", \"nextQuestion\": \"Why Rust?\", \"isOfferingHint\": true}\n```";
        let outcome: TurnOutcome = parse_json_reply(raw).unwrap();
        assert_eq!(outcome.verbal_reaction, "Nice.");
        assert_eq!(outcome.next_question(), Some("Why Rust?"));
        assert!(outcome.is_offering_hint);
        assert!(!outcome.is_interview_complete);
        assert!(!outcome.degraded);
    }

    #[test]
    fn non_json_reply_is_an_error() {
        assert!(parse_json_reply::<TurnOutcome>("I cannot help with that").is_err());
    }

    #[test]
    fn blank_next_question_counts_as_none() {
        let outcome = TurnOutcome::question("ok", "   ");
        assert_eq!(outcome.next_question(), None);
    }

    #[test]
    fn request_serializes_wire_fields() {
        let req = EvaluationRequest::new("Q", "A", &ctx(), vec!["Q".into()], true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["previousQuestions"][0], "Q");
        assert_eq!(json["isStuck"], true);
        assert_eq!(json["jobRole"], "Frontend Engineer");
        assert!(json.get("codeSubmission").is_none());
    }
}
