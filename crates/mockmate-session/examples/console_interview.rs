//! Console interview: run a full session from the terminal.
//!
//! Typed lines act as finalized speech. Commands:
//! - `/submit` finishes the current answer
//! - `/code <snippet>` finishes it with a code attachment
//! - `/quit` ends the interview
//!
//! With `EVALUATOR_API_KEY` (or `OPENROUTER_API_KEY`) set in `.env`, questions come from the
//! configured chat model; otherwise a short canned interview runs offline. Set `TTS_API_KEY`
//! and build with `--features playback` to hear the interviewer, or set
//! `MOCKMATE_LOCAL_TTS_COMMAND=espeak` for local speech.

use async_trait::async_trait;
use mockmate_session::{
    CaptureEvent, Collaborators, EvaluationRequest, MemoryStore, MockmateConfig, Opening,
    RoundContext, Sequencer, SessionEvent, SessionResult, TurnEvaluator, TurnOutcome,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Canned questions for running without an API key.
struct OfflineEvaluator {
    questions: Vec<&'static str>,
}

#[async_trait]
impl TurnEvaluator for OfflineEvaluator {
    async fn opening(&self, ctx: &RoundContext) -> SessionResult<Opening> {
        Ok(Opening::fallback(ctx))
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> SessionResult<TurnOutcome> {
        let asked = request.previous_questions.len();
        Ok(match self.questions.get(asked.saturating_sub(1)) {
            Some(q) => TurnOutcome::question("Thanks.", *q),
            None => TurnOutcome::complete("That's all I had. Thank you for your time."),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = MockmateConfig::from_env();
    let collaborators = match Collaborators::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            warn!("Production wiring unavailable ({}); running offline", e);
            let offline = OfflineEvaluator {
                questions: vec![
                    "Describe a project you are proud of.",
                    "How do you approach debugging a production incident?",
                    "Where do you want to grow in the next two years?",
                ],
            };
            Collaborators::new(Arc::new(offline), Arc::new(MemoryStore::new()))
        }
    };

    let ctx = RoundContext::new("Backend Engineer", "mid", "technical");
    let (sequencer, handle) = Sequencer::new(config.engine.clone(), ctx, collaborators);
    let session = tokio::spawn(sequencer.run());

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::QuestionPosed {
                    question, is_hint, ..
                } => {
                    let tag = if is_hint { "hint" } else { "question" };
                    println!("\n[{}] {}", tag, question);
                }
                SessionEvent::AssistantReaction { text, emotion } => {
                    println!("[interviewer] {} ({})", text, emotion.unwrap_or_default());
                }
                SessionEvent::StateChanged { to, .. } => println!("  -- {}", to),
                SessionEvent::CodingTaskRequested { .. } => {
                    println!("  -- answer with /code <snippet>")
                }
                SessionEvent::StuckDetected => println!("  -- taking that as a pass"),
                SessionEvent::Terminated { reason } => {
                    println!("  -- interview over: {:?}", reason);
                    break;
                }
                _ => {}
            }
        }
    });

    info!("Mock interview: type your answers, /submit to finish one, /quit to stop.");
    handle.start()?;

    let sink = handle.capture_sink();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let input = handle.clone();
    let reader = tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let sent = match line {
                "/quit" => input.terminate(),
                "/submit" => input.submit(),
                _ if line.starts_with("/code ") => input.submit_with_artifact(&line[6..]),
                "" => Ok(()),
                _ => sink.push(CaptureEvent::finalized(line)),
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let summary = session.await?;
    reader.abort();
    println!(
        "\nSession {} ended ({:?}): {} turns, persisted: {}",
        summary.session_id,
        summary.reason,
        summary.ledger.len(),
        summary.persisted
    );
    for (i, turn) in summary.ledger.iter().enumerate() {
        println!("{}. Q: {}\n   A: {}", i + 1, turn.question, turn.answer);
    }
    Ok(())
}
