//! Session aggregate: lifecycle state, round configuration and question bookkeeping.

use serde::{Deserialize, Serialize};

/// Lifecycle of one interview run. A single enum replaces independent `speaking`,
/// `listening` and `processing` flags so no invalid combination can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the opening statement and first question.
    Initializing,
    /// Opening is ready; waiting for the user to press start.
    AwaitingStart,
    /// The interviewer is talking; capture is off.
    Speaking,
    /// Capturing the candidate's answer; silence and stuck deadlines are live.
    Listening,
    /// The answer is recorded and the evaluator call is in flight.
    Processing,
    Terminated,
}

impl SessionState {
    /// True for the three states that alternate during an active interview.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Speaking | SessionState::Listening | SessionState::Processing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::AwaitingStart => "awaiting_start",
            SessionState::Speaking => "speaking",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable interview configuration, set when the user submits the setup form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundContext {
    pub job_role: String,
    pub experience_level: String,
    /// e.g. "technical", "behavioral", "hr".
    pub round_type: String,
    #[serde(default)]
    pub resume_text: String,
}

impl RoundContext {
    pub fn new(
        job_role: impl Into<String>,
        experience_level: impl Into<String>,
        round_type: impl Into<String>,
    ) -> Self {
        Self {
            job_role: job_role.into(),
            experience_level: experience_level.into(),
            round_type: round_type.into(),
            resume_text: String::new(),
        }
    }

    pub fn with_resume(mut self, resume_text: impl Into<String>) -> Self {
        self.resume_text = resume_text.into();
        self
    }
}

/// Which producer closed a listening turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTrigger {
    /// Explicit submit by the user.
    Submit,
    /// Quiet window elapsed with a long enough transcript.
    Silence,
    /// No new finalized speech for the stuck window.
    Stuck,
}

/// Why a session reached `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The evaluator declared the interview finished.
    InterviewComplete,
    /// The evaluator returned no further question.
    NoFurtherQuestion,
    /// `max_turns` fully-advanced turns were completed.
    TurnLimit,
    /// The evaluator call failed; the session ends gracefully instead of retrying.
    EvaluatorFailed,
    /// Explicit user termination.
    UserEnded,
    /// Every `SessionHandle` was dropped (the owning view went away).
    HandleDropped,
}

/// The session aggregate. Mutated only by the sequencer; observers get clones through
/// the current-state channel.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub state: SessionState,
    /// Fully-advanced turns so far. Hint rounds do not count.
    pub turn_index: u32,
    pub max_turns: u32,
    pub context: RoundContext,
    pub opening: String,
    pub current_question: String,
    pub asked_questions: Vec<String>,
    pub is_stuck: bool,
}

impl Session {
    pub fn new(session_id: impl Into<String>, context: RoundContext, max_turns: u32) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Initializing,
            turn_index: 0,
            max_turns,
            context,
            opening: String::new(),
            current_question: String::new(),
            asked_questions: Vec::new(),
            is_stuck: false,
        }
    }

    /// Make `question` the current one and record it as asked.
    pub(crate) fn pose_question(&mut self, question: &str) {
        self.current_question = question.to_string();
        self.asked_questions.push(question.to_string());
    }

    /// Whether completing the current turn would reach the turn bound.
    pub fn at_turn_limit(&self) -> bool {
        self.turn_index + 1 >= self.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_middle_states_are_active() {
        assert!(!SessionState::Initializing.is_active());
        assert!(!SessionState::AwaitingStart.is_active());
        assert!(SessionState::Speaking.is_active());
        assert!(SessionState::Listening.is_active());
        assert!(SessionState::Processing.is_active());
        assert!(!SessionState::Terminated.is_active());
    }

    #[test]
    fn pose_question_appends_history() {
        let mut s = Session::new("s1", RoundContext::new("Backend Engineer", "mid", "technical"), 6);
        s.pose_question("Tell me about yourself.");
        s.pose_question("What is a mutex?");
        assert_eq!(s.current_question, "What is a mutex?");
        assert_eq!(s.asked_questions.len(), 2);
    }

    #[test]
    fn turn_limit_is_one_before_max() {
        let mut s = Session::new("s1", RoundContext::default(), 6);
        s.turn_index = 4;
        assert!(!s.at_turn_limit());
        s.turn_index = 5;
        assert!(s.at_turn_limit());
    }

    #[test]
    fn round_context_serializes_camel_case() {
        let ctx = RoundContext::new("SRE", "senior", "technical").with_resume("10y ops");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["jobRole"], "SRE");
        assert_eq!(json["experienceLevel"], "senior");
        assert_eq!(json["resumeText"], "10y ops");
    }
}
