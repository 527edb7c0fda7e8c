//! Events broadcast to observers (UI, logging, analytics) while a session runs.

use crate::session::{CompletionTrigger, SessionState, TerminationReason};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// A question became current. `is_hint` marks a clarifying sub-turn.
    QuestionPosed {
        turn_index: u32,
        question: String,
        is_hint: bool,
    },

    /// Effective transcript of the listening turn changed.
    TranscriptUpdated {
        text: String,
    },

    /// The stuck deadline elapsed.
    StuckDetected,

    TurnCompleted {
        turn_index: u32,
        trigger: CompletionTrigger,
    },

    /// The evaluator's verbal reaction to the last answer.
    AssistantReaction {
        text: String,
        emotion: Option<String>,
    },

    /// The evaluator wants the candidate to write code for the current question.
    CodingTaskRequested {
        question: String,
    },

    /// Capture could not start; answers can still be submitted explicitly.
    CaptureUnavailable {
        reason: String,
    },

    Terminated {
        reason: TerminationReason,
    },
}
