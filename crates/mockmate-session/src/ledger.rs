//! Append-only history of completed turns.
//!
//! Read by the evaluator client as context before each call and persisted wholesale when
//! the session terminates.

use crate::session::CompletionTrigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Answer recorded when the candidate said nothing and the turn ended stuck.
pub const STRUGGLED_ANSWER: &str = "[Candidate struggled to articulate an answer]";

/// Answer recorded when the candidate said nothing and submitted (or went silent).
pub const NO_RESPONSE_ANSWER: &str = "[No response]";

/// One completed question/answer exchange. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub question: String,
    pub answer: String,
    /// Free-form content submitted with the answer (e.g. a code snippet). Opaque here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_artifact: Option<String>,
    pub completed_by: CompletionTrigger,
    pub was_stuck: bool,
    pub completed_at: DateTime<Utc>,
}

impl TurnRecord {
    /// Build a record from the turn's effective transcript. An empty transcript becomes a
    /// sentinel that tells "no response" apart from "struggled to express".
    pub fn new(
        question: impl Into<String>,
        transcript: &str,
        auxiliary_artifact: Option<String>,
        completed_by: CompletionTrigger,
        was_stuck: bool,
    ) -> Self {
        let transcript = transcript.trim();
        let answer = if !transcript.is_empty() {
            transcript.to_string()
        } else if was_stuck {
            STRUGGLED_ANSWER.to_string()
        } else {
            NO_RESPONSE_ANSWER.to_string()
        };
        Self {
            question: question.into(),
            answer,
            auxiliary_artifact: auxiliary_artifact.filter(|a| !a.trim().is_empty()),
            completed_by,
            was_stuck,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<TurnRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: TurnRecord) {
        self.records.push(record);
    }

    pub fn snapshot(&self) -> Vec<TurnRecord> {
        self.records.clone()
    }

    /// Questions of every completed turn, oldest first.
    pub fn as_question_history(&self) -> Vec<String> {
        self.records.iter().map(|r| r.question.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TurnRecord> {
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answers_get_distinct_sentinels() {
        let stuck = TurnRecord::new("Q", "  ", None, CompletionTrigger::Stuck, true);
        let silent = TurnRecord::new("Q", "", None, CompletionTrigger::Submit, false);
        assert_eq!(stuck.answer, STRUGGLED_ANSWER);
        assert_eq!(silent.answer, NO_RESPONSE_ANSWER);
    }

    #[test]
    fn spoken_answer_is_kept_even_when_stuck() {
        let r = TurnRecord::new("Q", "I would use a heap", None, CompletionTrigger::Stuck, true);
        assert_eq!(r.answer, "I would use a heap");
        assert!(r.was_stuck);
    }

    #[test]
    fn blank_artifact_is_dropped() {
        let r = TurnRecord::new("Q", "a", Some("   ".into()), CompletionTrigger::Submit, false);
        assert!(r.auxiliary_artifact.is_none());
    }

    #[test]
    fn history_follows_append_order() {
        let mut ledger = Ledger::new();
        ledger.append(TurnRecord::new("first", "a", None, CompletionTrigger::Submit, false));
        ledger.append(TurnRecord::new("second", "b", None, CompletionTrigger::Silence, false));
        assert_eq!(ledger.as_question_history(), vec!["first", "second"]);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.last().map(|r| r.answer.as_str()), Some("b"));
    }

    #[test]
    fn record_serializes_camel_case() {
        let r = TurnRecord::new("Q", "A", Some("fn main() {}".into()), CompletionTrigger::Submit, false);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["auxiliaryArtifact"], "fn main() {}");
        assert_eq!(json["completedBy"], "submit");
        assert_eq!(json["wasStuck"], false);
    }
}
