//! Per-turn transcript accumulation.
//!
//! Finalized segments are appended in arrival order; the interim fragment is replaced
//! wholesale on every capture event. The effective text is both, trimmed.

/// Running transcript for the current turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptBuffer {
    finalized: String,
    interim: String,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized segment. Returns true if the finalized text grew.
    pub fn push_finalized(&mut self, delta: &str) -> bool {
        let delta = delta.trim();
        if delta.is_empty() {
            return false;
        }
        join_fragment(&mut self.finalized, delta);
        true
    }

    /// Replace the interim fragment.
    pub fn set_interim(&mut self, interim: &str) {
        self.interim.clear();
        self.interim.push_str(interim.trim());
    }

    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    pub fn interim(&self) -> &str {
        &self.interim
    }

    pub fn effective_text(&self) -> String {
        let mut text = self.finalized.clone();
        if !self.interim.is_empty() {
            join_fragment(&mut text, &self.interim);
        }
        text.trim().to_string()
    }

    /// Length of the effective text in characters.
    pub fn effective_len(&self) -> usize {
        self.effective_text().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.interim.is_empty()
    }

    pub fn reset(&mut self) {
        self.finalized.clear();
        self.interim.clear();
    }
}

fn join_fragment(target: &mut String, fragment: &str) {
    if !target.is_empty() && !target.ends_with(char::is_whitespace) {
        target.push(' ');
    }
    target.push_str(fragment);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalized_segments_concatenate_in_order() {
        let mut b = TranscriptBuffer::new();
        assert!(b.push_finalized("I worked on"));
        assert!(b.push_finalized("a payments service."));
        assert_eq!(b.finalized(), "I worked on a payments service.");
    }

    #[test]
    fn interim_is_replaced_not_appended() {
        let mut b = TranscriptBuffer::new();
        b.push_finalized("Hello");
        b.set_interim("wor");
        b.set_interim("world");
        assert_eq!(b.interim(), "world");
        assert_eq!(b.effective_text(), "Hello world");
    }

    #[test]
    fn empty_delta_does_not_grow() {
        let mut b = TranscriptBuffer::new();
        assert!(!b.push_finalized(""));
        assert!(!b.push_finalized("   "));
        assert!(b.is_empty());
    }

    #[test]
    fn finalized_length_never_decreases_within_a_turn() {
        let mut b = TranscriptBuffer::new();
        let events = [("", "so"), ("so I", ""), ("", "then we"), ("then we shipped", "it")];
        let mut last = 0;
        for (delta, interim) in events {
            b.push_finalized(delta);
            b.set_interim(interim);
            assert!(b.finalized().len() >= last);
            last = b.finalized().len();
        }
        b.reset();
        assert_eq!(b.effective_text(), "");
    }

    #[test]
    fn effective_len_counts_characters() {
        let mut b = TranscriptBuffer::new();
        b.set_interim("héllo");
        assert_eq!(b.effective_len(), 5);
    }
}
