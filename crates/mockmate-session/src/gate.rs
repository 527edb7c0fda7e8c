//! Single-acquisition gate for "complete the current turn".
//!
//! Submit, silence and stuck all race to close the same turn. Whichever claims the gate
//! first proceeds; every later claim in the same turn is a no-op. The claim is a
//! compare-and-swap so it holds on any executor, not only the session's own task.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct TurnGate {
    claimed: AtomicBool,
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the current turn. Returns true for exactly one caller until `reopen`.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Open the gate for a new turn.
    pub fn reopen(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_claim_is_rejected() {
        let gate = TurnGate::new();
        assert!(gate.try_claim());
        assert!(!gate.try_claim());
        gate.reopen();
        assert!(gate.try_claim());
    }

    #[test]
    fn concurrent_claims_admit_one() {
        let gate = Arc::new(TurnGate::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(&gate);
                std::thread::spawn(move || g.try_claim())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
