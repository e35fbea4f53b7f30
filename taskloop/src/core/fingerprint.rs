//! Failure fingerprints and the bounded history used for stuck detection.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a verification diagnostic.
pub fn fingerprint(message: &str) -> String {
    let digest = Sha256::digest(message.as_bytes());
    hex::encode(digest)
}

/// Sliding window over the most recent failure fingerprints.
///
/// Only equality is ever inspected. The loop is stuck once one fingerprint
/// fills `threshold` slots of the last `2 * threshold - 1` failures, so
/// consecutive and interleaved repeats are both caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureHistory {
    window: VecDeque<String>,
    threshold: usize,
}

impl FailureHistory {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(2);
        Self {
            window: VecDeque::with_capacity(2 * threshold - 1),
            threshold,
        }
    }

    /// Record a failure and report whether the loop is now stuck.
    pub fn record(&mut self, fingerprint: String) -> bool {
        if self.window.len() == self.capacity() {
            self.window.pop_front();
        }
        self.window.push_back(fingerprint);
        self.is_stuck()
    }

    /// Whether the most recent fingerprint recurs often enough in the window.
    pub fn is_stuck(&self) -> bool {
        match self.window.back() {
            Some(last) => self.window.iter().filter(|fp| *fp == last).count() >= self.threshold,
            None => false,
        }
    }

    fn capacity(&self) -> usize {
        2 * self.threshold - 1
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint("Output mismatch.");
        assert_eq!(a, fingerprint("Output mismatch."));
        assert_ne!(a, fingerprint("Output mismatch!"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn stuck_on_third_identical_failure() {
        let mut history = FailureHistory::new(3);
        assert!(!history.record(fingerprint("same")));
        assert!(!history.record(fingerprint("same")));
        assert!(history.record(fingerprint("same")));
    }

    #[test]
    fn a_different_failure_breaks_the_streak() {
        let mut history = FailureHistory::new(3);
        history.record(fingerprint("a"));
        history.record(fingerprint("a"));
        assert!(!history.record(fingerprint("b")));
        assert!(!history.record(fingerprint("b")));
        assert!(history.record(fingerprint("b")));
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn interleaved_repeats_are_stuck() {
        let mut history = FailureHistory::new(3);
        let seen: Vec<bool> = ["a", "b", "a", "b", "a"]
            .into_iter()
            .map(|msg| history.record(fingerprint(msg)))
            .collect();
        assert_eq!(seen, vec![false, false, false, false, true]);
    }

    #[test]
    fn old_repeats_fall_out_of_the_window() {
        let mut history = FailureHistory::new(3);
        for msg in ["a", "b", "c", "a", "d", "e", "a"] {
            assert!(!history.record(fingerprint(msg)), "stuck at {msg}");
        }
    }

    #[test]
    fn threshold_has_a_floor_of_two() {
        let mut history = FailureHistory::new(0);
        assert_eq!(history.threshold(), 2);
        assert!(!history.record("x".to_string()));
        assert!(history.record("x".to_string()));
    }
}
