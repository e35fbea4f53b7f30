use serde::{Deserialize, Serialize};
use taskloop::exit_codes;

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Stuck,
    Budget,
    Error,
}

/// Running out of iterations counts as a failed attempt, not a harness error.
pub fn classify_outcome(exit_code: Option<i32>, judgment: &Judgment) -> Outcome {
    match exit_code {
        Some(exit_codes::OK) if judgment.all_passed() => Outcome::Success,
        Some(exit_codes::OK) | Some(exit_codes::MAX_ITERATIONS) => Outcome::Fail,
        Some(exit_codes::STUCK) => Outcome::Stuck,
        Some(exit_codes::BUDGET_EXCEEDED) => Outcome::Budget,
        Some(_) | None => Outcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{CheckOutcome, Judgment};

    fn judgment(pass: bool) -> Judgment {
        Judgment {
            checks: vec![CheckOutcome::FileExists {
                path: "main.sh".to_string(),
                passed: pass,
            }],
        }
    }

    #[test]
    fn success_when_complete_and_checks_pass() {
        assert_eq!(classify_outcome(Some(0), &judgment(true)), Outcome::Success);
    }

    #[test]
    fn fail_when_complete_but_checks_fail() {
        assert_eq!(classify_outcome(Some(0), &judgment(false)), Outcome::Fail);
    }

    #[test]
    fn fail_when_iterations_run_out() {
        let outcome = classify_outcome(Some(exit_codes::MAX_ITERATIONS), &judgment(true));
        assert_eq!(outcome, Outcome::Fail);
    }

    #[test]
    fn stuck_and_budget_stops_are_distinct() {
        let stuck = classify_outcome(Some(exit_codes::STUCK), &judgment(true));
        assert_eq!(stuck, Outcome::Stuck);
        let budget = classify_outcome(Some(exit_codes::BUDGET_EXCEEDED), &judgment(true));
        assert_eq!(budget, Outcome::Budget);
    }

    #[test]
    fn error_when_invalid_or_killed() {
        assert_eq!(classify_outcome(Some(1), &judgment(true)), Outcome::Error);
        assert_eq!(classify_outcome(None, &judgment(true)), Outcome::Error);
    }
}
