//! Model-call budget accounting.

use crate::error::BudgetExceededError;

/// Monotonic model-call counter with an optional hard cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBudget {
    count: u32,
    limit: Option<u32>,
}

impl CallBudget {
    pub fn new(limit: Option<u32>) -> Self {
        Self { count: 0, limit }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Account for one model call before it is issued.
    ///
    /// The count never exceeds the limit: a call that would overrun it is
    /// rejected and not counted.
    pub fn charge(&mut self, invoked_by: &str) -> Result<(), BudgetExceededError> {
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            return Err(BudgetExceededError {
                count: self.count + 1,
                limit,
                invoked_by: invoked_by.to_string(),
            });
        }
        self.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_rejects_call_past_limit_without_counting_it() {
        let mut budget = CallBudget::new(Some(2));
        budget.charge("a").expect("first");
        budget.charge("b").expect("second");
        let err = budget.charge("c").expect_err("third must fail");
        assert_eq!(err.count, 3);
        assert_eq!(err.limit, 2);
        assert_eq!(err.invoked_by, "c");
        assert_eq!(budget.count(), 2);
        assert!(budget.charge("d").is_err());
        assert_eq!(budget.count(), 2);
    }

    #[test]
    fn unlimited_budget_only_counts() {
        let mut budget = CallBudget::unlimited();
        for _ in 0..100 {
            budget.charge("loop").expect("charge");
        }
        assert_eq!(budget.count(), 100);
    }
}
