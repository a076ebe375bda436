//! Bounded attempt accounting for one turn.
//!
//! The turn loop is `Idle -> InFlight -> (Idle | Succeeded | Failed)`. The
//! producer call is awaited only while `InFlight`, and `begin` refuses to
//! start a new attempt once the budget is spent.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Idle,
    InFlight { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    used: u32,
    state: AttemptState,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            used: 0,
            state: AttemptState::Idle,
        }
    }

    /// Start the next attempt. Returns its 1-based number, or `None` when the
    /// budget is exhausted or the turn already settled.
    pub fn begin(&mut self) -> Option<u32> {
        if self.state != AttemptState::Idle || self.used >= self.max_attempts {
            return None;
        }
        self.used += 1;
        self.state = AttemptState::InFlight { attempt: self.used };
        Some(self.used)
    }

    /// Give the in-flight attempt up and return to `Idle`.
    pub fn retry(&mut self) {
        if matches!(self.state, AttemptState::InFlight { .. }) {
            self.state = AttemptState::Idle;
        }
    }

    pub fn succeed(&mut self) {
        self.state = AttemptState::Succeeded {
            attempts: self.used,
        };
    }

    pub fn fail(&mut self) {
        self.state = AttemptState::Failed {
            attempts: self.used,
        };
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.used
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_counts_up_to_the_budget() {
        let mut budget = RetryBudget::new(3);
        let mut started = Vec::new();
        while let Some(attempt) = budget.begin() {
            started.push(attempt);
            budget.retry();
        }
        assert_eq!(started, vec![1, 2, 3]);
        assert!(budget.is_exhausted());
        assert_eq!(budget.state(), AttemptState::Idle);
    }

    #[test]
    fn cannot_begin_while_in_flight() {
        let mut budget = RetryBudget::new(3);
        assert_eq!(budget.begin(), Some(1));
        assert_eq!(budget.begin(), None);
        assert_eq!(budget.state(), AttemptState::InFlight { attempt: 1 });
    }

    #[test]
    fn settled_turn_stops_the_loop() {
        let mut budget = RetryBudget::new(5);
        budget.begin();
        budget.retry();
        budget.begin();
        budget.succeed();
        assert_eq!(budget.state(), AttemptState::Succeeded { attempts: 2 });
        assert_eq!(budget.begin(), None);
    }

    #[test]
    fn zero_budget_never_starts() {
        let mut budget = RetryBudget::new(0);
        assert_eq!(budget.begin(), None);
        assert_eq!(budget.attempts(), 0);
    }
}
