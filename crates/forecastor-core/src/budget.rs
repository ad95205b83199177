use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Combined step and wall-clock ceiling for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_steps: u32,
    pub max_duration: Duration,
}

impl Budget {
    pub fn new(max_steps: u32, max_duration: Duration) -> Self {
        Self {
            max_steps,
            max_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    FinalAnswer,
    TimeExhausted,
    StepsExhausted,
    Cancelled,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::FinalAnswer => "final answer",
            TerminationReason::TimeExhausted => "time budget exhausted",
            TerminationReason::StepsExhausted => "step budget exhausted",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

/// Tracks consumption against a [`Budget`]. Counters only move one way.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    budget: Budget,
    started: Instant,
    steps_taken: u32,
}

impl BudgetTracker {
    pub fn start(budget: Budget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            steps_taken: 0,
        }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn record_step(&mut self) {
        self.steps_taken = self.steps_taken.saturating_add(1);
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining_steps(&self) -> u32 {
        self.budget.max_steps.saturating_sub(self.steps_taken)
    }

    pub fn remaining_time(&self) -> Duration {
        self.budget.max_duration.saturating_sub(self.elapsed())
    }

    /// Steps are checked before time so a run that ends on both reports the step bound.
    pub fn exhausted(&self) -> Option<TerminationReason> {
        if self.remaining_steps() == 0 {
            return Some(TerminationReason::StepsExhausted);
        }
        if self.remaining_time().is_zero() {
            return Some(TerminationReason::TimeExhausted);
        }
        None
    }

    pub fn readout(&self) -> String {
        format!(
            "Remaining time: {} | Remaining steps: {}",
            format_duration(self.remaining_time()),
            self.remaining_steps()
        )
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}
