use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a durable timer was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "snake_case")]
pub enum TimerPurpose {
    /// The `reminder`-th reminder for the stage at `index` is due.
    StageReminder { index: usize, reminder: u32 },
    StageEscalation { index: usize },
    /// Escalation grace window ended; apply the stage fallback.
    StageGrace { index: usize },
    /// Last window for an administrator who took over the stage.
    StageAdministratorGrace { index: usize },
    /// Global timeout on the open exception set.
    ExceptionTimeout,
    /// Administrator grace window after an exception timeout.
    ExceptionGrace,
    /// Bound on an open vendor dispute.
    DisputeTimeout,
}

impl fmt::Display for TimerPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerPurpose::StageReminder { index, reminder } => {
                write!(f, "stage[{}] reminder #{}", index, reminder)
            }
            TimerPurpose::StageEscalation { index } => write!(f, "stage[{}] escalation", index),
            TimerPurpose::StageGrace { index } => write!(f, "stage[{}] grace", index),
            TimerPurpose::StageAdministratorGrace { index } => {
                write!(f, "stage[{}] administrator grace", index)
            }
            TimerPurpose::ExceptionTimeout => f.write_str("exception timeout"),
            TimerPurpose::ExceptionGrace => f.write_str("exception grace"),
            TimerPurpose::DisputeTimeout => f.write_str("dispute timeout"),
        }
    }
}

/// A started, not yet fired, timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTimer {
    pub timer_id: u64,
    pub purpose: TimerPurpose,
    pub due_at: DateTime<Utc>,
}
