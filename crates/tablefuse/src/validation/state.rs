//! Per-table validation/repair state machine.
//!
//! ```text
//! collected -> validated -> valid
//!                        -> auto_fixed -> validated
//!                        -> ai_repair_attempted -> polished | unrepairable | valid
//! ```
//!
//! `ai_repair_attempted -> valid` is taken when the repair call failed and the
//! previous validation result is kept.

use crate::{Result, TableFuseError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Collected,
    Validated,
    AutoFixed,
    AiRepairAttempted,
    Polished,
    Valid,
    Unrepairable,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Collected => "collected",
            TableStatus::Validated => "validated",
            TableStatus::AutoFixed => "auto_fixed",
            TableStatus::AiRepairAttempted => "ai_repair_attempted",
            TableStatus::Polished => "polished",
            TableStatus::Valid => "valid",
            TableStatus::Unrepairable => "unrepairable",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TableStatus::Polished | TableStatus::Valid | TableStatus::Unrepairable)
    }

    /// Terminal and allowed to flow into header detection and pivoting.
    pub fn proceeds_downstream(&self) -> bool {
        matches!(self, TableStatus::Polished | TableStatus::Valid)
    }

    fn can_transition_to(self, next: TableStatus) -> bool {
        use TableStatus::*;
        matches!(
            (self, next),
            (Collected, Validated)
                | (Validated, Valid)
                | (Validated, AutoFixed)
                | (Validated, AiRepairAttempted)
                | (AutoFixed, Validated)
                | (AiRepairAttempted, Polished)
                | (AiRepairAttempted, Unrepairable)
                | (AiRepairAttempted, Valid)
        )
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the status of one table and every transition it went through.
#[derive(Debug, Clone)]
pub struct TableStateMachine {
    ref_id: String,
    history: Vec<TableStatus>,
}

impl TableStateMachine {
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            history: vec![TableStatus::Collected],
        }
    }

    pub fn status(&self) -> TableStatus {
        self.history.last().copied().unwrap_or(TableStatus::Collected)
    }

    pub fn history(&self) -> &[TableStatus] {
        &self.history
    }

    pub fn into_history(self) -> Vec<TableStatus> {
        self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: TableStatus) -> Result<()> {
        let current = self.status();
        if !current.can_transition_to(next) {
            return Err(TableFuseError::validation(format!(
                "Table '{}': illegal status transition {} -> {}",
                self.ref_id, current, next
            )));
        }
        tracing::debug!("Table '{}': {} -> {}", self.ref_id, current, next);
        self.history.push(next);
        Ok(())
    }
}
