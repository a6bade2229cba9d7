//! Structural validation and repair.
//!
//! Three tiers, escalating:
//!
//! 1. [`validate`]: rule-based checks over `headers + rows`
//! 2. [`autofix::autofix`]: pad/truncate rows to the header width
//! 3. [`repair::TableRepairer`]: bounded AI-assisted repair with an explicit
//!    unrepairable answer
//!
//! Every tier produces a new [`ValidationResult`]; earlier results are never
//! mutated.

pub mod autofix;
pub mod repair;
pub mod state;

use crate::consolidate::TableSsot;
use crate::core::config::ValidationConfig;
use crate::grid::TableLayout;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

pub use autofix::{autofix, needs_autofix};
pub use repair::{RepairContext, RepairMode, RepairOutcome, TableRepairer};
pub use state::{TableStateMachine, TableStatus};

/// A table expressed as one header row plus data rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFrame {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Declared number of data rows.
    pub row_count: usize,
    /// Declared number of columns.
    pub col_count: usize,
}

impl TableFrame {
    /// Frame whose declared counts match its data.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            row_count: rows.len(),
            col_count: headers.len(),
            headers,
            rows,
        }
    }

    /// Flatten consolidated cells through `layout`: matrix row 0 becomes the
    /// headers, the remaining rows the data. Positions without a cell are empty.
    pub fn from_ssot(ssot: &TableSsot, layout: &TableLayout) -> Self {
        let mut matrix = vec![vec![String::new(); layout.width]; layout.height];
        for cell in &ssot.cells {
            if let Some((row, col)) = layout.flat_position(&cell.cell) {
                matrix[row][col] = cell.text.clone();
            }
        }

        let mut rows = matrix.into_iter();
        let headers = rows.next().unwrap_or_else(|| vec![String::new(); layout.width]);
        Self::new(headers, rows.collect())
    }

    /// Copy frame values back into the cells at the same matrix positions.
    ///
    /// Returns the number of cells whose text changed.
    pub fn write_back(&self, ssot: &mut TableSsot, layout: &TableLayout) -> usize {
        let mut changed = 0;
        for cell in &mut ssot.cells {
            let Some((row, col)) = layout.flat_position(&cell.cell) else {
                continue;
            };
            let value = if row == 0 {
                self.headers.get(col)
            } else {
                self.rows.get(row - 1).and_then(|r| r.get(col))
            };
            if let Some(value) = value
                && *value != cell.text
            {
                cell.text = value.clone();
                changed += 1;
            }
        }
        ssot.recount();
        changed
    }

    pub fn total_cells(&self) -> usize {
        self.headers.len() + self.rows.iter().map(Vec::len).sum::<usize>()
    }
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub auto_fixed: bool,
    pub ai_repaired: bool,
    pub unrepairable: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn has_findings(&self) -> bool {
        !self.warnings.is_empty() || !self.errors.is_empty()
    }

    /// Result superseding `self` once the repair step declared the table
    /// unrepairable. Earlier findings are kept for the record.
    pub fn declared_unrepairable(&self, reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            warnings: self.warnings.clone(),
            errors: self.errors.clone(),
            auto_fixed: self.auto_fixed,
            ai_repaired: false,
            unrepairable: true,
            reason: Some(reason.into()),
        }
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn column_label(frame: &TableFrame, col: usize) -> String {
    match frame.headers.get(col).map(|h| h.trim()) {
        Some(header) if !header.is_empty() => format!("'{}'", header),
        _ => format!("#{}", col),
    }
}

/// Tier 1: rule-based validation.
///
/// Declared-vs-actual count mismatches are errors and make the table invalid.
/// Row width mismatches, empty rows and columns, duplicated rows and a high
/// empty-cell ratio are warnings.
pub fn validate(frame: &TableFrame, config: &ValidationConfig) -> ValidationResult {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let width = frame.headers.len();

    if frame.row_count != frame.rows.len() {
        errors.push(format!(
            "Declared row count {} does not match actual row count {}",
            frame.row_count,
            frame.rows.len()
        ));
    }
    if frame.col_count != width {
        errors.push(format!(
            "Declared column count {} does not match header count {}",
            frame.col_count, width
        ));
    }

    for (idx, row) in frame.rows.iter().enumerate() {
        if row.len() != width {
            warnings.push(format!("Row {} has {} cells, expected {}", idx, row.len(), width));
        }
    }

    for (idx, row) in frame.rows.iter().enumerate() {
        if row.iter().all(|c| is_blank(c)) {
            warnings.push(format!("Row {} is empty", idx));
        }
    }

    if !frame.rows.is_empty() {
        for col in 0..width {
            let empty = frame
                .rows
                .iter()
                .all(|row| row.get(col).is_none_or(|c| is_blank(c)));
            if empty {
                warnings.push(format!("Column {} has no data", column_label(frame, col)));
            }
        }
    }

    let non_empty_rows: Vec<&Vec<String>> = frame.rows.iter().filter(|r| r.iter().any(|c| !is_blank(c))).collect();
    if non_empty_rows.len() > 1 {
        let mut seen = AHashSet::new();
        let duplicates = non_empty_rows.iter().filter(|row| !seen.insert(**row)).count();
        let ratio = duplicates as f64 / non_empty_rows.len() as f64;
        if duplicates > 0 && ratio > config.duplicate_ratio_warning {
            warnings.push(format!(
                "{} of {} rows are duplicates ({:.0}%)",
                duplicates,
                non_empty_rows.len(),
                ratio * 100.0
            ));
        }
    }

    let total = frame.total_cells();
    if total > 0 {
        let empty = frame.headers.iter().chain(frame.rows.iter().flatten()).filter(|c| is_blank(c)).count();
        let ratio = empty as f64 / total as f64;
        if ratio > config.empty_ratio_warning {
            warnings.push(format!("{:.0}% of cells are empty", ratio * 100.0));
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        warnings,
        errors,
        ..Default::default()
    }
}
