//! Tier 2: deterministic shape normalization.

use super::TableFrame;

/// Whether [`autofix`] would change the frame.
pub fn needs_autofix(frame: &TableFrame) -> bool {
    let width = frame.headers.len();
    frame.row_count != frame.rows.len() || frame.col_count != width || frame.rows.iter().any(|r| r.len() != width)
}

/// Pad short rows with empty strings, truncate long rows to the header width,
/// and recompute the declared counts from the data.
///
/// Never invents values. Idempotent.
pub fn autofix(frame: &TableFrame) -> TableFrame {
    let width = frame.headers.len();
    let rows: Vec<Vec<String>> = frame
        .rows
        .iter()
        .map(|row| {
            let mut fixed: Vec<String> = row.iter().take(width).cloned().collect();
            fixed.resize(width, String::new());
            fixed
        })
        .collect();

    TableFrame::new(frame.headers.clone(), rows)
}
