//! Nearest-neighbor fill for empty header cells.
//!
//! Merged or spanning header cells usually carry their text in one physical
//! cell only. Empty header cells copy the closest non-empty header cell of
//! the same panel. Sources are chosen from the unfilled texts, so fills never
//! chain, and a panel never reads another panel's cells.

use crate::types::CellRef;
use serde::{Deserialize, Serialize};

/// Provenance of one filled header cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFill {
    pub cell: CellRef,
    pub source: CellRef,
    pub text: String,
}

/// Header layout of one panel, as panel-local indices.
pub struct PanelHeaderLayout<'a> {
    pub panel_id: &'a str,
    /// `texts[row][col]`
    pub texts: &'a [Vec<String>],
    pub header_rows: &'a [usize],
    pub row_header_cols: &'a [usize],
    /// Rows whose row-header cells hold row labels (non-header rows).
    pub label_rows: &'a [usize],
}

impl PanelHeaderLayout<'_> {
    fn text(&self, row: usize, col: usize) -> Option<&str> {
        self.texts
            .get(row)
            .and_then(|r| r.get(col))
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    }

    fn fill(&self, target: (usize, usize), source: (usize, usize), text: &str) -> HeaderFill {
        HeaderFill {
            cell: CellRef::new(self.panel_id, target.0, target.1),
            source: CellRef::new(self.panel_id, source.0, source.1),
            text: text.to_string(),
        }
    }
}

/// Compute fills for every empty header cell of one panel.
///
/// Column-header cells look along their own row first (left wins a tie), then
/// upward through earlier header rows. Row-header cells look upward, then
/// downward, through label rows. Row-header columns never feed column-header
/// cells and vice versa.
pub fn fill_panel_headers(layout: &PanelHeaderLayout<'_>) -> Vec<HeaderFill> {
    let mut fills = Vec::new();
    let width = layout.texts.iter().map(Vec::len).max().unwrap_or(0);
    let header_cols: Vec<usize> = (0..width).filter(|c| !layout.row_header_cols.contains(c)).collect();

    for (pos, &row) in layout.header_rows.iter().enumerate() {
        for (col_pos, &col) in header_cols.iter().enumerate() {
            if layout.text(row, col).is_some() {
                continue;
            }

            let along_row = (1..header_cols.len()).find_map(|d| {
                let left = col_pos.checked_sub(d).map(|p| header_cols[p]);
                let right = header_cols.get(col_pos + d).copied();
                [left, right]
                    .into_iter()
                    .flatten()
                    .find_map(|c| layout.text(row, c).map(|t| ((row, c), t)))
            });
            let above = || {
                layout.header_rows[..pos]
                    .iter()
                    .rev()
                    .find_map(|&r| layout.text(r, col).map(|t| ((r, col), t)))
            };

            if let Some((source, text)) = along_row.or_else(above) {
                fills.push(layout.fill((row, col), source, text));
            }
        }
    }

    for &col in layout.row_header_cols {
        for (pos, &row) in layout.label_rows.iter().enumerate() {
            if layout.text(row, col).is_some() {
                continue;
            }

            let above = layout.label_rows[..pos]
                .iter()
                .rev()
                .find_map(|&r| layout.text(r, col).map(|t| ((r, col), t)));
            let below = || {
                layout.label_rows[pos + 1..]
                    .iter()
                    .find_map(|&r| layout.text(r, col).map(|t| ((r, col), t)))
            };

            if let Some((source, text)) = above.or_else(below) {
                fills.push(layout.fill((row, col), source, text));
            }
        }
    }

    fills
}
