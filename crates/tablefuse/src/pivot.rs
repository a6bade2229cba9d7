//! Pivot construction from enriched cells.
//!
//! Data cells are grouped by `(row header, column header)`. Every group keeps
//! the list of contributing texts, so two cells that resolve to the same
//! logical coordinate are both preserved.

use crate::core::config::PivotConfig;
use crate::header::{CellRole, EnrichedCell, HeaderMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One pivot row: the resolved row label and one value list per column header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRecord {
    pub row_label: String,
    /// Keyed by column header in output column order. Columns without a value
    /// in this row hold an empty list.
    pub values: IndexMap<String, Vec<String>>,
}

impl PivotRecord {
    pub fn get(&self, column: &str) -> &[String] {
        self.values.get(column).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    /// `[row_label_column] + ordered column headers`
    pub columns: Vec<String>,
    pub rows: Vec<PivotRecord>,
}

impl PivotTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.columns.len()
    }
}

/// Reshape enriched cells into pivot records.
///
/// Row labels keep first-seen order. Column headers are ordered by the
/// smallest global column index among their member cells.
pub fn pivot(cells: &[EnrichedCell], header_map: &HeaderMap, config: &PivotConfig) -> PivotTable {
    let mut column_order: IndexMap<String, usize> = IndexMap::new();
    let mut groups: IndexMap<String, IndexMap<String, Vec<String>>> = IndexMap::new();

    for cell in cells {
        if cell.role != CellRole::Data || cell.text.trim().is_empty() {
            continue;
        }
        let global_col = header_map
            .global_col(&cell.cell.panel_id, cell.cell.col)
            .unwrap_or(cell.global_col);
        let row_label = cell.row_header.clone().unwrap_or_else(|| (cell.cell.row + 1).to_string());
        let col_header = cell
            .col_header
            .clone()
            .unwrap_or_else(|| format!("column_{}", global_col + 1));

        column_order
            .entry(col_header.clone())
            .and_modify(|min| *min = (*min).min(global_col))
            .or_insert(global_col);
        groups
            .entry(row_label)
            .or_default()
            .entry(col_header)
            .or_default()
            .push(cell.text.trim().to_string());
    }

    let mut ordered: Vec<(String, usize)> = column_order.into_iter().collect();
    ordered.sort_by_key(|(_, min)| *min);
    let headers: Vec<String> = ordered.into_iter().map(|(header, _)| header).collect();

    let rows: Vec<PivotRecord> = groups
        .into_iter()
        .map(|(row_label, mut by_column)| PivotRecord {
            row_label,
            values: headers
                .iter()
                .map(|header| (header.clone(), by_column.swap_remove(header).unwrap_or_default()))
                .collect(),
        })
        .collect();

    let mut columns = Vec::with_capacity(headers.len() + 1);
    columns.push(config.row_label_column.clone());
    columns.extend(headers);

    tracing::debug!("Pivot built with {} rows and {} columns", rows.len(), columns.len());
    PivotTable { columns, rows }
}
