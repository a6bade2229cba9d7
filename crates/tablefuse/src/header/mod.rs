//! Cross-panel header unification.
//!
//! Header rows and row-header columns are detected per panel from a compact
//! rendering of the panel (position plus [`CellKind`] of every cell). The
//! per-panel results are then joined into one [`HeaderMap`] whose global
//! column map numbers every `(panel_id, col)` contiguously in panel order, so
//! two panels that both have a local column 0 stay distinct.

pub mod classify;
pub mod fill;

use crate::consolidate::TableSsot;
use crate::core::config::HeaderConfig;
use crate::grid::{Panel, TableGrid};
use crate::types::CellRef;
use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use classify::{CellKind, classify};
pub use fill::{HeaderFill, PanelHeaderLayout, fill_panel_headers};

/// Header structure of one panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelHeaders {
    pub col_header_rows: Vec<usize>,
    pub row_header_cols: Vec<usize>,
    /// The whole panel is a column of row labels.
    pub is_row_header_panel: bool,
}

/// `(panel_id, col)` → `global_col`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalColumn {
    pub panel_id: String,
    pub col: usize,
    pub global_col: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderMap {
    /// Keyed by panel id, in panel order.
    pub panels: IndexMap<String, PanelHeaders>,
    /// Ordered by `global_col`.
    pub global_columns: Vec<GlobalColumn>,
    /// Empty header cells filled during enrichment.
    pub fills: Vec<HeaderFill>,
}

impl HeaderMap {
    pub fn global_col(&self, panel_id: &str, col: usize) -> Option<usize> {
        self.global_columns
            .iter()
            .find(|g| g.panel_id == panel_id && g.col == col)
            .map(|g| g.global_col)
    }

    pub fn panel(&self, panel_id: &str) -> Option<&PanelHeaders> {
        self.panels.get(panel_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    ColumnHeader,
    RowHeader,
    /// Intersection of a header row and a row-header column.
    Corner,
    Data,
}

/// A consolidated cell with its header role and resolved labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCell {
    pub cell: CellRef,
    pub text: String,
    pub role: CellRole,
    pub global_col: usize,
    /// Resolved row-header value (data cells only).
    pub row_header: Option<String>,
    /// Resolved column-header value (data cells only).
    pub col_header: Option<String>,
}

/// Texts of one panel as `texts[row][col]`.
fn panel_texts(panel: &Panel, texts: &AHashMap<&CellRef, &str>) -> Vec<Vec<String>> {
    let mut matrix = vec![vec![String::new(); panel.cols]; panel.rows];
    for cell in &panel.cells {
        if let Some(text) = texts.get(&cell.cell) {
            matrix[cell.cell.row][cell.cell.col] = text.trim().to_string();
        }
    }
    matrix
}

/// Detects header structure and resolves header labels for data cells.
pub struct HeaderUnifier {
    config: HeaderConfig,
}

impl HeaderUnifier {
    pub fn new(config: HeaderConfig) -> Self {
        Self { config }
    }

    fn kinds(&self, texts: &[Vec<String>]) -> Vec<Vec<CellKind>> {
        texts
            .iter()
            .map(|row| row.iter().map(|t| classify(t, self.config.short_label_chars)).collect())
            .collect()
    }

    fn is_row_header_panel(&self, kinds: &[Vec<CellKind>]) -> bool {
        let mut non_empty = kinds.iter().flatten().filter(|k| **k != CellKind::Empty).peekable();
        kinds.iter().all(|row| row.len() == 1)
            && non_empty.peek().is_some()
            && non_empty.all(|k| k.is_header_like())
    }

    fn header_rows(&self, kinds: &[Vec<CellKind>]) -> Vec<usize> {
        let limit = self.config.max_header_rows.min(kinds.len().saturating_sub(1));
        let mut rows = Vec::new();

        for (idx, row) in kinds.iter().enumerate().take(limit) {
            let has_period = row.contains(&CellKind::Period);
            let all_header_like = row.iter().all(|k| *k == CellKind::Empty || k.is_header_like());
            if has_period && all_header_like {
                rows.push(idx);
            } else {
                break;
            }
        }

        if rows.is_empty()
            && kinds.len() >= 2
            && let Some(first) = kinds.first()
            && first.iter().any(|k| *k != CellKind::Empty)
            && !first.contains(&CellKind::Numeric)
        {
            rows.push(0);
        }
        rows
    }

    fn has_row_header_col(&self, kinds: &[Vec<CellKind>], header_rows: &[usize]) -> bool {
        let width = kinds.iter().map(Vec::len).max().unwrap_or(0);
        if width < 2 {
            return false;
        }
        let mut body = kinds
            .iter()
            .enumerate()
            .filter(|(idx, _)| !header_rows.contains(idx))
            .filter_map(|(_, row)| row.first().copied())
            .filter(|k| *k != CellKind::Empty)
            .peekable();
        body.peek().is_some() && body.all(|k| k != CellKind::Numeric)
    }

    /// Detect per-panel headers and build the global column map.
    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, grid, ssot), fields(table.ref_id = %grid.ref_id)))]
    pub fn detect(&self, grid: &TableGrid, ssot: &TableSsot) -> HeaderMap {
        let texts: AHashMap<&CellRef, &str> = ssot.cells.iter().map(|c| (&c.cell, c.text.as_str())).collect();
        let mut map = HeaderMap::default();
        let mut previous_is_row_header_panel = false;
        let mut next_global = 0;

        for panel in &grid.panels {
            let kinds = self.kinds(&panel_texts(panel, &texts));

            let headers = if self.is_row_header_panel(&kinds) {
                PanelHeaders {
                    col_header_rows: Vec::new(),
                    row_header_cols: vec![0],
                    is_row_header_panel: true,
                }
            } else {
                let col_header_rows = self.header_rows(&kinds);
                let row_header_cols = if !previous_is_row_header_panel && self.has_row_header_col(&kinds, &col_header_rows) {
                    vec![0]
                } else {
                    Vec::new()
                };
                PanelHeaders {
                    col_header_rows,
                    row_header_cols,
                    is_row_header_panel: false,
                }
            };

            tracing::debug!(
                "Panel '{}' of table '{}': header rows {:?}, row-header cols {:?}, row-header panel {}",
                panel.panel_id,
                grid.ref_id,
                headers.col_header_rows,
                headers.row_header_cols,
                headers.is_row_header_panel
            );

            for col in 0..panel.cols {
                map.global_columns.push(GlobalColumn {
                    panel_id: panel.panel_id.clone(),
                    col,
                    global_col: next_global,
                });
                next_global += 1;
            }

            previous_is_row_header_panel = headers.is_row_header_panel;
            map.panels.insert(panel.panel_id.clone(), headers);
        }

        map
    }

    /// Fill empty header cells, assign roles and resolve labels for data cells.
    ///
    /// Fills are recorded in `header_map.fills`.
    pub fn enrich(&self, grid: &TableGrid, ssot: &TableSsot, header_map: &mut HeaderMap) -> Vec<EnrichedCell> {
        let texts: AHashMap<&CellRef, &str> = ssot.cells.iter().map(|c| (&c.cell, c.text.as_str())).collect();
        let mut filled: Vec<Vec<Vec<String>>> = Vec::with_capacity(grid.panels.len());
        header_map.fills.clear();

        for (idx, panel) in grid.panels.iter().enumerate() {
            let mut matrix = panel_texts(panel, &texts);
            let headers = header_map.panels.get(&panel.panel_id).cloned().unwrap_or_default();
            let corner_rows = self.corner_rows(grid, header_map, idx);

            let header_rows = if headers.is_row_header_panel {
                Vec::new()
            } else {
                headers.col_header_rows.clone()
            };
            let label_rows: Vec<usize> = (0..panel.rows)
                .filter(|r| !header_rows.contains(r) && !corner_rows.contains(r))
                .collect();

            let fills = fill_panel_headers(&PanelHeaderLayout {
                panel_id: &panel.panel_id,
                texts: &matrix,
                header_rows: &header_rows,
                row_header_cols: &headers.row_header_cols,
                label_rows: &label_rows,
            });
            for fill in &fills {
                matrix[fill.cell.row][fill.cell.col] = fill.text.clone();
            }
            if !fills.is_empty() {
                tracing::debug!("Panel '{}': filled {} empty header cells", panel.panel_id, fills.len());
            }
            header_map.fills.extend(fills);
            filled.push(matrix);
        }

        let mut enriched = Vec::with_capacity(grid.total_cells());
        for (idx, panel) in grid.panels.iter().enumerate() {
            let headers = header_map.panels.get(&panel.panel_id).cloned().unwrap_or_default();
            let corner_rows = self.corner_rows(grid, header_map, idx);
            let matrix = &filled[idx];

            for cell in &panel.cells {
                let (row, col) = (cell.cell.row, cell.cell.col);
                let global_col = header_map.global_col(&panel.panel_id, col).unwrap_or(0);
                let in_header_row = headers.col_header_rows.contains(&row);
                let in_row_header_col = headers.row_header_cols.contains(&col);

                let role = if headers.is_row_header_panel {
                    if corner_rows.contains(&row) {
                        CellRole::Corner
                    } else {
                        CellRole::RowHeader
                    }
                } else {
                    match (in_header_row, in_row_header_col) {
                        (true, true) => CellRole::Corner,
                        (true, false) => CellRole::ColumnHeader,
                        (false, true) => CellRole::RowHeader,
                        (false, false) => CellRole::Data,
                    }
                };

                let (row_header, col_header) = if role == CellRole::Data {
                    (
                        Some(self.row_label(grid, header_map, &filled, idx, row)),
                        Some(column_label(matrix, &headers.col_header_rows, col, global_col)),
                    )
                } else {
                    (None, None)
                };

                enriched.push(EnrichedCell {
                    cell: cell.cell.clone(),
                    text: matrix[row][col].clone(),
                    role,
                    global_col,
                    row_header,
                    col_header,
                });
            }
        }

        enriched
    }

    /// Rows of a row-header panel that line up with the header rows of the
    /// panel to its right.
    fn corner_rows(&self, grid: &TableGrid, header_map: &HeaderMap, panel_idx: usize) -> Vec<usize> {
        let is_row_header_panel = grid
            .panels
            .get(panel_idx)
            .and_then(|p| header_map.panel(&p.panel_id))
            .is_some_and(|h| h.is_row_header_panel);
        if !is_row_header_panel {
            return Vec::new();
        }
        grid.panels
            .get(panel_idx + 1)
            .and_then(|p| header_map.panel(&p.panel_id))
            .filter(|h| !h.is_row_header_panel)
            .map(|h| h.col_header_rows.clone())
            .unwrap_or_default()
    }

    /// Row label for `row` of panel `panel_idx`: its own row-header column, else
    /// the row-header column of the nearest panel to its left that has one,
    /// else the 1-based row number.
    fn row_label(
        &self,
        grid: &TableGrid,
        header_map: &HeaderMap,
        filled: &[Vec<Vec<String>>],
        panel_idx: usize,
        row: usize,
    ) -> String {
        let lookup = |idx: usize, col: usize| -> Option<String> {
            filled
                .get(idx)
                .and_then(|m| m.get(row))
                .and_then(|r| r.get(col))
                .filter(|t| !t.is_empty())
                .cloned()
        };

        let label_col = |idx: usize| {
            header_map
                .panel(&grid.panels[idx].panel_id)
                .and_then(|h| h.row_header_cols.first().copied())
        };

        if let Some(label) = label_col(panel_idx).and_then(|col| lookup(panel_idx, col)) {
            return label;
        }

        (0..panel_idx)
            .rev()
            .find_map(|idx| label_col(idx).map(|col| (idx, col)))
            .and_then(|(idx, col)| lookup(idx, col))
            .unwrap_or_else(|| (row + 1).to_string())
    }
}

/// Column label: the column's header-row texts joined with spaces,
/// consecutive duplicates removed. Falls back to `column_{global_col + 1}`.
fn column_label(matrix: &[Vec<String>], header_rows: &[usize], col: usize, global_col: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for &row in header_rows {
        let Some(text) = matrix.get(row).and_then(|r| r.get(col)).map(|t| t.trim()) else {
            continue;
        };
        if !text.is_empty() && parts.last() != Some(&text) {
            parts.push(text);
        }
    }
    if parts.is_empty() {
        format!("column_{}", global_col + 1)
    } else {
        parts.join(" ")
    }
}
