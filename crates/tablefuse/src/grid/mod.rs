//! Physical grid model.
//!
//! The grid is built from the geometry records handed over by the upstream
//! layout collaborator and is independent of any text source. A logical table
//! may consist of several side-by-side panels; records sharing a
//! `canonical_id` are grouped into one [`TableGrid`] with panels ordered
//! left-to-right by their leading x coordinate.
//!
//! # Invariants
//!
//! - Row and column indices are dense within a panel: the distinct row indices
//!   are exactly `0..rows` and the distinct column indices exactly `0..cols`.
//! - A `(row, col)` pair appears at most once per panel.
//! - A table has at least one panel.

use crate::error::{Result, TableFuseError};
use crate::types::{BBox, CellRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One cell rectangle as declared by the layout collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellGeometry {
    pub row: usize,
    pub col: usize,
    pub bbox: BBox,
    #[serde(default)]
    pub rowspan: Option<u32>,
    #[serde(default)]
    pub colspan: Option<u32>,
}

/// Input contract: geometry of one panel of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub panel_id: String,
    pub canonical_id: String,
    #[serde(default)]
    pub page_index: usize,
    pub cell_map: Vec<CellGeometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell: CellRef,
    pub bbox: BBox,
    pub rowspan: u32,
    pub colspan: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub panel_id: String,
    /// Position in left-to-right order, starting at 0.
    pub order: usize,
    pub rows: usize,
    pub cols: usize,
    pub leading_x: f64,
    /// Row-major, sorted by `(row, col)`.
    pub cells: Vec<Cell>,
}

impl Panel {
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells
            .binary_search_by(|c| (c.cell.row, c.cell.col).cmp(&(row, col)))
            .ok()
            .map(|idx| &self.cells[idx])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableGrid {
    pub ref_id: String,
    pub page_index: usize,
    pub panels: Vec<Panel>,
}

impl TableGrid {
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.panels.iter().flat_map(|p| p.cells.iter())
    }

    pub fn total_cells(&self) -> usize {
        self.panels.iter().map(|p| p.cells.len()).sum()
    }

    pub fn panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.panel_id == panel_id)
    }

    pub fn cell(&self, cell: &CellRef) -> Option<&Cell> {
        self.panel(&cell.panel_id)?.cell(cell.row, cell.col)
    }

    /// Flattened matrix view: panels placed side by side in panel order.
    pub fn layout(&self) -> TableLayout {
        let mut offsets = Vec::with_capacity(self.panels.len());
        let mut width = 0;
        let mut height = 0;
        for panel in &self.panels {
            offsets.push(PanelOffset {
                panel_id: panel.panel_id.clone(),
                offset: width,
                cols: panel.cols,
            });
            width += panel.cols;
            height = height.max(panel.rows);
        }
        TableLayout { width, height, offsets }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelOffset {
    pub panel_id: String,
    pub offset: usize,
    pub cols: usize,
}

/// Mapping between panel-local cell addresses and a single rectangular matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    pub width: usize,
    pub height: usize,
    pub offsets: Vec<PanelOffset>,
}

impl TableLayout {
    pub fn flat_position(&self, cell: &CellRef) -> Option<(usize, usize)> {
        let entry = self.offsets.iter().find(|o| o.panel_id == cell.panel_id)?;
        if cell.col >= entry.cols || cell.row >= self.height {
            return None;
        }
        Some((cell.row, entry.offset + cell.col))
    }

    /// Panel-local address of a matrix position. The address may not name an
    /// existing cell when panels differ in height.
    pub fn cell_at(&self, row: usize, flat_col: usize) -> Option<CellRef> {
        if row >= self.height {
            return None;
        }
        self.offsets
            .iter()
            .find(|o| flat_col >= o.offset && flat_col < o.offset + o.cols)
            .map(|o| CellRef::new(o.panel_id.clone(), row, flat_col - o.offset))
    }
}

/// Builds [`TableGrid`]s from geometry records.
pub struct GridModel;

impl GridModel {
    /// Group panel records by `canonical_id`, tables in first-seen order.
    pub fn group_records(records: Vec<GeometryRecord>) -> IndexMap<String, Vec<GeometryRecord>> {
        let mut grouped: IndexMap<String, Vec<GeometryRecord>> = IndexMap::new();
        for record in records {
            grouped.entry(record.canonical_id.clone()).or_default().push(record);
        }
        grouped
    }

    /// Build one table from its panel records.
    ///
    /// Panels are ordered by leading x, ties by `panel_id`. Gaps, duplicate
    /// cells and duplicate panels are validation errors.
    pub fn build_table(canonical_id: &str, records: Vec<GeometryRecord>) -> Result<TableGrid> {
        if records.is_empty() {
            return Err(TableFuseError::validation(format!(
                "Table '{}' has no panels",
                canonical_id
            )));
        }

        let page_index = records[0].page_index;
        let mut seen_panels = BTreeSet::new();
        let mut panels = Vec::with_capacity(records.len());

        for record in records {
            if record.page_index != page_index {
                tracing::warn!(
                    "Panel '{}' of table '{}' declares page {} but table starts on page {}",
                    record.panel_id,
                    canonical_id,
                    record.page_index,
                    page_index
                );
            }
            if !seen_panels.insert(record.panel_id.clone()) {
                return Err(TableFuseError::validation(format!(
                    "Panel '{}' declared twice in table '{}'",
                    record.panel_id, canonical_id
                )));
            }
            panels.push(build_panel(canonical_id, record)?);
        }

        panels.sort_by(|a, b| {
            a.leading_x
                .total_cmp(&b.leading_x)
                .then_with(|| a.panel_id.cmp(&b.panel_id))
        });
        for (order, panel) in panels.iter_mut().enumerate() {
            panel.order = order;
        }

        Ok(TableGrid {
            ref_id: canonical_id.to_string(),
            page_index,
            panels,
        })
    }
}

fn build_panel(canonical_id: &str, record: GeometryRecord) -> Result<Panel> {
    if record.cell_map.is_empty() {
        return Err(TableFuseError::validation(format!(
            "Panel '{}' of table '{}' has an empty cell map",
            record.panel_id, canonical_id
        )));
    }

    let mut rows = BTreeSet::new();
    let mut cols = BTreeSet::new();
    let mut positions = BTreeSet::new();
    let mut cells = Vec::with_capacity(record.cell_map.len());

    for geometry in record.cell_map {
        if !positions.insert((geometry.row, geometry.col)) {
            return Err(TableFuseError::validation(format!(
                "Duplicate cell ({}, {}) in panel '{}' of table '{}'",
                geometry.row, geometry.col, record.panel_id, canonical_id
            )));
        }
        rows.insert(geometry.row);
        cols.insert(geometry.col);
        cells.push(Cell {
            cell: CellRef::new(record.panel_id.clone(), geometry.row, geometry.col),
            bbox: geometry.bbox,
            rowspan: geometry.rowspan.unwrap_or(1).max(1),
            colspan: geometry.colspan.unwrap_or(1).max(1),
        });
    }

    ensure_dense(&rows, "row", &record.panel_id, canonical_id)?;
    ensure_dense(&cols, "column", &record.panel_id, canonical_id)?;

    cells.sort_by_key(|c| (c.cell.row, c.cell.col));
    let leading_x = cells.iter().map(|c| c.bbox.x0).fold(f64::INFINITY, f64::min);

    Ok(Panel {
        panel_id: record.panel_id,
        order: 0,
        rows: rows.len(),
        cols: cols.len(),
        leading_x,
        cells,
    })
}

fn ensure_dense(indices: &BTreeSet<usize>, axis: &str, panel_id: &str, canonical_id: &str) -> Result<()> {
    if let Some((expected, actual)) = indices.iter().enumerate().find(|(expected, actual)| expected != *actual) {
        return Err(TableFuseError::validation(format!(
            "Panel '{}' of table '{}' skips {} index {} (next index is {})",
            panel_id, canonical_id, axis, expected, actual
        )));
    }
    Ok(())
}
