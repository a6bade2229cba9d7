//! Single-source-of-truth consolidation.
//!
//! Every declared cell receives exactly one confirmed text, chosen by a strict
//! two-level priority:
//!
//! 1. image-path candidates (vision transcription or per-cell OCR), joined with spaces
//! 2. embedded-text candidates, joined with spaces
//! 3. otherwise the cell is confirmed empty
//!
//! There is no voting and no confidence blending. Candidates are read, never mutated.

use crate::error::{Result, TableFuseError};
use crate::grid::TableGrid;
use crate::types::{BBox, Candidate, CellRef, CellSource, TableSource};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// A cell with its confirmed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsotCell {
    pub cell: CellRef,
    pub bbox: BBox,
    pub text: String,
    pub source: CellSource,
}

impl SsotCell {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub total_cells: usize,
    pub filled_cells: usize,
    pub empty_cells: usize,
}

/// Consolidated table: one [`SsotCell`] per declared cell, in grid order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSsot {
    pub ref_id: String,
    pub page_index: usize,
    pub cells: Vec<SsotCell>,
    pub stats: ConsolidationStats,
}

impl TableSsot {
    pub fn get(&self, cell: &CellRef) -> Option<&SsotCell> {
        self.cells.iter().find(|c| &c.cell == cell)
    }

    pub fn recount(&mut self) {
        self.stats = count(&self.cells);
    }

    pub fn dominant_source(&self) -> TableSource {
        let image = self.cells.iter().filter(|c| c.source == CellSource::Image).count();
        let embedded = self.cells.iter().filter(|c| c.source == CellSource::Embedded).count();
        match (image, embedded) {
            (_, 0) => TableSource::Image,
            (0, _) => TableSource::Embedded,
            _ => TableSource::Mixed,
        }
    }
}

/// Merge candidates into one confirmed text per declared cell.
///
/// # Errors
///
/// Returns a validation error when both candidate sets are empty: the caller
/// must skip such a table instead of producing an all-empty one.
pub fn consolidate(grid: &TableGrid, image_candidates: &[Candidate], embedded_candidates: &[Candidate]) -> Result<TableSsot> {
    if image_candidates.is_empty() && embedded_candidates.is_empty() {
        return Err(TableFuseError::validation(format!(
            "Table '{}' has no candidates from any source; it must be skipped",
            grid.ref_id
        )));
    }

    let image_by_cell = group_by_cell(image_candidates);
    let embedded_by_cell = group_by_cell(embedded_candidates);

    let mut cells = Vec::with_capacity(grid.total_cells());
    for cell in grid.cells() {
        let (text, source) = if let Some(texts) = image_by_cell.get(&cell.cell) {
            (texts.join(" "), CellSource::Image)
        } else if let Some(texts) = embedded_by_cell.get(&cell.cell) {
            (texts.join(" "), CellSource::Embedded)
        } else {
            (String::new(), CellSource::None)
        };

        cells.push(SsotCell {
            cell: cell.cell.clone(),
            bbox: cell.bbox,
            text,
            source,
        });
    }

    let stats = count(&cells);
    tracing::debug!(
        "Consolidated table '{}': {} cells, {} filled, {} empty",
        grid.ref_id,
        stats.total_cells,
        stats.filled_cells,
        stats.empty_cells
    );

    Ok(TableSsot {
        ref_id: grid.ref_id.clone(),
        page_index: grid.page_index,
        cells,
        stats,
    })
}

fn group_by_cell(candidates: &[Candidate]) -> AHashMap<&CellRef, Vec<&str>> {
    let mut grouped: AHashMap<&CellRef, Vec<&str>> = AHashMap::new();
    for candidate in candidates {
        let text = candidate.text.trim();
        if text.is_empty() {
            continue;
        }
        grouped.entry(&candidate.cell).or_default().push(text);
    }
    grouped
}

fn count(cells: &[SsotCell]) -> ConsolidationStats {
    let filled = cells.iter().filter(|c| !c.is_empty()).count();
    ConsolidationStats {
        total_cells: cells.len(),
        filled_cells: filled,
        empty_cells: cells.len() - filled,
    }
}
