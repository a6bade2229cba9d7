//! Shared data types: geometry primitives, candidates, and pipeline outputs.

use crate::header::HeaderMap;
use crate::pivot::PivotRecord;
use crate::validation::ValidationResult;
use crate::validation::state::TableStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel rectangle with a top-left origin (`x0 <= x1`, `y0 <= y1`).
///
/// Deserializes from either `{"x0":..,"y0":..,"x1":..,"y1":..}` or a
/// four-element array `[x0, y0, x1, y1]`. Inverted corners are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "BBoxRepr")]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BBoxRepr {
    Array([f64; 4]),
    Object { x0: f64, y0: f64, x1: f64, y1: f64 },
}

impl From<BBoxRepr> for BBox {
    fn from(repr: BBoxRepr) -> Self {
        match repr {
            BBoxRepr::Array([x0, y0, x1, y1]) => BBox::new(x0, y0, x1, y1),
            BBoxRepr::Object { x0, y0, x1, y1 } => BBox::new(x0, y0, x1, y1),
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(coords: [f64; 4]) -> Self {
        BBox::new(coords[0], coords[1], coords[2], coords[3])
    }
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True when `inner` lies fully inside `self`, allowing `tolerance` pixels
    /// of overhang on every side.
    pub fn contains(&self, inner: &BBox, tolerance: f64) -> bool {
        inner.x0 >= self.x0 - tolerance
            && inner.y0 >= self.y0 - tolerance
            && inner.x1 <= self.x1 + tolerance
            && inner.y1 <= self.y1 + tolerance
    }

    /// Area of the overlap between two rectangles (0 when disjoint).
    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        w * h
    }
}

/// Address of a logical cell: `(panel_id, row, col)` with panel-local indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub panel_id: String,
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(panel_id: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            panel_id: panel_id.into(),
            row,
            col,
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.panel_id, self.row, self.col)
    }
}

/// Extraction path a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Vision model transcription of the whole table crop.
    ImageModel,
    /// Cloud OCR applied to one cell crop.
    CellOcr,
    /// Text embedded in the source file.
    EmbeddedText,
}

impl SourceKind {
    /// Image-side sources take priority over embedded text during consolidation.
    pub fn is_image_path(self) -> bool {
        matches!(self, SourceKind::ImageModel | SourceKind::CellOcr)
    }
}

/// One source's proposed text for one cell. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub cell: CellRef,
    pub text: String,
    pub source: SourceKind,
    pub confidence: f64,
    pub evidence_bbox: Option<BBox>,
}

/// Where the confirmed text of a cell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellSource {
    Image,
    Embedded,
    None,
}

/// Dominant source of a processed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    Image,
    Embedded,
    Mixed,
}

/// A table that made it through validation and repair, reshaped into pivot form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTable {
    pub ref_id: String,
    pub page_index: usize,
    /// `[row_label] + ordered column headers`
    pub columns: Vec<String>,
    pub rows: Vec<PivotRecord>,
    pub row_count: usize,
    pub col_count: usize,
    pub source: TableSource,
    pub is_valid: bool,
    pub ai_repaired: bool,
    pub validation_warnings: Vec<String>,
    pub status: TableStatus,
    pub status_history: Vec<TableStatus>,
    pub repair_changes: Option<String>,
    pub header_map: HeaderMap,
}

impl ProcessedTable {
    /// Render the pivot as a GitHub-flavored Markdown table.
    ///
    /// Multi-valued cells are joined with `<br>`.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let escape = |s: &str| s.replace('|', "\\|");
        let mut markdown = String::new();

        markdown.push_str("| ");
        markdown.push_str(&self.columns.iter().map(|c| escape(c)).collect::<Vec<_>>().join(" | "));
        markdown.push_str(" |\n|");
        for _ in &self.columns {
            markdown.push_str("------|");
        }
        markdown.push('\n');

        for record in &self.rows {
            let mut cells = Vec::with_capacity(self.columns.len());
            cells.push(escape(&record.row_label));
            for column in self.columns.iter().skip(1) {
                let joined = record.values.get(column).map(|v| v.join("<br>")).unwrap_or_default();
                cells.push(escape(&joined));
            }
            markdown.push_str("| ");
            markdown.push_str(&cells.join(" | "));
            markdown.push_str(" |\n");
        }

        markdown
    }
}

/// A table the repair step declared structurally impossible to fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrepairableTable {
    pub ref_id: String,
    pub reason: String,
    /// Final validation result, with `unrepairable` set.
    #[serde(default)]
    pub validation: ValidationResult,
}

/// A table skipped because no source produced a single candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTable {
    pub ref_id: String,
    pub reason: String,
}

/// Terminal result of running one table through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Processed(Box<ProcessedTable>),
    Unrepairable(UnrepairableTable),
    Skipped(SkippedTable),
}

impl TableOutcome {
    pub fn ref_id(&self) -> &str {
        match self {
            TableOutcome::Processed(t) => &t.ref_id,
            TableOutcome::Unrepairable(t) => &t.ref_id,
            TableOutcome::Skipped(t) => &t.ref_id,
        }
    }
}

/// Output of one document: every table lands in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub processed_tables: Vec<ProcessedTable>,
    pub unrepairable_tables: Vec<UnrepairableTable>,
    pub skipped_tables: Vec<SkippedTable>,
}

impl DocumentResult {
    pub fn push(&mut self, outcome: TableOutcome) {
        match outcome {
            TableOutcome::Processed(table) => self.processed_tables.push(*table),
            TableOutcome::Unrepairable(table) => self.unrepairable_tables.push(table),
            TableOutcome::Skipped(table) => self.skipped_tables.push(table),
        }
    }

    pub fn total_tables(&self) -> usize {
        self.processed_tables.len() + self.unrepairable_tables.len() + self.skipped_tables.len()
    }
}
