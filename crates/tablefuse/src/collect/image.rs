//! Image-model transcription candidates.
//!
//! The vision model reads the whole table crop once. Its answer is already
//! segmented by cell (or by row), so it is mapped onto the grid as-is.

use crate::ai::decode::{lenient_rows, lenient_text};
use crate::ai::decode_as;
use crate::grid::TableGrid;
use crate::types::{Candidate, CellRef, SourceKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One transcribed cell. Without `panel_id`, `(row, col)` is a position in
/// the flattened table (panels side by side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribedCell {
    #[serde(default)]
    pub panel_id: Option<String>,
    pub row: usize,
    pub col: usize,
    #[serde(deserialize_with = "lenient_text")]
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Payload produced by the vision model (or supplied precomputed by the caller).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTranscription {
    #[serde(default)]
    pub cells: Vec<TranscribedCell>,
    /// Row-major texts over the flattened table.
    #[serde(default, deserialize_with = "lenient_rows")]
    pub rows: Option<Vec<Vec<String>>>,
    /// Unsegmented reading of the table, kept for the repair prompt.
    #[serde(default)]
    pub raw_text: Option<String>,
}

impl ImageTranscription {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.rows.as_ref().is_none_or(|rows| rows.is_empty())
    }
}

/// Build the transcription prompt describing the expected grid shape.
pub fn transcription_prompt(grid: &TableGrid) -> String {
    let mut prompt = String::from(
        "You are reading a cropped image of a table. Transcribe the text of every cell exactly as printed.\n\
         Do not translate, normalize, or guess. Leave a cell's text empty if it is blank.\n\n\
         The table has the following panels, left to right:\n",
    );
    for panel in &grid.panels {
        let _ = writeln!(prompt, "- panel_id \"{}\": {} rows x {} columns", panel.panel_id, panel.rows, panel.cols);
    }
    prompt.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
         {\"cells\": [{\"panel_id\": \"<panel id>\", \"row\": <0-based row>, \"col\": <0-based column>, \"text\": \"<cell text>\"}],\n\
          \"raw_text\": \"<the whole table read line by line>\"}\n",
    );
    prompt
}

/// Decode a model answer into a transcription.
pub fn parse_transcription(text: &str) -> Result<ImageTranscription> {
    decode_as(text)
}

/// Map a transcription onto the grid. Cells outside the grid and blank texts are dropped.
pub fn transcription_candidates(grid: &TableGrid, transcription: &ImageTranscription) -> Vec<Candidate> {
    let layout = grid.layout();
    let mut candidates = Vec::new();
    let mut dropped = 0usize;

    let mut push = |cell: Option<CellRef>, text: &str, confidence: f64| {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match cell {
            Some(cell) => candidates.push(Candidate {
                cell,
                text: text.to_string(),
                source: SourceKind::ImageModel,
                confidence: confidence.clamp(0.0, 1.0),
                evidence_bbox: None,
            }),
            None => dropped += 1,
        }
    };

    for transcribed in &transcription.cells {
        let cell = match &transcribed.panel_id {
            Some(panel_id) => {
                let cell = CellRef::new(panel_id.clone(), transcribed.row, transcribed.col);
                grid.cell(&cell).map(|_| cell)
            }
            None => layout
                .cell_at(transcribed.row, transcribed.col)
                .filter(|cell| grid.cell(cell).is_some()),
        };
        push(cell, &transcribed.text, transcribed.confidence.unwrap_or(1.0));
    }

    if let Some(rows) = &transcription.rows {
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, text) in row.iter().enumerate() {
                let cell = layout.cell_at(row_idx, col_idx).filter(|cell| grid.cell(cell).is_some());
                push(cell, text, 1.0);
            }
        }
    }

    if dropped > 0 {
        tracing::debug!(
            "Table '{}': dropped {} transcribed cells outside the declared grid",
            grid.ref_id,
            dropped
        );
    }
    candidates
}
