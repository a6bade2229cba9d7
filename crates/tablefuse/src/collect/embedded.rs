//! Embedded-text candidates.
//!
//! A word embedded in the source file becomes a candidate for a cell only when
//! its box lies fully inside the cell rectangle (plus the configured
//! tolerance). Partially overlapping words are dropped.

use crate::grid::TableGrid;
use crate::types::{BBox, Candidate, SourceKind};
use serde::{Deserialize, Serialize};

/// Minimum number of fields in a Tesseract TSV row.
pub const TSV_MIN_FIELDS: usize = 12;

/// TSV level of word rows.
pub const TSV_WORD_LEVEL: u32 = 5;

/// One positioned word of embedded page text, in table-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedWord {
    pub text: String,
    pub bbox: BBox,
}

impl EmbeddedWord {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self { text: text.into(), bbox }
    }

    fn y_center(&self) -> f64 {
        (self.bbox.y0 + self.bbox.y1) / 2.0
    }
}

/// Parse word rows from Tesseract-style TSV.
///
/// The header row, non-word levels, malformed rows, blank words and words
/// below `min_confidence` (TSV scale, 0-100) are skipped.
pub fn words_from_tsv(tsv_data: &str, min_confidence: f64) -> Vec<EmbeddedWord> {
    let mut words = Vec::new();

    for (line_num, line) in tsv_data.lines().enumerate() {
        if line_num == 0 {
            continue;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < TSV_MIN_FIELDS {
            continue;
        }

        let level = fields[0].parse::<u32>().unwrap_or(0);
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let conf = fields[10].parse::<f64>().unwrap_or(-1.0);
        if conf < min_confidence {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let left: f64 = fields[6].parse().unwrap_or(0.0);
        let top: f64 = fields[7].parse().unwrap_or(0.0);
        let width: f64 = fields[8].parse().unwrap_or(0.0);
        let height: f64 = fields[9].parse().unwrap_or(0.0);

        words.push(EmbeddedWord::new(text, BBox::new(left, top, left + width, top + height)));
    }

    words
}

/// Assign embedded words to the cells that fully contain them.
///
/// A word contained by several (overlapping) cells goes to the one it
/// overlaps most, earliest in grid order on ties. Each cell's words are
/// emitted in reading order.
pub fn collect_embedded(grid: &TableGrid, words: &[EmbeddedWord], tolerance: f64) -> Vec<Candidate> {
    let cells: Vec<_> = grid.cells().collect();
    let mut per_cell: Vec<Vec<&EmbeddedWord>> = vec![Vec::new(); cells.len()];
    let mut dropped = 0usize;

    for word in words {
        if word.text.trim().is_empty() {
            continue;
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, cell) in cells.iter().enumerate() {
            if !cell.bbox.contains(&word.bbox, tolerance) {
                continue;
            }
            let overlap = cell.bbox.intersection_area(&word.bbox);
            if best.is_none_or(|(_, area)| overlap > area) {
                best = Some((idx, overlap));
            }
        }

        match best {
            Some((idx, _)) => per_cell[idx].push(word),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(
            "Table '{}': {} embedded words not fully inside any cell were dropped",
            grid.ref_id,
            dropped
        );
    }

    let mut candidates = Vec::new();
    for (cell, cell_words) in cells.iter().zip(per_cell) {
        for word in reading_order(cell_words) {
            candidates.push(Candidate {
                cell: cell.cell.clone(),
                text: word.text.trim().to_string(),
                source: SourceKind::EmbeddedText,
                confidence: 1.0,
                evidence_bbox: Some(word.bbox),
            });
        }
    }
    candidates
}

/// Order words top to bottom by line, then left to right within a line.
///
/// A word joins the current line when its vertical center falls inside the
/// line's vertical extent.
fn reading_order(mut words: Vec<&EmbeddedWord>) -> Vec<&EmbeddedWord> {
    if words.len() < 2 {
        return words;
    }
    words.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0).then(a.bbox.x0.total_cmp(&b.bbox.x0)));

    let mut lines: Vec<(f64, f64, Vec<&EmbeddedWord>)> = Vec::new();
    for word in words {
        match lines.last_mut() {
            Some((top, bottom, line)) if word.y_center() >= *top && word.y_center() <= *bottom => {
                *bottom = bottom.max(word.bbox.y1);
                line.push(word);
            }
            _ => lines.push((word.bbox.y0, word.bbox.y1, vec![word])),
        }
    }

    lines
        .into_iter()
        .flat_map(|(_, _, mut line)| {
            line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            line
        })
        .collect()
}
