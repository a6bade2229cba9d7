//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tablefuse::collect::TranscribedCell;
use tablefuse::grid::CellGeometry;
use tablefuse::plugins::Plugin;
use tablefuse::{AiClient, AiRequest, AiResponse, BBox, GeometryRecord, ImageTranscription, Result, TableFuseError};

pub const CELL_WIDTH: f64 = 100.0;
pub const CELL_HEIGHT: f64 = 30.0;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bounding box of `(row, col)` in a panel starting at `x`.
pub fn cell_bbox(x: f64, row: usize, col: usize) -> BBox {
    let x0 = x + col as f64 * CELL_WIDTH;
    let y0 = row as f64 * CELL_HEIGHT;
    BBox::new(x0, y0, x0 + CELL_WIDTH, y0 + CELL_HEIGHT)
}

/// Dense `rows x cols` panel geometry starting at `x`.
pub fn panel_record(ref_id: &str, panel_id: &str, x: f64, rows: usize, cols: usize) -> GeometryRecord {
    let mut cell_map = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            cell_map.push(CellGeometry {
                row,
                col,
                bbox: cell_bbox(x, row, col),
                rowspan: None,
                colspan: None,
            });
        }
    }
    GeometryRecord {
        panel_id: panel_id.to_string(),
        canonical_id: ref_id.to_string(),
        page_index: 0,
        cell_map,
    }
}

/// Transcription addressing cells by `(panel_id, row, col)`.
pub fn transcription(cells: &[(&str, usize, usize, &str)]) -> ImageTranscription {
    ImageTranscription {
        cells: cells
            .iter()
            .map(|(panel_id, row, col, text)| TranscribedCell {
                panel_id: Some(panel_id.to_string()),
                row: *row,
                col: *col,
                text: text.to_string(),
                confidence: None,
            })
            .collect(),
        rows: None,
        raw_text: None,
    }
}

/// Transcription of a whole single-panel table given as rows of texts.
pub fn transcription_rows(panel_id: &str, rows: &[&[&str]]) -> ImageTranscription {
    let mut cells = Vec::new();
    for (row, texts) in rows.iter().enumerate() {
        for (col, text) in texts.iter().enumerate() {
            cells.push((panel_id, row, col, *text));
        }
    }
    transcription(&cells)
}

/// Answers requests from a fixed script and records every prompt.
pub struct ScriptedClient {
    answers: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Plugin for ScriptedClient {
    fn name(&self) -> &str {
        "scripted-client"
    }

    fn version(&self) -> String {
        "0.0.0".to_string()
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let next = self.answers.lock().unwrap().pop();
        next.map(AiResponse::new)
            .ok_or_else(|| TableFuseError::ai("script exhausted"))
    }
}

/// Fails every call with a transient network error.
#[derive(Default)]
pub struct UnreachableClient {
    calls: AtomicUsize,
}

impl UnreachableClient {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for UnreachableClient {
    fn name(&self) -> &str {
        "unreachable-client"
    }

    fn version(&self) -> String {
        "0.0.0".to_string()
    }
}

#[async_trait]
impl AiClient for UnreachableClient {
    async fn complete(&self, _request: &AiRequest) -> Result<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TableFuseError::network("connection refused"))
    }
}
