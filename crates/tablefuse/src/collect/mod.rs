//! Candidate collection.
//!
//! Gathers competing text observations per cell from two independent paths:
//!
//! - **image path**: a precomputed or freshly requested vision-model
//!   transcription of the whole table crop; per-cell OCR only when that
//!   yields nothing
//! - **embedded path**: words embedded in the source file, accepted when fully
//!   contained in a cell rectangle
//!
//! Every path is optional. A missing or failing source produces an empty
//! candidate list and a warning, never an error.

pub mod embedded;
pub mod image;

use crate::ai::{AiClient, AiRequest, InlineImage, RetryPolicy, call_with_retry, with_retry};
use crate::core::config::CollectionConfig;
use crate::grid::TableGrid;
use crate::plugins::CellOcrBackend;
use crate::types::{Candidate, SourceKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub use embedded::{EmbeddedWord, collect_embedded, words_from_tsv};
pub use image::{ImageTranscription, TranscribedCell, parse_transcription, transcription_candidates, transcription_prompt};

/// Per-cell OCR requests in flight per table.
const CELL_OCR_CONCURRENCY: usize = 8;

/// Which extraction paths may run for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub image_model: bool,
    pub cell_ocr: bool,
    pub embedded_text: bool,
}

impl Default for SourceFlags {
    fn default() -> Self {
        Self {
            image_model: true,
            cell_ocr: true,
            embedded_text: true,
        }
    }
}

/// Raw extraction payloads available for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSources {
    /// Cropped table image (PNG unless `image_mime_type` says otherwise).
    #[serde(default)]
    pub image: Option<Vec<u8>>,
    #[serde(default)]
    pub image_mime_type: Option<String>,
    /// Precomputed vision-model output; when present no vision call is made.
    #[serde(default)]
    pub transcription: Option<ImageTranscription>,
    #[serde(default)]
    pub embedded_words: Vec<EmbeddedWord>,
    /// Nearby page text given to the repair prompt.
    #[serde(default)]
    pub page_context: Option<String>,
    #[serde(default)]
    pub flags: SourceFlags,
}

impl TableSources {
    fn inline_image(&self) -> Option<InlineImage> {
        let bytes = self.image.as_ref().filter(|b| !b.is_empty())?;
        Some(InlineImage {
            bytes: bytes.clone(),
            mime_type: self.image_mime_type.clone().unwrap_or_else(|| "image/png".to_string()),
        })
    }
}

/// Candidates produced for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedCandidates {
    pub image: Vec<Candidate>,
    pub embedded: Vec<Candidate>,
    /// Unsegmented transcription, if the image path produced one.
    pub raw_text: Option<String>,
}

impl CollectedCandidates {
    pub fn is_empty(&self) -> bool {
        self.image.is_empty() && self.embedded.is_empty()
    }
}

/// Collects image-path and embedded-path candidates for a table.
pub struct CandidateCollector {
    vision: Option<Arc<dyn AiClient>>,
    cell_ocr: Option<Arc<dyn CellOcrBackend>>,
    config: CollectionConfig,
    retry: RetryPolicy,
}

impl CandidateCollector {
    pub fn new(config: CollectionConfig, retry: RetryPolicy) -> Self {
        Self {
            vision: None,
            cell_ocr: None,
            config,
            retry,
        }
    }

    pub fn with_vision(mut self, client: Arc<dyn AiClient>) -> Self {
        self.vision = Some(client);
        self
    }

    pub fn with_cell_ocr(mut self, backend: Arc<dyn CellOcrBackend>) -> Self {
        self.cell_ocr = Some(backend);
        self
    }

    /// Run every enabled path and return the candidate lists.
    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, grid, sources), fields(table.ref_id = %grid.ref_id)))]
    pub async fn collect(&self, grid: &TableGrid, sources: &TableSources) -> CollectedCandidates {
        let flags = sources.flags;
        let mut collected = CollectedCandidates::default();

        if flags.image_model
            && let Some(transcription) = self.transcription(grid, sources).await
        {
            collected.image = transcription_candidates(grid, &transcription);
            collected.raw_text = transcription.raw_text.filter(|t| !t.trim().is_empty());
        }

        if collected.image.is_empty() && flags.cell_ocr {
            collected.image = self.cell_ocr_candidates(grid, sources).await;
        }

        if flags.embedded_text && !sources.embedded_words.is_empty() {
            collected.embedded = collect_embedded(grid, &sources.embedded_words, self.config.containment_tolerance);
        }

        tracing::debug!(
            "Collected candidates for table '{}': {} image, {} embedded",
            grid.ref_id,
            collected.image.len(),
            collected.embedded.len()
        );
        collected
    }

    async fn transcription(&self, grid: &TableGrid, sources: &TableSources) -> Option<ImageTranscription> {
        if let Some(transcription) = &sources.transcription {
            return Some(transcription.clone());
        }

        let client = self.vision.as_ref()?;
        let image = sources.inline_image()?;
        let request = AiRequest::new(transcription_prompt(grid)).with_image(image);

        let response = match call_with_retry(client.as_ref(), &request, &self.retry).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Vision transcription unavailable for table '{}': {}", grid.ref_id, e);
                return None;
            }
        };

        match parse_transcription(&response.text) {
            Ok(transcription) => Some(transcription),
            Err(e) => {
                tracing::warn!("Vision transcription for table '{}' could not be decoded: {}", grid.ref_id, e);
                None
            }
        }
    }

    async fn cell_ocr_candidates(&self, grid: &TableGrid, sources: &TableSources) -> Vec<Candidate> {
        let (Some(backend), Some(image)) = (&self.cell_ocr, sources.image.as_ref().filter(|b| !b.is_empty())) else {
            return Vec::new();
        };

        let image: Arc<[u8]> = Arc::from(image.as_slice());
        let semaphore = Arc::new(Semaphore::new(CELL_OCR_CONCURRENCY));
        let mut tasks = JoinSet::new();

        for (index, cell) in grid.cells().enumerate() {
            let backend = Arc::clone(backend);
            let image = Arc::clone(&image);
            let semaphore = Arc::clone(&semaphore);
            let policy = self.retry;
            let cell = cell.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let label = format!("cell OCR for {}", cell.cell);
                let result = with_retry(&label, &policy, || backend.recognize_cell(&image, &cell.bbox)).await;
                (index, cell, result)
            });
        }

        let mut recognized = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, cell, Ok(Some(text)))) => {
                    if text.confidence < self.config.min_ocr_confidence || text.text.trim().is_empty() {
                        tracing::debug!("Discarding OCR text for {} (confidence {:.2})", cell.cell, text.confidence);
                        continue;
                    }
                    recognized.push((
                        index,
                        Candidate {
                            cell: cell.cell,
                            text: text.text.trim().to_string(),
                            source: SourceKind::CellOcr,
                            confidence: text.confidence,
                            evidence_bbox: Some(text.bbox.unwrap_or(cell.bbox)),
                        },
                    ));
                }
                Ok((_, _, Ok(None))) => {}
                Ok((_, cell, Err(e))) => {
                    tracing::warn!("Cell OCR failed for {}: {}", cell.cell, e);
                }
                Err(e) => {
                    tracing::warn!("Cell OCR task panicked: {}", e);
                }
            }
        }

        recognized.sort_by_key(|(index, _)| *index);
        recognized.into_iter().map(|(_, candidate)| candidate).collect()
    }
}
