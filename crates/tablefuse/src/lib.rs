//! TableFuse - Multi-Source Table Reconciliation
//!
//! TableFuse turns several noisy, incomplete observations of a table (a vision
//! model transcription, per-cell OCR, text embedded in the source file) into
//! one canonical, auditable table per document region.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tablefuse::{PipelineConfig, TableInput, TablePipeline};
//!
//! # async fn example(records: Vec<tablefuse::grid::GeometryRecord>) -> tablefuse::Result<()> {
//! let pipeline = TablePipeline::builder(PipelineConfig::default()).build()?;
//! let result = pipeline
//!     .process_document(TableInput::group(records, Default::default()))
//!     .await?;
//!
//! for table in &result.processed_tables {
//!     println!("{}", table.to_markdown());
//! }
//! for table in &result.unrepairable_tables {
//!     println!("{} could not be repaired: {}", table.ref_id, table.reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Grid** (`grid`): physical cell geometry per panel, grouped into tables
//! - **Collection** (`collect`): candidate texts from every available source
//! - **Consolidation** (`consolidate`): one confirmed text per cell, image path first
//! - **Validation** (`validation`): rule checks, shape auto-fix, AI repair with an
//!   explicit unrepairable answer
//! - **Headers** (`header`): per-panel header detection joined into a global column map
//! - **Pivot** (`pivot`): `(row header, column header)` records for downstream use
//! - **Core** (`core`): pipeline orchestration and configuration loading

#![deny(unsafe_code)]

pub mod ai;
pub mod cache;
pub mod collect;
pub mod consolidate;
pub mod core;
pub mod error;
pub mod grid;
pub mod header;
pub mod pivot;
pub mod plugins;
pub mod types;
pub mod validation;

pub use error::{Result, TableFuseError};
pub use types::*;

pub use crate::core::config::{
    AiCallConfig, CacheConfig, CollectionConfig, HeaderConfig, PipelineConfig, PivotConfig, PreprocessingConfig,
    RepairConfig, ValidationConfig,
};
pub use crate::core::pipeline::{TableInput, TablePipeline, TablePipelineBuilder};

pub use ai::{AiClient, AiRequest, AiResponse, InlineImage};
#[cfg(feature = "http")]
pub use ai::openai::OpenAiCompatibleClient;

pub use collect::{EmbeddedWord, ImageTranscription, TableSources};
pub use grid::{GeometryRecord, GridModel, TableGrid};
