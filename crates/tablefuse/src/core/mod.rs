//! Pipeline orchestration and configuration.
//!
//! [`pipeline::TablePipeline`] runs every table of a document through
//! collection, consolidation, validation/repair, header unification and
//! pivoting. [`config::PipelineConfig`] holds every tunable.
//!
//! # Example
//!
//! ```rust,no_run
//! use tablefuse::core::config::PipelineConfig;
//! use tablefuse::core::pipeline::{TableInput, TablePipeline};
//!
//! # async fn example(records: Vec<tablefuse::grid::GeometryRecord>) -> tablefuse::Result<()> {
//! let pipeline = TablePipeline::builder(PipelineConfig::default()).build()?;
//! let tables = TableInput::group(records, Default::default());
//! let result = pipeline.process_document(tables).await?;
//! println!("{} tables processed", result.processed_tables.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{TableInput, TablePipeline, TablePipelineBuilder};
