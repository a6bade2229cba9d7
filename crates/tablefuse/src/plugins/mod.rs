//! Plugin system for pluggable collaborators.
//!
//! # Plugin Types
//!
//! - [`Plugin`] - base trait (identification and lifecycle)
//! - [`CellOcrBackend`] - per-cell cloud OCR used when the vision transcription yields nothing
//! - [`Preprocessor`] - domain-specific cell text normalization
//!
//! AI clients implement [`crate::ai::AiClient`], which also extends [`Plugin`].
//!
//! Registries are plain values scoped to one pipeline; nothing here is global.

pub mod ocr;
pub mod preprocess;
pub mod registry;
pub mod traits;

pub use ocr::{CellOcrBackend, CellOcrText};
pub use preprocess::{DomainTag, Preprocessor, detect_domain};
pub use registry::PreprocessorRegistry;
pub use traits::Plugin;
