//! Per-cell OCR backend plugin trait.

use crate::Result;
use crate::plugins::Plugin;
use crate::types::BBox;
use async_trait::async_trait;

/// Text recognized inside one cell crop.
#[derive(Debug, Clone, PartialEq)]
pub struct CellOcrText {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Evidence rectangle in table-image pixels, if the backend reports one.
    pub bbox: Option<BBox>,
}

/// Cloud OCR engine applied one cell at a time.
///
/// The backend receives the full table image and the cell rectangle and is
/// responsible for cropping. It is only consulted when the vision
/// transcription path produced no candidates for the table.
///
/// # Example
///
/// ```rust
/// use tablefuse::plugins::{CellOcrBackend, CellOcrText, Plugin};
/// use tablefuse::types::BBox;
/// use tablefuse::Result;
/// use async_trait::async_trait;
///
/// struct FixedOcr;
///
/// impl Plugin for FixedOcr {
///     fn name(&self) -> &str { "fixed-ocr" }
///     fn version(&self) -> String { "1.0.0".to_string() }
/// }
///
/// #[async_trait]
/// impl CellOcrBackend for FixedOcr {
///     async fn recognize_cell(&self, _image: &[u8], _cell: &BBox) -> Result<Option<CellOcrText>> {
///         Ok(Some(CellOcrText { text: "42".to_string(), confidence: 0.9, bbox: None }))
///     }
/// }
/// ```
#[async_trait]
pub trait CellOcrBackend: Plugin {
    /// Recognize the text inside `cell` of `image`. `Ok(None)` means the cell is blank.
    async fn recognize_cell(&self, image: &[u8], cell: &BBox) -> Result<Option<CellOcrText>>;
}
