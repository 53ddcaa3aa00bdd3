//! The document engine seam
//!
//! The assembly core never touches PDF bytes. Everything it needs from a PDF
//! library goes through [`DocumentEngine`], so the core can run against
//! [`LopdfEngine`](super::LopdfEngine) in production and an in-memory fake in
//! tests. Pages are addressed by 0-based index within a document.

use std::path::Path;

use crate::encryption::EncryptionRequest;
use crate::error::EngineError;
use crate::layout::{Rect, Size};

/// Low-level document operations the assembler relies on
pub trait DocumentEngine {
    /// An open document; dropped or passed to [`close`](Self::close) when done
    type Doc;

    /// Open an existing PDF
    fn open_document(&self, path: &Path) -> Result<Self::Doc, EngineError>;

    /// Create an empty document with no pages
    fn new_document(&self) -> Result<Self::Doc, EngineError>;

    /// Append a blank page of the given size, returning its index
    fn new_page(&self, doc: &mut Self::Doc, size: Size) -> Result<usize, EngineError>;

    fn page_count(&self, doc: &Self::Doc) -> usize;

    /// Displayed page size (rotation taken into account)
    fn page_size(&self, doc: &Self::Doc, page: usize) -> Result<Size, EngineError>;

    /// Natural size of a raster image in pixels
    fn image_size(&self, path: &Path) -> Result<Size, EngineError>;

    /// Locations of every case-insensitive occurrence of `keyword` on a page
    fn search_text(&self, doc: &Self::Doc, page: usize, keyword: &str) -> Result<Vec<Rect>, EngineError>;

    /// Irreversibly remove what lies under `rect` and cover it with black
    fn apply_redaction(&self, doc: &mut Self::Doc, page: usize, rect: Rect) -> Result<(), EngineError>;

    /// Set the absolute page rotation in degrees
    fn set_rotation(&self, doc: &mut Self::Doc, page: usize, degrees: i64) -> Result<(), EngineError>;

    /// Draw a page of `source` inside `rect`, keeping its proportions
    fn overlay_content(
        &self,
        doc: &mut Self::Doc,
        page: usize,
        rect: Rect,
        source: &Self::Doc,
        source_page: usize,
    ) -> Result<(), EngineError>;

    /// Draw a raster image stretched to `rect`
    fn embed_image(&self, doc: &mut Self::Doc, page: usize, rect: Rect, image: &Path) -> Result<(), EngineError>;

    /// Copy pages `from..=to` of `source` to the end of `output`
    fn insert_pages(&self, output: &mut Self::Doc, source: &Self::Doc, from: usize, to: usize) -> Result<(), EngineError>;

    /// Write the document, encrypting it if requested
    fn save(&self, doc: &mut Self::Doc, path: &Path, encryption: Option<&EncryptionRequest>) -> Result<(), EngineError>;

    /// Release a document
    fn close(&self, doc: Self::Doc) {
        drop(doc);
    }
}
