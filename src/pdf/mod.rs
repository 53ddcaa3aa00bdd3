//! PDF engine: the [`DocumentEngine`] seam and its lopdf implementation

pub mod engine;
pub mod document;
mod merge;
mod overlay;
mod text;

// Re-export commonly used items
pub use document::{LopdfEngine, PdfDoc};
pub use engine::DocumentEngine;
