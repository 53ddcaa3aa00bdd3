//! Error types for the job assembler
//!
//! Errors are split by blast radius: a [`ConfigError`] or [`OutputError`]
//! aborts the whole job, an [`EntryError`] only costs the entry (or just its
//! watermark step) it was raised for.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors that end a job
#[derive(Error, Debug)]
pub enum Error {
    /// The job description could not be loaded or is structurally invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Nothing could be written
    #[error(transparent)]
    Output(#[from] OutputError),

    /// The document engine failed while finalizing the output
    #[error("PDF engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Problems with the job file itself
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Job file path does not exist
    #[error("Job file not found: {}", .0.display())]
    JobFileNotFound(PathBuf),

    /// Directory argument contains no config.json at or below it
    #[error("No 'config.json' found in or below {}", .0.display())]
    NoJobFile(PathBuf),

    /// Job file exists but could not be read
    #[error("Cannot read job file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Job file is not valid JSON or does not have the expected shape
    #[error("Invalid job file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Encryption is only allowed at job level
    #[error("Entry #{index} ('{file}') carries 'encrypt'; encrypt must be set at job level, outside the pdfs list")]
    EntryEncrypt { index: usize, file: String },
}

/// Recoverable per-entry problems
#[derive(Error, Debug)]
pub enum EntryError {
    /// Source document does not exist
    #[error("Source file does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// `extract` is not a list of page numbers
    #[error("'extract' must be a list of page numbers: {0}")]
    InvalidPageList(String),

    /// `extract` names pages the source does not have
    #[error("Invalid page(s) {pages:?} for {} ({page_count} pages)", path.display())]
    InvalidPages {
        path: PathBuf,
        pages: Vec<i64>,
        page_count: usize,
    },

    /// `rotate` is not a multiple of 90
    #[error("Rotation must be a multiple of 90 degrees, got {0}")]
    InvalidRotation(i64),

    /// `watermark` list has the wrong number of elements
    #[error("Watermark takes 2 or 4 parameters, got {0}")]
    WatermarkArity(usize),

    /// `watermark` elements have the wrong types
    #[error("Malformed watermark: {0}")]
    MalformedWatermark(String),

    /// Watermark overlay file does not exist
    #[error("Watermark file does not exist: {}", .0.display())]
    WatermarkNotFound(PathBuf),

    /// Watermark overlay is neither a raster image nor a PDF
    #[error("Unknown watermark type, not added: {}", .0.display())]
    UnsupportedWatermarkType(PathBuf),

    /// The document engine failed on this entry
    #[error("PDF engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Problems with the assembled output
#[derive(Error, Debug)]
pub enum OutputError {
    /// Every entry was skipped or empty
    #[error("No pages to output")]
    NoPages,
}

/// Failures reported by a document engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raster decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Page index outside the document
    #[error("Page index {index} out of range ({count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    /// Document structure the engine cannot work with
    #[error("Malformed PDF: {0}")]
    Malformed(String),

    /// Standard security handler setup failed
    #[error("Encryption failed: {0}")]
    Encryption(String),
}
