//! PDF Compose Library
//!
//! Assembles one PDF from a declarative JSON job. Each job entry names a
//! source document (PDF or raster image) and may:
//! - Extract a subset of its pages
//! - Rotate the extracted pages
//! - Redact keywords (job-wide and per entry)
//! - Stamp a watermark from an image or PDF onto chosen pages
//!
//! Entries are concatenated in declaration order and the result is optionally
//! password-protected. A broken entry is reported and skipped; the rest of the
//! job still runs.
//!
//! All PDF work goes through the [`DocumentEngine`] trait, implemented for
//! production by [`LopdfEngine`].
//!
//! # Example
//!
//! ```no_run
//! use pdf_compose::{JobConfig, LopdfEngine, Orchestrator};
//! use std::path::Path;
//!
//! let job = JobConfig::load(Path::new("handouts/config.json")).expect("Invalid job file");
//! let engine = LopdfEngine::new();
//! let report = Orchestrator::new(&engine).run(&job).expect("Job failed");
//! println!("{} pages written to {}", report.page_count, report.output_path.display());
//! ```

pub mod error;
pub mod layout;
pub mod job;
pub mod encryption;
pub mod entry;
pub mod assemble;
pub mod orchestrator;
pub mod pdf;

// Re-export commonly used items
pub use error::{ConfigError, EngineError, EntryError, Error, OutputError, Result};
pub use job::{find_job_file, JobConfig, PageSelection, PdfEntry, WatermarkSpec};
pub use encryption::{EncryptionPolicy, EncryptionRequest, Permissions, SaveRequest};
pub use entry::{EntryProcessor, EntryReport, ResolvedEntry, SourceKind};
pub use assemble::ConcatenationAssembler;
pub use orchestrator::{run_job_file, EntryOutcome, EntryStatus, JobReport, Orchestrator};
pub use pdf::{DocumentEngine, LopdfEngine, PdfDoc};
