//! Job description loading and validation
//!
//! A job file is JSON:
//!
//! ```json
//! {
//!   "redact": ["Confidential"],
//!   "encrypt": "password",
//!   "output": "handout.pdf",
//!   "pdfs": [
//!     { "file": "intro.pdf", "extract": [1, 3], "rotate": 90 },
//!     { "file": "scan.png" },
//!     { "file": "notes.pdf", "redact": ["Draft"],
//!       "watermark": ["logo.pdf", [1], 0.5, [20, 20]] }
//!   ]
//! }
//! ```
//!
//! Validation happens once, producing an immutable [`JobConfig`]. Structural
//! problems are fatal ([`ConfigError`]); problems confined to one entry are kept
//! as [`EntryDiagnostic`]s or surface later when the entry is processed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, EntryError};
use crate::layout::Offset;

/// Name searched for when the CLI is given a directory
pub const JOB_FILE_NAME: &str = "config.json";

/// Output file name used when the job does not set one
pub const DEFAULT_OUTPUT: &str = "output.pdf";

/// Validated job description
#[derive(Debug)]
pub struct JobConfig {
    /// Keywords redacted from every PDF entry
    pub global_redact_keywords: BTreeSet<String>,
    /// Output file, resolved against the job file's directory
    pub output_path: PathBuf,
    /// Password for the output; `None` saves unencrypted
    pub encrypt_password: Option<String>,
    /// Entries in declaration order, which is also output page order
    pub entries: Vec<PdfEntry>,
    /// Non-fatal problems found while validating entries
    pub diagnostics: Vec<EntryDiagnostic>,
}

/// One source document and what to do with it
#[derive(Debug, Clone)]
pub struct PdfEntry {
    pub source_path: PathBuf,
    pub pages: PageSelection,
    pub redact_keywords: Option<BTreeSet<String>>,
    pub watermark: Option<WatermarkSpec>,
    /// Degrees as written in the job; validated at page resolution
    pub rotate: i64,
}

/// The `extract` setting of an entry
#[derive(Debug, Clone, PartialEq)]
pub enum PageSelection {
    /// Every page of the source
    All,
    /// 1-based page numbers, in the order given
    Numbers(Vec<i64>),
    /// `extract` was present but not a list of integers
    Malformed(String),
}

/// Overlay drawn on some pages of an entry
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub overlay_path: PathBuf,
    /// 1-based source page numbers that receive the overlay
    pub target_pages: Vec<usize>,
    pub ratio: f32,
    pub offset: Offset,
}

/// An entry-level problem detected at load time
#[derive(Debug)]
pub struct EntryDiagnostic {
    /// Index of the entry in `pdfs`
    pub entry: usize,
    pub error: EntryError,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(default)]
    redact: Vec<String>,
    #[serde(default)]
    encrypt: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    pdfs: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    file: String,
    #[serde(default)]
    extract: Option<Value>,
    #[serde(default)]
    redact: Option<Vec<String>>,
    #[serde(default)]
    rotate: Option<i64>,
    #[serde(default)]
    watermark: Option<Value>,
    #[serde(default)]
    encrypt: Option<Value>,
}

impl JobConfig {
    /// Read and validate a job file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::JobFileNotFound(path.to_path_buf()));
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&text, path)
    }

    /// Validate job JSON; relative paths resolve against `job_file`'s directory
    pub fn from_json(text: &str, job_file: &Path) -> Result<Self, ConfigError> {
        let raw: RawJob = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: job_file.to_path_buf(),
            source,
        })?;

        let base_dir = job_file.parent().unwrap_or_else(|| Path::new(""));

        let mut entries = Vec::with_capacity(raw.pdfs.len());
        let mut diagnostics = Vec::new();

        for (index, entry) in raw.pdfs.into_iter().enumerate() {
            if entry.encrypt.is_some() {
                return Err(ConfigError::EntryEncrypt { index, file: entry.file });
            }

            let watermark = match entry.watermark.as_ref().map(|w| parse_watermark(w, base_dir)) {
                Some(Ok(spec)) => spec,
                Some(Err(error)) => {
                    diagnostics.push(EntryDiagnostic { entry: index, error });
                    None
                }
                None => None,
            };

            entries.push(PdfEntry {
                source_path: base_dir.join(&entry.file),
                pages: parse_page_selection(entry.extract.as_ref()),
                redact_keywords: entry.redact.map(|keywords| keywords.into_iter().collect()),
                watermark,
                rotate: entry.rotate.unwrap_or(0),
            });
        }

        let output = raw.output.unwrap_or_else(|| DEFAULT_OUTPUT.to_string());

        debug!(
            entries = entries.len(),
            diagnostics = diagnostics.len(),
            "Job file validated"
        );

        Ok(Self {
            global_redact_keywords: raw.redact.into_iter().collect(),
            output_path: base_dir.join(output),
            encrypt_password: raw.encrypt.filter(|p| !p.is_empty()),
            entries,
            diagnostics,
        })
    }

    /// Diagnostics recorded for one entry
    pub fn diagnostics_for(&self, entry: usize) -> impl Iterator<Item = &EntryError> {
        self.diagnostics
            .iter()
            .filter(move |d| d.entry == entry)
            .map(|d| &d.error)
    }
}

fn parse_page_selection(extract: Option<&Value>) -> PageSelection {
    match extract {
        None | Some(Value::Null) => PageSelection::All,
        Some(Value::Array(items)) if items.is_empty() => PageSelection::All,
        Some(Value::Array(items)) => {
            let numbers: Option<Vec<i64>> = items.iter().map(Value::as_i64).collect();
            match numbers {
                Some(numbers) => PageSelection::Numbers(numbers),
                None => PageSelection::Malformed(format!("non-integer page number in {}", Value::Array(items.clone()))),
            }
        }
        Some(other) => PageSelection::Malformed(other.to_string()),
    }
}

/// Parse `[file, pages]` or `[file, pages, ratio, [x, y]]`.
///
/// An empty list means no watermark.
fn parse_watermark(value: &Value, base_dir: &Path) -> Result<Option<WatermarkSpec>, EntryError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(None),
        other => return Err(EntryError::MalformedWatermark(format!("expected a list, got {}", other))),
    };

    if items.is_empty() {
        return Ok(None);
    }
    if items.len() != 2 && items.len() != 4 {
        return Err(EntryError::WatermarkArity(items.len()));
    }

    let file = items[0]
        .as_str()
        .ok_or_else(|| EntryError::MalformedWatermark(format!("file must be a string, got {}", items[0])))?;

    let target_pages = items[1]
        .as_array()
        .and_then(|pages| {
            pages
                .iter()
                .map(|p| p.as_u64().filter(|&n| n >= 1).map(|n| n as usize))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| EntryError::MalformedWatermark(format!("pages must be a list of page numbers, got {}", items[1])))?;

    let (ratio, offset) = if items.len() == 4 {
        let ratio = items[2]
            .as_f64()
            .ok_or_else(|| EntryError::MalformedWatermark(format!("ratio must be a number, got {}", items[2])))?;
        let offset = match items[3].as_array().map(Vec::as_slice) {
            Some([x, y]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Offset::new(x as f32, y as f32),
                _ => return Err(EntryError::MalformedWatermark(format!("offset must be two numbers, got {}", items[3]))),
            },
            _ => return Err(EntryError::MalformedWatermark(format!("offset must be [x, y], got {}", items[3]))),
        };
        (ratio as f32, offset)
    } else {
        (1.0, Offset::default())
    };

    Ok(Some(WatermarkSpec {
        overlay_path: base_dir.join(file),
        target_pages,
        ratio,
        offset,
    }))
}

/// Resolve the CLI argument to a job file.
///
/// A file path is returned unchanged. For a directory, `config.json` directly
/// inside it wins; otherwise the shallowest `config.json` below it is used.
pub fn find_job_file(arg: &Path) -> Result<PathBuf, ConfigError> {
    if !arg.is_dir() {
        return Ok(arg.to_path_buf());
    }

    let direct = arg.join(JOB_FILE_NAME);
    if direct.is_file() {
        return Ok(direct);
    }

    let dir = arg
        .to_str()
        .ok_or_else(|| ConfigError::NoJobFile(arg.to_path_buf()))?;
    let pattern = format!("{}/**/{}", Pattern::escape(dir), JOB_FILE_NAME);

    let mut found: Vec<PathBuf> = glob(&pattern)
        .map_err(|_| ConfigError::NoJobFile(arg.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();

    found.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });

    found
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::NoJobFile(arg.to_path_buf()))
}
