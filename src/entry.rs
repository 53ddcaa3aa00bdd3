//! Per-entry pipeline
//!
//! An entry's source is opened (raster images are first normalized into a
//! one-page letter document), its page selection is resolved against the real
//! page count, and each selected page is rotated, redacted, watermarked and
//! appended to the output, in that order. The source and any overlay document
//! are closed before [`EntryProcessor::process`] returns, whatever the outcome.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::assemble::ConcatenationAssembler;
use crate::error::{EngineError, EntryError};
use crate::job::{PageSelection, PdfEntry, WatermarkSpec};
use crate::layout::{fit_centered, place_watermark, Rect, Size};
use crate::pdf::DocumentEngine;

/// Extensions treated as raster images, compared case-insensitively
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

/// What kind of file an entry or overlay points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Pdf,
}

impl SourceKind {
    /// Raster image by extension, PDF otherwise
    pub fn classify(path: &Path) -> Self {
        if has_extension(path, &IMAGE_EXTENSIONS) {
            SourceKind::Image
        } else {
            SourceKind::Pdf
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// An entry validated against its opened source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// 0-based page indices in processing order
    pub page_indices: Vec<usize>,
    /// Keywords to redact; always empty for image sources
    pub keywords: BTreeSet<String>,
    /// Rotation normalized to 0, 90, 180 or 270
    pub rotation: i64,
}

/// Validate an entry's page selection and rotation against a source with
/// `page_count` pages and compose its redaction keywords.
///
/// Out-of-range page numbers reject the whole entry; there is no partial
/// extraction.
pub fn resolve_entry(
    entry: &PdfEntry,
    kind: SourceKind,
    page_count: usize,
    global_keywords: &BTreeSet<String>,
) -> Result<ResolvedEntry, EntryError> {
    let page_indices = match &entry.pages {
        PageSelection::All => (0..page_count).collect(),
        PageSelection::Malformed(raw) => return Err(EntryError::InvalidPageList(raw.clone())),
        PageSelection::Numbers(numbers) => {
            let invalid: Vec<i64> = numbers
                .iter()
                .copied()
                .filter(|&n| n < 1 || n as u64 > page_count as u64)
                .collect();
            if !invalid.is_empty() {
                return Err(EntryError::InvalidPages {
                    path: entry.source_path.clone(),
                    pages: invalid,
                    page_count,
                });
            }
            numbers.iter().map(|&n| (n - 1) as usize).collect()
        }
    };

    if entry.rotate % 90 != 0 {
        return Err(EntryError::InvalidRotation(entry.rotate));
    }

    let keywords = match kind {
        SourceKind::Image => BTreeSet::new(),
        SourceKind::Pdf => global_keywords
            .iter()
            .chain(entry.redact_keywords.iter().flatten())
            .cloned()
            .collect(),
    };

    Ok(ResolvedEntry {
        page_indices,
        keywords,
        rotation: entry.rotate.rem_euclid(360),
    })
}

/// What processing one entry produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryReport {
    pub pages_appended: usize,
    /// Redaction marks applied across all pages
    pub redactions: usize,
    /// 1-based source page numbers that received the watermark
    pub watermarked_pages: Vec<usize>,
    /// 1-based source page numbers where the watermark was clamped
    pub overflowed_pages: Vec<usize>,
}

/// An opened watermark source and its intrinsic size
enum Overlay<D> {
    Image { path: PathBuf, size: Size },
    Pdf { doc: D, size: Size },
}

impl<D> Overlay<D> {
    fn size(&self) -> Size {
        match self {
            Overlay::Image { size, .. } | Overlay::Pdf { size, .. } => *size,
        }
    }
}

/// Drives one entry through the document engine
pub struct EntryProcessor<'e, E: DocumentEngine> {
    engine: &'e E,
}

impl<'e, E: DocumentEngine> EntryProcessor<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self { engine }
    }

    /// Process one entry, appending its pages to `output`.
    ///
    /// Validation failures skip the entry before any page is appended.
    /// Redaction and watermark failures are logged and the entry continues.
    pub fn process(
        &self,
        entry: &PdfEntry,
        global_keywords: &BTreeSet<String>,
        output: &mut ConcatenationAssembler<'_, E>,
    ) -> Result<EntryReport, EntryError> {
        let path = &entry.source_path;
        if !path.exists() {
            return Err(EntryError::SourceNotFound(path.clone()));
        }

        let kind = SourceKind::classify(path);
        let mut source = match kind {
            SourceKind::Image => self.normalize_image(path)?,
            SourceKind::Pdf => self.engine.open_document(path)?,
        };

        let page_count = self.engine.page_count(&source);
        let resolved = match resolve_entry(entry, kind, page_count, global_keywords) {
            Ok(resolved) => resolved,
            Err(error) => {
                self.engine.close(source);
                return Err(error);
            }
        };

        info!(
            source = %path.display(),
            pages = ?resolved.page_indices.iter().map(|i| i + 1).collect::<Vec<_>>(),
            keywords = ?resolved.keywords,
            "Processing file"
        );

        let overlay = entry.watermark.as_ref().and_then(|spec| match self.open_overlay(spec) {
            Ok(overlay) => Some((spec, overlay)),
            Err(error) => {
                warn!(%error, "Watermark skipped for this entry");
                None
            }
        });

        let result = self.transform(
            &mut source,
            &resolved,
            overlay.as_ref().map(|(spec, overlay)| (*spec, overlay)),
            output,
        );

        if let Some((_, Overlay::Pdf { doc, .. })) = overlay {
            self.engine.close(doc);
        }
        self.engine.close(source);

        result
    }

    fn transform(
        &self,
        source: &mut E::Doc,
        resolved: &ResolvedEntry,
        watermark: Option<(&WatermarkSpec, &Overlay<E::Doc>)>,
        output: &mut ConcatenationAssembler<'_, E>,
    ) -> Result<EntryReport, EntryError> {
        let mut report = EntryReport::default();
        let mut transformed = HashSet::new();

        for &index in &resolved.page_indices {
            let page_number = index + 1;

            // A page listed twice is transformed once and appended twice
            if !transformed.insert(index) {
                output.append(source, index)?;
                report.pages_appended += 1;
                continue;
            }

            if resolved.rotation > 0 {
                self.engine.set_rotation(source, index, resolved.rotation)?;
            }

            if !resolved.keywords.is_empty() {
                let marks = self.redact_page(source, index, &resolved.keywords);
                info!(page = page_number, redactions = marks, "Redaction(s)");
                report.redactions += marks;
            }

            if let Some((spec, overlay)) = watermark {
                if spec.target_pages.contains(&page_number) {
                    match self.watermark_page(source, index, spec, overlay) {
                        Ok(overflowed) => {
                            report.watermarked_pages.push(page_number);
                            if overflowed {
                                report.overflowed_pages.push(page_number);
                            }
                        }
                        Err(error) => warn!(page = page_number, %error, "Watermark not added"),
                    }
                }
            }

            output.append(source, index)?;
            report.pages_appended += 1;
        }

        Ok(report)
    }

    /// Redact every keyword occurrence on a page, returning the marks applied
    fn redact_page(&self, source: &mut E::Doc, page: usize, keywords: &BTreeSet<String>) -> usize {
        let mut marks: Vec<Rect> = Vec::new();
        for keyword in keywords {
            match self.engine.search_text(source, page, keyword) {
                Ok(found) => marks.extend(found),
                Err(error) => warn!(page = page + 1, keyword = %keyword, %error, "Text search failed"),
            }
        }

        let mut applied = 0;
        for rect in marks {
            match self.engine.apply_redaction(source, page, rect) {
                Ok(()) => applied += 1,
                Err(error) => warn!(page = page + 1, %error, "Redaction failed"),
            }
        }
        applied
    }

    /// Place and draw the overlay on one page; `Ok(true)` if it was clamped
    fn watermark_page(
        &self,
        source: &mut E::Doc,
        page: usize,
        spec: &WatermarkSpec,
        overlay: &Overlay<E::Doc>,
    ) -> Result<bool, EngineError> {
        let page_size = self.engine.page_size(source, page)?;
        let placement = place_watermark(page_size, overlay.size(), spec.ratio, spec.offset);

        if placement.overflowed {
            warn!(page = page + 1, "Watermark overflowing contents on page");
        }

        match overlay {
            Overlay::Image { path, .. } => self.engine.embed_image(source, page, placement.rect, path)?,
            Overlay::Pdf { doc, .. } => self.engine.overlay_content(source, page, placement.rect, doc, 0)?,
        }

        debug!(page = page + 1, rect = ?placement.rect, "Watermark added");
        Ok(placement.overflowed)
    }

    /// Open a watermark source once for the whole entry
    fn open_overlay(&self, spec: &WatermarkSpec) -> Result<Overlay<E::Doc>, EntryError> {
        let path = &spec.overlay_path;
        if !path.exists() {
            return Err(EntryError::WatermarkNotFound(path.clone()));
        }

        if has_extension(path, &IMAGE_EXTENSIONS) {
            let size = self.engine.image_size(path)?;
            return Ok(Overlay::Image { path: path.clone(), size });
        }

        if !has_extension(path, &["pdf"]) {
            return Err(EntryError::UnsupportedWatermarkType(path.clone()));
        }

        let doc = self.engine.open_document(path)?;
        match self.engine.page_size(&doc, 0) {
            Ok(size) => Ok(Overlay::Pdf { doc, size }),
            Err(error) => {
                self.engine.close(doc);
                Err(error.into())
            }
        }
    }

    /// Turn a raster image into a one-page letter document, the image scaled
    /// to fit and centered
    fn normalize_image(&self, path: &Path) -> Result<E::Doc, EngineError> {
        let size = self.engine.image_size(path)?;
        if size.width <= 0.0 || size.height <= 0.0 {
            return Err(EngineError::Malformed(format!("image has no pixels: {}", path.display())));
        }

        let page_size = Size::letter();
        let rect = fit_centered(size, page_size);

        let mut doc = self.engine.new_document()?;
        let placed = self
            .engine
            .new_page(&mut doc, page_size)
            .and_then(|page| self.engine.embed_image(&mut doc, page, rect, path));

        match placed {
            Ok(()) => {
                debug!(image = %path.display(), ?rect, "Image normalized to letter page");
                Ok(doc)
            }
            Err(error) => {
                self.engine.close(doc);
                Err(error)
            }
        }
    }
}
