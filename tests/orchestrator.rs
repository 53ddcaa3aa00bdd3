//! Orchestration tests against an in-memory document engine
//!
//! Source files must exist on disk (entries are checked before opening), so
//! each test touches empty files in a temp directory and describes their
//! contents to the fake engine.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pdf_compose::layout::{Rect, Size};
use pdf_compose::{
    DocumentEngine, EncryptionRequest, EngineError, EntryError, EntryOutcome, Error, JobConfig, OutputError,
    Orchestrator, Permissions,
};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct FakePage {
    origin: String,
    size: Size,
    rotation: i64,
    words: Vec<String>,
    redactions: Vec<Rect>,
    overlays: Vec<(Rect, String)>,
}

#[derive(Debug, Clone, Default)]
struct FakeDoc {
    pages: Vec<FakePage>,
}

#[derive(Debug)]
struct Saved {
    path: PathBuf,
    pages: Vec<FakePage>,
    encryption: Option<EncryptionRequest>,
}

#[derive(Default)]
struct FakeEngine {
    pdfs: HashMap<PathBuf, FakeDoc>,
    images: HashMap<PathBuf, Size>,
    opened: Cell<usize>,
    closed: Cell<usize>,
    opens_by_path: RefCell<HashMap<PathBuf, usize>>,
    log: RefCell<Vec<String>>,
    saved: RefCell<Vec<Saved>>,
}

impl FakeEngine {
    fn add_pdf(&mut self, path: &Path, pages: &[(Size, &str)]) {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let pages = pages
            .iter()
            .enumerate()
            .map(|(i, (size, text))| FakePage {
                origin: format!("{}#{}", name, i + 1),
                size: *size,
                rotation: 0,
                words: text.split_whitespace().map(String::from).collect(),
                redactions: Vec::new(),
                overlays: Vec::new(),
            })
            .collect();
        self.pdfs.insert(path.to_path_buf(), FakeDoc { pages });
    }

    fn add_letter_pdf(&mut self, path: &Path, count: usize) {
        let pages: Vec<(Size, &str)> = (0..count).map(|_| (Size::letter(), "")).collect();
        self.add_pdf(path, &pages);
    }

    fn saved_origins(&self) -> Vec<String> {
        let saved = self.saved.borrow();
        saved[0].pages.iter().map(|p| p.origin.clone()).collect()
    }

    fn page<'a>(doc: &'a FakeDoc, page: usize) -> Result<&'a FakePage, EngineError> {
        doc.pages.get(page).ok_or(EngineError::PageOutOfRange { index: page, count: doc.pages.len() })
    }

    fn page_mut<'a>(doc: &'a mut FakeDoc, page: usize) -> Result<&'a mut FakePage, EngineError> {
        let count = doc.pages.len();
        doc.pages.get_mut(page).ok_or(EngineError::PageOutOfRange { index: page, count })
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl DocumentEngine for FakeEngine {
    type Doc = FakeDoc;

    fn open_document(&self, path: &Path) -> Result<FakeDoc, EngineError> {
        let doc = self
            .pdfs
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::FileNotFound(path.to_path_buf()))?;
        self.opened.set(self.opened.get() + 1);
        *self.opens_by_path.borrow_mut().entry(path.to_path_buf()).or_default() += 1;
        Ok(doc)
    }

    fn new_document(&self) -> Result<FakeDoc, EngineError> {
        self.opened.set(self.opened.get() + 1);
        Ok(FakeDoc::default())
    }

    fn new_page(&self, doc: &mut FakeDoc, size: Size) -> Result<usize, EngineError> {
        doc.pages.push(FakePage {
            origin: "new".to_string(),
            size,
            rotation: 0,
            words: Vec::new(),
            redactions: Vec::new(),
            overlays: Vec::new(),
        });
        Ok(doc.pages.len() - 1)
    }

    fn page_count(&self, doc: &FakeDoc) -> usize {
        doc.pages.len()
    }

    fn page_size(&self, doc: &FakeDoc, page: usize) -> Result<Size, EngineError> {
        let page = Self::page(doc, page)?;
        Ok(match page.rotation {
            90 | 270 => page.size.transposed(),
            _ => page.size,
        })
    }

    fn image_size(&self, path: &Path) -> Result<Size, EngineError> {
        self.images
            .get(path)
            .copied()
            .ok_or_else(|| EngineError::FileNotFound(path.to_path_buf()))
    }

    fn search_text(&self, doc: &FakeDoc, page: usize, keyword: &str) -> Result<Vec<Rect>, EngineError> {
        let page = Self::page(doc, page)?;
        Ok(page
            .words
            .iter()
            .enumerate()
            .filter(|(_, word)| word.eq_ignore_ascii_case(keyword))
            .map(|(i, _)| Rect::new(i as f32 * 10.0, 0.0, i as f32 * 10.0 + 10.0, 10.0))
            .collect())
    }

    fn apply_redaction(&self, doc: &mut FakeDoc, page: usize, rect: Rect) -> Result<(), EngineError> {
        let page = Self::page_mut(doc, page)?;
        self.record(format!("redact {}", page.origin));
        page.redactions.push(rect);
        Ok(())
    }

    fn set_rotation(&self, doc: &mut FakeDoc, page: usize, degrees: i64) -> Result<(), EngineError> {
        let page = Self::page_mut(doc, page)?;
        self.record(format!("rotate {} {}", page.origin, degrees));
        page.rotation = degrees;
        Ok(())
    }

    fn overlay_content(
        &self,
        doc: &mut FakeDoc,
        page: usize,
        rect: Rect,
        source: &FakeDoc,
        source_page: usize,
    ) -> Result<(), EngineError> {
        let origin = Self::page(source, source_page)?.origin.clone();
        let page = Self::page_mut(doc, page)?;
        self.record(format!("overlay {}", page.origin));
        page.overlays.push((rect, origin));
        Ok(())
    }

    fn embed_image(&self, doc: &mut FakeDoc, page: usize, rect: Rect, image: &Path) -> Result<(), EngineError> {
        let page = Self::page_mut(doc, page)?;
        self.record(format!("image {}", page.origin));
        page.overlays.push((rect, image.file_name().unwrap().to_string_lossy().into_owned()));
        Ok(())
    }

    fn insert_pages(&self, output: &mut FakeDoc, source: &FakeDoc, from: usize, to: usize) -> Result<(), EngineError> {
        for page in from..=to {
            let page = Self::page(source, page)?.clone();
            self.record(format!("append {}", page.origin));
            output.pages.push(page);
        }
        Ok(())
    }

    fn save(&self, doc: &mut FakeDoc, path: &Path, encryption: Option<&EncryptionRequest>) -> Result<(), EngineError> {
        self.saved.borrow_mut().push(Saved {
            path: path.to_path_buf(),
            pages: doc.pages.clone(),
            encryption: encryption.cloned(),
        });
        Ok(())
    }

    fn close(&self, _doc: FakeDoc) {
        self.closed.set(self.closed.get() + 1);
    }
}

/// Temp job directory with empty placeholder files
struct Fixture {
    dir: TempDir,
    engine: FakeEngine,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            engine: FakeEngine::default(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn touch(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    fn pdf(&mut self, name: &str, count: usize) {
        let path = self.touch(name);
        self.engine.add_letter_pdf(&path, count);
    }

    fn pdf_with_text(&mut self, name: &str, pages: &[(Size, &str)]) {
        let path = self.touch(name);
        self.engine.add_pdf(&path, pages);
    }

    fn image(&mut self, name: &str, size: Size) {
        let path = self.touch(name);
        self.engine.images.insert(path, size);
    }

    fn job(&self, json: &str) -> JobConfig {
        JobConfig::from_json(json, &self.path("config.json")).unwrap()
    }

    fn run(&self, json: &str) -> Result<pdf_compose::JobReport, Error> {
        Orchestrator::new(&self.engine).run(&self.job(json))
    }
}

#[test]
fn test_pages_follow_entry_then_page_order() {
    let mut fx = Fixture::new();
    fx.pdf("src1.pdf", 5);
    fx.pdf("src2.pdf", 2);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "src1.pdf", "extract": [1, 3] }, { "file": "src2.pdf" } ] }"#)
        .unwrap();

    assert_eq!(report.page_count, 4);
    assert_eq!(fx.engine.saved_origins(), vec!["src1.pdf#1", "src1.pdf#3", "src2.pdf#1", "src2.pdf#2"]);
    assert_eq!(fx.engine.saved.borrow()[0].path, fx.path("output.pdf"));
}

#[test]
fn test_repeated_page_is_transformed_once() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 2);
    fx.pdf("stamp.pdf", 1);

    fx.run(r#"{ "pdfs": [ { "file": "a.pdf", "extract": [2, 2], "watermark": ["stamp.pdf", [2]] } ] }"#)
        .unwrap();

    let saved = fx.engine.saved.borrow();
    assert_eq!(saved[0].pages.len(), 2);
    assert!(saved[0].pages.iter().all(|p| p.overlays.len() == 1));
}

#[test]
fn test_out_of_range_entry_is_skipped_and_job_continues() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 2);
    fx.pdf("b.pdf", 1);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "extract": [1, 3] }, { "file": "b.pdf" } ] }"#)
        .unwrap();

    assert_eq!(fx.engine.saved_origins(), vec!["b.pdf#1"]);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.entries[0].pages_appended(), 0);
    assert!(matches!(
        &report.entries[0].outcome,
        EntryOutcome::Skipped(EntryError::InvalidPages { pages, .. }) if pages == &vec![3]
    ));
}

#[test]
fn test_missing_source_is_skipped() {
    let mut fx = Fixture::new();
    fx.pdf("b.pdf", 1);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "gone.pdf" }, { "file": "b.pdf" } ] }"#)
        .unwrap();

    assert_eq!(report.page_count, 1);
    assert!(matches!(
        report.entries[0].outcome,
        EntryOutcome::Skipped(EntryError::SourceNotFound(_))
    ));
}

#[test]
fn test_no_pages_aborts_without_saving() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 2);

    let result = fx.run(
        r#"{ "pdfs": [
            { "file": "missing.pdf" },
            { "file": "a.pdf", "extract": [0] },
            { "file": "a.pdf", "extract": "all" },
            { "file": "a.pdf", "rotate": 45 }
        ] }"#,
    );

    assert!(matches!(result, Err(Error::Output(OutputError::NoPages))));
    assert!(fx.engine.saved.borrow().is_empty());
}

#[test]
fn test_empty_job_aborts() {
    let fx = Fixture::new();
    let result = fx.run(r#"{ "pdfs": [] }"#);
    assert!(matches!(result, Err(Error::Output(OutputError::NoPages))));
}

#[test]
fn test_image_entry_becomes_one_centered_letter_page() {
    let mut fx = Fixture::new();
    fx.image("photo.JPG", Size::new(1224.0, 396.0));

    let report = fx.run(r#"{ "redact": ["x"], "pdfs": [ { "file": "photo.JPG" } ] }"#).unwrap();
    assert_eq!(report.page_count, 1);

    let saved = fx.engine.saved.borrow();
    let page = &saved[0].pages[0];
    assert_eq!(page.size, Size::letter());
    assert!(page.redactions.is_empty());

    let (rect, name) = &page.overlays[0];
    assert_eq!(name, "photo.JPG");
    assert!(Rect::from_size(Size::letter()).contains(rect));
    assert!((rect.width() - 612.0).abs() < 0.01);
    assert!((rect.height() - 198.0).abs() < 0.01);
    assert!((rect.y0 - 297.0).abs() < 0.01);
}

#[test]
fn test_password_grants_fixed_permissions() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);

    let report = fx
        .run(r#"{ "encrypt": "hunter2", "pdfs": [ { "file": "a.pdf" } ] }"#)
        .unwrap();
    assert!(report.encrypted);

    let saved = fx.engine.saved.borrow();
    let request = saved[0].encryption.as_ref().unwrap();
    assert_eq!(request.password, "hunter2");
    assert_eq!(
        request.permissions,
        Permissions::ACCESSIBILITY | Permissions::PRINT | Permissions::COPY | Permissions::ANNOTATE
    );
}

#[test]
fn test_no_password_no_encryption() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);

    let report = fx.run(r#"{ "pdfs": [ { "file": "a.pdf" } ] }"#).unwrap();
    assert!(!report.encrypted);
    assert!(fx.engine.saved.borrow()[0].encryption.is_none());
}

#[test]
fn test_redaction_uses_global_and_entry_keywords() {
    let mut fx = Fixture::new();
    fx.pdf_with_text(
        "a.pdf",
        &[(Size::letter(), "public SECRET draft secret"), (Size::letter(), "nothing here")],
    );
    fx.pdf_with_text("b.pdf", &[(Size::letter(), "draft secret")]);

    let report = fx
        .run(
            r#"{ "redact": ["secret"], "pdfs": [
                { "file": "a.pdf", "redact": ["Draft"] },
                { "file": "b.pdf" }
            ] }"#,
        )
        .unwrap();

    let counts: Vec<usize> = report
        .entries
        .iter()
        .map(|e| match &e.outcome {
            EntryOutcome::Processed(r) => r.redactions,
            EntryOutcome::Skipped(_) => usize::MAX,
        })
        .collect();
    assert_eq!(counts, vec![3, 1]);

    let saved = fx.engine.saved.borrow();
    assert_eq!(saved[0].pages[0].redactions.len(), 3);
    assert!(saved[0].pages[1].redactions.is_empty());
    assert_eq!(saved[0].pages[2].redactions, vec![Rect::new(10.0, 0.0, 20.0, 10.0)]);
}

#[test]
fn test_rotation_applies_to_every_extracted_page() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 3);

    fx.run(r#"{ "pdfs": [ { "file": "a.pdf", "extract": [2, 3], "rotate": -90 } ] }"#)
        .unwrap();

    let saved = fx.engine.saved.borrow();
    assert!(saved[0].pages.iter().all(|p| p.rotation == 270));
}

#[test]
fn test_transformations_run_in_order_per_page() {
    let mut fx = Fixture::new();
    fx.pdf_with_text("a.pdf", &[(Size::letter(), "secret"), (Size::letter(), "secret")]);
    fx.pdf("stamp.pdf", 1);

    fx.run(
        r#"{ "redact": ["secret"], "pdfs": [
            { "file": "a.pdf", "rotate": 90, "watermark": ["stamp.pdf", [1]] }
        ] }"#,
    )
    .unwrap();

    assert_eq!(
        *fx.engine.log.borrow(),
        vec![
            "rotate a.pdf#1 90",
            "redact a.pdf#1",
            "overlay a.pdf#1",
            "append a.pdf#1",
            "rotate a.pdf#2 90",
            "redact a.pdf#2",
            "append a.pdf#2",
        ]
    );
}

#[test]
fn test_watermark_only_on_target_pages() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 3);
    fx.pdf_with_text("stamp.pdf", &[(Size::new(100.0, 50.0), "")]);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["stamp.pdf", [1, 3], 0.5, [20, 30]] } ] }"#)
        .unwrap();

    let saved = fx.engine.saved.borrow();
    let pages = &saved[0].pages;
    assert_eq!(pages[0].overlays, vec![(Rect::new(20.0, 30.0, 70.0, 55.0), "stamp.pdf#1".to_string())]);
    assert!(pages[1].overlays.is_empty());
    assert_eq!(pages[2].overlays.len(), 1);

    match &report.entries[0].outcome {
        EntryOutcome::Processed(r) => {
            assert_eq!(r.watermarked_pages, vec![1, 3]);
            assert!(r.overflowed_pages.is_empty());
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_watermark_overflow_is_clamped_not_dropped() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);
    fx.image("logo.png", Size::new(400.0, 100.0));

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["logo.png", [1], 1.0, [500, 0]] } ] }"#)
        .unwrap();

    let saved = fx.engine.saved.borrow();
    let (rect, _) = &saved[0].pages[0].overlays[0];
    assert_eq!(*rect, Rect::new(500.0, 0.0, 612.0, 100.0));

    match &report.entries[0].outcome {
        EntryOutcome::Processed(r) => assert_eq!(r.overflowed_pages, vec![1]),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_watermark_placement_uses_rotated_size() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);
    fx.image("logo.png", Size::new(700.0, 10.0));

    fx.run(r#"{ "pdfs": [ { "file": "a.pdf", "rotate": 90, "watermark": ["logo.png", [1]] } ] }"#)
        .unwrap();

    // Rotated letter is 792 wide, so a 700pt logo fits
    let saved = fx.engine.saved.borrow();
    assert_eq!(saved[0].pages[0].overlays[0].0, Rect::new(0.0, 0.0, 700.0, 10.0));
}

#[test]
fn test_unsupported_watermark_keeps_entry() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 2);
    fx.touch("stamp.txt");

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["stamp.txt", [1]] } ] }"#)
        .unwrap();

    assert_eq!(report.page_count, 2);
    let saved = fx.engine.saved.borrow();
    assert!(saved[0].pages.iter().all(|p| p.overlays.is_empty()));
}

#[test]
fn test_missing_watermark_keeps_entry() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["nowhere.pdf", [1]] } ] }"#)
        .unwrap();
    assert_eq!(report.page_count, 1);
}

#[test]
fn test_watermark_wrong_arity_keeps_entry() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);
    fx.pdf("stamp.pdf", 1);

    let report = fx
        .run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["stamp.pdf", [1], 0.5] } ] }"#)
        .unwrap();

    assert_eq!(report.page_count, 1);
    assert!(fx.engine.saved.borrow()[0].pages[0].overlays.is_empty());
}

#[test]
fn test_overlay_opened_once_per_entry() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 4);
    fx.pdf("stamp.pdf", 1);

    fx.run(r#"{ "pdfs": [ { "file": "a.pdf", "watermark": ["stamp.pdf", [1, 2, 3, 4]] } ] }"#)
        .unwrap();

    assert_eq!(fx.engine.opens_by_path.borrow()[&fx.path("stamp.pdf")], 1);
}

#[test]
fn test_every_document_is_closed() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 2);
    fx.pdf("stamp.pdf", 1);
    fx.image("scan.png", Size::new(10.0, 10.0));

    fx.run(
        r#"{ "pdfs": [
            { "file": "a.pdf", "watermark": ["stamp.pdf", [1]] },
            { "file": "a.pdf", "extract": [9] },
            { "file": "a.pdf", "rotate": 10 },
            { "file": "scan.png" }
        ] }"#,
    )
    .unwrap();

    assert!(fx.engine.opened.get() > 0);
    assert_eq!(fx.engine.opened.get(), fx.engine.closed.get());
}

#[test]
fn test_documents_closed_when_job_aborts() {
    let mut fx = Fixture::new();
    fx.pdf("a.pdf", 1);

    let result = fx.run(r#"{ "pdfs": [ { "file": "a.pdf", "extract": [2] } ] }"#);
    assert!(result.is_err());
    assert_eq!(fx.engine.opened.get(), fx.engine.closed.get());
}
