//! lopdf-backed document engine
//!
//! [`LopdfEngine`] implements [`DocumentEngine`] on top of `lopdf`. Page
//! copying lives in `merge`, overlays and images in `overlay`, text search and
//! redaction in `text`; this module owns the document handle, page geometry
//! and saving.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions as PdfPermissions};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rand::Rng;
use tracing::{debug, info, instrument};

use crate::encryption::EncryptionRequest;
use crate::error::EngineError;
use crate::layout::{Rect, Size, TransformMatrix};
use super::engine::DocumentEngine;
use super::{merge, overlay, text};

/// Producer string written into the output's Info dictionary
const PRODUCER: &str = concat!("pdf-compose ", env!("CARGO_PKG_VERSION"));

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// An open PDF plus the bookkeeping needed to edit and merge it
pub struct PdfDoc {
    pub(crate) document: Document,
    /// Process-unique id, used to key objects imported from this document
    pub(crate) serial: u64,
    pub(crate) name: String,
    /// Source serial → (source object id → object id in this document)
    pub(crate) imports: HashMap<u64, HashMap<ObjectId, ObjectId>>,
    /// (source serial, source page id) → Form XObject already built here
    pub(crate) overlay_forms: HashMap<(u64, ObjectId), ObjectId>,
    /// Raster file → Image XObject already embedded here
    pub(crate) images: HashMap<PathBuf, ObjectId>,
    /// Pages whose original content is already isolated in q/Q
    pub(crate) wrapped: HashSet<ObjectId>,
    next_resource: u32,
}

impl PdfDoc {
    fn new(document: Document, name: String) -> Self {
        Self {
            document,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            name,
            imports: HashMap::new(),
            overlay_forms: HashMap::new(),
            images: HashMap::new(),
            wrapped: HashSet::new(),
            next_resource: 0,
        }
    }

    /// Name the document was opened from (empty for new documents)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying lopdf document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Page object ids in page order
    pub(crate) fn page_ids(&self) -> Vec<ObjectId> {
        self.document.get_pages().into_values().collect()
    }

    pub(crate) fn page_id(&self, index: usize) -> Result<ObjectId, EngineError> {
        let pages = self.page_ids();
        pages
            .get(index)
            .copied()
            .ok_or(EngineError::PageOutOfRange { index, count: pages.len() })
    }

    /// The /Pages root node
    pub(crate) fn pages_root(&self) -> Result<ObjectId, EngineError> {
        Ok(self.document.catalog()?.get(b"Pages")?.as_reference()?)
    }

    /// Fresh resource name such as `Wm3`, unique within this document
    pub(crate) fn next_resource_name(&mut self, prefix: &str) -> String {
        self.next_resource += 1;
        format!("{}{}", prefix, self.next_resource)
    }

    /// Add a page object to the end of the page tree
    pub(crate) fn push_page(&mut self, page_id: ObjectId) -> Result<(), EngineError> {
        let pages_id = self.pages_root()?;

        if let Ok(Object::Dictionary(page_dict)) = self.document.get_object_mut(page_id) {
            page_dict.set("Parent", Object::Reference(pages_id));
        }

        let pages_dict = self.document.get_dictionary_mut(pages_id)?;
        let mut kids = match pages_dict.get(b"Kids") {
            Ok(Object::Array(kids)) => kids.clone(),
            _ => Vec::new(),
        };
        kids.push(Object::Reference(page_id));
        pages_dict.set("Count", Object::Integer(kids.len() as i64));
        pages_dict.set("Kids", Object::Array(kids));

        Ok(())
    }
}

/// Geometry of one page: its media box and rotation
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageFrame {
    pub media: [f32; 4],
    pub rotation: i64,
}

impl PageFrame {
    pub fn load(doc: &Document, page_id: ObjectId) -> Result<Self, EngineError> {
        let media = match inherited_attribute(doc, page_id, b"MediaBox") {
            Some(Object::Array(values)) if values.len() == 4 => {
                let mut media = [0.0f32; 4];
                for (slot, value) in media.iter_mut().zip(values.iter()) {
                    *slot = resolve(doc, value).as_float()?;
                }
                media
            }
            // Letter is the conventional fallback for a missing MediaBox
            _ => [0.0, 0.0, 612.0, 792.0],
        };

        let rotation = inherited_attribute(doc, page_id, b"Rotate")
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360);

        Ok(Self { media, rotation })
    }

    fn unrotated(&self) -> Size {
        Size::new(
            (self.media[2] - self.media[0]).abs(),
            (self.media[3] - self.media[1]).abs(),
        )
    }

    /// Size as displayed
    pub fn size(&self) -> Size {
        match self.rotation {
            90 | 270 => self.unrotated().transposed(),
            _ => self.unrotated(),
        }
    }

    /// Maps displayed space (origin bottom-left of the displayed page, y up)
    /// to PDF user space of the unrotated page.
    pub fn display_to_user(&self) -> TransformMatrix {
        let Size { width, height } = self.unrotated();
        let (x0, y0) = (self.media[0].min(self.media[2]), self.media[1].min(self.media[3]));
        match self.rotation {
            90 => TransformMatrix::new(0.0, 1.0, -1.0, 0.0, x0 + width, y0),
            180 => TransformMatrix::new(-1.0, 0.0, 0.0, -1.0, x0 + width, y0 + height),
            270 => TransformMatrix::new(0.0, -1.0, 1.0, 0.0, x0, y0 + height),
            _ => TransformMatrix::new(1.0, 0.0, 0.0, 1.0, x0, y0),
        }
    }

    /// Page-space rectangle (top-left origin) in displayed y-up coordinates,
    /// as `(x, y, width, height)`
    pub fn display_box(&self, rect: Rect) -> (f32, f32, f32, f32) {
        let height = self.size().height;
        (rect.x0, height - rect.y1, rect.width(), rect.height())
    }

    /// Page-space rectangle as a user-space bounding box
    pub fn user_box(&self, rect: Rect) -> (f32, f32, f32, f32) {
        let (x, y, w, h) = self.display_box(rect);
        self.display_to_user().apply_box(x, y, x + w, y + h)
    }

    /// User-space bounding box as a page-space rectangle
    pub fn page_rect(&self, user: (f32, f32, f32, f32)) -> Rect {
        let (x0, y0, x1, y1) = self.display_to_user().inverse().apply_box(user.0, user.1, user.2, user.3);
        let height = self.size().height;
        Rect::new(x0, height - y1, x1, height - y0)
    }

    /// `a b c d e f cm` operator text for [`display_to_user`](Self::display_to_user)
    pub fn display_cm(&self) -> String {
        let m = self.display_to_user();
        format!("{} {} {} {} {} {} cm", m.a, m.b, m.c, m.d, m.e, m.f)
    }
}

/// Follow a reference one level
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

/// Look up a page attribute, walking up the page tree for inherited values
pub(crate) fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = page_id;
    let mut visited = HashSet::new();

    while visited.insert(current) {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value).clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }

    None
}

/// Replace all of a page's content streams with one new stream
pub(crate) fn replace_page_content(doc: &mut Document, page_id: ObjectId, content: Vec<u8>) -> Result<(), EngineError> {
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
    doc.get_dictionary_mut(page_id)?
        .set("Contents", Object::Reference(content_id));
    Ok(())
}

/// Stateless engine; all state lives in [`PdfDoc`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfEngine;

impl LopdfEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for LopdfEngine {
    type Doc = PdfDoc;

    #[instrument(skip_all, fields(path = %path.display()))]
    fn open_document(&self, path: &Path) -> Result<PdfDoc, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }

        let document = Document::load(path)?;
        debug!(pages = document.get_pages().len(), "PDF loaded");

        Ok(PdfDoc::new(document, path.display().to_string()))
    }

    fn new_document(&self) -> Result<PdfDoc, EngineError> {
        let mut document = Document::with_version("1.7");

        let pages_id = document.new_object_id();
        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(0));
        pages.set("Kids", Object::Array(Vec::new()));
        document.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = document.add_object(catalog);

        document.trailer.set("Root", Object::Reference(catalog_id));

        Ok(PdfDoc::new(document, String::new()))
    }

    fn new_page(&self, doc: &mut PdfDoc, size: Size) -> Result<usize, EngineError> {
        let content_id = doc
            .document
            .add_object(Stream::new(Dictionary::new(), Vec::new()));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(size.width),
                Object::Real(size.height),
            ]),
        );
        page.set("Resources", Object::Dictionary(Dictionary::new()));
        page.set("Contents", Object::Reference(content_id));
        let page_id = doc.document.add_object(page);

        doc.push_page(page_id)?;
        Ok(self.page_count(doc) - 1)
    }

    fn page_count(&self, doc: &PdfDoc) -> usize {
        doc.document.get_pages().len()
    }

    fn page_size(&self, doc: &PdfDoc, page: usize) -> Result<Size, EngineError> {
        let page_id = doc.page_id(page)?;
        Ok(PageFrame::load(&doc.document, page_id)?.size())
    }

    fn image_size(&self, path: &Path) -> Result<Size, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let (width, height) = image::image_dimensions(path)?;
        Ok(Size::new(width as f32, height as f32))
    }

    fn search_text(&self, doc: &PdfDoc, page: usize, keyword: &str) -> Result<Vec<Rect>, EngineError> {
        text::search_text(doc, page, keyword)
    }

    fn apply_redaction(&self, doc: &mut PdfDoc, page: usize, rect: Rect) -> Result<(), EngineError> {
        text::apply_redaction(doc, page, rect)
    }

    fn set_rotation(&self, doc: &mut PdfDoc, page: usize, degrees: i64) -> Result<(), EngineError> {
        let page_id = doc.page_id(page)?;
        doc.document
            .get_dictionary_mut(page_id)?
            .set("Rotate", Object::Integer(degrees.rem_euclid(360)));
        Ok(())
    }

    fn overlay_content(
        &self,
        doc: &mut PdfDoc,
        page: usize,
        rect: Rect,
        source: &PdfDoc,
        source_page: usize,
    ) -> Result<(), EngineError> {
        overlay::overlay_page(doc, page, rect, source, source_page)
    }

    fn embed_image(&self, doc: &mut PdfDoc, page: usize, rect: Rect, image: &Path) -> Result<(), EngineError> {
        overlay::embed_image(doc, page, rect, image)
    }

    fn insert_pages(&self, output: &mut PdfDoc, source: &PdfDoc, from: usize, to: usize) -> Result<(), EngineError> {
        merge::insert_pages(output, source, from, to)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn save(&self, doc: &mut PdfDoc, path: &Path, encryption: Option<&EncryptionRequest>) -> Result<(), EngineError> {
        stamp_info(&mut doc.document);

        doc.document.compress();

        if let Some(request) = encryption {
            encrypt(&mut doc.document, request)?;
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        doc.document.save(path)?;

        info!(encrypted = encryption.is_some(), "PDF written");
        Ok(())
    }
}

/// Write Producer and CreationDate into a fresh Info dictionary
fn stamp_info(document: &mut Document) {
    let mut info = Dictionary::new();
    info.set("Producer", Object::string_literal(PRODUCER));
    info.set(
        "CreationDate",
        Object::string_literal(Local::now().format("D:%Y%m%d%H%M%S").to_string()),
    );
    let info_id = document.add_object(info);
    document.trailer.set("Info", Object::Reference(info_id));
}

/// Apply the standard security handler: AES-256, revision 6
fn encrypt(document: &mut Document, request: &EncryptionRequest) -> Result<(), EngineError> {
    let mut rng = rand::rng();

    let id = rng.random::<[u8; 16]>().to_vec();
    document.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id, StringFormat::Hexadecimal),
        ]),
    );

    let mut file_encryption_key = [0u8; 32];
    rng.fill(&mut file_encryption_key);

    let crypt_filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
    let permissions = PdfPermissions::from_bits_truncate(request.permissions.bits().into());
    let version = EncryptionVersion::V5 {
        encrypt_metadata: true,
        crypt_filters: BTreeMap::from([(b"StdCF".to_vec(), crypt_filter)]),
        file_encryption_key: &file_encryption_key,
        stream_filter: b"StdCF".to_vec(),
        string_filter: b"StdCF".to_vec(),
        owner_password: &request.password,
        user_password: &request.password,
        permissions,
    };
    let state = EncryptionState::try_from(version).map_err(|e| EngineError::Encryption(e.to_string()))?;

    document
        .encrypt(&state)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;

    Ok(())
}
