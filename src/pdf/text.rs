//! Text location and redaction
//!
//! Page content is interpreted just far enough to know where each shown
//! character code lands: the graphics state stack, the CTM and the text
//! state operators. Codes are decoded through the page's fonts (a
//! `/ToUnicode` CMap or a named encoding), two bytes at a time for composite
//! fonts. Glyph widths are not read from fonts; every glyph is taken to be
//! half an em wide, which is accurate enough to find and cover words.

use std::collections::{BTreeMap, HashSet};

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, StringFormat};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::layout::{Rect, TransformMatrix};
use super::document::{replace_page_content, PageFrame, PdfDoc};
use super::overlay::draw_on_page;

/// Approximate glyph advance as a fraction of the font size
const GLYPH_WIDTH: f32 = 0.5;
const DESCENT: f32 = 0.2;
const ASCENT: f32 = 0.8;

/// Where a shown string sits inside an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Operand `k` of the operator (`Tj`, `'`, `"`)
    Operand(usize),
    /// Element `k` of the array operand of `TJ`
    Element(usize),
}

/// One shown character code and its box in user space
#[derive(Debug, Clone, Copy)]
struct Glyph {
    op: usize,
    slot: Slot,
    /// Offset of the code in the string and its length in bytes
    byte: usize,
    len: usize,
    /// Glyphs on the same text line share a run; matches never cross runs
    run: usize,
    bbox: (f32, f32, f32, f32),
}

impl Glyph {
    fn center(&self) -> (f32, f32) {
        ((self.bbox.0 + self.bbox.2) / 2.0, (self.bbox.1 + self.bbox.3) / 2.0)
    }
}

/// How one font turns string bytes into characters
struct FontCodec<'a> {
    /// Bytes per character code
    width: usize,
    encoding: Option<Encoding<'a>>,
    /// Codes are read as their own values for lack of a usable mapping
    guessed: bool,
}

impl<'a> FontCodec<'a> {
    fn latin1() -> Self {
        Self { width: 1, encoding: None, guessed: false }
    }

    fn new(document: &'a Document, font: &'a Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|subtype| subtype == b"Type0")
            .unwrap_or(false);

        let encoding = match font.get_font_encoding(document) {
            Ok(Encoding::SimpleEncoding(name)) if !name.starts_with(b"UniGB-") => None,
            Ok(encoding) => Some(encoding),
            Err(_) => None,
        };

        // Simple fonts without a usable encoding are close enough to Latin-1
        let guessed = encoding.is_none() && (composite || font.has(b"Encoding"));
        Self { width: if composite { 2 } else { 1 }, encoding, guessed }
    }

    fn decode(&self, code: &[u8]) -> Vec<char> {
        let decoded = self
            .encoding
            .as_ref()
            .and_then(|encoding| Document::decode_text(encoding, code).ok())
            .unwrap_or_default();
        if !decoded.is_empty() && decoded != "\u{FFFD}" {
            return decoded.chars().collect();
        }

        let value = code.iter().fold(0u32, |acc, &b| acc << 8 | u32::from(b));
        char::from_u32(value).into_iter().collect()
    }
}

/// Decoders for every font a page can select with `Tf`
struct PageFonts<'a> {
    codecs: BTreeMap<Vec<u8>, FontCodec<'a>>,
    fallback: FontCodec<'a>,
}

impl<'a> PageFonts<'a> {
    fn load(document: &'a Document, page_id: ObjectId) -> Self {
        let codecs = match document.get_page_fonts(page_id) {
            Ok(fonts) => fonts
                .into_iter()
                .map(|(name, font)| (name, FontCodec::new(document, font)))
                .collect(),
            Err(error) => {
                warn!(%error, "Page fonts unreadable, shown text read as Latin-1");
                BTreeMap::new()
            }
        };
        Self { codecs, fallback: FontCodec::latin1() }
    }

    fn get(&self, name: &[u8]) -> &FontCodec<'a> {
        self.codecs.get(name).unwrap_or(&self.fallback)
    }
}

#[derive(Debug, Clone)]
struct TextParams {
    font: Vec<u8>,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    font_size: f32,
    rise: f32,
}

impl Default for TextParams {
    fn default() -> Self {
        Self {
            font: Vec::new(),
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            font_size: 0.0,
            rise: 0.0,
        }
    }
}

/// Shown text of a page: glyph boxes plus the characters each glyph decodes to
struct ScannedText {
    glyphs: Vec<Glyph>,
    /// Decoded characters in reading order, each with the index of its glyph
    chars: Vec<(char, usize)>,
}

/// Walks operations, tracking the state that positions text
struct TextScanner<'f, 'a> {
    fonts: &'f PageFonts<'a>,
    ctm: TransformMatrix,
    params: TextParams,
    stack: Vec<(TransformMatrix, TextParams)>,
    text_matrix: TransformMatrix,
    line_matrix: TransformMatrix,
    run: usize,
    undecodable: HashSet<Vec<u8>>,
    text: ScannedText,
}

impl<'f, 'a> TextScanner<'f, 'a> {
    fn new(fonts: &'f PageFonts<'a>) -> Self {
        Self {
            fonts,
            ctm: TransformMatrix::identity(),
            params: TextParams::default(),
            stack: Vec::new(),
            text_matrix: TransformMatrix::identity(),
            line_matrix: TransformMatrix::identity(),
            run: 0,
            undecodable: HashSet::new(),
            text: ScannedText { glyphs: Vec::new(), chars: Vec::new() },
        }
    }

    fn scan(mut self, operations: &[Operation]) -> ScannedText {
        for (index, operation) in operations.iter().enumerate() {
            self.step(index, operation);
        }
        self.text
    }

    fn step(&mut self, index: usize, operation: &Operation) {
        let operands = &operation.operands;
        let number = |k: usize| operands.get(k).and_then(|o| o.as_float().ok()).unwrap_or(0.0);

        match operation.operator.as_str() {
            "q" => self.stack.push((self.ctm, self.params.clone())),
            "Q" => {
                if let Some((ctm, params)) = self.stack.pop() {
                    self.ctm = ctm;
                    self.params = params;
                }
            }
            "cm" => {
                let m = matrix_from(operands);
                self.ctm = m.then(&self.ctm);
            }
            "BT" => {
                self.text_matrix = TransformMatrix::identity();
                self.line_matrix = TransformMatrix::identity();
                self.run += 1;
            }
            "Tf" => {
                self.params.font = operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                self.params.font_size = number(1);
            }
            "Tc" => self.params.char_spacing = number(0),
            "Tw" => self.params.word_spacing = number(0),
            "Tz" => self.params.horizontal_scale = number(0) / 100.0,
            "TL" => self.params.leading = number(0),
            "Ts" => self.params.rise = number(0),
            "Td" => self.next_line(number(0), number(1)),
            "TD" => {
                self.params.leading = -number(1);
                self.next_line(number(0), number(1));
            }
            "Tm" => {
                let m = matrix_from(operands);
                let line = self.line_matrix;
                if m.b != line.b || m.d != line.d || m.f != line.f {
                    self.run += 1;
                }
                self.text_matrix = m;
                self.line_matrix = m;
            }
            "T*" => self.next_line(0.0, -self.params.leading),
            "Tj" => self.show(index, Slot::Operand(0), operands.first()),
            "'" => {
                self.next_line(0.0, -self.params.leading);
                self.show(index, Slot::Operand(0), operands.first());
            }
            "\"" => {
                self.params.word_spacing = number(0);
                self.params.char_spacing = number(1);
                self.next_line(0.0, -self.params.leading);
                self.show(index, Slot::Operand(2), operands.get(2));
            }
            "TJ" => {
                if let Some(Object::Array(elements)) = operands.first() {
                    for (k, element) in elements.iter().enumerate() {
                        match element {
                            Object::String(..) => self.show(index, Slot::Element(k), Some(element)),
                            other => {
                                if let Ok(adjust) = other.as_float() {
                                    let tx = -adjust / 1000.0 * self.params.font_size * self.params.horizontal_scale;
                                    self.advance(tx);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        if ty != 0.0 {
            self.run += 1;
        }
        self.line_matrix = TransformMatrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = TransformMatrix::translate(tx, 0.0).then(&self.text_matrix);
    }

    fn show(&mut self, op: usize, slot: Slot, string: Option<&Object>) {
        let Some(Object::String(bytes, _)) = string else {
            return;
        };

        let fonts = self.fonts;
        let codec = fonts.get(&self.params.font);
        if codec.guessed && self.undecodable.insert(self.params.font.clone()) {
            warn!(
                font = %String::from_utf8_lossy(&self.params.font),
                "Font has no usable text mapping, codes read as Unicode values"
            );
        }

        let TextParams {
            char_spacing,
            word_spacing,
            horizontal_scale,
            font_size,
            rise,
            ..
        } = self.params;
        let width = GLYPH_WIDTH * font_size * horizontal_scale;

        for (k, code) in bytes.chunks(codec.width).enumerate() {
            let to_user = self.text_matrix.then(&self.ctm);
            let bbox = to_user.apply_box(0.0, rise - DESCENT * font_size, width, rise + ASCENT * font_size);

            let glyph = self.text.glyphs.len();
            self.text.glyphs.push(Glyph {
                op,
                slot,
                byte: k * codec.width,
                len: code.len(),
                run: self.run,
                bbox,
            });
            self.text.chars.extend(codec.decode(code).into_iter().map(|c| (c, glyph)));

            // Word spacing applies to the single-byte code 32 only
            let spacing = if code == b" " { char_spacing + word_spacing } else { char_spacing };
            self.advance(width + spacing * horizontal_scale);
        }
    }
}

fn matrix_from(operands: &[Object]) -> TransformMatrix {
    let values: Vec<f32> = operands.iter().filter_map(|o| o.as_float().ok()).collect();
    match values.as_slice() {
        [a, b, c, d, e, f] => TransformMatrix::new(*a, *b, *c, *d, *e, *f),
        _ => TransformMatrix::identity(),
    }
}

fn page_content(doc: &PdfDoc, page: usize) -> Result<(ObjectId, PageFrame, Content), EngineError> {
    let page_id = doc.page_id(page)?;
    let frame = PageFrame::load(&doc.document, page_id)?;
    let bytes = doc.document.get_page_content(page_id)?;
    let content = Content::decode(&bytes)?;
    Ok((page_id, frame, content))
}

/// Every case-insensitive, non-overlapping occurrence of `keyword` on a page.
///
/// A match may span several show operations as long as they stay on one
/// text line of one text object.
pub(crate) fn search_text(doc: &PdfDoc, page: usize, keyword: &str) -> Result<Vec<Rect>, EngineError> {
    let needle: Vec<char> = keyword.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let (page_id, frame, content) = page_content(doc, page)?;
    let fonts = PageFonts::load(&doc.document, page_id);
    let ScannedText { glyphs, chars } = TextScanner::new(&fonts).scan(&content.operations);

    let mut matches = Vec::new();
    for run in chars.chunk_by(|a, b| glyphs[a.1].run == glyphs[b.1].run) {
        let haystack: Vec<(char, usize)> = run
            .iter()
            .flat_map(|&(c, glyph)| c.to_lowercase().map(move |lower| (lower, glyph)))
            .collect();

        let mut start = 0;
        while start + needle.len() <= haystack.len() {
            let window = &haystack[start..start + needle.len()];
            if window.iter().map(|(c, _)| *c).eq(needle.iter().copied()) {
                let hit = &glyphs[window[0].1..=window[needle.len() - 1].1];
                let bbox = hit.iter().skip(1).fold(hit[0].bbox, |acc, g| {
                    (acc.0.min(g.bbox.0), acc.1.min(g.bbox.1), acc.2.max(g.bbox.2), acc.3.max(g.bbox.3))
                });
                matches.push(frame.page_rect(bbox));
                start += needle.len();
            } else {
                start += 1;
            }
        }
    }

    debug!(page, keyword, hits = matches.len(), "Text searched");
    Ok(matches)
}

/// Blank every glyph whose center lies in `rect`, then paint the area black
pub(crate) fn apply_redaction(doc: &mut PdfDoc, page: usize, rect: Rect) -> Result<(), EngineError> {
    if rect.is_empty() {
        return Ok(());
    }

    let (page_id, frame, mut content) = page_content(doc, page)?;
    let (ux0, uy0, ux1, uy1) = frame.user_box(rect);
    let area = Rect::new(ux0, uy0, ux1, uy1);

    let doomed: Vec<Glyph> = {
        let fonts = PageFonts::load(&doc.document, page_id);
        TextScanner::new(&fonts)
            .scan(&content.operations)
            .glyphs
            .into_iter()
            .filter(|g| {
                let (x, y) = g.center();
                area.contains_point(x, y)
            })
            .collect()
    };

    if !doomed.is_empty() {
        for glyph in &doomed {
            if let Some(bytes) = string_bytes_mut(&mut content.operations[glyph.op], glyph.slot, glyph.len) {
                if let Some(code) = bytes.get_mut(glyph.byte..glyph.byte + glyph.len) {
                    blank_code(code);
                }
            }
        }
        replace_page_content(&mut doc.document, page_id, content.encode()?)?;
    }

    let (x, y, w, h) = frame.display_box(rect);
    let mark = format!("q\n{}\n0 g\n{} {} {} {} re\nf\nQ\n", frame.display_cm(), x, y, w, h);
    draw_on_page(doc, page_id, mark.into_bytes())?;

    debug!(page, removed = doomed.len(), "Redaction applied");
    Ok(())
}

/// Single-byte codes become a space, composite codes CID 0
fn blank_code(code: &mut [u8]) {
    match code {
        [byte] => *byte = b' ',
        wide => wide.fill(0),
    }
}

fn string_bytes_mut(operation: &mut Operation, slot: Slot, code_len: usize) -> Option<&mut Vec<u8>> {
    let object = match slot {
        Slot::Operand(k) => operation.operands.get_mut(k)?,
        Slot::Element(k) => match operation.operands.first_mut()? {
            Object::Array(elements) => elements.get_mut(k)?,
            _ => return None,
        },
    };
    match object {
        Object::String(bytes, format) => {
            // Single-byte hex strings re-encode as literals so the blanks stay readable
            if code_len == 1 {
                *format = StringFormat::Literal;
            }
            Some(bytes)
        }
        _ => None,
    }
}
