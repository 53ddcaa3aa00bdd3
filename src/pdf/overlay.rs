//! Drawing overlays onto existing pages
//!
//! A PDF overlay page becomes a Form XObject in the target document; a raster
//! overlay becomes an Image XObject. Either is invoked from a content stream
//! appended after the page's original content, which is first isolated in
//! q/Q so its graphics state cannot leak into what we draw.

use std::path::Path;

use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::EngineError;
use crate::layout::Rect;
use super::document::{inherited_attribute, replace_page_content, resolve, PageFrame, PdfDoc};
use super::merge::copy_object;

/// Draw page `source_page` of `source` inside `rect`, keeping its proportions
/// and centering it in the rectangle.
pub(crate) fn overlay_page(
    target: &mut PdfDoc,
    page: usize,
    rect: Rect,
    source: &PdfDoc,
    source_page: usize,
) -> Result<(), EngineError> {
    let page_id = target.page_id(page)?;
    let source_page_id = source.page_id(source_page)?;
    if rect.is_empty() {
        return Ok(());
    }

    let media = PageFrame::load(&source.document, source_page_id)?.media;
    let (bx0, by0) = (media[0].min(media[2]), media[1].min(media[3]));
    let (bw, bh) = ((media[2] - media[0]).abs(), (media[3] - media[1]).abs());
    if bw <= 0.0 || bh <= 0.0 {
        return Err(EngineError::Malformed(format!("overlay page of {} has an empty MediaBox", source.name())));
    }

    let form_id = form_for_page(target, source, source_page_id)?;

    let frame = PageFrame::load(&target.document, page_id)?;
    let (x, y, w, h) = frame.display_box(rect);
    let scale = (w / bw).min(h / bh);
    let tx = x + (w - bw * scale) / 2.0 - bx0 * scale;
    let ty = y + (h - bh * scale) / 2.0 - by0 * scale;

    let name = target.next_resource_name("Wm");
    add_xobject_to_page_resources(&mut target.document, page_id, &name, form_id)?;

    let content = format!(
        "q\n{}\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
        frame.display_cm(),
        scale,
        scale,
        tx,
        ty,
        name
    );
    draw_on_page(target, page_id, content.into_bytes())?;

    debug!(page, source = source.name(), scale, "Overlay drawn");
    Ok(())
}

/// Draw a raster image stretched to fill `rect`
pub(crate) fn embed_image(target: &mut PdfDoc, page: usize, rect: Rect, path: &Path) -> Result<(), EngineError> {
    let page_id = target.page_id(page)?;
    if rect.is_empty() {
        return Ok(());
    }

    let image_id = match target.images.get(path) {
        Some(id) => *id,
        None => {
            if !path.exists() {
                return Err(EngineError::FileNotFound(path.to_path_buf()));
            }
            let image = image::open(path)?;
            let id = add_image_xobject(&mut target.document, &image);
            target.images.insert(path.to_path_buf(), id);
            id
        }
    };

    let frame = PageFrame::load(&target.document, page_id)?;
    let (x, y, w, h) = frame.display_box(rect);

    let name = target.next_resource_name("Im");
    add_xobject_to_page_resources(&mut target.document, page_id, &name, image_id)?;

    let content = format!(
        "q\n{}\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
        frame.display_cm(),
        w,
        h,
        x,
        y,
        name
    );
    draw_on_page(target, page_id, content.into_bytes())?;

    debug!(page, image = %path.display(), "Image drawn");
    Ok(())
}

/// Append `content` to the page, isolating the original content first
pub(crate) fn draw_on_page(doc: &mut PdfDoc, page_id: ObjectId, content: Vec<u8>) -> Result<(), EngineError> {
    if !doc.wrapped.contains(&page_id) {
        wrap_page_content_in_graphics_state(&mut doc.document, page_id)?;
        doc.wrapped.insert(page_id);
    }

    let content_id = doc.document.add_object(Stream::new(Dictionary::new(), content));
    append_content_to_page(&mut doc.document, page_id, content_id)
}

/// Import a source page as a Form XObject, once per target document
fn form_for_page(target: &mut PdfDoc, source: &PdfDoc, source_page_id: ObjectId) -> Result<ObjectId, EngineError> {
    let key = (source.serial, source_page_id);
    if let Some(id) = target.overlay_forms.get(&key) {
        return Ok(*id);
    }

    let content = source.document.get_page_content(source_page_id)?;
    let resources = inherited_attribute(&source.document, source_page_id, b"Resources")
        .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
    let media = PageFrame::load(&source.document, source_page_id)?.media;

    let form_id = {
        let PdfDoc { document, imports, .. } = &mut *target;
        let id_map = imports.entry(source.serial).or_default();
        let resources = copy_object(&source.document, document, id_map, &resources);

        let mut xobject_dict = Dictionary::new();
        xobject_dict.set("Type", Object::Name(b"XObject".to_vec()));
        xobject_dict.set("Subtype", Object::Name(b"Form".to_vec()));
        xobject_dict.set("FormType", Object::Integer(1));
        xobject_dict.set("BBox", Object::Array(media.iter().map(|v| Object::Real(*v)).collect()));
        xobject_dict.set("Resources", resources);

        document.add_object(Stream::new(xobject_dict, content))
    };

    target.overlay_forms.insert(key, form_id);
    Ok(form_id)
}

/// Embed decoded pixels as an 8-bit RGB Image XObject, alpha as /SMask
fn add_image_xobject(doc: &mut Document, image: &DynamicImage) -> ObjectId {
    let (width, height) = (image.width() as i64, image.height() as i64);

    let image_dict = |color_space: &[u8]| {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Width", Object::Integer(width));
        dict.set("Height", Object::Integer(height));
        dict.set("ColorSpace", Object::Name(color_space.to_vec()));
        dict.set("BitsPerComponent", Object::Integer(8));
        dict
    };

    let mut dict = image_dict(b"DeviceRGB");

    if image.color().has_alpha() {
        let alpha: Vec<u8> = image.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let smask_id = doc.add_object(Stream::new(image_dict(b"DeviceGray"), alpha));
        dict.set("SMask", Object::Reference(smask_id));
    }

    doc.add_object(Stream::new(dict, image.to_rgb8().into_raw()))
}

/// Wrap page content streams in q/Q to isolate transformations
///
/// This ensures that any transformation matrices in the original content
/// don't affect content streams we add later (like watermarks).
fn wrap_page_content_in_graphics_state(doc: &mut Document, page_id: ObjectId) -> Result<(), EngineError> {
    let content = doc.get_page_content(page_id)?;

    let mut combined_content = b"q\n".to_vec(); // Save graphics state
    combined_content.extend_from_slice(&content);
    combined_content.extend_from_slice(b"\nQ\n"); // Restore graphics state

    replace_page_content(doc, page_id, combined_content)
}

/// Add an XObject reference to the page's Resources under `name`
///
/// The page gets its own inline copy of its (possibly inherited or shared)
/// Resources dictionary, so other pages are unaffected.
fn add_xobject_to_page_resources(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    xobject_id: ObjectId,
) -> Result<(), EngineError> {
    let mut resources = match inherited_attribute(doc, page_id, b"Resources") {
        Some(Object::Dictionary(dict)) => dict,
        _ => Dictionary::new(),
    };

    let mut xobjects = match resources.get(b"XObject") {
        Ok(value) => match resolve(doc, value) {
            Object::Dictionary(dict) => dict.clone(),
            _ => Dictionary::new(),
        },
        Err(_) => Dictionary::new(),
    };

    xobjects.set(name, Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    doc.get_dictionary_mut(page_id)?
        .set("Resources", Object::Dictionary(resources));

    Ok(())
}

/// Append a content stream to a page's Contents, so it draws last
fn append_content_to_page(doc: &mut Document, page_id: ObjectId, new_content_id: ObjectId) -> Result<(), EngineError> {
    let page_dict = doc.get_dictionary_mut(page_id)?;

    let contents = match page_dict.get(b"Contents").ok().cloned() {
        Some(Object::Reference(content_id)) => {
            vec![Object::Reference(content_id), Object::Reference(new_content_id)]
        }
        Some(Object::Array(mut content_array)) => {
            content_array.push(Object::Reference(new_content_id));
            content_array
        }
        _ => vec![Object::Reference(new_content_id)],
    };
    page_dict.set("Contents", Object::Array(contents));

    Ok(())
}
