//! Page copying between documents using lopdf
//!
//! Pages are deep-copied into the output one call at a time. Objects already
//! copied from the same source document are shared instead of duplicated, so
//! fonts and images used on many pages are stored once.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::error::EngineError;
use super::document::{inherited_attribute, PdfDoc};

/// Page attributes that may be inherited from the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Copy pages `from..=to` of `source` to the end of `output`
pub(crate) fn insert_pages(output: &mut PdfDoc, source: &PdfDoc, from: usize, to: usize) -> Result<(), EngineError> {
    let source_pages = source.page_ids();
    if from > to || to >= source_pages.len() {
        return Err(EngineError::PageOutOfRange {
            index: to.max(from),
            count: source_pages.len(),
        });
    }

    for &page_id in &source_pages[from..=to] {
        let new_page_id = {
            let PdfDoc { document, imports, .. } = &mut *output;
            let id_map = imports.entry(source.serial).or_default();
            import_page(&source.document, document, id_map, page_id)?
        };
        output.push_page(new_page_id)?;
    }

    debug!(
        source = source.name(),
        from,
        to,
        "Pages copied into output"
    );

    Ok(())
}

/// Deep-copy one page dictionary into `target`, returning the new page id.
///
/// The page itself is never shared: copying the same source page twice yields
/// two pages. Inherited attributes are written onto the copy since it gets a
/// different parent.
pub(crate) fn import_page(
    source: &Document,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    page_id: ObjectId,
) -> Result<ObjectId, EngineError> {
    let page = source.get_dictionary(page_id)?.clone();
    let new_page_id = target.new_object_id();

    // Back-references to the page (e.g. annotation /P) land on the copy
    let previous = id_map.insert(page_id, new_page_id);

    let mut new_page = Dictionary::new();
    for (key, value) in page.iter() {
        if key == b"Parent" {
            continue;
        }
        new_page.set(key.clone(), copy_object(source, target, id_map, value));
    }
    for key in INHERITABLE {
        if !new_page.has(key) {
            if let Some(value) = inherited_attribute(source, page_id, key) {
                new_page.set(key.to_vec(), copy_object(source, target, id_map, &value));
            }
        }
    }

    match previous {
        Some(old) => id_map.insert(page_id, old),
        None => id_map.remove(&page_id),
    };

    target.objects.insert(new_page_id, Object::Dictionary(new_page));
    Ok(new_page_id)
}

/// Copy an object into `target`, following references and renumbering them.
///
/// References to other pages or page-tree nodes are cut (replaced by null) so
/// that link destinations do not drag unrelated pages into the output.
pub(crate) fn copy_object(
    source: &Document,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    object: &Object,
) -> Object {
    match object {
        Object::Reference(old_id) => {
            if let Some(new_id) = id_map.get(old_id) {
                return Object::Reference(*new_id);
            }

            let referenced = match source.get_object(*old_id) {
                Ok(referenced) => referenced,
                Err(err) => {
                    warn!(?old_id, %err, "Cannot resolve reference, using Null");
                    return Object::Null;
                }
            };

            if is_page_tree_node(referenced) {
                return Object::Null;
            }

            // Reserve the id before recursing so cycles resolve to it
            let new_id = target.new_object_id();
            id_map.insert(*old_id, new_id);
            let copied = copy_object(source, target, id_map, referenced);
            target.objects.insert(new_id, copied);
            Object::Reference(new_id)
        }
        Object::Array(arr) => {
            Object::Array(arr.iter().map(|obj| copy_object(source, target, id_map, obj)).collect())
        }
        Object::Dictionary(dict) => Object::Dictionary(copy_dictionary(source, target, id_map, dict)),
        Object::Stream(stream) => Object::Stream(lopdf::Stream {
            dict: copy_dictionary(source, target, id_map, &stream.dict),
            content: stream.content.clone(),
            allows_compression: stream.allows_compression,
            start_position: stream.start_position,
        }),
        _ => object.clone(),
    }
}

fn copy_dictionary(
    source: &Document,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    dict: &Dictionary,
) -> Dictionary {
    let mut new_dict = Dictionary::new();
    for (key, value) in dict.iter() {
        new_dict.set(key.clone(), copy_object(source, target, id_map, value));
    }
    new_dict
}

fn is_page_tree_node(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => dict
            .get(b"Type")
            .and_then(Object::as_name)
            .map(|name| name == b"Page" || name == b"Pages")
            .unwrap_or(false),
        _ => false,
    }
}
