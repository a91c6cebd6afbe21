//! Dotted-path access into documents.
//!
//! Intermediate arrays are walked element by element, the way the store
//! resolves `items.product` against `{ items: [{ product }, ...] }`.

use bson::{Bson, Document};

/// The value at `path`, through sub-documents only.
pub(crate) fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Bson::Document(sub) => get(sub, rest),
            _ => None,
        },
    }
}

/// Every value reachable at `path`. Arrays met on the way are walked, and an
/// array at the end contributes itself followed by each element.
pub(crate) fn candidates<'a>(doc: &'a Document, path: &str, out: &mut Vec<&'a Bson>) {
    match path.split_once('.') {
        None => {
            if let Some(value) = doc.get(path) {
                out.push(value);
                if let Bson::Array(items) = value {
                    out.extend(items.iter());
                }
            }
        }
        Some((head, rest)) => match doc.get(head) {
            Some(Bson::Document(sub)) => candidates(sub, rest, out),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Bson::Document(sub) = item {
                        candidates(sub, rest, out);
                    }
                }
            }
            _ => {}
        },
    }
}

/// Every scalar reachable at `path`, with arrays flattened.
pub(crate) fn leaves<'a>(doc: &'a Document, path: &str, out: &mut Vec<&'a Bson>) {
    let mut found = Vec::new();
    candidates(doc, path, &mut found);
    out.extend(found.into_iter().filter(|v| !matches!(v, Bson::Array(_))));
}

/// Set `path`, creating sub-documents as needed. A non-document in the way
/// is replaced.
pub(crate) fn set(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            match doc.get_mut(path) {
                Some(slot) => *slot = value,
                None => {
                    doc.insert(path, value);
                }
            }
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                set(sub, rest, value);
            }
        }
    }
}

/// Remove `path` everywhere it occurs, walking arrays of sub-documents.
pub(crate) fn remove(doc: &mut Document, path: &str) {
    update(doc, path, &mut |_| None);
}

/// Replace every existing value at `path` with `f(value)`. Returning `None`
/// removes the field. Key order is kept.
pub(crate) fn update(doc: &mut Document, path: &str, f: &mut dyn FnMut(Bson) -> Option<Bson>) {
    match path.split_once('.') {
        None => {
            let Some(slot) = doc.get_mut(path) else {
                return;
            };
            match f(std::mem::replace(slot, Bson::Null)) {
                Some(value) => *slot = value,
                None => {
                    doc.remove(path);
                }
            }
        }
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(sub)) => update(sub, rest, f),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Bson::Document(sub) = item {
                        update(sub, rest, f);
                    }
                }
            }
            _ => {}
        },
    }
}
