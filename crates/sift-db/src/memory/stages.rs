use std::cmp::Ordering;

use bson::{Bson, Document};

use super::filter::{matches, parse_filter};
use crate::error::StoreError;
use crate::path;
use crate::value::{as_u64, compare, truthy};

/// A document flowing through the pipeline with its text relevance.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub doc: Document,
    pub score: f64,
}

impl Row {
    pub(crate) fn new(doc: Document) -> Self {
        Self { doc, score: 0.0 }
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidPipeline(message.into())
}

/// Run `pipeline` over `rows`. `text_index` lists the collection's
/// text-indexed paths.
pub(crate) fn run(
    mut rows: Vec<Row>,
    pipeline: &[Document],
    text_index: &[String],
) -> Result<Vec<Row>, StoreError> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(invalid("a stage must have exactly one field"));
        };
        rows = match name.as_str() {
            "$match" => filter(rows, as_document(name, spec)?, text_index)?,
            "$sort" => sort(rows, as_document(name, spec)?)?,
            "$skip" => rows.into_iter().skip(as_count(name, spec)?).collect(),
            "$limit" => rows.into_iter().take(as_count(name, spec)?).collect(),
            "$project" => {
                let spec = as_document(name, spec)?;
                rows.into_iter()
                    .map(|row| project(row, spec))
                    .collect::<Result<_, _>>()?
            }
            "$unwind" => unwind(rows, spec)?,
            "$count" => count(rows, spec)?,
            "$facet" => facet(rows, as_document(name, spec)?, text_index)?,
            "$addFields" | "$set" => add_fields(rows, as_document(name, spec)?),
            other => return Err(invalid(format!("unsupported stage {other}"))),
        };
    }
    Ok(rows)
}

fn as_document<'a>(name: &str, spec: &'a Bson) -> Result<&'a Document, StoreError> {
    match spec {
        Bson::Document(doc) => Ok(doc),
        _ => Err(invalid(format!("{name} expects a document"))),
    }
}

fn as_count(name: &str, spec: &Bson) -> Result<usize, StoreError> {
    as_u64(spec)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(format!("{name} expects a non-negative integer")))
}

fn filter(rows: Vec<Row>, spec: &Document, text_index: &[String]) -> Result<Vec<Row>, StoreError> {
    let expr = parse_filter(spec)?;
    let search = expr.text().map(tokens);
    if search.is_some() && text_index.is_empty() {
        return Err(invalid("text search requires a text index"));
    }

    Ok(rows
        .into_iter()
        .filter_map(|mut row| {
            if let Some(search) = &search {
                row.score = text_score(&row.doc, text_index, search);
            }
            matches(&row.doc, &expr, row.score).then_some(row)
        })
        .collect())
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Number of indexed words that match a search term.
fn text_score(doc: &Document, text_index: &[String], search: &[String]) -> f64 {
    let mut score = 0.0;
    for field in text_index {
        let mut values = Vec::new();
        path::leaves(doc, field, &mut values);
        for value in values {
            if let Bson::String(text) = value {
                score += tokens(text).iter().filter(|t| search.contains(t)).count() as f64;
            }
        }
    }
    score
}

enum SortKey {
    Field(String, Ordering),
    Score,
}

fn sort(mut rows: Vec<Row>, spec: &Document) -> Result<Vec<Row>, StoreError> {
    let keys = spec
        .iter()
        .map(|(path, direction)| match direction {
            Bson::Document(meta) if meta.get_str("$meta").ok() == Some("textScore") => {
                Ok(SortKey::Score)
            }
            Bson::Int32(1) | Bson::Int64(1) => Ok(SortKey::Field(path.clone(), Ordering::Less)),
            Bson::Int32(-1) | Bson::Int64(-1) => {
                Ok(SortKey::Field(path.clone(), Ordering::Greater))
            }
            other => Err(invalid(format!("bad sort direction {other} for {path}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    rows.sort_by(|a, b| {
        for key in &keys {
            let ordering = match key {
                SortKey::Score => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
                SortKey::Field(path, Ordering::Less) => compare_at(&a.doc, &b.doc, path),
                SortKey::Field(path, _) => compare_at(&b.doc, &a.doc, path),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(rows)
}

/// Missing fields sort as null.
fn compare_at(a: &Document, b: &Document, path: &str) -> Ordering {
    let null = Bson::Null;
    compare(
        path::get(a, path).unwrap_or(&null),
        path::get(b, path).unwrap_or(&null),
    )
}

fn project(mut row: Row, spec: &Document) -> Result<Row, StoreError> {
    let spec = expand(spec);
    row.doc = if is_inclusion(&spec)? {
        include(&row.doc, &spec, row.score, true)
    } else {
        exclude(row.doc, &spec, row.score)
    };
    Ok(row)
}

/// Turn dotted keys into nesting.
fn expand(spec: &Document) -> Document {
    let mut out = Document::new();
    for (key, value) in spec {
        let value = match value {
            Bson::Document(sub) if !is_meta(value) => Bson::Document(expand(sub)),
            other => other.clone(),
        };
        insert_path(&mut out, key, value);
    }
    out
}

fn insert_path(out: &mut Document, key: &str, value: Bson) {
    match key.split_once('.') {
        None => {
            if let Bson::Document(incoming) = &value
                && let Some(Bson::Document(existing)) = out.get_mut(key)
            {
                for (k, v) in incoming {
                    insert_path(existing, k, v.clone());
                }
                return;
            }
            out.insert(key, value);
        }
        Some((head, rest)) => {
            let mut sub = Document::new();
            insert_path(&mut sub, rest, value);
            insert_path(out, head, Bson::Document(sub));
        }
    }
}

fn is_meta(value: &Bson) -> bool {
    matches!(value, Bson::Document(doc) if doc.contains_key("$meta"))
}

fn is_inclusion(spec: &Document) -> Result<bool, StoreError> {
    let mut include = false;
    let mut exclude = false;
    collect_modes(spec, true, &mut include, &mut exclude);
    if include && exclude {
        return Err(invalid("cannot mix inclusion and exclusion in $project"));
    }
    // `{ _id: 1 }` alone selects only the id.
    Ok(include || (!exclude && spec.get("_id").is_some_and(truthy)))
}

fn collect_modes(spec: &Document, top: bool, include: &mut bool, exclude: &mut bool) {
    for (key, value) in spec {
        if (top && key == "_id") || is_meta(value) {
            continue;
        }
        match value {
            Bson::Document(sub) => collect_modes(sub, false, include, exclude),
            value if truthy(value) => *include = true,
            _ => *exclude = true,
        }
    }
}

fn score_value(score: f64) -> Bson {
    Bson::Double(score)
}

fn include(source: &Document, spec: &Document, score: f64, top: bool) -> Document {
    let mut out = Document::new();
    if top
        && spec.get("_id").is_none_or(truthy)
        && let Some(id) = source.get("_id")
    {
        out.insert("_id", id.clone());
    }

    for (key, value) in spec {
        if top && key == "_id" {
            continue;
        }
        if is_meta(value) {
            out.insert(key.clone(), score_value(score));
            continue;
        }
        match (value, source.get(key)) {
            (Bson::Document(sub), Some(Bson::Document(inner))) => {
                out.insert(key.clone(), include(inner, sub, score, false));
            }
            (Bson::Document(sub), Some(Bson::Array(items))) => {
                let items: Vec<Bson> = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(inner) => {
                            Some(Bson::Document(include(inner, sub, score, false)))
                        }
                        _ => None,
                    })
                    .collect();
                out.insert(key.clone(), items);
            }
            (Bson::Document(_), _) => {}
            (flag, Some(found)) if truthy(flag) => {
                out.insert(key.clone(), found.clone());
            }
            _ => {}
        }
    }
    out
}

fn exclude(mut doc: Document, spec: &Document, score: f64) -> Document {
    for (key, value) in spec {
        if is_meta(value) {
            doc.insert(key.clone(), score_value(score));
            continue;
        }
        match value {
            Bson::Document(sub) => match doc.get_mut(key) {
                Some(Bson::Document(inner)) => {
                    *inner = exclude(std::mem::take(inner), sub, score);
                }
                Some(Bson::Array(items)) => {
                    for item in items.iter_mut() {
                        if let Bson::Document(inner) = item {
                            *inner = exclude(std::mem::take(inner), sub, score);
                        }
                    }
                }
                _ => {}
            },
            // only a top-level `_id` can be truthy here
            flag if truthy(flag) => {}
            _ => path::remove(&mut doc, key),
        }
    }
    doc
}

fn unwind(rows: Vec<Row>, spec: &Bson) -> Result<Vec<Row>, StoreError> {
    let (field, preserve) = match spec {
        Bson::String(field) => (field.as_str(), false),
        Bson::Document(options) => (
            options
                .get_str("path")
                .map_err(|_| invalid("$unwind requires a path"))?,
            options
                .get("preserveNullAndEmptyArrays")
                .is_some_and(truthy),
        ),
        _ => return Err(invalid("$unwind expects a path or a document")),
    };
    let field = field
        .strip_prefix('$')
        .ok_or_else(|| invalid(format!("$unwind path {field:?} must start with '$'")))?;

    let mut out = Vec::new();
    for row in rows {
        match path::get(&row.doc, field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut doc = row.doc.clone();
                    path::set(&mut doc, field, item);
                    out.push(Row {
                        doc,
                        score: row.score,
                    });
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    let mut row = row;
                    path::remove(&mut row.doc, field);
                    out.push(row);
                }
            }
            Some(_) => out.push(row),
        }
    }
    Ok(out)
}

fn count(rows: Vec<Row>, spec: &Bson) -> Result<Vec<Row>, StoreError> {
    let Bson::String(field) = spec else {
        return Err(invalid("$count expects a field name"));
    };
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let total = i64::try_from(rows.len()).unwrap_or(i64::MAX);
    let mut doc = Document::new();
    doc.insert(field.clone(), total);
    Ok(vec![Row::new(doc)])
}

fn facet(rows: Vec<Row>, spec: &Document, text_index: &[String]) -> Result<Vec<Row>, StoreError> {
    let mut doc = Document::new();
    for (name, stages) in spec {
        let Bson::Array(stages) = stages else {
            return Err(invalid(format!("$facet.{name} must be an array of stages")));
        };
        let stages = stages
            .iter()
            .map(|stage| match stage {
                Bson::Document(stage) => Ok(stage.clone()),
                _ => Err(invalid(format!("$facet.{name} must be an array of stages"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let result = run(rows.clone(), &stages, text_index)?;
        let docs: Vec<Bson> = result.into_iter().map(|row| Bson::Document(row.doc)).collect();
        doc.insert(name.clone(), docs);
    }
    Ok(vec![Row::new(doc)])
}

/// Set literal values, or copy another field with a `"$path"` reference.
fn add_fields(rows: Vec<Row>, spec: &Document) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            for (key, value) in spec {
                let value = match value {
                    Bson::String(s) if s.starts_with('$') => {
                        match path::get(&row.doc, &s[1..]) {
                            Some(found) => found.clone(),
                            None => continue,
                        }
                    }
                    other => other.clone(),
                };
                path::set(&mut row.doc, key, value);
            }
            row
        })
        .collect()
}
