use std::collections::HashMap;

use bson::{Bson, Document, doc};
use tracing::warn;

use crate::coerce::coerce_or_raw;
use crate::schema::FieldMetadata;

/// Ids matched by each foreign filter, keyed by [`ForeignFilter::slot`].
pub type ResolvedIds = HashMap<usize, Vec<Bson>>;

/// A condition evaluated against a referenced collection.
///
/// Before the main pipeline runs, the executor queries `collection` with
/// `filter` and the clause renders as `{ field: { $in: ids } }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignFilter {
    pub slot: usize,
    pub field: String,
    pub collection: String,
    pub filter: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `{ path: condition }` on the base collection.
    Field { path: String, condition: Bson },
    Foreign(ForeignFilter),
    All(Vec<Clause>),
    Any(Vec<Clause>),
}

impl Clause {
    pub fn to_document(&self, resolved: &ResolvedIds) -> Document {
        match self {
            Clause::Field { path, condition } => doc! { path.clone(): condition.clone() },
            Clause::Foreign(foreign) => {
                let ids = resolved.get(&foreign.slot).cloned().unwrap_or_default();
                doc! { foreign.field.clone(): { "$in": ids } }
            }
            Clause::All(clauses) if clauses.len() == 1 => clauses[0].to_document(resolved),
            Clause::All(clauses) => doc! { "$and": render_all(clauses, resolved) },
            Clause::Any(clauses) => doc! { "$or": render_all(clauses, resolved) },
        }
    }

    fn collect_foreign<'a>(&'a self, out: &mut Vec<&'a ForeignFilter>) {
        match self {
            Clause::Field { .. } => {}
            Clause::Foreign(foreign) => out.push(foreign),
            Clause::All(clauses) | Clause::Any(clauses) => {
                for clause in clauses {
                    clause.collect_foreign(out);
                }
            }
        }
    }
}

fn render_all(clauses: &[Clause], resolved: &ResolvedIds) -> Vec<Bson> {
    clauses
        .iter()
        .map(|c| Bson::Document(c.to_document(resolved)))
        .collect()
}

/// The compiled filter of one request.
///
/// `all` clauses are ANDed, `any` clauses form the single top-level `$or`,
/// and `text` is a native full-text search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    pub all: Vec<Clause>,
    pub any: Vec<Clause>,
    pub text: Option<String>,
    next_slot: usize,
}

impl FilterExpression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.text.is_none()
    }

    /// Build a foreign clause with a fresh slot.
    pub fn foreign(
        &mut self,
        field: impl Into<String>,
        collection: impl Into<String>,
        filter: Document,
    ) -> Clause {
        let slot = self.next_slot;
        self.next_slot += 1;
        Clause::Foreign(ForeignFilter {
            slot,
            field: field.into(),
            collection: collection.into(),
            filter,
        })
    }

    /// Every foreign filter, in slot order.
    pub fn foreign_filters(&self) -> Vec<&ForeignFilter> {
        let mut out = Vec::new();
        for clause in self.all.iter().chain(&self.any) {
            clause.collect_foreign(&mut out);
        }
        out.sort_by_key(|f| f.slot);
        out
    }

    /// Render as a `$match` document. Unresolved foreign clauses match nothing.
    pub fn to_document(&self, resolved: &ResolvedIds) -> Document {
        let mut out = Document::new();
        let mut and = Vec::new();

        for clause in &self.all {
            let rendered = clause.to_document(resolved);
            let collides = rendered
                .keys()
                .any(|k| k.starts_with('$') || out.contains_key(k));
            if collides {
                and.push(Bson::Document(rendered));
            } else {
                for (key, value) in rendered {
                    out.insert(key, value);
                }
            }
        }

        if !self.any.is_empty() {
            out.insert("$or", render_all(&self.any, resolved));
        }
        if let Some(text) = &self.text {
            out.insert("$text", doc! { "$search": text.clone() });
        }
        if !and.is_empty() {
            out.insert("$and", and);
        }
        out
    }
}

/// A request value split into its `{operator}value` terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueExpr<'a> {
    /// The value began with `{$or}`.
    pub or: bool,
    /// The value after the `{$or}` marker.
    pub raw: &'a str,
    pub terms: Vec<(Option<&'a str>, &'a str)>,
}

/// Split `{$gte}1{$lte}18` into `[($gte, 1), ($lte, 18)]`.
///
/// An optional leading `{$or}` is stripped and reported. A `{` with no
/// closing brace is taken literally.
pub fn parse_value(value: &str) -> ValueExpr<'_> {
    let (or, raw) = match value.strip_prefix("{$or}") {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let mut terms = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        let (operator, tail) = match rest.strip_prefix('{') {
            Some(after) => match after.find('}') {
                Some(end) => (Some(&after[..end]), &after[end + 1..]),
                None => {
                    terms.push((None, rest));
                    break;
                }
            },
            None => (None, rest),
        };
        let end = tail.find('{').unwrap_or(tail.len());
        terms.push((operator, &tail[..end]));
        rest = &tail[end..];
    }

    ValueExpr { or, raw, terms }
}

/// Compile a parsed value into the condition stored under the field's path.
pub fn compile_condition(value: &ValueExpr<'_>, metadata: Option<&FieldMetadata>) -> Bson {
    match value.terms.as_slice() {
        [] => coerce_or_raw("", metadata),
        [(None, literal)] => coerce_or_raw(literal, metadata),
        terms => {
            if let Some(op) = terms
                .iter()
                .filter_map(|(op, _)| *op)
                .find(|op| !op.starts_with('$'))
            {
                warn!(operator = op, "unsupported filter operator, matching the literal value");
                return coerce_or_raw(value.raw, metadata);
            }

            let mut ops = Document::new();
            for (op, operand) in terms {
                match op {
                    None => {
                        ops.insert("$eq", coerce_or_raw(operand, metadata));
                    }
                    Some("$exists") => {
                        ops.insert("$exists", !matches!(operand.trim(), "false" | "0"));
                    }
                    Some("$includes") => {
                        ops.insert("$regex", substring_pattern(operand));
                        ops.insert("$options", "i");
                    }
                    Some(op @ ("$in" | "$nin")) => {
                        let items: Vec<Bson> = operand
                            .split(',')
                            .map(str::trim)
                            .filter(|item| !item.is_empty())
                            .map(|item| coerce_or_raw(item, metadata))
                            .collect();
                        ops.insert(*op, items);
                    }
                    Some(op) => {
                        ops.insert(*op, coerce_or_raw(operand, metadata));
                    }
                }
            }
            Bson::Document(ops)
        }
    }
}

/// Case-insensitive substring pattern with every non-word character
/// replaced by a single-character wildcard.
fn substring_pattern(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '.' })
        .collect()
}
