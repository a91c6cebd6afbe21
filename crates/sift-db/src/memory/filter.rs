use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use crate::error::StoreError;
use crate::path;
use crate::value::{comparable, compare, equals, truthy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Gte => ordering != Ordering::Less,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A parsed `$match` document.
#[derive(Debug, Clone)]
pub(crate) enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Eq(String, Bson),
    Ne(String, Bson),
    Cmp(String, CmpOp, Bson),
    In(String, Vec<Bson>),
    Nin(String, Vec<Bson>),
    Regex(String, Regex),
    Exists(String, bool),
    /// Full-text search; matches rows with a positive relevance score.
    Text(String),
}

impl Expression {
    /// The `$text` search string, if any.
    pub(crate) fn text(&self) -> Option<&str> {
        match self {
            Expression::Text(search) => Some(search.as_str()),
            Expression::And(children) | Expression::Or(children) => {
                children.iter().find_map(Expression::text)
            }
            _ => None,
        }
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidPipeline(message.into())
}

/// Parse a filter document. The top level is an implicit AND and an empty
/// document matches everything.
pub(crate) fn parse_filter(doc: &Document) -> Result<Expression, StoreError> {
    let mut children = Vec::new();
    for (key, value) in doc {
        match key.as_str() {
            "$and" => children.push(Expression::And(parse_logical(key, value)?)),
            "$or" => children.push(Expression::Or(parse_logical(key, value)?)),
            "$text" => {
                let search = match value {
                    Bson::Document(text) => text.get_str("$search").ok(),
                    _ => None,
                };
                let search = search.ok_or_else(|| invalid("$text requires a $search string"))?;
                children.push(Expression::Text(search.to_string()));
            }
            k if k.starts_with('$') => {
                return Err(invalid(format!("unknown top-level operator: {k}")));
            }
            _ => children.push(parse_condition(key, value)?),
        }
    }

    if children.len() == 1
        && let Some(only) = children.pop()
    {
        return Ok(only);
    }
    Ok(Expression::And(children))
}

fn parse_logical(op: &str, value: &Bson) -> Result<Vec<Expression>, StoreError> {
    let Bson::Array(items) = value else {
        return Err(invalid(format!("{op} value must be an array")));
    };
    if items.is_empty() {
        return Err(invalid(format!("{op} array must not be empty")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(sub) => parse_filter(sub),
            _ => Err(invalid(format!("{op} array elements must be documents"))),
        })
        .collect()
}

fn parse_condition(field: &str, value: &Bson) -> Result<Expression, StoreError> {
    match value {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
            parse_operators(field, ops)
        }
        Bson::RegularExpression(re) => Ok(Expression::Regex(
            field.to_string(),
            build_regex(&re.pattern, &re.options)?,
        )),
        _ => Ok(Expression::Eq(field.to_string(), value.clone())),
    }
}

fn parse_operators(field: &str, ops: &Document) -> Result<Expression, StoreError> {
    let field = field.to_string();
    let mut conditions = Vec::new();
    for (op, operand) in ops {
        let condition = match op.as_str() {
            "$eq" => Expression::Eq(field.clone(), operand.clone()),
            "$ne" => Expression::Ne(field.clone(), operand.clone()),
            "$gt" => Expression::Cmp(field.clone(), CmpOp::Gt, operand.clone()),
            "$gte" => Expression::Cmp(field.clone(), CmpOp::Gte, operand.clone()),
            "$lt" => Expression::Cmp(field.clone(), CmpOp::Lt, operand.clone()),
            "$lte" => Expression::Cmp(field.clone(), CmpOp::Lte, operand.clone()),
            "$in" => Expression::In(field.clone(), list(op, operand)?),
            "$nin" => Expression::Nin(field.clone(), list(op, operand)?),
            "$exists" => Expression::Exists(field.clone(), truthy(operand)),
            "$regex" => {
                let options = ops.get_str("$options").unwrap_or("");
                let pattern = match operand {
                    Bson::String(pattern) => pattern.as_str(),
                    Bson::RegularExpression(re) => re.pattern.as_str(),
                    _ => return Err(invalid("$regex value must be a string")),
                };
                Expression::Regex(field.clone(), build_regex(pattern, options)?)
            }
            "$options" if ops.contains_key("$regex") => continue,
            other => return Err(invalid(format!("unknown field operator: {other}"))),
        };
        conditions.push(condition);
    }

    if conditions.len() == 1
        && let Some(only) = conditions.pop()
    {
        return Ok(only);
    }
    Ok(Expression::And(conditions))
}

fn list(op: &str, operand: &Bson) -> Result<Vec<Bson>, StoreError> {
    match operand {
        Bson::Array(items) => Ok(items.clone()),
        _ => Err(invalid(format!("{op} value must be an array"))),
    }
}

fn build_regex(pattern: &str, options: &str) -> Result<Regex, StoreError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| invalid(format!("bad regex {pattern:?}: {e}")))
}

/// Evaluate `expr` against a document. `score` is the row's text relevance.
pub(crate) fn matches(doc: &Document, expr: &Expression, score: f64) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| matches(doc, c, score)),
        Expression::Or(children) => children.iter().any(|c| matches(doc, c, score)),
        Expression::Eq(field, expected) => equals_any(doc, field, expected),
        Expression::Ne(field, expected) => !equals_any(doc, field, expected),
        Expression::Cmp(field, op, bound) => values(doc, field)
            .into_iter()
            .any(|v| comparable(v, bound) && op.holds(compare(v, bound))),
        Expression::In(field, items) => items.iter().any(|item| equals_any(doc, field, item)),
        Expression::Nin(field, items) => !items.iter().any(|item| equals_any(doc, field, item)),
        Expression::Regex(field, re) => values(doc, field).into_iter().any(|v| match v {
            Bson::String(s) => re.is_match(s),
            _ => false,
        }),
        Expression::Exists(field, expected) => !values(doc, field).is_empty() == *expected,
        Expression::Text(_) => score > 0.0,
    }
}

fn values<'a>(doc: &'a Document, field: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    path::candidates(doc, field, &mut out);
    out
}

/// Equality against any value at `field`. Null also matches a missing field.
fn equals_any(doc: &Document, field: &str, expected: &Bson) -> bool {
    let found = values(doc, field);
    if matches!(expected, Bson::Null) && found.is_empty() {
        return true;
    }
    found.into_iter().any(|v| equals(v, expected))
}
