use bson::{Bson, doc};
use tracing::warn;

use crate::filter::{Clause, FilterExpression, ResolvedIds};
use crate::schema::CollectionConfig;

/// Lower-case `input` and strip everything that is not alphanumeric.
///
/// `"Ñandú, Luis"` becomes `"ñandúluis"`.
pub fn normalize_search_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compile a free-text query.
///
/// Collections with a text index get a native `$text` search. Otherwise each
/// configured field must contain every whitespace-separated term, and the
/// per-field clauses join the request-wide `$or`.
pub(crate) fn free_text(
    query: &str,
    text_index: bool,
    config: &CollectionConfig,
    expr: &mut FilterExpression,
) {
    if text_index {
        expr.text = Some(query.to_string());
        return;
    }

    let terms: Vec<String> = query.split_whitespace().map(regex::escape).collect();
    if terms.is_empty() {
        return;
    }

    let fields = config.options.default_query_fields();
    if fields.is_empty() {
        warn!("free-text query ignored, no fields configured for the default query");
        return;
    }

    for field in fields {
        let foreign = config
            .reference_path(field)
            .and_then(|r| r.rest.map(|rest| (r.field, r.collection, rest)));
        match foreign {
            Some((local, collection, rest)) => {
                let filter = contains_all(rest, &terms).to_document(&ResolvedIds::new());
                let clause = expr.foreign(local, collection, filter);
                expr.any.push(clause);
            }
            None => expr.any.push(contains_all(field, &terms)),
        }
    }
}

fn contains_all(path: &str, terms: &[String]) -> Clause {
    Clause::All(
        terms
            .iter()
            .map(|term| Clause::Field {
                path: path.to_string(),
                condition: Bson::Document(doc! { "$regex": term.as_str(), "$options": "i" }),
            })
            .collect(),
    )
}

/// Compile a typeahead search over the pre-normalized search fields.
pub(crate) fn normalized(text: &str, config: &CollectionConfig, expr: &mut FilterExpression) {
    let needle = normalize_search_text(text);
    if needle.is_empty() {
        return;
    }

    let fields = &config.options.fields_for_default_search;
    if fields.is_empty() {
        warn!("search ignored, no fields configured for the default search");
        return;
    }

    let pattern = regex::escape(&needle);
    expr.all.push(Clause::Any(
        fields
            .iter()
            .map(|field| Clause::Field {
                path: field.clone(),
                condition: Bson::Document(doc! { "$regex": pattern.as_str() }),
            })
            .collect(),
    ));
}
