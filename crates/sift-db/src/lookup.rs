use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use bson::{Bson, Document};
use futures::future::try_join_all;
use sift_query::{LookupPlan, SortDirection};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::path;
use crate::store::Store;
use crate::value::compare;

/// Distinct non-null ids at `field` across the batch, in first-seen order.
pub(crate) fn collect_ids(docs: &[Document], field: &str) -> Vec<Bson> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for doc in docs {
        let mut found = Vec::new();
        path::leaves(doc, field, &mut found);
        for id in found {
            if !matches!(id, Bson::Null) && seen.insert(id_key(id)) {
                ids.push(id.clone());
            }
        }
    }
    ids
}

fn id_key(id: &Bson) -> String {
    id.to_string()
}

/// Fetch every planned join concurrently and merge the results into `docs`.
///
/// Plans with no ids in the batch issue no query. An id with no matching
/// foreign document leaves the field unset.
pub(crate) async fn resolve<S: Store>(
    store: &S,
    plans: &[LookupPlan],
    docs: &mut [Document],
) -> Result<(), StoreError> {
    let mut pending = Vec::new();
    for plan in plans {
        let ids = collect_ids(docs, &plan.field);
        if ids.is_empty() {
            debug!(field = %plan.field, "no ids in batch, skipping lookup");
            continue;
        }
        pending.push((plan, ids));
    }

    let fetched = try_join_all(pending.iter().map(|(plan, ids)| async move {
        let mut projection = plan.projection.canonical().to_document();
        if projection.is_empty() {
            projection.insert("_id", 1);
        }
        trace!(
            collection = %plan.collection,
            field = %plan.field,
            ids = ids.len(),
            "fetching lookup"
        );
        let found = store
            .find_by_ids(&plan.collection, Some(ids.as_slice()), &projection, None)
            .await?;
        Ok::<_, StoreError>((*plan, found))
    }))
    .await?;

    for (plan, found) in fetched {
        debug!(field = %plan.field, found = found.len(), "merging lookup");
        let by_id: HashMap<String, Document> = found
            .into_iter()
            .filter_map(|doc| Some((id_key(doc.get("_id")?), doc)))
            .collect();
        for doc in docs.iter_mut() {
            merge(doc, plan, &by_id);
        }
    }
    Ok(())
}

fn merge(doc: &mut Document, plan: &LookupPlan, by_id: &HashMap<String, Document>) {
    let lookup = |id: &Bson| by_id.get(&id_key(id)).cloned().map(Bson::Document);
    path::update(doc, &plan.field, &mut |value| match value {
        Bson::Array(items) => Some(Bson::Array(items.iter().filter_map(lookup).collect())),
        Bson::Null => Some(Bson::Null),
        id => lookup(&id),
    });
}

/// Stably order a merged batch by paths that reach into joined documents.
pub(crate) fn sort_batch(docs: &mut [Document], keys: &[(String, SortDirection)]) {
    let null = Bson::Null;
    docs.sort_by(|a, b| {
        for (key, direction) in keys {
            let left = path::get(a, key).unwrap_or(&null);
            let right = path::get(b, key).unwrap_or(&null);
            let ordering = match direction {
                SortDirection::Desc => compare(right, left),
                _ => compare(left, right),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
