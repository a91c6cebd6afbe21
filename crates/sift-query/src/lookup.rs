use crate::projection::{Projection, ProjectionNode};
use crate::schema::CollectionConfig;

/// A planned join keyed by a local reference field.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupPlan {
    /// Local path holding the id(s), e.g. `bestFriend` or `amigo.bestFriend`.
    pub field: String,
    /// Collection the ids point into.
    pub collection: String,
    /// Fields to fetch from the foreign documents.
    pub projection: Projection,
    /// The field holds an array of ids.
    pub many: bool,
}

/// Walk a (reduced) projection and collect one plan per referenced field.
///
/// A subtree under a reference field becomes that plan's sub-projection and
/// is not descended into. A subtree under any other field is searched with
/// the field as a path prefix. A dotted key whose prefix is a reference folds
/// its remainder into the plan's sub-projection. Plans for the same field are
/// merged and kept in first-seen order.
pub fn plan_lookups(projection: &Projection, config: &CollectionConfig) -> Vec<LookupPlan> {
    let mut plans = Vec::new();
    walk(projection, None, config, &mut plans);
    plans
}

fn walk(
    projection: &Projection,
    prefix: Option<&str>,
    config: &CollectionConfig,
    plans: &mut Vec<LookupPlan>,
) {
    for (key, node) in projection.iter() {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        };

        match config.reference_path(&path) {
            Some(reference) => {
                let sub = match (reference.rest, node) {
                    (None, ProjectionNode::Nested(sub)) => sub.clone(),
                    // A bare reference field selects the id itself.
                    (None, ProjectionNode::Marker(_)) => continue,
                    (Some(rest), node) => {
                        let mut sub = Projection::new();
                        sub.merge_path(rest, node.clone());
                        sub
                    }
                };
                add_plan(
                    plans,
                    LookupPlan {
                        field: reference.field.to_string(),
                        collection: reference.collection.to_string(),
                        projection: sub,
                        many: reference.many,
                    },
                );
            }
            None => {
                if let ProjectionNode::Nested(sub) = node {
                    walk(sub, Some(&path), config, plans);
                }
            }
        }
    }
}

fn add_plan(plans: &mut Vec<LookupPlan>, plan: LookupPlan) {
    match plans.iter_mut().find(|p| p.field == plan.field) {
        Some(existing) => existing.projection.merge(&plan.projection),
        None => plans.push(plan),
    }
}
