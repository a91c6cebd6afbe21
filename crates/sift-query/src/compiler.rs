use bson::{Document, doc};
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::filter::{Clause, FilterExpression, ForeignFilter, ResolvedIds, compile_condition, parse_value};
use crate::lookup::{LookupPlan, plan_lookups};
use crate::pipeline::{PipelineMode, PipelineParts, Stage, assemble};
use crate::projection::{EXCLUDE, INCLUDE, Projection};
use crate::request::Request;
use crate::schema::{Catalog, CollectionConfig};
use crate::search;
use crate::sort::{SCORE_FIELD, SortSpec, compile_sort};

/// Compiles requests against one collection of a catalog.
#[derive(Debug, Clone)]
pub struct Compiler<'a> {
    catalog: &'a Catalog,
    collection: String,
    config: &'a CollectionConfig,
    protected: Projection,
}

impl<'a> Compiler<'a> {
    pub fn new(catalog: &'a Catalog, collection: &str) -> Result<Self, QueryError> {
        let config = catalog.collection(collection)?;
        Ok(Self {
            catalog,
            collection: collection.to_string(),
            config,
            protected: protected_fields(config)?,
        })
    }

    /// Compile a request. The request is only read.
    pub fn compile(&self, request: &Request) -> Result<CompiledQuery, QueryError> {
        let options = &self.config.options;
        let get = |key: &str| {
            request
                .get(key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let page = get(&options.page_key)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);
        let limit = get(&options.limit_key)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(options.default_limit);
        let all_fields = matches!(get(&options.all_fields_key), Some("true" | "1"));
        let fields = get(&options.fields_key).or(options.default_fields.as_deref());
        let query = get(&options.query_key);
        let text_index = self.catalog.has_text_index(&self.collection);
        let text_search = query.is_some() && text_index;

        let requested = match fields {
            Some(fields) if !all_fields => Some(Projection::parse(fields)?.without(&self.protected)),
            _ => None,
        };

        let lookups = match &requested {
            Some(projection) => self.plan_lookups(projection)?,
            None => Vec::new(),
        };

        let mut filter = FilterExpression::new();
        for (key, value) in request.iter() {
            if !options.is_reserved(key) {
                self.add_field_filter(key, value, &mut filter);
            }
        }
        if let Some(query) = query {
            search::free_text(query, text_index, self.config, &mut filter);
        }
        if let Some(text) = get(&options.search_key) {
            search::normalized(text, self.config, &mut filter);
        }

        let sort = compile_sort(get(&options.sort_key), self.config, text_search)?;

        let unwind = match get(&options.unwind_key) {
            Some(path) if self.config.reference_path(path).is_some_and(|r| r.rest.is_some()) => {
                warn!(path, "cannot unwind a field of a referenced collection, ignoring");
                None
            }
            path => path.map(str::to_string),
        };

        let project = self.project_document(requested.as_ref(), &lookups, text_search);

        debug!(
            collection = %self.collection,
            page,
            limit,
            lookups = lookups.len(),
            foreign_filters = filter.foreign_filters().len(),
            text_search,
            "compiled request"
        );

        Ok(CompiledQuery {
            collection: self.collection.clone(),
            filter,
            sort,
            projection: requested,
            project,
            lookups,
            unwind,
            page,
            limit,
            text_search,
        })
    }

    /// Plan lookups and strip each target collection's protected fields
    /// from the sub-projections.
    fn plan_lookups(&self, projection: &Projection) -> Result<Vec<LookupPlan>, QueryError> {
        let mut plans = plan_lookups(projection, self.config);
        for plan in &mut plans {
            if let Some(target) = self.catalog.get(&plan.collection) {
                let protected = protected_fields(target)?;
                if !protected.is_empty() {
                    plan.projection = plan.projection.without(&protected);
                }
            }
        }
        Ok(plans)
    }

    fn add_field_filter(&self, key: &str, value: &str, filter: &mut FilterExpression) {
        let parsed = parse_value(value);

        let clause = if let Some(metadata) = self.config.metadata(key) {
            Clause::Field {
                path: key.to_string(),
                condition: compile_condition(&parsed, Some(metadata)),
            }
        } else if let Some(reference) = self.config.reference_path(key)
            && let Some(rest) = reference.rest
        {
            let metadata = self
                .catalog
                .get(reference.collection)
                .and_then(|target| target.metadata(rest));
            let condition = compile_condition(&parsed, metadata);
            filter.foreign(
                reference.field,
                reference.collection,
                doc! { rest: condition },
            )
        } else if key.contains('.') {
            Clause::Field {
                path: key.to_string(),
                condition: compile_condition(&parsed, None),
            }
        } else {
            debug!(field = key, "ignoring filter on unknown field");
            return;
        };

        if parsed.or {
            filter.any.push(clause);
        } else {
            filter.all.push(clause);
        }
    }

    fn project_document(
        &self,
        requested: Option<&Projection>,
        lookups: &[LookupPlan],
        text_search: bool,
    ) -> Option<Document> {
        let mut project = match requested {
            Some(projection) => {
                let mut canonical = projection.canonical();
                // joined fields are fetched as ids and filled in after the query
                for plan in lookups {
                    canonical.replace_path(&plan.field, INCLUDE);
                }
                let mut project = canonical.to_document();
                if project.is_empty() {
                    project.insert("_id", INCLUDE);
                }
                project
            }
            None => self.protected.canonical().to_document(),
        };
        if text_search {
            project.insert(SCORE_FIELD, doc! { "$meta": "textScore" });
        }
        (!project.is_empty()).then_some(project)
    }
}

fn protected_fields(config: &CollectionConfig) -> Result<Projection, QueryError> {
    match config.options.protected_fields.as_deref() {
        Some(fields) => Projection::parse_with_marker(fields, EXCLUDE),
        None => Ok(Projection::new()),
    }
}

/// A request compiled against one collection, ready to be laid out as a
/// pipeline once its foreign filters are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub collection: String,
    pub filter: FilterExpression,
    pub sort: SortSpec,
    /// The requested selection with protected fields removed. `None` when
    /// every field is returned.
    pub projection: Option<Projection>,
    /// The `$project` stage body.
    pub project: Option<Document>,
    pub lookups: Vec<LookupPlan>,
    pub unwind: Option<String>,
    pub page: u64,
    pub limit: u64,
    pub text_search: bool,
}

impl CompiledQuery {
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    pub fn foreign_filters(&self) -> Vec<&ForeignFilter> {
        self.filter.foreign_filters()
    }

    pub fn pipeline(
        &self,
        mode: PipelineMode,
        resolved: &ResolvedIds,
        pre_stages: &[Document],
    ) -> Vec<Stage> {
        assemble(
            PipelineParts {
                filter: Some(self.filter.to_document(resolved)),
                pre_stages,
                sort: Some(self.sort.to_document()),
                unwind: self.unwind.as_deref(),
                skip: self.skip(),
                limit: self.limit,
                project: self.project.as_ref(),
            },
            mode,
        )
    }
}
