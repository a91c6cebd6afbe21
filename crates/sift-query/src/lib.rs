mod coerce;
mod compiler;
mod error;
mod filter;
mod lookup;
mod options;
mod pipeline;
mod projection;
mod request;
mod schema;
mod search;
mod sort;

pub use coerce::coerce;
pub use compiler::{CompiledQuery, Compiler};
pub use error::{CoercionError, QueryError};
pub use filter::{
    Clause, FilterExpression, ForeignFilter, ResolvedIds, ValueExpr, compile_condition,
    parse_value,
};
pub use lookup::{LookupPlan, plan_lookups};
pub use options::{PaginationStrategy, QueryOptions};
pub use pipeline::{
    DATA_FIELD, PipelineMode, PipelineParts, Stage, TOTAL_FIELD, assemble, to_documents,
};
pub use projection::{EXCLUDE, INCLUDE, Projection, ProjectionNode};
pub use request::Request;
pub use schema::{Catalog, CollectionConfig, FieldMetadata, FieldType, ReferencePath};
pub use search::normalize_search_text;
pub use sort::{SCORE_FIELD, SortDirection, SortSpec, compile_sort, parse_sort};
