use bson::{Bson, Document, doc};

/// Name of the count field in count and facet output.
pub const TOTAL_FIELD: &str = "total";
/// Name of the data field in facet output.
pub const DATA_FIELD: &str = "data";

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    /// A caller-supplied stage passed through untouched.
    Raw(Document),
    Sort(Document),
    Unwind { path: String, preserve_empty: bool },
    Skip(u64),
    Limit(u64),
    Project(Document),
    Count(String),
    Facet { total: Vec<Stage>, data: Vec<Stage> },
}

impl Stage {
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match(filter) => doc! { "$match": filter.clone() },
            Stage::Raw(stage) => stage.clone(),
            Stage::Sort(sort) => doc! { "$sort": sort.clone() },
            Stage::Unwind {
                path,
                preserve_empty,
            } => doc! {
                "$unwind": {
                    "path": format!("${path}"),
                    "preserveNullAndEmptyArrays": *preserve_empty,
                }
            },
            Stage::Skip(n) => doc! { "$skip": to_i64(*n) },
            Stage::Limit(n) => doc! { "$limit": to_i64(*n) },
            Stage::Project(projection) => doc! { "$project": projection.clone() },
            Stage::Count(field) => doc! { "$count": field.clone() },
            Stage::Facet { total, data } => doc! {
                "$facet": {
                    TOTAL_FIELD: to_documents(total),
                    DATA_FIELD: to_documents(data),
                }
            },
        }
    }

    /// The stage operator, e.g. `$match`. Raw stages report their first key.
    pub fn name(&self) -> &str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Raw(stage) => stage.keys().next().map(String::as_str).unwrap_or(""),
            Stage::Sort(_) => "$sort",
            Stage::Unwind { .. } => "$unwind",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
            Stage::Count(_) => "$count",
            Stage::Facet { .. } => "$facet",
        }
    }
}

fn to_i64(n: u64) -> Bson {
    Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX))
}

pub fn to_documents(stages: &[Stage]) -> Vec<Document> {
    stages.iter().map(Stage::to_document).collect()
}

/// What the assembled pipeline returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// The page of documents.
    Find,
    /// A single `{ total: n }` document, or nothing when nothing matches.
    Count,
    /// A single `{ total: [{ total: n }], data: [...] }` document.
    Page,
}

/// The parts of a compiled request that shape a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineParts<'a> {
    pub filter: Option<Document>,
    pub pre_stages: &'a [Document],
    pub sort: Option<Document>,
    pub unwind: Option<&'a str>,
    pub skip: u64,
    pub limit: u64,
    pub project: Option<&'a Document>,
}

/// Lay out the stages for `mode`.
///
/// The filter comes first so the store can use its indexes, followed by the
/// caller's stages. Data stages run sort, unwind, skip, limit and project in
/// that order.
pub fn assemble(parts: PipelineParts<'_>, mode: PipelineMode) -> Vec<Stage> {
    let mut stages = Vec::new();
    if let Some(filter) = parts.filter.filter(|f| !f.is_empty()) {
        stages.push(Stage::Match(filter));
    }
    stages.extend(parts.pre_stages.iter().cloned().map(Stage::Raw));

    let unwind = parts.unwind.map(|path| Stage::Unwind {
        path: path.to_string(),
        preserve_empty: true,
    });

    let mut data = Vec::new();
    if let Some(sort) = parts.sort.filter(|s| !s.is_empty()) {
        data.push(Stage::Sort(sort));
    }
    let paging = [Stage::Skip(parts.skip), Stage::Limit(parts.limit)];
    let project = parts.project.map(|p| Stage::Project(p.clone()));

    match mode {
        PipelineMode::Find => {
            stages.extend(data);
            stages.extend(unwind);
            stages.extend(paging);
            stages.extend(project);
        }
        PipelineMode::Count => {
            stages.extend(unwind);
            stages.push(Stage::Count(TOTAL_FIELD.to_string()));
        }
        PipelineMode::Page => {
            let mut total: Vec<Stage> = unwind.iter().cloned().collect();
            total.push(Stage::Count(TOTAL_FIELD.to_string()));
            data.extend(unwind);
            data.extend(paging);
            data.extend(project);
            stages.push(Stage::Facet { total, data });
        }
    }
    stages
}
