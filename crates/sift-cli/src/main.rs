mod load;

use std::path::PathBuf;
use std::sync::Arc;

use bson::{Bson, Document};
use serde_json::{Value, json};
use sift_db::{DbError, FindOptions, SmartQuery};
use sift_query::{Catalog, PipelineMode, QueryError, Request};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sift <catalog.json> <data.json> <collection> [key=value]... \
[--count | --page | --pipeline] [--pre '<json stage array>']";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid data: {0}")]
    Data(String),

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Query(#[from] DbError),
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Error::Query(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Find,
    Count,
    Page,
    Pipeline,
}

#[derive(Debug)]
struct Args {
    catalog: PathBuf,
    data: PathBuf,
    collection: String,
    request: Request,
    output: Output,
    pre_pipeline: Vec<Document>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, Error> {
    let mut positional = Vec::new();
    let mut request = Request::new();
    let mut output = Output::Find;
    let mut pre_pipeline = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--count" => output = Output::Count,
            "--page" => output = Output::Page,
            "--pipeline" => output = Output::Pipeline,
            "--pre" => {
                let raw = args
                    .next()
                    .ok_or_else(|| Error::Usage("--pre needs a JSON array".into()))?;
                pre_pipeline = parse_stages(&raw)?;
            }
            flag if flag.starts_with("--") => {
                return Err(Error::Usage(format!("unknown flag {flag}\n{USAGE}")));
            }
            _ if positional.len() < 3 => positional.push(arg),
            _ => {
                let (key, value) = arg
                    .split_once('=')
                    .ok_or_else(|| Error::Usage(format!("expected key=value, got {arg:?}")))?;
                request.insert(key, value);
            }
        }
    }

    let [catalog, data, collection]: [String; 3] = positional
        .try_into()
        .map_err(|_| Error::Usage(USAGE.into()))?;
    Ok(Args {
        catalog: catalog.into(),
        data: data.into(),
        collection,
        request,
        output,
        pre_pipeline,
    })
}

fn parse_stages(raw: &str) -> Result<Vec<Document>, Error> {
    let value: Value = serde_json::from_str(raw).map_err(|source| Error::Parse {
        path: "--pre".into(),
        source,
    })?;
    match Bson::try_from(value) {
        Ok(Bson::Array(stages)) => stages
            .into_iter()
            .map(|stage| match stage {
                Bson::Document(stage) => Ok(stage),
                other => Err(Error::Usage(format!("pipeline stage must be an object, got {other}"))),
            })
            .collect(),
        Ok(_) => Err(Error::Usage("--pre must be a JSON array".into())),
        Err(e) => Err(Error::Usage(format!("--pre: {e}"))),
    }
}

fn to_json(docs: Vec<Document>) -> Value {
    Value::Array(
        docs.into_iter()
            .map(|doc| Bson::Document(doc).into_relaxed_extjson())
            .collect(),
    )
}

async fn run(args: Args) -> Result<Value, Error> {
    let catalog = Catalog::from_json(&load::read_json(&args.catalog)?.to_string())?;
    let store = load::store(&catalog, load::read_json(&args.data)?)?;
    let query = SmartQuery::new(Arc::new(catalog), &args.collection, store)?;
    let options = FindOptions {
        pre_pipeline: args.pre_pipeline,
    };

    info!(collection = %args.collection, output = ?args.output, "running query");
    let value = match args.output {
        Output::Find => to_json(query.find(&args.request, &options).await?),
        Output::Count => json!(query.count(&args.request, &options).await?),
        Output::Page => {
            let page = query.find_page(&args.request, &options).await?;
            json!({
                "data": to_json(page.data),
                "pagination": {
                    "total": page.pagination.total,
                    "page": page.pagination.page,
                    "pages": page.pagination.pages,
                    "limit": page.pagination.limit,
                },
            })
        }
        Output::Pipeline => {
            to_json(query.pipeline(&args.request, PipelineMode::Find, &options).await?)
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match parse_args(std::env::args().skip(1)) {
        Ok(args) => run(args).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("failed to render output: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, Error> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn positional_then_request_pairs() {
        let parsed = args(&[
            "catalog.json",
            "data.json",
            "persons",
            "$limit=2",
            "name={$includes}narv",
            "--page",
        ])
        .unwrap();
        assert_eq!(parsed.collection, "persons");
        assert_eq!(parsed.output, Output::Page);
        assert_eq!(parsed.request.get("$limit"), Some("2"));
        assert_eq!(parsed.request.get("name"), Some("{$includes}narv"));
    }

    #[test]
    fn pre_pipeline_flag() {
        let parsed = args(&[
            "c.json",
            "d.json",
            "persons",
            "--pre",
            r#"[{ "$unwind": "$colours" }]"#,
        ])
        .unwrap();
        assert_eq!(parsed.pre_pipeline, vec![bson::doc! { "$unwind": "$colours" }]);
        assert!(args(&["c.json", "d.json", "persons", "--pre", "{}"]).is_err());
    }

    #[test]
    fn usage_errors() {
        assert!(matches!(args(&["c.json"]), Err(Error::Usage(_))));
        assert!(matches!(
            args(&["c.json", "d.json", "persons", "oops"]),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            args(&["c.json", "d.json", "persons", "--verbose"]),
            Err(Error::Usage(_))
        ));
    }
}
