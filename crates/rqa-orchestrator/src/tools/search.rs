use super::DEFAULT_SEARCH_LIMIT;
use crate::tool::{
    Tool, ToolContext, ToolError, ToolOutput, loose_opt_string, parse_params, schema_of,
};
use rqa_core::filter::ContentFilter;
use rqa_core::store::StoreQuery;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Parameters for `search_database`.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct SearchParams {
    /// Free-text query; omitted means match everything the filters allow
    #[serde(default, deserialize_with = "loose_opt_string")]
    #[schemars(with = "Option<String>")]
    pub(crate) query: Option<String>,
    /// Metadata filters keyed by field, e.g. {"program": "BSCS", "year_level": "2"}
    #[serde(default)]
    pub(crate) filters: Option<Map<String, Value>>,
    /// Content filter using $contains / $not_contains, combinable with $and / $or
    #[serde(default)]
    pub(crate) document_filter: Option<Value>,
    /// Case-insensitive substring of the collection name, e.g. "schedule"
    #[serde(default, deserialize_with = "loose_opt_string")]
    #[schemars(with = "Option<String>")]
    pub(crate) collection_filter: Option<String>,
    /// Maximum number of records to return
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

/// Generic filtered search over every collection.
pub struct SearchDatabase;

impl Tool for SearchDatabase {
    fn name(&self) -> &str {
        "search_database"
    }

    fn description(&self) -> &str {
        "Search records by text, metadata filters, content filters and collection name."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: SearchParams = parse_params(self.name(), params)?;

        let filter = match params.filters {
            Some(ref filters) => ctx.normalizer.build_filter(filters, ctx.aliases)?,
            None => None,
        };
        let document_filter = match params.document_filter {
            Some(Value::Null) | None => None,
            Some(ref value) => Some(ContentFilter::from_value(value)?),
        };

        let mut query = StoreQuery {
            text: params.query,
            ..StoreQuery::default()
        }
        .with_filter(filter)
        .with_document_filter(document_filter)
        .with_limit(params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        if let Some(collection) = params.collection_filter {
            query = query.with_collection(collection);
        }

        let docs = ctx.store.query(&query)?;
        tracing::debug!("search_database returned {} records", docs.len());
        Ok(ToolOutput::documents_or(docs, "No records matched the search."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rqa_core::config::{NormalizationConfig, ResolutionConfig};
    use rqa_core::document::Document;
    use rqa_core::schema::SchemaAliasMap;
    use rqa_core::store::{DocumentStore, InMemoryStore};
    use rqa_resolve::normalize::FilterNormalizer;
    use serde_json::json;

    fn run(store: &InMemoryStore, params: Value) -> ToolOutput {
        let aliases = SchemaAliasMap::from_documents(&store.all_documents());
        let normalizer = FilterNormalizer::new(&NormalizationConfig::default().programs);
        let resolution = ResolutionConfig::default();
        let ctx = ToolContext {
            store,
            aliases: &aliases,
            normalizer: &normalizer,
            resolution: &resolution,
        };
        SearchDatabase
            .run(params.as_object().unwrap(), &ctx)
            .unwrap()
    }

    fn make_store() -> InMemoryStore {
        InMemoryStore::from_documents(vec![
            Document::new("students", "Lee Pace BSCS 2A")
                .with_meta("course", "BS Computer Science")
                .with_meta("yr", "2nd Year"),
            Document::new("students", "Ana Cruz BSIT 1B")
                .with_meta("course", "BSIT")
                .with_meta("yr", "1"),
            Document::new("faculty", "Dr. Maria Santos, adviser of BSCS 2A")
                .with_meta("staff_name", "Dr. Maria Santos"),
        ])
    }

    #[test]
    fn test_filters_are_normalized() {
        let out = run(&make_store(), json!({"filters": {"program": "bscs", "year": 2}}));
        let ToolOutput::Documents(docs) = out else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.starts_with("Lee Pace"));
    }

    #[test]
    fn test_document_filter_and_collection() {
        let out = run(
            &make_store(),
            json!({"document_filter": {"$contains": "BSCS"}, "collection_filter": "STUDENT"}),
        );
        let ToolOutput::Documents(docs) = out else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_nothing_found_is_empty_status() {
        let out = run(&make_store(), json!({"query": "Zebulon"}));
        assert!(matches!(out, ToolOutput::Status(_)));
    }
}
