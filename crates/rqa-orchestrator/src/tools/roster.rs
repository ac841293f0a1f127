use super::DEFAULT_SEARCH_LIMIT;
use crate::tool::{Tool, ToolContext, ToolError, ToolOutput, parse_params, schema_of};
use rqa_core::store::StoreQuery;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RosterRole {
    Students,
    Faculty,
}

impl RosterRole {
    /// Collection name fragment holding this kind of person.
    fn collection(self) -> &'static str {
        match self {
            Self::Students => "student",
            Self::Faculty => "faculty",
        }
    }
}

/// Parameters for `list_people`.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct RosterParams {
    /// Metadata filters, e.g. {"program": "BSCS", "section": "A"}
    #[serde(default)]
    pub(crate) filters: Option<Map<String, Value>>,
    /// Only students or only faculty
    #[serde(default)]
    pub(crate) role: Option<RosterRole>,
}

/// Distinct people matching the filters, one record each.
pub struct ListPeople;

impl Tool for ListPeople {
    fn name(&self) -> &str {
        "list_people"
    }

    fn description(&self) -> &str {
        "List distinct students or faculty matching metadata filters such as program, year level or section."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<RosterParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: RosterParams = parse_params(self.name(), params)?;

        let filter = match params.filters {
            Some(ref filters) => ctx.normalizer.build_filter(filters, ctx.aliases)?,
            None => None,
        };
        let mut query = StoreQuery::default()
            .with_filter(filter)
            .with_limit(DEFAULT_SEARCH_LIMIT.max(ctx.resolution.search_limit) * 4);
        if let Some(role) = params.role {
            query = query.with_collection(role.collection());
        }

        let resolver = ctx.resolver();
        let people: Vec<_> = ctx
            .store
            .query(&query)?
            .into_iter()
            .filter(|doc| resolver.identity_name(doc).is_some())
            .collect();
        let before = people.len();
        let people = resolver.dedupe_people(people);
        if people.len() < before {
            tracing::debug!("merged {} duplicate person records", before - people.len());
        }
        Ok(ToolOutput::documents_or(
            people,
            "No people matched those filters.",
        ))
    }
}
