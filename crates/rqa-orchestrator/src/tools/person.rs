use super::DEFAULT_SEARCH_LIMIT;
use crate::tool::{
    Tool, ToolContext, ToolError, ToolOutput, loose_opt_string, loose_string, parse_params,
    schema_of,
};
use rqa_core::document::{Document, Entity, scalar_to_string};
use rqa_core::store::StoreQuery;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Fields of a student record that identify their class schedule.
const CLASS_FIELDS: [&str; 3] = ["program", "year_level", "section"];

/// Parameters for tools that take only a person.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct PersonParams {
    /// Name of the person, in any spelling or order, with or without titles
    #[serde(deserialize_with = "loose_string")]
    #[schemars(with = "String")]
    pub(crate) person_name: String,
}

/// Parameters for `get_person_schedule`.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct ScheduleParams {
    /// Name of the student or faculty member
    #[serde(deserialize_with = "loose_string")]
    #[schemars(with = "String")]
    pub(crate) person_name: String,
    /// Restrict to one day, e.g. "Monday"
    #[serde(default, deserialize_with = "loose_opt_string")]
    #[schemars(with = "Option<String>")]
    pub(crate) day: Option<String>,
}

/// Parameters for `get_student_grades`.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct GradesParams {
    /// Name of the student
    #[serde(deserialize_with = "loose_string")]
    #[schemars(with = "String")]
    pub(crate) person_name: String,
    /// Restrict to one subject code or title
    #[serde(default, deserialize_with = "loose_opt_string")]
    #[schemars(with = "Option<String>")]
    pub(crate) subject: Option<String>,
}

/// Resolve the person or produce the "could not find" status.
fn resolve(ctx: &ToolContext<'_>, name: &str) -> Result<Result<Entity, ToolOutput>, ToolError> {
    let entity = ctx.resolver().resolve(name)?;
    if entity.is_empty() {
        tracing::info!("no person matches '{}'", name);
        return Ok(Err(ToolOutput::unknown_person(name)));
    }
    Ok(Ok(entity))
}

fn push_unique(out: &mut Vec<Document>, seen: &mut HashSet<String>, doc: Document) {
    if seen.insert(doc.content.clone()) {
        out.push(doc);
    }
}

/// Case-insensitive: does the field (any spelling) or the content mention `needle`?
fn mentions(ctx: &ToolContext<'_>, doc: &Document, field: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    let in_field = ctx
        .aliases
        .lookup(&doc.metadata, field)
        .and_then(scalar_to_string)
        .is_some_and(|v| v.to_lowercase().contains(&needle));
    in_field || doc.content.to_lowercase().contains(&needle)
}

fn in_collection(doc: &Document, fragment: &str) -> bool {
    doc.source_collection.to_lowercase().contains(fragment)
}

/// Resolve a name to a canonical identity with aliases.
pub struct ResolvePerson;

impl Tool for ResolvePerson {
    fn name(&self) -> &str {
        "resolve_person"
    }

    fn description(&self) -> &str {
        "Resolve a person's name to their canonical identity, known aliases and main record."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PersonParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: PersonParams = parse_params(self.name(), params)?;
        Ok(match resolve(ctx, &params.person_name)? {
            Ok(entity) => ToolOutput::Entity(entity),
            Err(status) => status,
        })
    }
}

/// Everything on record about one person.
pub struct GetPersonProfile;

impl Tool for GetPersonProfile {
    fn name(&self) -> &str {
        "get_person_profile"
    }

    fn description(&self) -> &str {
        "Get a person's main record followed by every other record that names them."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PersonParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: PersonParams = parse_params(self.name(), params)?;
        let entity = match resolve(ctx, &params.person_name)? {
            Ok(entity) => entity,
            Err(status) => return Ok(status),
        };

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        if let Some(primary) = entity.primary_document.clone() {
            push_unique(&mut out, &mut seen, primary);
        }
        for doc in ctx.resolver().records_for(&entity)? {
            push_unique(&mut out, &mut seen, doc);
        }
        Ok(ToolOutput::documents_or(
            out,
            format!("No records found for {}.", entity.primary_name),
        ))
    }
}

/// A person's record followed by their schedules.
pub struct GetPersonSchedule;

impl GetPersonSchedule {
    /// Class schedules matching a student's program, year level and section.
    fn class_schedules(
        ctx: &ToolContext<'_>,
        person: &Document,
    ) -> Result<Vec<Document>, ToolError> {
        let mut filters = Map::new();
        for field in CLASS_FIELDS {
            if let Some(value) = ctx.aliases.lookup(&person.metadata, field) {
                filters.insert(field.to_string(), value.clone());
            }
        }
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ctx.normalizer.build_filter(&filters, ctx.aliases)?;
        let query = StoreQuery::default()
            .with_filter(filter)
            .with_collection("schedule")
            .with_limit(DEFAULT_SEARCH_LIMIT);
        Ok(ctx.store.query(&query)?)
    }
}

impl Tool for GetPersonSchedule {
    fn name(&self) -> &str {
        "get_person_schedule"
    }

    fn description(&self) -> &str {
        "Get a person's record followed by the class or teaching schedules that apply to them."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ScheduleParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: ScheduleParams = parse_params(self.name(), params)?;
        let entity = match resolve(ctx, &params.person_name)? {
            Ok(entity) => entity,
            Err(status) => return Ok(status),
        };

        let mut schedules = Vec::new();
        let mut seen = HashSet::new();
        let person = entity.primary_document.clone();
        if let Some(ref person) = person {
            seen.insert(person.content.clone());
        }
        // Schedules that name the person (faculty loads, advisers).
        for doc in ctx.resolver().records_for(&entity)? {
            if in_collection(&doc, "schedule") {
                push_unique(&mut schedules, &mut seen, doc);
            }
        }
        if let Some(ref person) = person {
            for doc in Self::class_schedules(ctx, person)? {
                push_unique(&mut schedules, &mut seen, doc);
            }
        }
        if let Some(ref day) = params.day {
            schedules.retain(|doc| mentions(ctx, doc, "day", day));
        }

        let mut out: Vec<Document> = person.into_iter().collect();
        out.extend(schedules);
        Ok(ToolOutput::documents_or(
            out,
            format!("No schedule found for {}.", entity.primary_name),
        ))
    }
}

/// Grade records of one student.
pub struct GetStudentGrades;

impl Tool for GetStudentGrades {
    fn name(&self) -> &str {
        "get_student_grades"
    }

    fn description(&self) -> &str {
        "Get a student's grade records, optionally for one subject."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<GradesParams>()
    }

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let params: GradesParams = parse_params(self.name(), params)?;
        let entity = match resolve(ctx, &params.person_name)? {
            Ok(entity) => entity,
            Err(status) => return Ok(status),
        };

        let mut grades: Vec<Document> = ctx
            .resolver()
            .records_for(&entity)?
            .into_iter()
            .filter(|doc| {
                in_collection(doc, "grade") || ctx.aliases.lookup(&doc.metadata, "grade").is_some()
            })
            .collect();
        if let Some(ref subject) = params.subject {
            grades.retain(|doc| mentions(ctx, doc, "subject", subject));
        }
        Ok(ToolOutput::documents_or(
            grades,
            format!("No grade records found for {}.", entity.primary_name),
        ))
    }
}
