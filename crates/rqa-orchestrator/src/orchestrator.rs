//! One question in, one prose answer out.
//!
//! A turn moves through `Planning → Validating → Executing → (Fallback) →
//! Synthesizing → Done`. Rejected plans, unknown tools and bad placeholders end
//! in `Error`, which still produces a synthesized reply. Nothing here returns
//! `Err` to the caller.

use crate::context::{ContextStatus, EvidenceContext};
use crate::prompts::{self, SYNTH_SYSTEM};
use crate::recorder::PlanRecorder;
use crate::registry::{RegistryError, ToolRegistry};
use crate::tool::{ToolContext, ToolOutput};
use rqa_core::config::{LlmMode, Phase, PlanningMode, RqaConfig};
use rqa_core::document::StepResults;
use rqa_core::plan::{Plan, ToolCall};
use rqa_core::schema::SchemaAliasMap;
use rqa_core::session::{Session, Turn};
use rqa_core::store::{DocumentStore, StoreQuery};
use rqa_llm::client::{is_unavailable, strip_error_marker};
use rqa_llm::json::parse_json_response;
use rqa_llm::{ChatRequest, LanguageModel};
use rqa_resolve::normalize::FilterNormalizer;
use rqa_resolve::placeholder::{PlaceholderError, PlaceholderResolver};
use rqa_resolve::validate::{PlanValidator, ValidationError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Planning,
    Validating,
    Executing,
    Fallback,
    Synthesizing,
    Done,
    Error,
}

/// Why a turn left the happy path.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("planner reply is not usable: {0}")]
    PlannerFormat(String),
    #[error("plan rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error(transparent)]
    Placeholder(#[from] PlaceholderError),
}

/// Everything a caller (or a recorder) may want to know about a finished turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub query: String,
    pub answer: String,
    pub plan: Option<Plan>,
    pub status: ContextStatus,
    pub states: Vec<TurnState>,
    pub fallback_used: bool,
    pub error: Option<String>,
}

/// Evidence gathered before synthesis.
struct Gathered {
    context: EvidenceContext,
    plan: Option<Plan>,
    fallback_used: bool,
    error: Option<String>,
}

#[derive(Default)]
struct Trace {
    states: Vec<TurnState>,
}

impl Trace {
    fn enter(&mut self, state: TurnState) {
        tracing::debug!("turn state: {:?}", state);
        self.states.push(state);
    }

    fn failed(&self) -> bool {
        self.states.last() == Some(&TurnState::Error)
    }
}

pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    llm: Arc<dyn LanguageModel>,
    aliases: SchemaAliasMap,
    normalizer: FilterNormalizer,
    registry: ToolRegistry,
    validator: PlanValidator,
    config: RqaConfig,
    recorder: Option<Box<dyn PlanRecorder>>,
}

impl Orchestrator {
    /// Build an orchestrator. The alias map is computed once from the store
    /// contents and the configured alias groups.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LanguageModel>,
        registry: ToolRegistry,
        config: RqaConfig,
    ) -> Self {
        let aliases = SchemaAliasMap::build(&config.schema.aliases, &store.all_documents());
        let normalizer = FilterNormalizer::new(&config.normalization.programs);
        let validator = PlanValidator::new(registry.names(), &config.validation);
        Self {
            store,
            llm,
            aliases,
            normalizer,
            registry,
            validator,
            config,
            recorder: None,
        }
    }

    /// Orchestrator over the builtin tools.
    pub fn with_builtin_tools(
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LanguageModel>,
        config: RqaConfig,
    ) -> Result<Self, RegistryError> {
        Ok(Self::new(store, llm, ToolRegistry::with_builtin_tools()?, config))
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Box<dyn PlanRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn aliases(&self) -> &SchemaAliasMap {
        &self.aliases
    }

    pub fn normalizer(&self) -> &FilterNormalizer {
        &self.normalizer
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RqaConfig {
        &self.config
    }

    /// Read-only collaborators for running a tool directly.
    pub fn tool_context(&self) -> ToolContext<'_> {
        ToolContext {
            store: self.store.as_ref(),
            aliases: &self.aliases,
            normalizer: &self.normalizer,
            resolution: &self.config.resolution,
        }
    }

    /// Answer one question. Always returns prose.
    pub fn answer(&self, query: &str, session: &Session) -> TurnOutcome {
        let query = query.trim();
        let history: &[Turn] = match self.config.llm.mode {
            LlmMode::Online => session.turns(),
            LlmMode::Local => &[],
        };

        let mut trace = Trace::default();
        let gathered = self.gather(query, history, &mut trace);
        if !trace.failed() {
            trace.enter(TurnState::Synthesizing);
        }
        let answer = self.synthesize(query, history, &gathered.context);
        if !trace.failed() {
            trace.enter(TurnState::Done);
        }

        let outcome = TurnOutcome {
            query: query.to_string(),
            answer,
            plan: gathered.plan,
            status: gathered.context.status,
            states: trace.states,
            fallback_used: gathered.fallback_used,
            error: gathered.error,
        };
        if let Some(ref recorder) = self.recorder
            && let Err(e) = recorder.record(&outcome)
        {
            tracing::warn!("failed to record turn: {:#}", e);
        }
        outcome
    }

    fn gather(&self, query: &str, history: &[Turn], trace: &mut Trace) -> Gathered {
        trace.enter(TurnState::Planning);
        let mode = self.config.orchestrator.planning;
        let request = ChatRequest::new(
            Phase::Planner,
            prompts::planner_system(mode, &self.registry, &self.aliases),
            prompts::planner_user(query),
        )
        .json()
        .with_history(history);
        let reply = self.llm.execute(&request);

        let mut raw = match parse_planner_reply(mode, &reply) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("{}; falling back to a broad search", e);
                let mut gathered = self.fallback(query, None, &[], "", trace);
                gathered.error = Some(e.to_string());
                return gathered;
            }
        };

        trace.enter(TurnState::Validating);
        let plan = match self.validator.validate(&mut raw) {
            Ok(plan) => plan,
            Err(e) => return self.fail(query, None, None, e.into(), trace),
        };

        trace.enter(TurnState::Executing);
        let tool = plan
            .tool_steps()
            .last()
            .map(|s| s.tool_call.tool_name.clone());
        let outputs = match self.execute(&plan) {
            Ok(outputs) => outputs,
            Err(e) => return self.fail(query, tool.as_deref(), Some(plan), e, trace),
        };

        let context = EvidenceContext::from_outputs(
            query,
            tool.as_deref(),
            &outputs,
            self.config.orchestrator.evidence_limit,
        );
        if context.has_evidence() {
            return Gathered {
                context,
                plan: Some(plan),
                fallback_used: false,
                error: None,
            };
        }
        let mut gathered = self.fallback(query, tool.as_deref(), &outputs, &context.summary, trace);
        gathered.plan = Some(plan);
        gathered
    }

    /// Run the plan's tool steps in order, threading results through placeholders.
    fn execute(&self, plan: &Plan) -> Result<Vec<ToolOutput>, TurnError> {
        let resolver = PlaceholderResolver::new(&self.aliases, &self.normalizer);
        let mut results = StepResults::new();
        let mut outputs = Vec::new();
        for step in plan.tool_steps() {
            let params = resolver.resolve(&step.tool_call.parameters, &results, step.index)?;
            let output = self.dispatch(&ToolCall::new(step.tool_call.tool_name.as_str(), params))?;
            results.insert(step.index, output.to_step_result());
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Invoke one tool. Tool failures become an `error` status item.
    fn dispatch(&self, call: &ToolCall) -> Result<ToolOutput, TurnError> {
        let tool = self
            .registry
            .get(&call.tool_name)
            .ok_or_else(|| TurnError::UnknownTool(call.tool_name.clone()))?;
        tracing::info!("running {} {}", call.tool_name, serde_json::Value::Object(call.parameters.clone()));
        match tool.run(&call.parameters, &self.tool_context()) {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::warn!("{} failed: {}", call.tool_name, e);
                Ok(ToolOutput::error(format!(
                    "The {} lookup could not be completed.",
                    call.tool_name
                )))
            }
        }
    }

    /// The one broad text search allowed per turn.
    fn fallback(
        &self,
        query: &str,
        tool: Option<&str>,
        primary: &[ToolOutput],
        primary_summary: &str,
        trace: &mut Trace,
    ) -> Gathered {
        trace.enter(TurnState::Fallback);
        let request = StoreQuery::text(query).with_limit(self.config.orchestrator.fallback_limit);
        let found = self.store.query(&request).unwrap_or_else(|e| {
            tracing::warn!("fallback search failed: {}", e);
            Vec::new()
        });
        tracing::info!("fallback search returned {} records", found.len());

        let mut outputs = primary.to_vec();
        outputs.push(ToolOutput::documents_or(
            found,
            "A broad search of all records found nothing either.",
        ));
        let mut context = EvidenceContext::from_outputs(
            query,
            tool,
            &outputs,
            self.config.orchestrator.evidence_limit,
        );
        if context.status == ContextStatus::Success {
            context.prefix_summary(primary_summary);
        }
        Gathered {
            context,
            plan: None,
            fallback_used: true,
            error: None,
        }
    }

    fn fail(
        &self,
        query: &str,
        tool: Option<&str>,
        plan: Option<Plan>,
        error: TurnError,
        trace: &mut Trace,
    ) -> Gathered {
        trace.enter(TurnState::Error);
        tracing::warn!("turn failed: {}", error);
        let summary = match &error {
            TurnError::UnknownTool(name)
            | TurnError::Validation(ValidationError::UnknownTool { name, .. }) => {
                prompts::unknown_tool_summary(name, &self.registry.names())
            }
            other => format!("The question could not be answered as planned: {}", other),
        };
        Gathered {
            context: EvidenceContext::error(query, tool, summary),
            plan,
            fallback_used: false,
            error: Some(error.to_string()),
        }
    }

    fn synthesize(&self, query: &str, history: &[Turn], context: &EvidenceContext) -> String {
        let request = ChatRequest::new(
            Phase::Synth,
            SYNTH_SYSTEM,
            prompts::synth_user(query, &context.to_json()),
        )
        .with_history(history);
        strip_error_marker(&self.llm.execute(&request)).to_string()
    }
}

/// The raw plan value for the validator, from either planner reply shape.
fn parse_planner_reply(mode: PlanningMode, reply: &str) -> Result<Value, TurnError> {
    if is_unavailable(reply) {
        return Err(TurnError::PlannerFormat("the planner is unavailable".to_string()));
    }
    let value: Value =
        parse_json_response(reply).map_err(|e| TurnError::PlannerFormat(e.to_string()))?;
    match mode {
        PlanningMode::Plan => Ok(value),
        PlanningMode::Single => Ok(Plan::single(parse_tool_call(value)?, "").to_value()),
    }
}

/// `{"tool_name", "parameters"}`, optionally wrapped in `{"tool_call": ...}`.
fn parse_tool_call(mut value: Value) -> Result<ToolCall, TurnError> {
    if let Some(inner) = value.get_mut("tool_call").map(Value::take) {
        value = inner;
    }
    let name = value
        .get("tool_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TurnError::PlannerFormat("missing 'tool_name'".to_string()))?
        .to_string();
    let parameters = match value.get_mut("parameters").map(Value::take) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(TurnError::PlannerFormat(format!(
                "'parameters' must be a mapping, got {}",
                other
            )));
        }
    };
    Ok(ToolCall::new(name, parameters))
}
