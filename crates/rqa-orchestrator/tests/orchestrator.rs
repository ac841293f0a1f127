use rqa_core::config::{LlmMode, Phase, PlanningMode, RqaConfig};
use rqa_core::document::Document;
use rqa_core::session::Session;
use rqa_core::store::{DocumentStore, InMemoryStore, StoreError, StoreQuery};
use rqa_llm::{ChatRequest, LLM_UNAVAILABLE_MESSAGE, LanguageModel};
use rqa_orchestrator::recorder::read_records;
use rqa_orchestrator::{
    ContextStatus, JsonlRecorder, Orchestrator, Tool, ToolContext, ToolError, ToolOutput,
    ToolRegistry, TurnState,
};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays planner replies; synthesis always gives the same answer.
struct ScriptedModel {
    planner: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            planner: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self, phase: Phase) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.phase == phase)
            .cloned()
            .collect()
    }

    /// Evidence JSON sent with the last synthesis request.
    fn evidence(&self) -> Value {
        let synth = self.requests(Phase::Synth);
        let user = &synth.last().expect("no synthesis request").user;
        let (_, json) = user.split_once("Evidence:\n").unwrap();
        serde_json::from_str(json).unwrap()
    }
}

impl LanguageModel for ScriptedModel {
    fn execute(&self, request: &ChatRequest) -> String {
        self.requests.lock().unwrap().push(request.clone());
        match request.phase {
            Phase::Planner => self
                .planner
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| LLM_UNAVAILABLE_MESSAGE.to_string()),
            Phase::Synth => "Here is what the records say [enrollment_2024].".to_string(),
        }
    }
}

/// A model that never answers, as when every provider is down.
struct SilentModel;

impl LanguageModel for SilentModel {
    fn execute(&self, _request: &ChatRequest) -> String {
        LLM_UNAVAILABLE_MESSAGE.to_string()
    }
}

/// A tool whose backend is down.
struct LibraryLoans;

impl Tool for LibraryLoans {
    fn name(&self) -> &str {
        "get_library_loans"
    }

    fn description(&self) -> &str {
        "Books currently borrowed by a person."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"person_name": {"type": "string"}}})
    }

    fn run(&self, _params: &Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        Err(ToolError::Store(rqa_core::store::StoreError::Backend(
            "library system offline".to_string(),
        )))
    }
}

/// Records every query before delegating.
struct CountingStore {
    inner: InMemoryStore,
    queries: Mutex<Vec<StoreQuery>>,
}

impl CountingStore {
    fn queries(&self) -> Vec<StoreQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Broad text searches for exactly `text` with the fallback limit.
    fn fallback_searches(&self, text: &str, limit: usize) -> usize {
        self.queries()
            .iter()
            .filter(|q| q.is_broad() && q.text.as_deref() == Some(text) && q.limit == Some(limit))
            .count()
    }
}

impl DocumentStore for CountingStore {
    fn query(&self, query: &StoreQuery) -> Result<Vec<Document>, StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        self.inner.query(query)
    }

    fn all_documents(&self) -> Vec<Document> {
        self.inner.all_documents()
    }

    fn collection_names(&self) -> Vec<String> {
        self.inner.collection_names()
    }
}

fn make_store() -> Arc<CountingStore> {
    let inner = InMemoryStore::from_documents(vec![
        Document::new("enrollment_2024", "Lee Pace | BSCS | 2 | A")
            .with_meta("full_name", "Lee Pace")
            .with_meta("course", "BSCS")
            .with_meta("yr", "2")
            .with_meta("sec", "A"),
        Document::new("faculty", "Dr. Maria Santos | Faculty | Computer Science")
            .with_meta("staff_name", "Dr. Maria Santos"),
        Document::new("schedules", "BSCS 2A | CS201 Data Structures | Monday 8:00 | Room 301")
            .with_meta("program", "BSCS")
            .with_meta("year_level", "2nd Year")
            .with_meta("section", "A")
            .with_meta("day", "Monday"),
        Document::new("schedules", "BSIT 1B | IT101 Intro to Computing | Tuesday 9:00")
            .with_meta("program", "BSIT")
            .with_meta("year_level", "1")
            .with_meta("section", "B")
            .with_meta("day", "Tuesday"),
    ]);
    Arc::new(CountingStore {
        inner,
        queries: Mutex::new(Vec::new()),
    })
}

fn config(planning: PlanningMode) -> RqaConfig {
    let mut config = RqaConfig::default();
    config.orchestrator.planning = planning;
    config
}

fn orchestrator(
    store: &Arc<CountingStore>,
    llm: &Arc<ScriptedModel>,
    config: RqaConfig,
) -> Orchestrator {
    Orchestrator::with_builtin_tools(store.clone(), llm.clone(), config).unwrap()
}

fn contents(evidence: &Value) -> Vec<String> {
    evidence["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["content"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_orchestrator_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Orchestrator>();
}

#[test]
fn test_schedule_of_known_person() {
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "get_person_schedule", "parameters": {"person_name": "Lee Pace"}}"#,
    ]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let query = "what is the schedule of Lee Pace?";
    let outcome = orch.answer(query, &Session::new());

    assert_eq!(outcome.status, ContextStatus::Success);
    assert!(!outcome.fallback_used);
    assert_eq!(
        outcome.states,
        vec![
            TurnState::Planning,
            TurnState::Validating,
            TurnState::Executing,
            TurnState::Synthesizing,
            TurnState::Done
        ]
    );
    let evidence = llm.evidence();
    assert_eq!(evidence["tool"], "get_person_schedule");
    assert_eq!(
        contents(&evidence),
        vec![
            "Lee Pace | BSCS | 2 | A".to_string(),
            "BSCS 2A | CS201 Data Structures | Monday 8:00 | Room 301".to_string()
        ]
    );
    assert_eq!(store.fallback_searches(query, 20), 0);
    assert!(outcome.answer.contains("[enrollment_2024]"));
}

#[test]
fn test_unknown_person_triggers_exactly_one_fallback() {
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "get_person_schedule", "parameters": {"person_name": "Zebulon Quartermaine"}}"#,
    ]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let query = "where is Zebulon Quartermaine today?";
    let outcome = orch.answer(query, &Session::new());

    assert!(outcome.fallback_used);
    assert_eq!(store.fallback_searches(query, 20), 1);
    assert!(outcome.states.contains(&TurnState::Fallback));
    assert_eq!(outcome.states.last(), Some(&TurnState::Done));
    assert_eq!(outcome.status, ContextStatus::Error);
    assert_eq!(
        llm.evidence()["summary"],
        "Could not find anyone matching 'Zebulon Quartermaine'."
    );
}

#[test]
fn test_empty_search_falls_back_to_broad_text() {
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "search_database", "parameters": {"filters": {"program": "BSN"}}}"#,
    ]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let query = "which room hosts CS201?";
    let outcome = orch.answer(query, &Session::new());

    assert!(outcome.fallback_used);
    assert_eq!(store.fallback_searches(query, 20), 1);
    assert_eq!(outcome.status, ContextStatus::Success);
    let evidence = llm.evidence();
    assert!(contents(&evidence)[0].contains("CS201"));
    assert!(
        evidence["summary"]
            .as_str()
            .unwrap()
            .starts_with("No records matched the search.")
    );
}

#[test]
fn test_unparseable_planner_reply_goes_to_fallback() {
    let store = make_store();
    let llm = ScriptedModel::new(&["You should look at the faculty list for Maria Santos."]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let query = "who is Maria Santos?";
    let outcome = orch.answer(query, &Session::new());

    assert_eq!(
        outcome.states,
        vec![
            TurnState::Planning,
            TurnState::Fallback,
            TurnState::Synthesizing,
            TurnState::Done
        ]
    );
    assert!(outcome.fallback_used);
    assert!(outcome.plan.is_none());
    assert!(outcome.error.as_deref().unwrap().contains("planner reply"));
    assert_eq!(store.queries().len(), 1);
    assert!(contents(&llm.evidence())[0].contains("Maria Santos"));
}

#[test]
fn test_unknown_tool_gets_an_apology_without_running_anything() {
    let store = make_store();
    let llm = ScriptedModel::new(&[r#"{"tool_name": "get_weather", "parameters": {"city": "Manila"}}"#]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let outcome = orch.answer("what's the weather?", &Session::new());

    assert_eq!(outcome.states.last(), Some(&TurnState::Error));
    assert_eq!(outcome.status, ContextStatus::Error);
    assert!(!outcome.fallback_used);
    assert!(store.queries().is_empty());
    let evidence = llm.evidence();
    assert_eq!(evidence["status"], "error");
    assert!(evidence["summary"].as_str().unwrap().contains("search_database"));
    assert_eq!(llm.requests(Phase::Synth).len(), 1);
}

#[test]
fn test_plan_mode_threads_entity_into_next_step() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 1, "thought": "find the student",
         "tool_call": {"tool_name": "resolve_person", "parameters": {"person_name": "pace, lee"}}},
        {"step": 2, "thought": "their classes",
         "tool_call": {"tool_name": "get_person_schedule",
                       "parameters": {"person_name": "$primary_name_from_step_1", "day": "Monday"}}},
        {"step": 3, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("what does Lee Pace have on Monday?", &Session::new());

    assert_eq!(outcome.status, ContextStatus::Success);
    assert_eq!(outcome.plan.as_ref().unwrap().steps.len(), 3);
    let evidence = llm.evidence();
    assert_eq!(evidence["tool"], "get_person_schedule");
    assert_eq!(evidence["entity"]["primary_name"], "Lee Pace");
    assert!(contents(&evidence).iter().any(|c| c.contains("CS201")));
}

#[test]
fn test_plan_mode_document_placeholder_uses_field_aliases() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 1, "thought": "the student's record",
         "tool_call": {"tool_name": "search_database",
                       "parameters": {"query": "Lee Pace", "collection_filter": "enrollment"}}},
        {"step": 2, "thought": "schedules of that program",
         "tool_call": {"tool_name": "search_database",
                       "parameters": {"filters": {"program": "$program_from_step_1",
                                                  "year_level": {"$gte": 2}},
                                      "collection_filter": "schedule"}}},
        {"step": 3, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("what classes does Lee Pace's program have?", &Session::new());

    assert_eq!(outcome.status, ContextStatus::Success);
    assert!(!outcome.fallback_used);
    let docs = contents(&llm.evidence());
    assert!(docs.iter().any(|c| c.contains("CS201")));
    assert!(!docs.iter().any(|c| c.contains("IT101")));
}

#[test]
fn test_rejected_plan_runs_no_tools() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 1, "thought": "look",
         "tool_call": {"tool_name": "search_database",
                       "parameters": {"filters": {"$or": [{"program": "BSCS", "section": "A"}]}}}},
        {"step": 2, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("BSCS section A students", &Session::new());

    assert_eq!(
        outcome.states,
        vec![TurnState::Planning, TurnState::Validating, TurnState::Error]
    );
    assert!(store.queries().is_empty());
    assert!(!outcome.fallback_used);
    assert!(outcome.error.as_deref().unwrap().contains("$or"));
    assert_eq!(llm.evidence()["status"], "error");
}

#[test]
fn test_plan_without_finish_is_rejected() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 1, "thought": "list", "tool_call": {"tool_name": "list_people", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("list everyone", &Session::new());

    assert_eq!(outcome.states.last(), Some(&TurnState::Error));
    assert!(outcome.error.as_deref().unwrap().contains("finish_plan"));
    assert!(store.queries().is_empty());
}

#[test]
fn test_history_only_sent_online() {
    let mut session = Session::new();
    session.record("who is Lee Pace?", "Lee Pace is a BSCS student [enrollment_2024].");
    let reply = r#"{"tool_name": "get_person_schedule", "parameters": {"person_name": "Lee Pace"}}"#;

    let store = make_store();
    let llm = ScriptedModel::new(&[reply]);
    orchestrator(&store, &llm, config(PlanningMode::Single)).answer("and his schedule?", &session);
    assert_eq!(llm.requests(Phase::Planner)[0].history.len(), 1);
    assert_eq!(llm.requests(Phase::Synth)[0].history.len(), 1);

    let llm = ScriptedModel::new(&[reply]);
    let mut local = config(PlanningMode::Single);
    local.llm.mode = LlmMode::Local;
    orchestrator(&store, &llm, local).answer("and his schedule?", &session);
    assert!(llm.requests(Phase::Planner)[0].history.is_empty());
    assert!(llm.requests(Phase::Synth)[0].history.is_empty());
}

#[test]
fn test_turns_are_recorded() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join(".rqa").join("plans.jsonl");
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "list_people", "parameters": {"role": "faculty"}}"#,
        "not json at all",
    ]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single))
        .with_recorder(Box::new(JsonlRecorder::new(&path)));

    orch.answer("who teaches here?", &Session::new());
    orch.answer("anything about Room 301?", &Session::new());

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].query, "who teaches here?");
    assert!(!records[0].fallback_used);
    assert_eq!(
        records[0].plan.as_ref().unwrap()["plan"][0]["tool_call"]["tool_name"],
        "list_people"
    );
    assert!(records[1].fallback_used);
    assert!(records[1].plan.is_none());
}

#[test]
fn test_recorder_failure_does_not_surface() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = make_store();
    let llm = ScriptedModel::new(&[r#"{"tool_name": "list_people", "parameters": {}}"#]);
    // A directory cannot be opened for appending.
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single))
        .with_recorder(Box::new(JsonlRecorder::new(tmp.path())));

    let outcome = orch.answer("list everyone", &Session::new());
    assert_eq!(outcome.states.last(), Some(&TurnState::Done));
    assert!(!outcome.answer.is_empty());
}

#[test]
fn test_failing_tool_becomes_error_evidence_then_one_fallback() {
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "get_library_loans", "parameters": {"person_name": "Lee Pace"}}"#,
    ]);
    let mut registry = ToolRegistry::with_builtin_tools().unwrap();
    registry.register(Arc::new(LibraryLoans)).unwrap();
    let orch = Orchestrator::new(store.clone(), llm.clone(), registry, config(PlanningMode::Single));

    let query = "which room hosts CS201?";
    let outcome = orch.answer(query, &Session::new());

    assert_eq!(
        outcome.states,
        vec![
            TurnState::Planning,
            TurnState::Validating,
            TurnState::Executing,
            TurnState::Fallback,
            TurnState::Synthesizing,
            TurnState::Done
        ]
    );
    assert!(outcome.fallback_used);
    assert_eq!(store.fallback_searches(query, 20), 1);
    let evidence = llm.evidence();
    assert!(
        evidence["summary"]
            .as_str()
            .unwrap()
            .starts_with("The get_library_loans lookup could not be completed.")
    );
    assert!(contents(&evidence)[0].contains("CS201"));
}

#[test]
fn test_badly_typed_parameter_is_a_tool_failure() {
    let store = make_store();
    let llm = ScriptedModel::new(&[
        r#"{"tool_name": "search_database", "parameters": {"query": "CS201", "limit": "ten"}}"#,
    ]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Single));

    let query = "which room hosts CS201?";
    let outcome = orch.answer(query, &Session::new());

    assert_eq!(outcome.states.last(), Some(&TurnState::Done));
    assert_eq!(store.fallback_searches(query, 20), 1);
    assert!(
        llm.evidence()["summary"]
            .as_str()
            .unwrap()
            .starts_with("The search_database lookup could not be completed.")
    );
}

#[test]
fn test_forward_placeholder_ends_in_error_without_fallback() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 1, "thought": "classes first",
         "tool_call": {"tool_name": "search_database",
                       "parameters": {"filters": {"program": "$program_from_step_2"}}}},
        {"step": 2, "thought": "then the student",
         "tool_call": {"tool_name": "resolve_person", "parameters": {"person_name": "Lee Pace"}}},
        {"step": 3, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("what classes does Lee Pace's program have?", &Session::new());

    assert_eq!(
        outcome.states,
        vec![
            TurnState::Planning,
            TurnState::Validating,
            TurnState::Executing,
            TurnState::Error
        ]
    );
    assert!(!outcome.fallback_used);
    assert!(store.queries().is_empty());
    assert!(outcome.error.as_deref().unwrap().contains("$program_from_step_2"));
    assert_eq!(llm.evidence()["status"], "error");
}

#[test]
fn test_zero_based_plan_steps_still_thread_results() {
    let store = make_store();
    let plan = json!({"plan": [
        {"step": 0, "thought": "find the student",
         "tool_call": {"tool_name": "resolve_person", "parameters": {"person_name": "Lee Pace"}}},
        {"step": 1, "thought": "their classes",
         "tool_call": {"tool_name": "get_person_schedule",
                       "parameters": {"person_name": "$primary_name_from_step_1"}}},
        {"step": 2, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}}
    ]});
    let llm = ScriptedModel::new(&[plan.to_string().as_str()]);
    let orch = orchestrator(&store, &llm, config(PlanningMode::Plan));

    let outcome = orch.answer("what is Lee Pace's schedule?", &Session::new());

    assert_eq!(outcome.status, ContextStatus::Success);
    assert_eq!(outcome.states.last(), Some(&TurnState::Done));
    let evidence = llm.evidence();
    assert_eq!(evidence["tool"], "get_person_schedule");
    assert!(contents(&evidence).iter().any(|c| c.contains("CS201")));
}

#[test]
fn test_unavailable_model_answer_has_no_error_marker() {
    let store = make_store();
    let orch = Orchestrator::with_builtin_tools(
        store.clone(),
        Arc::new(SilentModel),
        config(PlanningMode::Single),
    )
    .unwrap();

    let outcome = orch.answer("who is Lee Pace?", &Session::new());

    assert!(outcome.fallback_used);
    assert!(!outcome.answer.contains("[error]"));
    assert!(outcome.answer.starts_with("I'm sorry, the language model is unavailable"));
}
