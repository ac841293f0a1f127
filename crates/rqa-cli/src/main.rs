//! CLI binary for rqa: ask questions about institutional records and inspect
//! the pieces of the planning pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rqa_core::config::{PlanningMode, RqaConfig};
use rqa_core::schema::SchemaAliasMap;
use rqa_core::session::Session;
use rqa_core::store::{DocumentStore, InMemoryStore};
use rqa_llm::LanguageModelClient;
use rqa_orchestrator::{JsonlRecorder, Orchestrator, ToolRegistry};
use rqa_resolve::entity::EntityResolver;
use rqa_resolve::normalize::FilterNormalizer;
use rqa_resolve::validate::PlanValidator;
use serde_json::{Map, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rqa", about = "Question answering over institutional records")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        /// The question, e.g. "what is the schedule of Lee Pace?"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Let the planner produce a multi-step plan
        #[arg(long)]
        plan: bool,
    },

    /// Interactive session; earlier answers are kept as context
    Chat {
        /// Let the planner produce multi-step plans
        #[arg(long)]
        plan: bool,
    },

    /// Validate (and repair) a plan file without running it
    Validate {
        /// JSON file in the plan wire format
        file: PathBuf,
    },

    /// Show how a filter value is expanded into store conditions
    Expand {
        /// Field name in any spelling, e.g. "yr"
        field: String,

        /// Raw value, e.g. "2" or "BSCS"
        value: String,
    },

    /// Resolve a person's name against the records
    Resolve {
        /// Name in any order, with or without titles
        name: String,
    },

    /// Show collections and field spellings in the records snapshot
    Info,
}

fn get_project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_root = get_project_root(&cli)?;

    match cli.command {
        Commands::Ask { query, plan } => cmd_ask(&project_root, &query.join(" "), plan),
        Commands::Chat { plan } => cmd_chat(&project_root, plan),
        Commands::Validate { file } => cmd_validate(&project_root, &file),
        Commands::Expand { field, value } => cmd_expand(&project_root, &field, &value),
        Commands::Resolve { name } => cmd_resolve(&project_root, &name),
        Commands::Info => cmd_info(&project_root),
    }
}

fn load_store(project_root: &Path) -> Result<InMemoryStore> {
    if !rqa_core::storage::store_exists(project_root) {
        anyhow::bail!(
            "No records snapshot found at {}.",
            rqa_core::storage::store_file(project_root).display()
        );
    }
    rqa_core::storage::load(project_root)
}

fn build_orchestrator(project_root: &Path, plan: bool) -> Result<Orchestrator> {
    let mut config = RqaConfig::load(project_root)?;
    if plan {
        config.orchestrator.planning = PlanningMode::Plan;
    }
    let store = load_store(project_root)?;
    let llm = LanguageModelClient::from_config(&config.llm)
        .context("failed to set up language model providers")?;
    let record_path = config.orchestrator.record_path.clone();

    let mut orchestrator =
        Orchestrator::with_builtin_tools(Arc::new(store), Arc::new(llm), config)?;
    if let Some(path) = record_path {
        let path = project_root.join(path);
        tracing::debug!("recording turns to {}", path.display());
        orchestrator = orchestrator.with_recorder(Box::new(JsonlRecorder::new(path)));
    }
    Ok(orchestrator)
}

/// Run `f` with a spinner on stderr.
fn with_spinner<T>(message: &str, f: impl FnOnce() -> T) -> T {
    use indicatif::{ProgressBar, ProgressStyle};

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let result = f();
    spinner.finish_and_clear();
    result
}

fn cmd_ask(project_root: &Path, query: &str, plan: bool) -> Result<()> {
    let orchestrator = build_orchestrator(project_root, plan)?;
    let outcome = with_spinner("Thinking...", || orchestrator.answer(query, &Session::new()));
    tracing::debug!(
        "status: {}, fallback: {}, states: {:?}",
        outcome.status.as_str(),
        outcome.fallback_used,
        outcome.states
    );
    println!("{}", outcome.answer);
    Ok(())
}

fn cmd_chat(project_root: &Path, plan: bool) -> Result<()> {
    let orchestrator = build_orchestrator(project_root, plan)?;
    let mut session = Session::new();
    let stdin = std::io::stdin();

    eprintln!("Ask about students, faculty, schedules or grades. Type 'exit' to quit.");
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("failed to read input")? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let outcome = with_spinner("Thinking...", || orchestrator.answer(query, &session));
        println!("{}\n", outcome.answer);
        session.record(query, outcome.answer);
    }
    Ok(())
}

fn cmd_validate(project_root: &Path, file: &Path) -> Result<()> {
    let config = RqaConfig::load(project_root)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read plan from {}", file.display()))?;
    let mut raw: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let registry = ToolRegistry::with_builtin_tools()?;
    let validator = PlanValidator::new(registry.names(), &config.validation);
    match validator.validate(&mut raw) {
        Ok(plan) => {
            println!("ok");
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Err(e) => anyhow::bail!("invalid plan: {}", e),
    }
}

/// Field spellings from the snapshot when there is one, the curated table otherwise.
fn load_aliases(project_root: &Path, config: &RqaConfig) -> Result<SchemaAliasMap> {
    let documents = if rqa_core::storage::store_exists(project_root) {
        rqa_core::storage::load(project_root)?.all_documents()
    } else {
        Vec::new()
    };
    Ok(SchemaAliasMap::build(&config.schema.aliases, &documents))
}

/// Numbers and lists pass through as JSON; anything else is a string.
fn parse_cli_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Array(_) | Value::Object(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn cmd_expand(project_root: &Path, field: &str, value: &str) -> Result<()> {
    let config = RqaConfig::load(project_root)?;
    let aliases = load_aliases(project_root, &config)?;
    let normalizer = FilterNormalizer::new(&config.normalization.programs);

    let value = parse_cli_value(value);
    let canonical = aliases.canonical_of(field);
    let condition = normalizer.expand(&canonical, &value);
    let mut filters = Map::new();
    filters.insert(field.to_string(), value);
    let filter = normalizer.build_filter(&filters, &aliases)?;

    println!("Field: {} (keys: {})", canonical, aliases.spellings(&canonical).join(", "));
    println!("Condition: {}", condition);
    match filter {
        Some(filter) => println!("Filter: {}", serde_json::to_string_pretty(&filter.to_value())?),
        None => println!("Filter: (none)"),
    }
    Ok(())
}

fn cmd_resolve(project_root: &Path, name: &str) -> Result<()> {
    let config = RqaConfig::load(project_root)?;
    let store = load_store(project_root)?;
    let aliases = SchemaAliasMap::build(&config.schema.aliases, &store.all_documents());
    let resolver = EntityResolver::new(&store, &aliases, &config.resolution);

    let entity = resolver.resolve(name)?;
    if entity.is_empty() {
        println!("No one matches '{}'.", name);
        return Ok(());
    }
    println!("Name: {}", entity.primary_name);
    let others: Vec<&str> = entity
        .aliases
        .iter()
        .filter(|a| **a != entity.primary_name)
        .map(String::as_str)
        .collect();
    if !others.is_empty() {
        println!("Also known as: {}", others.join("; "));
    }
    if let Some(doc) = &entity.primary_document {
        println!("Record [{}]: {}", doc.source_collection, doc.content);
    }
    let related = resolver.records_for(&entity)?;
    println!("Records naming them: {}", related.len());
    Ok(())
}

fn cmd_info(project_root: &Path) -> Result<()> {
    if !rqa_core::storage::store_exists(project_root) {
        eprintln!(
            "No records snapshot found at {}.",
            rqa_core::storage::store_file(project_root).display()
        );
        return Ok(());
    }

    let config = RqaConfig::load(project_root)?;
    let store = rqa_core::storage::load(project_root)?;
    let aliases = SchemaAliasMap::build(&config.schema.aliases, &store.all_documents());

    println!("Records: {}", store.len());
    println!("LLM mode: {:?}", config.llm.mode);
    println!("Planning: {:?}", config.orchestrator.planning);
    println!("\nCollections:");
    for (name, docs) in store.collections() {
        println!("  {} ({} records)", name, docs.len());
    }
    let fields = aliases.summary();
    if !fields.is_empty() {
        println!("\nFields:");
        for line in fields.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}
