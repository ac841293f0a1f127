//! Configuration for planning, resolution, and model access.
//!
//! Load order: `.rqa/config.toml` → environment variables → defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level rqa configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RqaConfig {
    pub llm: LlmConfig,
    pub resolution: ResolutionConfig,
    pub validation: ValidationConfig,
    pub orchestrator: OrchestratorConfig,
    pub normalization: NormalizationConfig,
    pub schema: SchemaConfig,
}

/// Which endpoint family answers model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    Online,
    Local,
}

impl FromStr for LlmMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown llm mode: {}", other)),
        }
    }
}

/// Which half of a turn a model call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planner,
    Synth,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Synth => "synth",
        }
    }
}

/// Model access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub mode: LlmMode,
    /// Additional attempts after the first failure.
    pub retries: usize,
    /// Fixed pause between attempts.
    pub retry_delay_ms: u64,
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
    pub online: PhaseProfiles,
    pub local: PhaseProfiles,
}

/// One model profile per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseProfiles {
    pub planner: ModelProfile,
    pub synth: ModelProfile,
}

/// Endpoint and sampling settings for one provider/model pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelProfile {
    /// `openai`, `anthropic`, or `ollama`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

/// Person resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum token-Jaccard score to merge a candidate name into an entity.
    pub match_threshold: f64,
    /// Minimum score for two person records to count as the same person.
    pub duplicate_threshold: f64,
    /// Title tokens ignored when comparing names (matched without dots, any case).
    pub honorifics: Vec<String>,
    /// Canonical metadata fields that hold person names.
    pub name_fields: Vec<String>,
    /// Result limit for each resolution search.
    pub search_limit: usize,
}

/// Plan validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// The generic search tool whose filters get structural checks.
    pub search_tool: String,
    /// Operators stripped from filters instead of failing the plan.
    pub unsupported_operators: Vec<String>,
}

/// How the planner is asked to respond.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    /// One tool call per turn.
    #[default]
    Single,
    /// A full multi-step plan ending in `finish_plan`.
    Plan,
}

impl FromStr for PlanningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "plan" => Ok(Self::Plan),
            other => Err(format!("unknown planning mode: {}", other)),
        }
    }
}

/// Turn-level orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub planning: PlanningMode,
    /// Maximum evidence documents serialized for synthesis.
    pub evidence_limit: usize,
    /// Result limit of the fallback broad search.
    pub fallback_limit: usize,
    /// JSONL file receiving one record per turn, relative to the project root.
    pub record_path: Option<PathBuf>,
}

/// Value normalization tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Program code → curated alias group.
    pub programs: BTreeMap<String, Vec<String>>,
}

/// Extra field spellings merged into the builtin alias table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub aliases: BTreeMap<String, Vec<String>>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::Online,
            retries: 2,
            retry_delay_ms: 1000,
            timeout_secs: 120,
            online: PhaseProfiles {
                planner: ModelProfile {
                    temperature: Some(0.0),
                    max_tokens: 1024,
                    ..ModelProfile::default()
                },
                synth: ModelProfile {
                    temperature: Some(0.3),
                    ..ModelProfile::default()
                },
            },
            local: PhaseProfiles {
                planner: ModelProfile {
                    temperature: Some(0.0),
                    max_tokens: 1024,
                    ..ModelProfile::local()
                },
                synth: ModelProfile {
                    temperature: Some(0.3),
                    ..ModelProfile::local()
                },
            },
        }
    }
}

impl Default for PhaseProfiles {
    fn default() -> Self {
        Self {
            planner: ModelProfile::default(),
            synth: ModelProfile::default(),
        }
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: None,
            max_tokens: 2048,
        }
    }
}

impl ModelProfile {
    /// Ollama on localhost.
    pub fn local() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            base_url: Some("http://localhost:11434".to_string()),
            api_key_env: None,
            temperature: None,
            max_tokens: 2048,
        }
    }
}

impl LlmConfig {
    /// Profile for `phase` under the configured mode.
    pub fn profile(&self, phase: Phase) -> &ModelProfile {
        let profiles = match self.mode {
            LlmMode::Online => &self.online,
            LlmMode::Local => &self.local,
        };
        match phase {
            Phase::Planner => &profiles.planner,
            Phase::Synth => &profiles.synth,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            duplicate_threshold: 0.85,
            honorifics: ["DR", "PROF", "MR", "MS", "MRS"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            name_fields: ["full_name", "adviser", "staff_name"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            search_limit: 25,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            search_tool: "search_database".to_string(),
            unsupported_operators: ["$gt", "$lt", "$gte", "$lte"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            planning: PlanningMode::Single,
            evidence_limit: 100,
            fallback_limit: 20,
            record_path: None,
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        let group = |code: &str, names: &[&str]| {
            (
                code.to_string(),
                names.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
            )
        };
        Self {
            programs: [
                group("BSCS", &["BSCS", "BS Computer Science", "Computer Science"]),
                group(
                    "BSIT",
                    &["BSIT", "BS Information Technology", "Information Technology"],
                ),
                group(
                    "BSIS",
                    &["BSIS", "BS Information Systems", "Information Systems"],
                ),
                group(
                    "BSEMC",
                    &[
                        "BSEMC",
                        "BS Entertainment and Multimedia Computing",
                        "Entertainment and Multimedia Computing",
                    ],
                ),
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(n) => *target = n,
            Err(_) => tracing::warn!("ignoring {}={:?}: not a valid value", var, v),
        }
    }
}

impl RqaConfig {
    /// Load config from `.rqa/config.toml` in the project root, with env var overrides.
    /// Falls back to defaults if no config file exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".rqa").join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", config_path.display()))?
        } else {
            Self::default()
        };

        // Environment variable overrides
        env_override("RQA_LLM_MODE", &mut config.llm.mode);
        env_override("RQA_LLM_RETRIES", &mut config.llm.retries);
        env_override("RQA_LLM_RETRY_DELAY_MS", &mut config.llm.retry_delay_ms);
        env_override("RQA_LLM_TIMEOUT_SECS", &mut config.llm.timeout_secs);
        env_override(
            "RQA_MATCH_THRESHOLD",
            &mut config.resolution.match_threshold,
        );
        env_override(
            "RQA_DUPLICATE_THRESHOLD",
            &mut config.resolution.duplicate_threshold,
        );
        env_override(
            "RQA_EVIDENCE_LIMIT",
            &mut config.orchestrator.evidence_limit,
        );
        env_override(
            "RQA_FALLBACK_LIMIT",
            &mut config.orchestrator.fallback_limit,
        );
        env_override("RQA_PLANNING", &mut config.orchestrator.planning);

        config.validate()?;
        Ok(config)
    }

    /// Reject values the resolver and orchestrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("match_threshold", self.resolution.match_threshold),
            ("duplicate_threshold", self.resolution.duplicate_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!("{} ({}) must be in (0, 1]", name, value);
            }
        }
        if self.orchestrator.evidence_limit == 0 {
            anyhow::bail!("evidence_limit must be greater than zero");
        }
        Ok(())
    }
}
