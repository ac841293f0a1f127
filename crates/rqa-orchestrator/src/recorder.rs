//! Optional per-turn outcome log.

use crate::context::ContextStatus;
use crate::orchestrator::TurnOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Receives every finished turn. Failures are logged by the caller and never
/// reach the user.
pub trait PlanRecorder: Send + Sync {
    fn record(&self, outcome: &TurnOutcome) -> Result<()>;
}

/// One line of the JSONL log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub plan: Option<Value>,
    pub status: ContextStatus,
    pub fallback_used: bool,
    pub answer: String,
}

impl PlanRecord {
    pub fn from_outcome(outcome: &TurnOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            query: outcome.query.clone(),
            plan: outcome.plan.as_ref().map(|p| p.to_value()),
            status: outcome.status,
            fallback_used: outcome.fallback_used,
            answer: outcome.answer.clone(),
        }
    }
}

/// Appends one JSON object per turn to a file.
pub struct JsonlRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PlanRecorder for JsonlRecorder {
    fn record(&self, outcome: &TurnOutcome) -> Result<()> {
        let line = serde_json::to_string(&PlanRecord::from_outcome(outcome))
            .context("failed to serialize plan record")?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("plan recorder lock poisoned"))?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open plan log {}", self.path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

/// Read every record from a JSONL log, skipping blank lines.
pub fn read_records(path: &Path) -> Result<Vec<PlanRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan log {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}: bad record on line {}", path.display(), n + 1))
        })
        .collect()
}
