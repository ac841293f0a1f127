//! Reasoning plan orchestration for records question answering.
//!
//! The [`Orchestrator`] asks the planner for a tool call (or a multi-step
//! plan), validates it, runs the tools from the [`ToolRegistry`] against the
//! document store, falls back to one broad search when nothing useful comes
//! back, and has the synthesizer write the answer from an [`EvidenceContext`].

pub mod context;
pub mod orchestrator;
pub mod prompts;
pub mod recorder;
pub mod registry;
pub mod tool;
pub mod tools;

pub use context::{ContextStatus, EvidenceContext};
pub use orchestrator::{Orchestrator, TurnError, TurnOutcome, TurnState};
pub use recorder::{JsonlRecorder, PlanRecorder};
pub use registry::{RegistryError, ToolRegistry};
pub use tool::{Tool, ToolContext, ToolError, ToolOutput};
