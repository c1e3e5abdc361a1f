//! Declarative plugin workflows: an ordered list of steps, each calling one
//! host or sandbox tool with inputs that may reference earlier outputs.
//!
//! ```json
//! { "steps": [
//!     { "id": "page", "tool": "host.getActivePageContent", "input": {} },
//!     { "id": "sum",  "tool": "sandbox.summarize", "input": { "html": "{{steps.page.output.html}}" } }
//! ] }
//! ```

mod context;
mod engine;
mod registry;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use context::ExecutionContext;
pub use engine::{ExecutionReport, StepFailure, StepOutcome, StepRecord, WorkflowEngine};
pub use registry::WorkflowRegistry;

use crate::host::HostTool;
use crate::plugins::PluginError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("workflow of plugin {plugin_id} is not valid JSON: {source}")]
    Parse {
        plugin_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("step id {0:?} is used more than once")]
    DuplicateStepId(String),

    #[error("step {step_id}: {reason}")]
    UnknownTool {
        step_id: String,
        tool: String,
        reason: String,
    },
}

/// `workflow.json` as written by plugin authors.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct WorkflowDocument {
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StepDocument {
    /// Unique within the workflow; later steps read this step's output as
    /// `{{steps.<id>.output}}`.
    pub id: String,
    /// `<domain>.<name>`, e.g. `host.getElements` or `sandbox.summarize`.
    pub tool: String,
    /// Literal values, or strings of the exact form `{{path}}`.
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Where a step's tool runs, resolved once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRef {
    Host(HostTool),
    Sandbox(String),
}

impl FromStr for ToolRef {
    type Err = String;

    fn from_str(tool: &str) -> Result<Self, Self::Err> {
        let (domain, name) = tool
            .split_once('.')
            .ok_or_else(|| format!("tool {tool:?} is not of the form <domain>.<name>"))?;
        if name.is_empty() {
            return Err(format!("tool {tool:?} has an empty name"));
        }
        if name.contains('.') {
            return Err(format!("tool {tool:?} has more than one dot"));
        }
        match domain {
            "host" => HostTool::from_str(name)
                .map(ToolRef::Host)
                .map_err(|_| format!("host tool {name:?} not found")),
            "sandbox" | "script" | "python" => Ok(ToolRef::Sandbox(name.to_string())),
            other => Err(format!("unknown tool domain {other:?} in {tool:?}")),
        }
    }
}

impl fmt::Display for ToolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolRef::Host(tool) => write!(f, "host.{tool}"),
            ToolRef::Sandbox(name) => write!(f, "sandbox.{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub tool: ToolRef,
    /// The tool string as written in the document.
    pub raw_tool: String,
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub plugin_id: String,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn parse(plugin_id: &str, json: &str) -> Result<Self, WorkflowError> {
        let document: WorkflowDocument = serde_json::from_str(json).map_err(|source| WorkflowError::Parse {
            plugin_id: plugin_id.to_string(),
            source,
        })?;
        Self::from_document(plugin_id, document)
    }

    pub fn from_document(plugin_id: &str, document: WorkflowDocument) -> Result<Self, WorkflowError> {
        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(document.steps.len());
        for step in document.steps {
            if !seen.insert(step.id.clone()) {
                return Err(WorkflowError::DuplicateStepId(step.id));
            }
            let tool = step.tool.parse::<ToolRef>().map_err(|reason| WorkflowError::UnknownTool {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                reason,
            })?;
            steps.push(Step {
                id: step.id,
                tool,
                raw_tool: step.tool,
                input: step.input,
            });
        }
        Ok(Self {
            plugin_id: plugin_id.to_string(),
            steps,
        })
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }
}
