use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sandbox_protocol::LogLevel;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::context::ExecutionContext;
use super::registry::WorkflowRegistry;
use super::{Step, ToolRef, WorkflowError};
use crate::host::{HostCapabilityRouter, HostTool};
use crate::logger::Logger;
use crate::sandbox::SandboxRunner;

const CONTEXT: &str = "ENGINE";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepOutcome {
    Succeeded { output: Value },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    pub tool: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub step_id: String,
    pub message: String,
}

/// What happened during one run, in step order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub plugin_id: String,
    pub records: Vec<StepRecord>,
    pub error: Option<StepFailure>,
    /// Output of the last step, when every step succeeded.
    pub result: Option<Value>,
    pub render_error: Option<String>,
    pub total_ms: u64,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs plugin workflows step by step against the host and the sandbox.
pub struct WorkflowEngine {
    registry: WorkflowRegistry,
    router: Arc<HostCapabilityRouter>,
    sandbox: Arc<dyn SandboxRunner>,
    logger: Logger,
    prefetch_page: bool,
}

impl WorkflowEngine {
    pub fn new(
        registry: WorkflowRegistry,
        router: Arc<HostCapabilityRouter>,
        sandbox: Arc<dyn SandboxRunner>,
        logger: Logger,
    ) -> Self {
        Self {
            registry,
            router,
            sandbox,
            logger,
            prefetch_page: false,
        }
    }

    /// Exposes the active page's HTML as `page_html` before the first step.
    pub fn with_page_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch_page = enabled;
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Runs the workflow of `plugin_id`.
    ///
    /// Load failures are returned as errors and no step runs. A failing step
    /// aborts the run; the failure is carried in the returned report.
    pub async fn run(&self, plugin_id: &str) -> Result<ExecutionReport, WorkflowError> {
        let started = Instant::now();
        self.logger.log(LogLevel::Info, CONTEXT, "Starting workflow...");

        let workflow = match self.registry.get(plugin_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                self.logger
                    .log(LogLevel::Error, CONTEXT, &format!("Could not load workflow: {e}"));
                return Err(e);
            }
        };

        let mut context = ExecutionContext::new();
        if self.prefetch_page {
            context = self.prefetch(context).await;
        }

        let mut report = ExecutionReport {
            plugin_id: plugin_id.to_string(),
            records: Vec::with_capacity(workflow.steps.len()),
            error: None,
            result: None,
            render_error: None,
            total_ms: 0,
        };

        for step in &workflow.steps {
            self.logger.log(
                LogLevel::Info,
                CONTEXT,
                &format!("Running step {} (tool: {})", step.id, step.raw_tool),
            );
            let step_started = Utc::now();
            let input = context.resolve_inputs(&step.input);
            debug!(plugin_id, step_id = %step.id, %input, "step input");

            let outcome = self.dispatch(plugin_id, step, input).await;
            let finished = Utc::now();
            match outcome {
                Ok(output) => {
                    context.record(&step.id, output.clone());
                    report.records.push(StepRecord {
                        step_id: step.id.clone(),
                        tool: step.raw_tool.clone(),
                        started: step_started,
                        finished,
                        outcome: StepOutcome::Succeeded { output },
                    });
                    self.logger
                        .log(LogLevel::Info, CONTEXT, &format!("Step {} completed.", step.id));
                }
                Err(message) => {
                    self.logger.log(
                        LogLevel::Error,
                        CONTEXT,
                        &format!("Step {} failed: {message}", step.id),
                    );
                    report.records.push(StepRecord {
                        step_id: step.id.clone(),
                        tool: step.raw_tool.clone(),
                        started: step_started,
                        finished,
                        outcome: StepOutcome::Failed {
                            message: message.clone(),
                        },
                    });
                    report.error = Some(StepFailure {
                        step_id: step.id.clone(),
                        message,
                    });
                    report.total_ms = elapsed_ms(started);
                    info!(plugin_id, step_id = %step.id, "workflow aborted");
                    return Ok(report);
                }
            }
        }

        if let Some(last) = workflow.last_step() {
            let result = context.output_of(&last.id).cloned().unwrap_or(Value::Null);
            if let Err(e) = self.logger.render_result(&last.id, &result) {
                self.logger.log(
                    LogLevel::Error,
                    CONTEXT,
                    &format!("Could not render the result ({e}). Raw data: {result}"),
                );
                report.render_error = Some(e.to_string());
            }
            report.result = Some(result);
        }

        report.total_ms = elapsed_ms(started);
        self.logger.log(
            LogLevel::Info,
            CONTEXT,
            &format!("Workflow completed in {} ms.", report.total_ms),
        );
        Ok(report)
    }

    async fn dispatch(&self, plugin_id: &str, step: &Step, input: Value) -> Result<Value, String> {
        match &step.tool {
            ToolRef::Host(tool) => self.router.invoke(*tool, &input).await.map_err(|e| e.to_string()),
            ToolRef::Sandbox(name) => self
                .sandbox
                .run_tool(plugin_id, name, input)
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn prefetch(&self, context: ExecutionContext) -> ExecutionContext {
        match self
            .router
            .invoke(HostTool::GetActivePageContent, &json!({}))
            .await
        {
            Ok(page) => {
                let html = page.get("html").and_then(Value::as_str).unwrap_or_default();
                self.logger.log(
                    LogLevel::Info,
                    CONTEXT,
                    &format!("Fetched page HTML ({} characters)", html.chars().count()),
                );
                context.with_page_html(html)
            }
            Err(e) => {
                self.logger
                    .log(LogLevel::Warn, CONTEXT, &format!("Could not fetch page HTML: {e}"));
                context
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
