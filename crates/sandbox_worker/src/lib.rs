//! Rhai-backed [`ToolInterpreter`] for the sandbox worker.
//!
//! A plugin's tool source is an ordinary Rhai script; every function taking a
//! single `input` argument (or none) is a callable tool:
//!
//! ```rhai
//! fn summarize(input) {
//!     let page = host_fetch(input.url);
//!     send_message_to_chat(#{ content: "fetched " + input.url });
//!     #{ title: page.data.title }
//! }
//! ```
//!
//! Host functions available to scripts:
//! * `host_fetch(url)` → `#{ data: ... }`, waits for the host
//! * `host_call(func, args)` → any host function by name, waits for the host
//! * `send_message_to_chat(message)` → fire-and-forget
//!
//! `print`/`debug` end up in the worker's tracing output.

pub mod marshal;

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use sandbox_protocol::{HostLink, ToolInterpreter};
use serde_json::{Value, json};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RhaiInterpreter {
    max_operations: u64,
    max_call_levels: usize,
}

impl Default for RhaiInterpreter {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
        }
    }
}

impl RhaiInterpreter {
    /// Caps the number of operations a single tool run may execute.
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn engine(&self, host: &HostLink) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(self.max_call_levels);

        engine.on_print(|text| info!(target: "sandbox", "{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "sandbox", source = source.unwrap_or(""), %pos, "{text}")
        });

        let link = host.clone();
        engine.register_fn(
            "host_fetch",
            move |url: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                let value = link.call_blocking("host_fetch", vec![json!(url)])?;
                Ok(marshal::to_script(&value)?)
            },
        );

        let link = host.clone();
        engine.register_fn(
            "host_call",
            move |func: &str, args: rhai::Array| -> Result<Dynamic, Box<EvalAltResult>> {
                let args = marshal::args_from_script(&args)?;
                let value = link.call_blocking(func, args)?;
                Ok(marshal::to_script(&value)?)
            },
        );

        let link = host.clone();
        engine.register_fn(
            "send_message_to_chat",
            move |message: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let message = marshal::from_script(&message)?;
                let message = match message {
                    Value::String(content) => json!({ "content": content }),
                    other => other,
                };
                link.notify("sendMessageToChat", vec![message])?;
                Ok(())
            },
        );

        engine
    }
}

impl ToolInterpreter for RhaiInterpreter {
    fn name(&self) -> &str {
        "Rhai"
    }

    fn warm_up(&self) -> Result<(), String> {
        Engine::new()
            .compile("fn ping(input) { input }")
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn run_tool(
        &self,
        source: &str,
        tool_name: &str,
        input: Value,
        host: &HostLink,
    ) -> Result<Value, String> {
        let engine = self.engine(host);
        let ast = engine
            .compile(source)
            .map_err(|e| format!("could not compile tool source: {e}"))?;

        let arity = ast
            .iter_functions()
            .find(|f| f.name == tool_name)
            .map(|f| f.params.len())
            .ok_or_else(|| format!("Tool '{tool_name}' not found"))?;

        let mut scope = Scope::new();
        let result = match arity {
            0 => engine.call_fn::<Dynamic>(&mut scope, &ast, tool_name, ()),
            1 => {
                let input = marshal::to_script(&input)?;
                engine.call_fn::<Dynamic>(&mut scope, &ast, tool_name, (input,))
            }
            n => {
                return Err(format!(
                    "Tool '{tool_name}' must take at most one argument, it takes {n}"
                ));
            }
        };

        let result = result.map_err(|e| describe(&e))?;
        marshal::from_script(&result)
    }
}

/// Unwraps nested call errors down to the message the script threw.
fn describe(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => describe(inner),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}
