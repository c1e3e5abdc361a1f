use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*(.*?)\s*\}\}$").expect("template pattern"));

/// Data visible to step inputs during one run:
/// `{"steps": {<id>: {"output": ...}}, "page_html": "..."}`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    root: Value,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            root: json!({ "steps": {} }),
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_html(mut self, html: impl Into<String>) -> Self {
        if let Some(root) = self.root.as_object_mut() {
            root.insert("page_html".into(), Value::String(html.into()));
        }
        self
    }

    pub fn record(&mut self, step_id: &str, output: Value) {
        if let Some(steps) = self.root.get_mut("steps").and_then(Value::as_object_mut) {
            steps.insert(step_id.to_string(), json!({ "output": output }));
        }
    }

    pub fn output_of(&self, step_id: &str) -> Option<&Value> {
        self.root.get("steps")?.get(step_id)?.get("output")
    }

    /// Value at a dotted path; `null` when any segment is missing.
    pub fn lookup(&self, path: &str) -> Value {
        let path = path.strip_prefix("context.").unwrap_or(path);
        let mut current = &self.root;
        for segment in path.split('.') {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    /// Replaces every top-level `"{{path}}"` string with the value it names.
    pub fn resolve_inputs(&self, input: &Map<String, Value>) -> Value {
        let resolved = input
            .iter()
            .map(|(key, value)| {
                let value = match value.as_str().and_then(|s| TEMPLATE.captures(s)) {
                    Some(caps) if caps[1].is_empty() => Value::Null,
                    Some(caps) => self.lookup(&caps[1]),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(resolved)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn resolves_references_to_earlier_outputs() {
        let mut ctx = ExecutionContext::new().with_page_html("<p>hi</p>");
        ctx.record("fetch", json!({"items": [{"title": "first"}, {"title": "second"}]}));

        let resolved = ctx.resolve_inputs(&input(json!({
            "all": "{{steps.fetch.output}}",
            "second": "{{ context.steps.fetch.output.items.1.title }}",
            "html": "{{page_html}}",
            "missing": "{{steps.nope.output}}",
            "literal": 42,
            "embedded": "see {{steps.fetch.output}}",
        })));

        assert_eq!(resolved["all"], json!({"items": [{"title": "first"}, {"title": "second"}]}));
        assert_eq!(resolved["second"], "second");
        assert_eq!(resolved["html"], "<p>hi</p>");
        assert_eq!(resolved["missing"], Value::Null);
        assert_eq!(resolved["literal"], 42);
        assert_eq!(resolved["embedded"], "see {{steps.fetch.output}}");
    }

    #[test]
    fn empty_template_resolves_to_null() {
        let mut ctx = ExecutionContext::new();
        ctx.record("a", json!(1));
        let resolved = ctx.resolve_inputs(&input(json!({"bare": "{{}}", "spaced": "{{  }}"})));
        assert_eq!(resolved["bare"], Value::Null);
        assert_eq!(resolved["spaced"], Value::Null);
    }

    #[test]
    fn nested_values_are_not_templated() {
        let ctx = ExecutionContext::new();
        let resolved = ctx.resolve_inputs(&input(json!({"opts": {"q": "{{steps.a.output}}"}})));
        assert_eq!(resolved["opts"]["q"], "{{steps.a.output}}");
    }

    #[test]
    fn output_of_reads_recorded_steps() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.output_of("a").is_none());
        ctx.record("a", json!(null));
        assert_eq!(ctx.output_of("a"), Some(&Value::Null));
    }
}
