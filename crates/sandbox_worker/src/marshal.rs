//! Conversion between wire JSON and Rhai's native values.
//!
//! Marshalling happens only here, at the worker boundary: objects become
//! object maps, arrays become arrays, `null` becomes `()`.

use rhai::Dynamic;
use serde_json::Value;

pub fn to_script(value: &Value) -> Result<Dynamic, String> {
    rhai::serde::to_dynamic(value).map_err(|e| format!("could not convert value for script: {e}"))
}

pub fn from_script(value: &Dynamic) -> Result<Value, String> {
    rhai::serde::from_dynamic::<Value>(value)
        .map_err(|e| format!("could not convert script value: {e}"))
}

/// Converts a list of script values into positional JSON arguments.
pub fn args_from_script(args: &[Dynamic]) -> Result<Vec<Value>, String> {
    args.iter().map(from_script).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_structures_survive_both_directions() {
        let value = json!({
            "title": "Quarterly report",
            "tags": ["a", "b"],
            "scores": [1, 2.5, -3],
            "meta": {"draft": false, "owner": null, "empty": {}}
        });
        let script = to_script(&value).unwrap();
        assert!(script.is_map());
        assert_eq!(from_script(&script).unwrap(), value);
    }

    #[test]
    fn null_maps_to_unit() {
        let script = to_script(&Value::Null).unwrap();
        assert!(script.is_unit());
        assert_eq!(from_script(&Dynamic::UNIT).unwrap(), Value::Null);
    }

    #[test]
    fn script_arrays_become_positional_args() {
        let args = vec![Dynamic::from("https://x.com"), Dynamic::from(3_i64)];
        assert_eq!(
            args_from_script(&args).unwrap(),
            vec![json!("https://x.com"), json!(3)]
        );
    }
}
