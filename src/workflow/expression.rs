//! Expression evaluation seam.
//!
//! The workflow expression language is deliberately out of scope for this
//! crate; definitions carry expressions as opaque strings, and evaluation
//! goes through the [`ExpressionEvaluator`] trait so a full language can be
//! plugged in. [`SimpleEvaluator`] is the built-in minimal implementation
//! used by the default engine wiring and the test suites.

use serde_json::Value;

/// Context key holding the completing task's status during transition
/// evaluation (`succeeded()` / `failed()` read it).
pub const TASK_STATUS_KEY: &str = "__task_status";

/// Context key holding the current item during with-items param rendering.
pub const ITEM_KEY: &str = "__item";

/// Pluggable expression evaluator.
///
/// `validate` is used by static inspection and must accept every expression
/// `evaluate` can handle; `evaluate` failures at runtime map to the
/// `expression` workflow error kind (or the publish/output/vars kind of the
/// clause being rendered).
pub trait ExpressionEvaluator: Send + Sync {
    /// Statically check an expression, returning a human-readable reason on
    /// rejection.
    fn validate(&self, expression: &str) -> Result<(), String>;

    /// Evaluate an expression against a context object.
    fn evaluate(&self, expression: &str, ctx: &Value) -> Result<Value, String>;
}

/// Truthiness for transition guards: false, null, 0, "" and empty
/// collections are falsy, everything else truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Minimal built-in evaluator.
///
/// Supported forms:
/// - `succeeded()`, `failed()`, `completed()` — task-status predicates
/// - `ctx.path.to.key` — context lookup (missing keys are an error)
/// - `item` / `item.path` — current with-items item lookup
/// - `<lhs> == <rhs>` / `<lhs> != <rhs>` — equality over the forms above
/// - JSON literals — `42`, `"text"`, `true`, `[1, 2]`, `{"k": 1}`
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    fn eval_operand(&self, operand: &str, ctx: &Value) -> Result<Value, String> {
        let operand = operand.trim();
        match operand {
            "succeeded()" => Ok(Value::Bool(self.task_status(ctx)? == "succeeded")),
            "failed()" => Ok(Value::Bool(self.task_status(ctx)? == "failed")),
            "completed()" => {
                let status = self.task_status(ctx)?;
                Ok(Value::Bool(matches!(
                    status.as_str(),
                    "succeeded" | "failed" | "canceled"
                )))
            }
            "item" => ctx
                .get(ITEM_KEY)
                .cloned()
                .ok_or_else(|| "no current item in context".to_string()),
            _ => {
                if let Some(path) = operand.strip_prefix("ctx.") {
                    self.lookup(ctx, path)
                } else if let Some(path) = operand.strip_prefix("item.") {
                    let item = ctx
                        .get(ITEM_KEY)
                        .ok_or_else(|| "no current item in context".to_string())?;
                    self.lookup(item, path)
                } else {
                    serde_json::from_str(operand)
                        .map_err(|_| format!("unrecognized expression: {operand}"))
                }
            }
        }
    }

    fn task_status(&self, ctx: &Value) -> Result<String, String> {
        ctx.get(TASK_STATUS_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "no task status in context".to_string())
    }

    fn lookup(&self, root: &Value, path: &str) -> Result<Value, String> {
        let mut current = root;
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(format!("empty path segment in: {path}"));
            }
            current = current
                .get(segment)
                .ok_or_else(|| format!("unsatisfied context variable: {segment}"))?;
        }
        Ok(current.clone())
    }

    fn validate_operand(&self, operand: &str) -> Result<(), String> {
        let operand = operand.trim();
        if operand.is_empty() {
            return Err("empty expression".to_string());
        }
        match operand {
            "succeeded()" | "failed()" | "completed()" | "item" => Ok(()),
            _ => {
                if let Some(path) = operand
                    .strip_prefix("ctx.")
                    .or_else(|| operand.strip_prefix("item."))
                {
                    if path.is_empty() || path.split('.').any(|s| s.is_empty()) {
                        return Err(format!("malformed lookup path: {operand}"));
                    }
                    let valid = path
                        .split('.')
                        .all(|s| s.chars().all(|c| c.is_alphanumeric() || c == '_'));
                    if !valid {
                        return Err(format!("malformed lookup path: {operand}"));
                    }
                    Ok(())
                } else {
                    serde_json::from_str::<Value>(operand)
                        .map(|_| ())
                        .map_err(|_| format!("unrecognized expression: {operand}"))
                }
            }
        }
    }

    fn split_comparison(expression: &str) -> Option<(&str, &str, bool)> {
        // Only split outside of string literals
        let bytes = expression.as_bytes();
        let mut in_string = false;
        let mut i = 0;
        while i + 1 < bytes.len() {
            match bytes[i] {
                b'"' => in_string = !in_string,
                b'=' if !in_string && bytes[i + 1] == b'=' && i > 0 && bytes[i - 1] != b'!' => {
                    return Some((&expression[..i], &expression[i + 2..], true));
                }
                b'!' if !in_string && bytes[i + 1] == b'=' => {
                    return Some((&expression[..i], &expression[i + 2..], false));
                }
                _ => {}
            }
            i += 1;
        }
        None
    }
}

impl ExpressionEvaluator for SimpleEvaluator {
    fn validate(&self, expression: &str) -> Result<(), String> {
        if let Some((lhs, rhs, _)) = Self::split_comparison(expression) {
            self.validate_operand(lhs)?;
            self.validate_operand(rhs)
        } else {
            self.validate_operand(expression)
        }
    }

    fn evaluate(&self, expression: &str, ctx: &Value) -> Result<Value, String> {
        if let Some((lhs, rhs, eq)) = Self::split_comparison(expression) {
            let left = self.eval_operand(lhs, ctx)?;
            let right = self.eval_operand(rhs, ctx)?;
            Ok(Value::Bool((left == right) == eq))
        } else {
            self.eval_operand(expression, ctx)
        }
    }
}

/// Render a parameter value: full-string `{{ expr }}` templates are
/// evaluated, everything else passes through untouched. Objects and arrays
/// are rendered recursively.
pub fn render_param(
    evaluator: &dyn ExpressionEvaluator,
    value: &Value,
    ctx: &Value,
) -> Result<Value, String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
            {
                evaluator.evaluate(inner.trim(), ctx)
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render_param(evaluator, v, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_param(evaluator, v, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_predicates() {
        let evaluator = SimpleEvaluator;
        let ctx = json!({ TASK_STATUS_KEY: "succeeded" });
        assert_eq!(evaluator.evaluate("succeeded()", &ctx).unwrap(), json!(true));
        assert_eq!(evaluator.evaluate("failed()", &ctx).unwrap(), json!(false));
        assert_eq!(evaluator.evaluate("completed()", &ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_ctx_lookup_and_missing_key() {
        let evaluator = SimpleEvaluator;
        let ctx = json!({"host": {"name": "web1"}});
        assert_eq!(
            evaluator.evaluate("ctx.host.name", &ctx).unwrap(),
            json!("web1")
        );
        let err = evaluator.evaluate("ctx.host.port", &ctx).unwrap_err();
        assert!(err.contains("unsatisfied context variable"));
    }

    #[test]
    fn test_comparisons() {
        let evaluator = SimpleEvaluator;
        let ctx = json!({"count": 3, "name": "a==b"});
        assert_eq!(
            evaluator.evaluate("ctx.count == 3", &ctx).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluator.evaluate("ctx.count != 3", &ctx).unwrap(),
            json!(false)
        );
        // == inside a string literal is not an operator
        assert_eq!(
            evaluator.evaluate("ctx.name == \"a==b\"", &ctx).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_validation_rejects_garbage() {
        let evaluator = SimpleEvaluator;
        assert!(evaluator.validate("succeeded()").is_ok());
        assert!(evaluator.validate("ctx.a.b == 4").is_ok());
        assert!(evaluator.validate("[1, 2]").is_ok());
        assert!(evaluator.validate("").is_err());
        assert!(evaluator.validate("ctx.").is_err());
        assert!(evaluator.validate("frobnicate(ctx)").is_err());
    }

    #[test]
    fn test_render_param_templates() {
        let evaluator = SimpleEvaluator;
        let ctx = json!({"cmd": "uptime", "__item": {"host": "web1"}});
        let params = json!({
            "command": "{{ ctx.cmd }}",
            "target": "{{ item.host }}",
            "literal": "plain string",
            "nested": {"n": "{{ ctx.cmd }}"}
        });
        let rendered = render_param(&evaluator, &params, &ctx).unwrap();
        assert_eq!(rendered["command"], json!("uptime"));
        assert_eq!(rendered["target"], json!("web1"));
        assert_eq!(rendered["literal"], json!("plain string"));
        assert_eq!(rendered["nested"]["n"], json!("uptime"));
    }

    proptest::proptest! {
        #[test]
        fn prop_integer_literals_evaluate_to_themselves(n in -1_000_000i64..1_000_000) {
            let evaluator = SimpleEvaluator;
            let value = evaluator.evaluate(&n.to_string(), &json!({})).unwrap();
            proptest::prop_assert_eq!(value, json!(n));
        }

        #[test]
        fn prop_comparison_splitting_never_panics(s in "[a-z0-9=!\" .]{0,24}") {
            let _ = SimpleEvaluator::split_comparison(&s);
            let _ = SimpleEvaluator.validate(&s);
        }
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("x")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
    }
}
