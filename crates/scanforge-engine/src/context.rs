//! Workflow context: variable store with reference resolution and
//! condition evaluation.
//!
//! The context holds node results (`node_{id}_result`), loop variables,
//! run input parameters and anything nodes set. Values are JSON trees;
//! `${path}` references descend through maps (`a.b.c`) and lists
//! (`items[0]`), resolving to `null` on any miss.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

fn full_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$\{([^}]+)\}$").unwrap())
}

fn index_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)\[(\d+)\]$").unwrap())
}

/// Operators in recognition priority order: two-character operators come
/// before their one-character prefixes so `>=` never parses as `>`.
const OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<", " contains "];

/// Variable store for one workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    data: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(input_params: Option<&Value>) -> Self {
        let mut context = Self::default();
        if let Some(Value::Object(params)) = input_params {
            for (k, v) in params {
                context.data.insert(k.clone(), v.clone());
            }
        }
        context
    }

    /// Rebuild a context from a persisted `run.context` object.
    pub fn from_saved(saved: &Value) -> Self {
        match saved {
            Value::Object(map) => Self { data: map.clone() },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// All context data as a JSON object, for persistence.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn set_node_result(&mut self, node_id: &str, result: Value) {
        self.set(format!("node_{node_id}_result"), result);
    }

    pub fn get_node_result(&self, node_id: &str) -> Option<&Value> {
        self.get(&format!("node_{node_id}_result"))
    }

    /// Bind loop iteration variables.
    pub fn set_loop_context(&mut self, index: usize, item: Value, total: usize, loop_id: &str) {
        self.set("loop_index", Value::from(index as u64));
        self.set("loop_item", item.clone());
        self.set("loop_total", Value::from(total as u64));
        self.set(format!("loop_{loop_id}_index"), Value::from(index as u64));
        self.set(format!("loop_{loop_id}_item"), item);
    }

    /// Drop the shared loop variables when a loop finishes.
    pub fn clear_loop_context(&mut self) {
        self.data.remove("loop_index");
        self.data.remove("loop_item");
        self.data.remove("loop_total");
    }

    // =========================================================================
    // Variable resolution
    // =========================================================================

    /// Resolve `${path}` references in a value, recursively for maps and
    /// lists. A string that is exactly one reference resolves to the
    /// referenced value with its native type; otherwise each reference is
    /// substituted with its string form (null becomes the empty string).
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v)).collect())
            }
            other => other.clone(),
        }
    }

    fn resolve_string(&self, value: &str) -> Value {
        if let Some(caps) = full_reference_regex().captures(value) {
            return self.resolve_path(&caps[1]);
        }

        let substituted = reference_regex().replace_all(value, |caps: &regex::Captures<'_>| {
            match self.resolve_path(&caps[1]) {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            }
        });
        Value::String(substituted.into_owned())
    }

    /// Resolve a dotted path (`node_1_result.ports[0]`) against the
    /// context. Any failed step yields null.
    pub fn resolve_path(&self, path: &str) -> Value {
        let mut current = Value::Object(self.data.clone());

        for part in path.split('.') {
            if current.is_null() {
                return Value::Null;
            }
            if let Some(caps) = index_regex().captures(part) {
                let key = &caps[1];
                let index: usize = caps[2].parse().unwrap_or(usize::MAX);
                let Some(list) = current.get(key) else {
                    return Value::Null;
                };
                match list.get(index) {
                    Some(item) => current = item.clone(),
                    None => return Value::Null,
                }
            } else {
                match current.get(part) {
                    Some(next) => current = next.clone(),
                    None => return Value::Null,
                }
            }
        }

        current
    }

    // =========================================================================
    // Condition evaluation
    // =========================================================================

    /// Evaluate a `<lhs> <op> <rhs>` condition against the context.
    ///
    /// The left side is always a path; the right side may be a `${path}`
    /// reference or a literal. An unparseable condition or a type-mismatched
    /// comparison evaluates to false, never an error.
    pub fn evaluate_condition(&self, condition: &str) -> bool {
        let condition = condition.trim();

        for op in OPERATORS {
            let Some((left, right)) = condition.split_once(*op) else {
                continue;
            };
            let left = left.trim();
            let right = right.trim();

            let left_value = self.resolve_path(left);
            let right_value = if right.starts_with("${") {
                self.resolve_value(&Value::String(right.to_string()))
            } else {
                parse_literal(right)
            };

            return compare(&left_value, op.trim(), &right_value);
        }

        warn!(condition, "could not parse condition");
        false
    }
}

fn parse_literal(value: &str) -> Value {
    let stripped_double = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'));
    let stripped_single = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''));
    if let Some(inner) = stripped_double.or(stripped_single) {
        return Value::String(inner.to_string());
    }

    if value.contains('.') {
        if let Ok(f) = value.parse::<f64>() {
            return Value::from(f);
        }
    } else if let Ok(i) = value.parse::<i64>() {
        return Value::from(i);
    }

    match value.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "none" => Value::Null,
        _ => Value::String(value.to_string()),
    }
}

/// Loose equality: numbers compare numerically regardless of integer or
/// float representation; everything else uses structural equality.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, op: &str, right: &Value) -> bool {
    match op {
        "==" => loose_eq(left, right),
        "!=" => !loose_eq(left, right),
        ">" | "<" | ">=" | "<=" => {
            let ordering = match (left, right) {
                (Value::String(l), Value::String(r)) => l.partial_cmp(r),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(l), Some(r)) => l.partial_cmp(&r),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                // Incomparable types evaluate to false
                return false;
            };
            match op {
                ">" => ordering.is_gt(),
                "<" => ordering.is_lt(),
                ">=" => ordering.is_ge(),
                _ => ordering.is_le(),
            }
        }
        "contains" => match left {
            Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
            Value::String(l) => match right {
                Value::String(r) => l.contains(r.as_str()),
                _ => false,
            },
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> WorkflowContext {
        let mut ctx = WorkflowContext::new(Some(&json!({"target": "10.0.0.1"})));
        ctx.set("status", json!("completed"));
        ctx.set("count", json!(15));
        ctx.set(
            "node_1_result",
            json!({"exit_code": 0, "ports": [22, 80, 443], "job": {"id": "abc"}}),
        );
        ctx
    }

    #[test]
    fn test_path_resolution() {
        let ctx = context();
        assert_eq!(ctx.resolve_path("status"), json!("completed"));
        assert_eq!(ctx.resolve_path("node_1_result.exit_code"), json!(0));
        assert_eq!(ctx.resolve_path("node_1_result.ports[1]"), json!(80));
        assert_eq!(ctx.resolve_path("node_1_result.job.id"), json!("abc"));
        assert_eq!(ctx.resolve_path("node_1_result.missing"), Value::Null);
        assert_eq!(ctx.resolve_path("node_1_result.ports[9]"), Value::Null);
        assert_eq!(ctx.resolve_path("nothing.at.all"), Value::Null);
    }

    #[test]
    fn test_whole_string_reference_preserves_type() {
        let ctx = context();
        assert_eq!(
            ctx.resolve_value(&json!("${node_1_result.ports}")),
            json!([22, 80, 443])
        );
        assert_eq!(ctx.resolve_value(&json!("${count}")), json!(15));
    }

    #[test]
    fn test_embedded_substitution_stringifies() {
        let ctx = context();
        assert_eq!(
            ctx.resolve_value(&json!("scan ${target} (${count} found)")),
            json!("scan 10.0.0.1 (15 found)")
        );
        // Missing references substitute as empty string
        assert_eq!(
            ctx.resolve_value(&json!("x=${missing}!")),
            json!("x=!")
        );
    }

    #[test]
    fn test_recursive_resolution() {
        let ctx = context();
        let resolved = ctx.resolve_value(&json!({
            "t": "${target}",
            "nested": {"ports": "${node_1_result.ports}"},
            "list": ["${status}", 3]
        }));
        assert_eq!(resolved["t"], "10.0.0.1");
        assert_eq!(resolved["nested"]["ports"], json!([22, 80, 443]));
        assert_eq!(resolved["list"], json!(["completed", 3]));
    }

    #[test]
    fn test_condition_branching_table() {
        let ctx = context();
        assert!(ctx.evaluate_condition("status == completed"));
        assert!(ctx.evaluate_condition("count > 10"));
        assert!(!ctx.evaluate_condition("count > 20"));
        assert!(ctx.evaluate_condition("status != failed"));
    }

    #[test]
    fn test_condition_operators() {
        let ctx = context();
        assert!(ctx.evaluate_condition("count >= 15"));
        assert!(ctx.evaluate_condition("count <= 15"));
        assert!(ctx.evaluate_condition("count < 16"));
        assert!(ctx.evaluate_condition("node_1_result.exit_code == 0"));
        assert!(ctx.evaluate_condition("node_1_result.ports contains 80"));
        assert!(!ctx.evaluate_condition("node_1_result.ports contains 8080"));
        assert!(ctx.evaluate_condition("status contains comp"));
    }

    #[test]
    fn test_condition_rhs_forms() {
        let ctx = context();
        assert!(ctx.evaluate_condition("status == \"completed\""));
        assert!(ctx.evaluate_condition("status == 'completed'"));
        assert!(ctx.evaluate_condition("missing == null"));
        assert!(ctx.evaluate_condition("missing == none"));
        assert!(ctx.evaluate_condition("count == ${count}"));
    }

    #[test]
    fn test_null_lhs_never_raises() {
        let ctx = context();
        // Unresolvable left side compares false for every operator
        assert!(!ctx.evaluate_condition("missing > 3"));
        assert!(!ctx.evaluate_condition("missing < 3"));
        assert!(!ctx.evaluate_condition("missing contains x"));
        assert!(!ctx.evaluate_condition("missing == 3"));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let ctx = context();
        assert!(!ctx.evaluate_condition("status > 5"));
        assert!(!ctx.evaluate_condition("node_1_result.ports > 5"));
    }

    #[test]
    fn test_unparseable_condition_is_false() {
        let ctx = context();
        assert!(!ctx.evaluate_condition("this has no operator"));
        assert!(!ctx.evaluate_condition(""));
    }

    #[test]
    fn test_integer_float_loose_equality() {
        let mut ctx = WorkflowContext::default();
        ctx.set("n", json!(15.0));
        assert!(ctx.evaluate_condition("n == 15"));
    }

    #[test]
    fn test_loop_context_lifecycle() {
        let mut ctx = WorkflowContext::default();
        ctx.set_loop_context(2, json!("host-c"), 5, "loop_1");
        assert_eq!(ctx.get("loop_index"), Some(&json!(2)));
        assert_eq!(ctx.get("loop_item"), Some(&json!("host-c")));
        assert_eq!(ctx.get("loop_total"), Some(&json!(5)));
        assert_eq!(ctx.get("loop_loop_1_index"), Some(&json!(2)));

        ctx.clear_loop_context();
        assert!(ctx.get("loop_index").is_none());
        assert!(ctx.get("loop_item").is_none());
        // Named bindings survive for later reference
        assert!(ctx.get("loop_loop_1_item").is_some());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let ctx = context();
        let saved = ctx.snapshot();
        let restored = WorkflowContext::from_saved(&saved);
        assert_eq!(restored.get("status"), Some(&json!("completed")));
        assert_eq!(
            restored.resolve_path("node_1_result.ports[0]"),
            json!(22)
        );
    }
}
