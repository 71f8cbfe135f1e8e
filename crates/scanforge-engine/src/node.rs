//! Node execution results and node-data accessors.

use serde_json::Value;

/// Result of executing one workflow node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    /// Edge label to follow next (condition nodes).
    pub branch: Option<String>,
}

impl NodeResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            branch: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Object(Default::default()),
            error: Some(error.into()),
            branch: None,
        }
    }

    pub fn fail_with_data(error: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            data,
            error: Some(error.into()),
            branch: None,
        }
    }

    /// Whether this result asks the engine to suspend for manual approval.
    pub fn approval_required(&self) -> bool {
        self.data
            .get("approval_required")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Typed accessors over a node's `data` object.
pub(crate) struct NodeData<'a>(pub &'a Value);

impl NodeData<'_> {
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn str_or(&self, key: &str, default: &'static str) -> String {
        self.str(key).unwrap_or(default).to_string()
    }

    /// Integer field tolerant of string values; anything unparseable is
    /// the default.
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_approval_required_flag() {
        let plain = NodeResult::ok(json!({"x": 1}));
        assert!(!plain.approval_required());

        let waiting = NodeResult::ok(json!({"approval_required": true}));
        assert!(waiting.approval_required());
    }

    #[test]
    fn test_node_data_int_tolerates_strings() {
        let data = json!({"delay_seconds": "30", "bad": "abc", "n": 5});
        let d = NodeData(&data);
        assert_eq!(d.int_or("delay_seconds", 0), 30);
        assert_eq!(d.int_or("bad", 0), 0);
        assert_eq!(d.int_or("n", 0), 5);
        assert_eq!(d.int_or("missing", 7), 7);
    }
}
