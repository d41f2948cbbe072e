//! The `Tool` trait — the interface every agent tool implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crewgate_core::types::ToolDefinition;

/// A side-effectful operation the model can request.
///
/// The loop discovers tools by `name()`, advertises their schemas via
/// `to_definition()`, and dispatches via `execute()`. The result string is
/// what the model reads; errors are folded into error strings at the
/// registry boundary.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls, e.g. `"read_file"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn optional_f64(params: &HashMap<String, Value>, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!("/tmp/a.txt"));
        assert_eq!(require_string(&params, "path").unwrap(), "/tmp/a.txt");
        assert!(require_string(&params, "missing").is_err());

        params.insert("num".into(), json!(7));
        assert!(require_string(&params, "num").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let mut params = HashMap::new();
        params.insert("mode".into(), json!("fast"));
        params.insert("count".into(), json!(3));
        params.insert("score".into(), json!(0.5));
        assert_eq!(optional_string(&params, "mode").as_deref(), Some("fast"));
        assert_eq!(optional_i64(&params, "count"), Some(3));
        assert_eq!(optional_f64(&params, "score"), Some(0.5));
        assert!(optional_string(&params, "none").is_none());
    }

    #[tokio::test]
    async fn test_default_definition() {
        struct Dummy;

        #[async_trait]
        impl Tool for Dummy {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "A test tool"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {}, "required": []})
            }
            async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
                Ok("ok".into())
            }
        }

        let def = Dummy.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
    }
}
