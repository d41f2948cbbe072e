//! Tool registry — name → tool map with per-bot filtering and dynamic
//! registration (MCP connections add tools at runtime).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crewgate_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::Tool;
use super::permissions::ToolPermissions;

/// Stores tools keyed by name and dispatches calls.
///
/// Interior mutability lets long-lived registries gain tools mid-session
/// (MCP connect) without exclusive ownership.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    permissions: ToolPermissions,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            permissions: ToolPermissions::allow_all(),
        }
    }

    pub fn with_permissions(permissions: ToolPermissions) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            permissions,
        }
    }

    /// Register a tool. Tools the permission set filters out are dropped at
    /// registration, so they never reach the model or execute.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.permissions.is_allowed(&name) {
            info!(tool = %name, "tool filtered by bot permissions");
            return;
        }
        self.tools.write().unwrap().insert(name, tool);
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().unwrap().remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions advertised to the model, with custom description
    /// overrides applied.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| {
                let mut def = t.to_definition();
                if let Some(desc) = self.permissions.description_override(t.name()) {
                    def.function.description = desc.to_string();
                }
                def
            })
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name. The model always gets a string back, even on
    /// failure.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let tool = {
            let tools = self.tools.read().unwrap();
            tools.get(name).cloned()
        };
        let Some(tool) = tool else {
            warn!(tool = %name, "tool not found");
            return format!("Error: Tool '{name}' not found");
        };

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn permissions(&self) -> &ToolPermissions {
        &self.permissions
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            let text = params.get("text").and_then(|v| v.as_str()).unwrap_or("(empty)");
            Ok(format!("Echo: {text}"))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(
            &self,
            _params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    #[test]
    fn test_register_and_names() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert_eq!(reg.tool_names(), vec!["echo", "fail"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.unregister("echo").is_some());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_execute_success_and_failure() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(FailTool));

        let mut params = HashMap::new();
        params.insert("text".into(), json!("hello"));
        assert_eq!(reg.execute("echo", params).await, "Echo: hello");

        let result = reg.execute("fail", HashMap::new()).await;
        assert!(result.starts_with("Error executing fail:"));
        assert!(result.contains("intentional failure"));

        let missing = reg.execute("nope", HashMap::new()).await;
        assert!(missing.starts_with("Error: Tool 'nope' not found"));
    }

    #[test]
    fn test_permission_filter_at_registration() {
        let perms = super::super::permissions::parse_permissions("## Denied Tools\n- fail\n");
        let reg = ToolRegistry::with_permissions(perms);
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(FailTool));
        assert!(reg.has("echo"));
        assert!(!reg.has("fail"));
        assert_eq!(reg.definitions().len(), 1);
    }

    #[test]
    fn test_allowlist_filters_registration() {
        let perms = super::super::permissions::parse_permissions("## Allowed Tools\n- echo\n");
        let reg = ToolRegistry::with_permissions(perms);
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(FailTool));
        assert_eq!(reg.tool_names(), vec!["echo"]);
    }

    #[test]
    fn test_custom_description_override() {
        let perms = super::super::permissions::parse_permissions(
            "## Custom Tools\n- echo: Repeat politely.\n",
        );
        let reg = ToolRegistry::with_permissions(perms);
        reg.register(Arc::new(EchoTool));
        let defs = reg.definitions();
        assert_eq!(defs[0].function.description, "Repeat politely.");
    }
}
