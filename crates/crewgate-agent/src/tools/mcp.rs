//! MCP connect tool — on-demand connections to external tool servers.
//!
//! The concrete MCP client library lives outside this workspace; it shows
//! up here as the narrow `McpClient` trait. Connecting a server registers
//! its tool wrappers into the live registry and records the server in
//! `connected_servers`. Disconnection is best-effort and leaves
//! already-registered tools in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::base::{require_string, Tool};
use super::registry::ToolRegistry;

/// Contract for the external MCP client library.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Connect to a named server and return wrappers for its tools.
    async fn connect(&self, server: &str) -> anyhow::Result<Vec<Arc<dyn Tool>>>;

    /// Best-effort disconnect.
    async fn disconnect(&self, server: &str) -> anyhow::Result<()>;
}

pub struct McpConnectTool {
    client: Arc<dyn McpClient>,
    registry: Arc<ToolRegistry>,
    connected_servers: Mutex<HashSet<String>>,
}

impl McpConnectTool {
    pub fn new(client: Arc<dyn McpClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            registry,
            connected_servers: Mutex::new(HashSet::new()),
        }
    }

    pub async fn connected_servers(&self) -> Vec<String> {
        let servers = self.connected_servers.lock().await;
        let mut list: Vec<String> = servers.iter().cloned().collect();
        list.sort();
        list
    }

    /// Eager connection at startup; same path the tool call takes.
    pub async fn connect_server(&self, server: &str) -> anyhow::Result<String> {
        {
            let servers = self.connected_servers.lock().await;
            if servers.contains(server) {
                return Ok(format!("Already connected to '{server}'"));
            }
        }

        let tools = self.client.connect(server).await?;
        let mut names: Vec<String> = Vec::with_capacity(tools.len());
        for tool in tools {
            names.push(tool.name().to_string());
            self.registry.register(tool);
        }

        let mut servers = self.connected_servers.lock().await;
        servers.insert(server.to_string());
        info!(server = %server, tools = names.len(), "connected MCP server");
        Ok(format!(
            "Connected to '{server}'; added tools: {}",
            if names.is_empty() { "(none)".to_string() } else { names.join(", ") }
        ))
    }

    /// Best-effort; registered tools stay available.
    pub async fn disconnect_server(&self, server: &str) -> bool {
        let removed = {
            let mut servers = self.connected_servers.lock().await;
            servers.remove(server)
        };
        if removed {
            if let Err(e) = self.client.disconnect(server).await {
                warn!(server = %server, error = %e, "MCP disconnect failed");
            }
        }
        removed
    }

    /// Shutdown path: disconnect everything, keep going on errors.
    pub async fn disconnect_all(&self) {
        let servers = self.connected_servers().await;
        for server in servers {
            self.disconnect_server(&server).await;
        }
    }
}

#[async_trait]
impl Tool for McpConnectTool {
    fn name(&self) -> &str {
        "mcp_connect"
    }

    fn description(&self) -> &str {
        "Connect to an MCP tool server by name. Its tools become available \
         for the rest of the session."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string", "description": "Server name from configuration" }
            },
            "required": ["server"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let server = require_string(&params, "server")?;
        self.connect_server(&server).await
    }
}
