//! MCP server implementation using rmcp.
//!
//! Exposes script execution and the sandbox health report as MCP tools.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::coordinator::ExecutionCoordinator;
use crate::outcome::ResponseEnvelope;
use crate::request::check_script;

/// MCP server for sandboxed script execution.
#[derive(Clone)]
pub struct SandboxServer {
    coordinator: Arc<ExecutionCoordinator>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Python source defining a top-level `main()` function.
    #[schemars(description = "Python source that defines a top-level main() taking no arguments")]
    pub script: String,
}

#[tool_router]
impl SandboxServer {
    /// Create a new sandbox server.
    pub fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self {
            coordinator,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a script and return the response envelope as JSON text.
    #[tool(description = "Run a Python script's main() in a sandbox and return its JSON result and captured stdout")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(script_len = params.script.len(), "Executing script");

        let outcome = match check_script(Some(params.script.as_str())) {
            Ok(script) => self.coordinator.execute(script).await,
            Err(e) => Err(e),
        };
        let envelope = ResponseEnvelope::from_outcome(&outcome);
        let text = serde_json::to_string(&envelope)
            .map_err(|e| McpError::internal_error(format!("Failed to encode result: {e}"), None))?;

        if envelope.is_success() {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }

    /// Report whether the nsjail sandbox is usable.
    #[tool(description = "Report service health and whether the nsjail sandbox is available")]
    async fn health(&self) -> Result<CallToolResult, McpError> {
        let report = self.coordinator.health().await;
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(format!("Failed to encode report: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "safe-exec-daemon".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run untrusted Python scripts in an nsjail sandbox.\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - script: Python source defining a top-level main() with no arguments\n\
                 \n\
                 The result is JSON: {\"result\": <main() return value>, \"stdout\": <printed output>} \
                 on success, or {\"error\": <message>, ...} on failure."
                    .into(),
            ),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio(coordinator: Arc<ExecutionCoordinator>) -> anyhow::Result<()> {
    let server = SandboxServer::new(coordinator);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ProcessOutput};
    use crate::config::Config;
    use crate::test_support::{reported, MockBackend};
    use crate::workspace::Workspace;
    use serde_json::{json, Value};

    fn printed(_: &Workspace) -> Result<ProcessOutput, BackendError> {
        Ok(reported(0, r#"{"result": null, "stdout": "hi\n"}"#))
    }

    fn test_server() -> (SandboxServer, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace_root = Some(root.path().to_path_buf());
        let coordinator = ExecutionCoordinator::new(
            MockBackend::new("nsjail", printed),
            MockBackend::unavailable("restricted"),
            &config,
        );
        (SandboxServer::new(Arc::new(coordinator)), root)
    }

    /// `(is_error, envelope)` from a tool result.
    fn unpack(result: &CallToolResult) -> (bool, Value) {
        let value = serde_json::to_value(result).unwrap();
        let text = value["content"][0]["text"].as_str().unwrap();
        (
            value["isError"].as_bool().unwrap_or(false),
            serde_json::from_str(text).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (server, _root) = test_server();
        let params = Parameters(ExecuteParams {
            script: "def main():\n    print('hi')\n".to_string(),
        });

        let result = server.execute(params).await.unwrap();
        let (is_error, envelope) = unpack(&result);

        assert!(!is_error);
        assert_eq!(envelope, json!({"result": null, "stdout": "hi\n"}));
    }

    #[tokio::test]
    async fn test_execute_rejected_script() {
        let (server, _root) = test_server();
        let params = Parameters(ExecuteParams {
            script: "import subprocess\ndef main():\n    pass\n".to_string(),
        });

        let result = server.execute(params).await.unwrap();
        let (is_error, envelope) = unpack(&result);

        assert!(is_error);
        assert_eq!(
            envelope,
            json!({"error": "Dangerous import/function 'import subprocess' is not allowed"})
        );
    }

    #[tokio::test]
    async fn test_execute_empty_script() {
        let (server, _root) = test_server();
        let params = Parameters(ExecuteParams {
            script: String::new(),
        });

        let (is_error, envelope) = unpack(&server.execute(params).await.unwrap());

        assert!(is_error);
        assert_eq!(envelope["error"], "Script must be a non-empty string");
    }

    #[tokio::test]
    async fn test_execute_blank_script_needs_main() {
        let (server, _root) = test_server();
        let params = Parameters(ExecuteParams {
            script: "  \n".to_string(),
        });

        let (is_error, envelope) = unpack(&server.execute(params).await.unwrap());

        assert!(is_error);
        assert_eq!(
            envelope,
            json!({"error": "Script must define a top-level main() function that takes no arguments"})
        );
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _root) = test_server();
        let (is_error, report) = unpack(&server.health().await.unwrap());

        assert!(!is_error);
        assert_eq!(report["status"], "healthy");
        assert_eq!(report["sandbox"]["available"], true);
    }
}
