//! Tool sessions: the outbound seam to backend subprocesses.
//!
//! The trait is the narrow interface the executor sees; the MCP
//! implementation spawns one child process per backend over stdio via
//! `rmcp` and keeps exactly one call in flight per session.

use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation,
    ReadResourceRequestParams,
};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use stratum_kernel::error::{PlanError, PlanResult};
use stratum_kernel::plan::ServerKind;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

/// How to spawn one backend subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub server: ServerKind,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl BackendConfig {
    pub fn new(server: ServerKind, command: impl Into<String>) -> Self {
        Self {
            server,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// One initialized connection to a backend.
///
/// Implementations must serialize outbound calls: at most one request
/// is in flight per session at any time.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Invoke a tool and return its structured output.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> PlanResult<Value>;

    /// Read a resource by its logical path (scheme and trailing slash
    /// already stripped) and return the decoded content.
    async fn read_resource(&self, path: &str) -> PlanResult<Value>;

    /// Tear the connection down. Idempotent.
    async fn shutdown(&self) -> PlanResult<()>;
}

/// MCP stdio session backed by a child process.
#[derive(Debug)]
pub struct McpSession {
    server: ServerKind,
    // The mutex is the single-in-flight guarantee: it is held across
    // the whole outbound call.
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
}

impl McpSession {
    /// Spawn the backend subprocess and run the initialize handshake.
    pub async fn connect(config: &BackendConfig) -> PlanResult<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| {
            PlanError::Session(format!(
                "failed to start {} backend '{}': {}",
                config.server, config.command, e
            ))
        })?;

        let client_info = ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "stratum-runtime".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                description: None,
                icons: None,
                website_url: None,
            },
        };

        let service = client_info.serve(transport).await.map_err(|e| {
            PlanError::Session(format!(
                "initialize handshake with {} backend failed: {}",
                config.server, e
            ))
        })?;

        if let Some(peer_info) = service.peer().peer_info() {
            info!(
                server = %config.server,
                name = %peer_info.server_info.name,
                version = %peer_info.server_info.version,
                "backend session initialized"
            );
        }

        Ok(Self {
            server: config.server,
            service: Mutex::new(Some(service)),
        })
    }

    fn transport_error(&self, message: impl std::fmt::Display) -> PlanError {
        PlanError::Transport {
            server: self.server.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> PlanResult<Value> {
        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| self.transport_error("session closed"))?;

        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(arguments),
            meta: None,
            task: None,
        };

        let result = service
            .peer()
            .call_tool(params)
            .await
            .map_err(|e| self.transport_error(e))?;

        let content_values: Vec<Value> = result
            .content
            .iter()
            .map(|content| {
                serde_json::to_value(content)
                    .unwrap_or_else(|_| json!({"error": "serialization failed"}))
            })
            .collect();

        if result.is_error.unwrap_or(false) {
            let message = content_values
                .first()
                .and_then(|v| v.get("text").and_then(Value::as_str))
                .unwrap_or("unknown remote error")
                .to_string();
            return Err(PlanError::Remote {
                tool: name.to_string(),
                message,
            });
        }

        Ok(json!({ "content": content_values }))
    }

    async fn read_resource(&self, path: &str) -> PlanResult<Value> {
        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| self.transport_error("session closed"))?;

        // The file backend registers its resource template with a
        // trailing slash.
        let uri = format!("file://{path}/");
        let result = service
            .peer()
            .read_resource(ReadResourceRequestParams {
                uri: uri.into(),
                meta: None,
            })
            .await
            .map_err(|e| self.transport_error(e))?;

        let mut decoded: Vec<Value> = Vec::new();
        for contents in &result.contents {
            let Ok(value) = serde_json::to_value(contents) else {
                continue;
            };
            let Some(text) = value.get("text").and_then(Value::as_str) else {
                continue;
            };
            decoded.push(
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
            );
        }

        Ok(match decoded.len() {
            0 => Value::Null,
            1 => decoded.remove(0),
            _ => Value::Array(decoded),
        })
    }

    async fn shutdown(&self) -> PlanResult<()> {
        if let Some(service) = self.service.lock().await.take() {
            service
                .cancel()
                .await
                .map_err(|e| self.transport_error(format!("shutdown failed: {e:?}")))?;
            info!(server = %self.server, "backend session closed");
        }
        Ok(())
    }
}
