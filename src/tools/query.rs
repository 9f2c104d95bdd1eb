//! SAFE-tier query tools: read-only status/introspection, no side effects.
//! Grounded on the teacher's read-only dashboard endpoints (`check_health`,
//! `get_system_status`) adapted into dispatchable tools.

use async_trait::async_trait;

use super::{Tool, ToolContext, ToolOutput};
use crate::error::Result;

pub struct CheckHealthTool;

#[async_trait]
impl Tool for CheckHealthTool {
    fn name(&self) -> &str {
        "check_health"
    }

    fn description(&self) -> &str {
        "Check whether the control plane and its sandboxed filesystem are reachable."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let sandbox_ok = ctx.sandbox.root().exists();
        Ok(ToolOutput::ok_with_meta(
            if sandbox_ok { "healthy" } else { "degraded: sandbox root missing" },
            serde_json::json!({"sandbox_ok": sandbox_ok}),
        ))
    }
}

pub struct GetSystemStatusTool {
    started_at: std::time::Instant,
}

impl GetSystemStatusTool {
    pub fn new() -> Self {
        Self { started_at: std::time::Instant::now() }
    }
}

impl Default for GetSystemStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetSystemStatusTool {
    fn name(&self) -> &str {
        "get_system_status"
    }

    fn description(&self) -> &str {
        "Report process uptime and build metadata."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let uptime_secs = self.started_at.elapsed().as_secs();
        Ok(ToolOutput::ok_with_meta(
            format!("uptime: {uptime_secs}s"),
            serde_json::json!({"uptime_secs": uptime_secs, "version": env!("CARGO_PKG_VERSION")}),
        ))
    }
}

pub struct ListToolsTool {
    catalogue: Vec<(String, String)>,
}

impl ListToolsTool {
    pub fn new(catalogue: Vec<(String, String)>) -> Self {
        Self { catalogue }
    }
}

#[async_trait]
impl Tool for ListToolsTool {
    fn name(&self) -> &str {
        "list_available_tools"
    }

    fn description(&self) -> &str {
        "List every tool registered with the dispatcher and its description."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let lines: Vec<String> =
            self.catalogue.iter().map(|(name, desc)| format!("{name}: {desc}")).collect();
        Ok(ToolOutput::ok_with_meta(
            lines.join("\n"),
            serde_json::json!({"tools": self.catalogue}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SandboxedFs;

    fn ctx() -> ToolContext {
        let tmp = std::env::temp_dir().join("agent-control-plane-query-test");
        std::fs::create_dir_all(&tmp).unwrap();
        ToolContext { sandbox: SandboxedFs::new(tmp).unwrap(), http_client: reqwest::Client::new() }
    }

    #[tokio::test]
    async fn check_health_reports_sandbox_ok() {
        let tool = CheckHealthTool;
        let out = tool.execute(serde_json::json!({}), &ctx()).await.unwrap();
        assert!(out.success);
        assert_eq!(out.metadata.unwrap()["sandbox_ok"], true);
    }

    #[tokio::test]
    async fn system_status_reports_uptime() {
        let tool = GetSystemStatusTool::new();
        let out = tool.execute(serde_json::json!({}), &ctx()).await.unwrap();
        assert!(out.success);
        assert!(out.metadata.unwrap()["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn list_tools_reports_catalogue() {
        let tool = ListToolsTool::new(vec![("exec".to_string(), "run a command".to_string())]);
        let out = tool.execute(serde_json::json!({}), &ctx()).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("exec"));
    }
}
