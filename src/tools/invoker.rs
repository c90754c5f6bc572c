//! 工具调用器
//!
//! 所有工具执行的必经之路：解析名称、限时运行、记审计日志。未知工具与超时
//! 以错误返回，让调用方决定是继续后续步骤还是中止。

use std::time::Duration;

use tracing::{info, warn};

use crate::core::error::CoreError;
use crate::state::records::truncate;
use crate::tools::{ToolOutcome, ToolRegistry};

const AUDIT_PREVIEW_CHARS: usize = 300;

#[derive(Clone)]
pub struct ToolInvoker {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一个工具。返回 Err 表示根本没执行成（未知工具 / 超时）；
    /// 工具自身的业务失败体现在 `ToolOutcome::success` 上。
    pub async fn run(
        &self,
        name: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<ToolOutcome, CoreError> {
        let tool = self
            .registry
            .resolve(name)
            .ok_or_else(|| CoreError::UnknownTool(name.to_string()))?;

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.timeout, tool.run(payload))
            .await
            .map_err(|_| {
                warn!(tool = name, timeout_secs = self.timeout.as_secs(), "tool timed out");
                CoreError::ToolTimeout(name.to_string())
            })?;

        let audit = serde_json::json!({
            "tool": tool.name(),
            "requested_as": name,
            "is_write": tool.is_write(),
            "success": outcome.success,
            "elapsed_ms": started.elapsed().as_millis() as u64,
            "output_preview": truncate(&outcome.output, AUDIT_PREVIEW_CHARS),
        });
        if outcome.success {
            info!(audit = %audit, "tool executed");
        } else {
            warn!(audit = %audit, "tool failed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps forever"
        }
        async fn run(&self, _payload: Option<&serde_json::Value>) -> ToolOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolOutcome::ok("never")
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let invoker = ToolInvoker::new(ToolRegistry::new(), 5);
        let err = invoker.run("missing", None).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownTool(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let invoker = ToolInvoker::new(registry, 1);
        let err = invoker.run("slow", None).await.unwrap_err();
        assert!(matches!(err, CoreError::ToolTimeout(_)));
    }
}
