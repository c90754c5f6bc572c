//! 脚本 Planner 后端
//!
//! 把 Planner 调用委托给外部命令：请求经 stdin 传 JSON，回答从 stdout 读取。
//! 任何能按该约定收发的程序（模型 CLI、代理脚本、回放器）都可以接在这里。

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::error::CoreError;
use crate::planner::{ModelTier, Planner};

#[derive(Serialize)]
struct ScriptRequest<'a> {
    system: &'a str,
    user: &'a str,
    tier: &'a str,
}

/// 以子进程方式调用外部 Planner 命令
pub struct ScriptPlanner {
    program: String,
    args: Vec<String>,
}

impl ScriptPlanner {
    /// command 的首元素是程序路径，其余是固定参数
    pub fn new(command: &[String]) -> Result<Self, CoreError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CoreError::PlannerError("planner command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Planner for ScriptPlanner {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        tier: ModelTier,
    ) -> Result<String, CoreError> {
        let request = serde_json::to_vec(&ScriptRequest {
            system,
            user,
            tier: tier.as_str(),
        })
        .map_err(|e| CoreError::PlannerError(format!("encode request: {}", e)))?;

        debug!(program = %self.program, tier = tier.as_str(), "invoking planner command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("FLEET_PLANNER_TIER", tier.as_str())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::PlannerError(format!("spawn {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::PlannerError("planner stdin unavailable".to_string()))?;
        stdin
            .write_all(&request)
            .await
            .map_err(|e| CoreError::PlannerError(format!("write request: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CoreError::PlannerError(format!("wait for planner: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::PlannerError(format!(
                "planner exited with {}: {}",
                output.status,
                crate::state::records::truncate(stderr.trim(), 500)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
