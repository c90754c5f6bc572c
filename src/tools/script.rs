//! 脚本工具
//!
//! 以子进程封装外部脚本。可选 instructions_file 用于把步骤 payload 写给脚本，
//! 可选 output_file 用于读回脚本产出的结构化 JSON。

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::tools::{Tool, ToolOutcome};

pub struct ScriptTool {
    name: String,
    description: String,
    argv: Vec<String>,
    is_write: bool,
    /// 执行前把步骤 payload 以 JSON 写到这里，脚本自行读取
    instructions_file: Option<PathBuf>,
    /// 执行后从这里读回结构化产出
    output_file: Option<PathBuf>,
}

impl ScriptTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        argv: Vec<String>,
        is_write: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            argv,
            is_write,
            instructions_file: None,
            output_file: None,
        }
    }

    pub fn with_instructions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.instructions_file = Some(path.into());
        self
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_write(&self) -> bool {
        self.is_write
    }

    async fn run(&self, payload: Option<&serde_json::Value>) -> ToolOutcome {
        let Some((program, args)) = self.argv.split_first() else {
            return ToolOutcome::fail(format!("tool {} has an empty command", self.name));
        };

        if let (Some(path), Some(payload)) = (&self.instructions_file, payload) {
            let json = match serde_json::to_string_pretty(payload) {
                Ok(json) => json,
                Err(e) => return ToolOutcome::fail(format!("encode instructions: {}", e)),
            };
            if let Err(e) = tokio::fs::write(path, json).await {
                return ToolOutcome::fail(format!(
                    "write instructions to {}: {}",
                    path.display(),
                    e
                ));
            }
        }

        let output = match Command::new(program).args(args).output().await {
            Ok(output) => output,
            Err(e) => return ToolOutcome::fail(format!("spawn {}: {}", program, e)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutcome::fail(format!(
                "{} exited with {}: {}",
                self.name,
                output.status,
                stderr.trim()
            ));
        }

        let mut outcome = ToolOutcome::ok(stdout);
        if let Some(path) = &self.output_file {
            match tokio::fs::read_to_string(path).await {
                Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(data) => outcome = outcome.with_data(data),
                    Err(e) => {
                        warn!(tool = %self.name, path = %path.display(), error = %e,
                            "tool output file is not valid JSON");
                    }
                },
                Err(e) => {
                    // 产出文件缺失不算失败，脚本可能本次无事可报
                    warn!(tool = %self.name, path = %path.display(), error = %e,
                        "tool output file unavailable");
                }
            }
        }
        outcome
    }
}
