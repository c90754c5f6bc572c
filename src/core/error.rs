//! 核心错误类型
//!
//! 外部协作方（Planner / 工具）的失败一律是可恢复错误：调用方记录日志并回到稳定状态，
//! 绝不让单次 tick 的失败杀死进程。

use thiserror::Error;

/// 编排引擎运行过程中可能出现的错误（Planner、工具、解析）
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Planner error: {0}")]
    PlannerError(String),

    #[error("Planner timeout after {0}s")]
    PlannerTimeout(u64),

    /// Planner 返回了无法解析的输出；调用方按 Planner 失败处理，而不是 panic
    #[error("Malformed planner output: {0}")]
    MalformedPlannerOutput(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),
}
