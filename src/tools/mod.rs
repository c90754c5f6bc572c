//! 工具层：注册表 + 调用器
//!
//! 工具是智能体作用于外界的唯一通道。读类工具产出信号数据，写类工具改动站点，
//! 两者都通过统一的调用器执行：超时保护、结构化审计日志、失败转错误。

pub mod invoker;
pub mod registry;
pub mod script;

use async_trait::async_trait;

pub use invoker::ToolInvoker;
pub use registry::ToolRegistry;
pub use script::ScriptTool;

/// 单次工具执行的结果
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    /// 工具产出的结构化数据（产出文件解析所得），没有则为 None
    pub data: Option<serde_json::Value>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// 可执行工具。payload 是计划步骤携带的指令数据，写类工具用它接收改动内容。
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 写类工具会改动外部站点，执行后需要结果分析与冷却登记
    fn is_write(&self) -> bool {
        false
    }

    async fn run(&self, payload: Option<&serde_json::Value>) -> ToolOutcome;
}
