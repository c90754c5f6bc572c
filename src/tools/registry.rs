//! 工具注册表
//!
//! 名称到工具实例的映射，外加别名表。Planner 有时会用旧名或近似名引用工具，
//! 别名让这类引用仍然落到正确实现上。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::tools::Tool;

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, is_write = tool.is_write(), "registered tool");
        self.tools.insert(name, tool);
    }

    /// alias 解析到 canonical 名称；canonical 必须已注册或稍后注册
    pub fn register_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.to_string(), canonical.to_string());
    }

    /// 先查本名，再查别名
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.tools.get(name) {
            return Some(Arc::clone(tool));
        }
        self.aliases
            .get(name)
            .and_then(|canonical| self.tools.get(canonical))
            .map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Planner prompt 用的工具清单
    pub fn describe_all(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| {
                let marker = if t.is_write() { " [write]" } else { "" };
                format!("- {}{}: {}", t.name(), marker, t.description())
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutcome;
    use async_trait::async_trait;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "traffic_audit"
        }
        fn description(&self) -> &str {
            "Fetch traffic signals"
        }
        async fn run(&self, _payload: Option<&serde_json::Value>) -> ToolOutcome {
            ToolOutcome::ok("ok")
        }
    }

    #[test]
    fn resolves_by_name_and_alias() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoopTool));
        registry.register_alias("gsc_audit", "traffic_audit");

        assert!(registry.resolve("traffic_audit").is_some());
        assert!(registry.resolve("gsc_audit").is_some());
        assert!(registry.resolve("unknown").is_none());
    }
}
