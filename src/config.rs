//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FLEET__*` 覆盖（双下划线表示嵌套，
//! 如 `FLEET__SCHEDULER__REVIEW_INTERVAL_MINUTES=5`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::agent::CooldownPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agents: Vec<AgentSection>,
    pub scheduler: SchedulerSection,
    pub planner: PlannerSection,
    pub tools: ToolsSection,
    pub tuning: TuningSection,
    pub cooldown: CooldownPolicy,
}

/// [app] 段：应用名与状态目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 状态文档目录，未设置时用 ./state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

/// [[agents]] 段：一个站点智能体
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub key: String,
    pub name: String,
    pub site_url: String,
    #[serde(default)]
    pub niche: String,
    /// 单独指定时覆盖 [scheduler] 的默认 tick 间隔
    pub interval_minutes: Option<u64>,
}

/// [scheduler] 段：各循环的节拍
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub agent_interval_minutes: u64,
    pub review_interval_minutes: u64,
    pub report_interval_hours: u64,
    pub quick_follow_up_secs: u64,
    pub first_tick_delay_secs: u64,
    pub stagger_secs: u64,
    pub first_review_delay_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            agent_interval_minutes: 60,
            review_interval_minutes: 15,
            report_interval_hours: 4,
            quick_follow_up_secs: 15,
            first_tick_delay_secs: 120,
            stagger_secs: 30,
            first_review_delay_secs: 60,
        }
    }
}

/// [planner] 段：外部 Planner 命令与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 首元素是程序路径，其余是固定参数
    pub command: Vec<String>,
    #[serde(default = "default_planner_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_planner_timeout_secs(),
        }
    }
}

fn default_planner_timeout_secs() -> u64 {
    120
}

/// [tools] 段：脚本工具与别名
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    pub scripts: Vec<ScriptToolSection>,
    /// 别名 -> 本名
    pub aliases: HashMap<String, String>,
}

fn default_tool_timeout_secs() -> u64 {
    300
}

/// [[tools.scripts]] 段：一个外部脚本工具
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptToolSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub is_write: bool,
    pub instructions_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

/// [tuning] 段：智能体时间类调参与工具绑定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningSection {
    pub stale_assessment_hours: u64,
    pub error_cooldown_minutes: u64,
    pub inventory_fresh_hours: u64,
    pub signal_tool: String,
    pub inventory_tool: String,
    pub audit_tool: String,
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            stale_assessment_hours: 1,
            error_cooldown_minutes: 30,
            inventory_fresh_hours: 6,
            signal_tool: "traffic_audit".to_string(),
            inventory_tool: "build_inventory".to_string(),
            audit_tool: "site_audit".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 FLEET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FLEET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FLEET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.agent_interval_minutes, 60);
        assert_eq!(cfg.scheduler.review_interval_minutes, 15);
        assert_eq!(cfg.tuning.signal_tool, "traffic_audit");
        assert_eq!(cfg.cooldown.min_hours, 12.0);
        assert!(cfg.agents.is_empty());
    }

    #[test]
    fn toml_sections_deserialize() {
        let raw = r#"
            [app]
            name = "fleet"
            state_dir = "/tmp/fleet-state"

            [[agents]]
            key = "griddle"
            name = "Griddle King"
            site_url = "https://griddleking.example"
            niche = "outdoor cooking"
            interval_minutes = 30

            [scheduler]
            review_interval_minutes = 5

            [planner]
            command = ["/usr/local/bin/planner", "--profile", "fleet"]

            [[tools.scripts]]
            name = "traffic_audit"
            description = "Fetch traffic signals"
            command = ["scripts/traffic_audit.sh"]

            [tools.aliases]
            gsc_audit = "traffic_audit"

            [cooldown]
            max_hours = 168.0
        "#;
        let cfg: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.agents.len(), 1);
        assert_eq!(cfg.agents[0].interval_minutes, Some(30));
        assert_eq!(cfg.scheduler.review_interval_minutes, 5);
        assert_eq!(cfg.scheduler.agent_interval_minutes, 60);
        assert_eq!(cfg.planner.command.len(), 3);
        assert_eq!(cfg.tools.scripts[0].name, "traffic_audit");
        assert_eq!(cfg.tools.aliases["gsc_audit"], "traffic_audit");
        assert_eq!(cfg.cooldown.max_hours, 168.0);
        assert_eq!(cfg.cooldown.min_hours, 12.0);
    }
}
