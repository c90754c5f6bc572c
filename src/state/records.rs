//! 持久化文档类型
//!
//! 变更只通过 StateStore 的具名操作进行（绝不散落的字段赋值），以便每次变更同时
//! 追加 timeline 事件。所有有界日志都是最新在前（insert 0 + truncate）。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// timeline 上限（agent 与 commander 相同）
pub const TIMELINE_LIMIT: usize = 200;
pub const COMPLETED_TASKS_LIMIT: usize = 50;
pub const ERROR_LOG_LIMIT: usize = 20;
pub const EXECUTION_HISTORY_LIMIT: usize = 100;
pub const URL_ACTIONS_LIMIT: usize = 200;
/// 对话缓冲是滑动窗口：最旧的先丢
pub const CONVERSATION_LIMIT: usize = 20;

/// 智能体决策循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Assessing,
    Planning,
    AwaitingApproval,
    Executing,
    Reporting,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Assessing => "assessing",
            AgentStatus::Planning => "planning",
            AgentStatus::AwaitingApproval => "awaiting_approval",
            AgentStatus::Executing => "executing",
            AgentStatus::Reporting => "reporting",
            AgentStatus::Error => "error",
        }
    }

    /// tick 进行中的瞬态状态（崩溃后可能遗留在盘上）
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            AgentStatus::Assessing
                | AgentStatus::Planning
                | AgentStatus::Executing
                | AgentStatus::Reporting
        )
    }
}

/// 待审计划的审批状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    Rejected,
}

/// 计划中的单个工具步骤；payload 是写类工具的指令数据，对核心不透明
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlanStep {
    pub tool: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Planner 产出的结构化计划。字段全部可缺省：Planner 输出偶尔不完整，解析要宽容。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProposedPlan {
    pub name: String,
    pub target_urls: Vec<String>,
    pub steps: Vec<PlanStep>,
    pub reassess_after_hours: Option<f64>,
    pub content_type: Option<String>,
    pub competition_level: Option<String>,
    pub change_scope: Option<String>,
    pub critical_override: bool,
    pub expected_impact: Option<String>,
}

impl ProposedPlan {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Unnamed plan"
        } else {
            &self.name
        }
    }
}

/// 一次完整的评估提交：分析 + 最高优先级 + 计划
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlanSubmission {
    pub assessment: String,
    pub top_priority: String,
    pub plan: ProposedPlan,
}

/// 智能体当前的待审计划；每个智能体同一时刻至多一份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPlan {
    pub submitted_at: DateTime<Utc>,
    pub submission: PlanSubmission,
    pub status: ReviewStatus,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTask {
    pub completed_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub error: String,
}

/// timeline 事件：审计轨迹的最小单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TimelineEvent {
    pub fn new(kind: &str, message: &str) -> Self {
        Self {
            at: Utc::now(),
            kind: kind.to_string(),
            message: truncate(message, 1000),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 最新在前地追加并截断
pub fn push_timeline(timeline: &mut Vec<TimelineEvent>, event: TimelineEvent) {
    timeline.insert(0, event);
    timeline.truncate(TIMELINE_LIMIT);
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// KPI 快照：具名数值指标 + 来源标签。单调合并：None 永远不会覆盖已有值。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KpiSnapshot {
    pub values: BTreeMap<String, f64>,
    pub source: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl KpiSnapshot {
    /// 合并一批更新：只有非空值覆盖，已有的无关键保持不变
    pub fn merge(&mut self, updates: &BTreeMap<String, Option<f64>>, source: Option<&str>) {
        for (key, value) in updates {
            if let Some(v) = value {
                self.values.insert(key.clone(), *v);
            }
        }
        if let Some(s) = source {
            self.source = Some(s.to_string());
        }
        self.last_updated = Some(Utc::now());
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// 单个指标的前后变化；基线为零或任一侧未知时 pct 为 None——绝不除零，绝不凭空造百分比
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KpiDelta {
    pub absolute: Option<f64>,
    pub pct: Option<f64>,
}

/// 计算两份快照间所有指标（键取并集）的变化
pub fn kpi_deltas(before: &KpiSnapshot, after: &KpiSnapshot) -> BTreeMap<String, KpiDelta> {
    let mut keys: Vec<&String> = before.values.keys().collect();
    for k in after.values.keys() {
        if !before.values.contains_key(k) {
            keys.push(k);
        }
    }

    let mut deltas = BTreeMap::new();
    for key in keys {
        let b = before.get(key);
        let a = after.get(key);
        let delta = match (b, a) {
            (Some(b), Some(a)) => {
                let absolute = a - b;
                let pct = if b != 0.0 {
                    Some((absolute / b.abs()) * 100.0)
                } else {
                    None
                };
                KpiDelta {
                    absolute: Some(absolute),
                    pct,
                }
            }
            _ => KpiDelta::default(),
        };
        deltas.insert(key.clone(), delta);
    }
    deltas
}

/// 一次计划执行的前后 KPI 结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub at: DateTime<Utc>,
    pub plan_name: String,
    pub baseline_kpis: KpiSnapshot,
    pub post_kpis: KpiSnapshot,
    pub deltas: BTreeMap<String, KpiDelta>,
    pub confidence: String,
    pub notes: String,
}

/// 冷却台账条目：在 review_not_before 之前该 URL 不应被返工
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlAction {
    pub url: String,
    pub action: String,
    pub acted_at: DateTime<Utc>,
    pub review_not_before: DateTime<Utc>,
}

/// page-2 信号行：用于竞争度推断
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageSignal {
    pub url: String,
    pub position: Option<f64>,
    pub impressions: Option<f64>,
    pub clicks: Option<f64>,
}

/// 站点指标缓存：轻量信号工具与盘点工具的最近产出
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiteSnapshot {
    pub total_clicks: Option<f64>,
    pub prev_clicks: Option<f64>,
    pub clicks_change_pct: Option<f64>,
    pub declining_pages: Option<u64>,
    pub page2_opportunities: Option<u64>,
    pub top_page2: Vec<PageSignal>,
    pub total_posts: Option<u64>,
    pub orphan_count: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    /// 盘点数据刷新时间；决定昂贵检查是否可跳过
    pub inventory_updated_at: Option<DateTime<Utc>>,
}

/// 使命状态：目标与最近进展
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mission {
    pub objective: String,
    pub revenue_target_monthly_usd: f64,
    pub focus: String,
    pub last_progress_note: Option<String>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl Default for Mission {
    fn default() -> Self {
        Self {
            objective: "Grow this site's revenue while improving its health metrics.".to_string(),
            revenue_target_monthly_usd: 1000.0,
            focus: "Revenue leaks, rankings growth, and content quality execution.".to_string(),
            last_progress_note: None,
            last_progress_at: None,
        }
    }
}

/// 智能体持久化文档（每智能体一份，按 agent_key 存取）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentRecord {
    pub agent_key: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub pending_plan: Option<PendingPlan>,
    pub completed_tasks: Vec<CompletedTask>,
    pub site_snapshot: SiteSnapshot,
    pub error_log: Vec<ErrorEntry>,
    pub last_assessment: Option<DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// 一次性强制重评标志，下个空闲 tick 原子消费
    pub force_reassess: bool,
    pub force_reassess_reason: Option<String>,
    pub mission: Mission,
    pub kpis: KpiSnapshot,
    pub execution_history: Vec<ExecutionOutcome>,
    pub recent_url_actions: Vec<UrlAction>,
    pub timeline: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// 指挥官待审队列条目；与对应智能体的 pending_plan 镜像
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReview {
    pub agent_key: String,
    pub submitted_at: DateTime<Utc>,
    pub submission: PlanSubmission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub agent_key: String,
    pub issue: String,
    pub at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PortfolioAllocation {
    pub agent_key: String,
    pub priority_score: f64,
    pub allocation_pct: i64,
    pub reason: String,
}

/// 周期性重算的组合分配策略；落盘以便重启后仍然可用
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioStrategy {
    pub last_generated_at: Option<DateTime<Utc>>,
    pub cadence_days: i64,
    pub allocations: Vec<PortfolioAllocation>,
    pub notes: String,
}

impl Default for PortfolioStrategy {
    fn default() -> Self {
        Self {
            last_generated_at: None,
            cadence_days: 7,
            allocations: Vec::new(),
            notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteActivity {
    pub agent_key: String,
    pub tool: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFailure {
    pub agent_key: String,
    pub tool: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// 周期报告用的可清空计数窗口
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActivityWindow {
    pub window_start: Option<DateTime<Utc>>,
    pub writes: Vec<WriteActivity>,
    pub failures: Vec<WriteFailure>,
    pub cycles: u64,
}

/// 指挥官持久化文档（全局单份）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CommanderRecord {
    pub conversation_buffer: Vec<ConversationMessage>,
    pub pending_reviews: Vec<PendingReview>,
    pub escalations: Vec<Escalation>,
    pub last_review_cycle: Option<DateTime<Utc>>,
    pub portfolio_strategy: PortfolioStrategy,
    pub activity_window: ActivityWindow,
    pub timeline: Vec<TimelineEvent>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(values: &[(&str, f64)]) -> KpiSnapshot {
        let mut snap = KpiSnapshot::default();
        for (k, v) in values {
            snap.values.insert(k.to_string(), *v);
        }
        snap
    }

    #[test]
    fn kpi_merge_ignores_null_values() {
        let mut snap = snapshot_with(&[("x", 5.0), ("y", 2.0)]);
        let mut updates = BTreeMap::new();
        updates.insert("x".to_string(), None);
        snap.merge(&updates, Some("test"));
        assert_eq!(snap.get("x"), Some(5.0));
        assert_eq!(snap.get("y"), Some(2.0));
    }

    #[test]
    fn kpi_merge_empty_is_idempotent() {
        let mut snap = snapshot_with(&[("x", 5.0)]);
        snap.merge(&BTreeMap::new(), None);
        assert_eq!(snap.get("x"), Some(5.0));
        assert_eq!(snap.values.len(), 1);
    }

    #[test]
    fn kpi_merge_overwrites_with_fresh_value() {
        let mut snap = snapshot_with(&[("x", 5.0)]);
        let mut updates = BTreeMap::new();
        updates.insert("x".to_string(), Some(7.0));
        updates.insert("z".to_string(), Some(1.0));
        snap.merge(&updates, Some("signal"));
        assert_eq!(snap.get("x"), Some(7.0));
        assert_eq!(snap.get("z"), Some(1.0));
        assert_eq!(snap.source.as_deref(), Some("signal"));
    }

    #[test]
    fn delta_pct_is_none_on_zero_baseline() {
        let before = snapshot_with(&[("clicks", 0.0)]);
        let after = snapshot_with(&[("clicks", 10.0)]);
        let deltas = kpi_deltas(&before, &after);
        let d = &deltas["clicks"];
        assert_eq!(d.absolute, Some(10.0));
        assert!(d.pct.is_none());
    }

    #[test]
    fn delta_is_empty_when_either_side_unknown() {
        let before = snapshot_with(&[("clicks", 5.0)]);
        let after = KpiSnapshot::default();
        let deltas = kpi_deltas(&before, &after);
        let d = &deltas["clicks"];
        assert!(d.absolute.is_none());
        assert!(d.pct.is_none());
    }

    #[test]
    fn delta_pct_uses_absolute_baseline() {
        let before = snapshot_with(&[("trend", -10.0)]);
        let after = snapshot_with(&[("trend", -5.0)]);
        let deltas = kpi_deltas(&before, &after);
        let d = &deltas["trend"];
        assert_eq!(d.absolute, Some(5.0));
        assert_eq!(d.pct, Some(50.0));
    }

    #[test]
    fn timeline_push_is_newest_first_and_bounded() {
        let mut timeline = Vec::new();
        for i in 0..(TIMELINE_LIMIT + 10) {
            push_timeline(&mut timeline, TimelineEvent::new("tick", &format!("event {}", i)));
        }
        assert_eq!(timeline.len(), TIMELINE_LIMIT);
        assert!(timeline[0].message.contains(&format!("{}", TIMELINE_LIMIT + 9)));
    }

    #[test]
    fn old_document_backfills_missing_fields() {
        // 只有两个字段的旧文档：其余字段全部落默认值
        let raw = r#"{"agent_key": "griddle", "status": "awaiting_approval"}"#;
        let rec: AgentRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.agent_key, "griddle");
        assert_eq!(rec.status, AgentStatus::AwaitingApproval);
        assert!(rec.pending_plan.is_none());
        assert!(rec.timeline.is_empty());
        assert_eq!(rec.mission.revenue_target_monthly_usd, 1000.0);
    }

    #[test]
    fn proposed_plan_tolerates_partial_json() {
        let raw = r#"{"name": "Fix links", "steps": [{"tool": "inject_internal_links"}]}"#;
        let plan: ProposedPlan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(!plan.critical_override);
        assert!(plan.reassess_after_hours.is_none());
    }
}
