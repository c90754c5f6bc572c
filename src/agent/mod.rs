//! 站点智能体决策循环
//!
//! 每个智能体在自己的站点上循环 评估 -> 计划 -> 执行 -> 报告。计划必须经指挥官
//! 批准才能执行；执行过的 URL 进入冷却窗口。tick 内任何失败都只影响本轮。

pub mod cooldown;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::core::scheduler::SchedulerHandle;
use crate::notify::{notify_best_effort, Notifier};
use crate::planner::{PlannerClient, StepVerdict};
use crate::state::records::{
    truncate, AgentRecord, AgentStatus, KpiSnapshot, PageSignal, ReviewStatus, SiteSnapshot,
    TimelineEvent, UrlAction,
};
use crate::state::store::assessment_is_stale;
use crate::state::StateStore;
use crate::tools::{ToolInvoker, ToolOutcome};

pub use cooldown::{determine_reassess_window, CooldownPolicy};

const ASSESSMENT_SYSTEM: &str = r#"You are {agent_name}, an autonomous agent managing {site_url}.
Your niche: {niche}.

NON-NEGOTIABLE MISSION:
1) Grow this site's revenue to at least ${revenue_target}/month.
2) Keep clear operational state so the reviewer and the human timeline stay accurate.

AUTONOMY RULES:
- You do not wait for human permission to do normal maintenance work.
- The reviewer is the only gate before execution.
- Always choose executable actions that CHANGE THE SITE to move revenue and rankings now.
- Do NOT rework the same URLs before their impact window expires unless there is a critical error.
- NEVER create plans that only run audit/research tools. Every plan MUST include at least one write tool.

CURRENT STATE:
{site_snapshot}

MISSION STATE:
{mission_state}

RECENT TASK HISTORY:
{task_history}

ACTIVE URL IMPACT WINDOWS (avoid touching until the listed time):
{url_cooldowns}

AVAILABLE TOOLS:
{tools_list}

IMPORTANT TOOL USAGE:
- Write tools accept a "payload" object in the step; put the full change instructions there.
- ONLY use tool names from the AVAILABLE TOOLS list. Do NOT invent tool names.

You are in ASSESSMENT mode. Analyze the current data and respond with JSON:
{
  "assessment": "2-3 sentence analysis of current site health",
  "top_priority": "The single most important thing to fix right now",
  "plan": {
    "name": "Short plan name",
    "target_urls": ["https://...", "..."],
    "reassess_after_hours": 24,
    "content_type": "refresh|new_content|internal_links|technical|monetization|mixed",
    "competition_level": "low|medium|high",
    "change_scope": "light|medium|heavy",
    "critical_override": false,
    "steps": [
      {"tool": "tool_name", "reason": "why this step", "payload": {}}
    ],
    "expected_impact": "What this should achieve"
  }
}

Reply with JSON only."#;

const ASSESSMENT_USER: &str = "Assess the current site state and create an action plan.";

const STEP_ANALYSIS_SYSTEM: &str = r#"You are {agent_name} executing a plan step.
You just ran the tool `{tool_name}` and got these results:

{tool_output}

Analyze the results and respond with JSON:
{
  "summary": "1-2 sentence summary of what the tool found/did",
  "next_action": "continue" or "pause" or "escalate",
  "escalation_reason": "only if next_action is escalate"
}

Reply with JSON only."#;

/// 单个智能体的身份与工具绑定
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub key: String,
    pub name: String,
    pub site_url: String,
    pub niche: String,
    /// 轻量流量信号工具，每次评估都跑
    pub signal_tool: String,
    /// 盘点工具，只在盘点过期且信号为空时跑
    pub inventory_tool: String,
    /// 深度审计工具，执行后补采 KPI 用
    pub audit_tool: String,
}

/// 时间类调参
#[derive(Debug, Clone)]
pub struct AgentTuning {
    pub stale_assessment: Duration,
    pub error_cooldown: Duration,
    pub inventory_fresh_for: Duration,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            stale_assessment: Duration::hours(1),
            error_cooldown: Duration::minutes(30),
            inventory_fresh_for: Duration::hours(6),
        }
    }
}

/// 信号工具结构化产出的宽容解析
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SignalReport {
    summary: SignalSummary,
    drops: Vec<serde_json::Value>,
    page2_opportunities: Vec<PageSignal>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SignalSummary {
    current_clicks: Option<f64>,
    prev_clicks: Option<f64>,
    change_pct: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InventoryReport {
    summary: InventorySummary,
    meta: InventoryMeta,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InventorySummary {
    total_posts: Option<u64>,
    orphan_count: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InventoryMeta {
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AuditReport {
    orphaned_posts: Vec<serde_json::Value>,
}

/// 智能体大脑：调度器每个 tick 调一次
pub struct AgentBrain {
    config: AgentConfig,
    tuning: AgentTuning,
    policy: CooldownPolicy,
    store: StateStore,
    tools: ToolInvoker,
    planner: PlannerClient,
    notifier: Arc<dyn Notifier>,
    scheduler: OnceLock<SchedulerHandle>,
}

impl AgentBrain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        tuning: AgentTuning,
        policy: CooldownPolicy,
        store: StateStore,
        tools: ToolInvoker,
        planner: PlannerClient,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            tuning,
            policy,
            store,
            tools,
            planner,
            notifier,
            scheduler: OnceLock::new(),
        }
    }

    pub fn agent_key(&self) -> &str {
        &self.config.key
    }

    /// 注册进调度器后回填句柄，用于评估完成时立刻触发审查
    pub fn attach_scheduler(&self, handle: SchedulerHandle) {
        let _ = self.scheduler.set(handle);
    }

    /// 主循环入口。内部任何错误都收敛为 error 状态加通知，绝不外抛。
    pub async fn tick(&self) {
        if let Err(e) = self.tick_inner().await {
            let msg = truncate(&format!("{:#}", e), 300);
            error!(agent_key = %self.config.key, error = %msg, "tick failed");
            if let Err(log_err) = self
                .store
                .log_agent_error(&self.config.key, &format!("tick error: {}", msg))
            {
                error!(agent_key = %self.config.key, error = %log_err, "failed to persist tick error");
            }
            notify_best_effort(
                self.notifier.as_ref(),
                &self.config.key,
                &format!("Error during tick: {}", msg),
            )
            .await;
        }
    }

    async fn tick_inner(&self) -> Result<()> {
        let rec = self.store.load_agent(&self.config.key)?;
        let status = rec.status;
        let prev_tick = rec.last_tick;
        self.store.set_agent_status(&self.config.key, status, None)?;
        self.store.increment_cycle_count()?;
        debug!(agent_key = %self.config.key, status = status.as_str(), "tick");

        match status {
            AgentStatus::Idle => self.idle_tick().await,
            AgentStatus::AwaitingApproval => self.check_approval().await,
            AgentStatus::Error => self.recover_from_error().await,
            s if s.is_in_flight() => {
                // 进行中状态却轮到了下一个 tick，说明上一轮被进程崩溃打断。
                // 放一个冷却时长观察，之后拉回空闲重新来过。
                if let Some(prev) = prev_tick {
                    if Utc::now() - prev > self.tuning.error_cooldown {
                        warn!(agent_key = %self.config.key, status = s.as_str(),
                            "stale in-flight status, resetting to idle");
                        self.store.set_agent_status(
                            &self.config.key,
                            AgentStatus::Idle,
                            Some("Recovered from interrupted cycle"),
                        )?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn idle_tick(&self) -> Result<()> {
        let rec = self.store.load_agent(&self.config.key)?;
        if let Some(pending) = &rec.pending_plan {
            if pending.status == ReviewStatus::Approved {
                return self.execute_plan(&rec).await;
            }
        }
        if let Some(reason) = self.store.consume_reassess_request(&self.config.key)? {
            info!(agent_key = %self.config.key, reason, "forced reassessment");
            return self.assess().await;
        }
        if assessment_is_stale(rec.last_assessment, self.tuning.stale_assessment) {
            return self.assess().await;
        }
        Ok(())
    }

    async fn check_approval(&self) -> Result<()> {
        // 审批是异步到达的，必须重读盘上状态
        let rec = self.store.load_agent(&self.config.key)?;
        match &rec.pending_plan {
            Some(p) if p.status == ReviewStatus::Approved => self.execute_plan(&rec).await,
            Some(_) => Ok(()),
            None => {
                // 驳回路径已清空计划，把状态拉回空闲等下轮重评
                self.store
                    .set_agent_status(&self.config.key, AgentStatus::Idle, None)
            }
        }
    }

    async fn recover_from_error(&self) -> Result<()> {
        let rec = self.store.load_agent(&self.config.key)?;
        if let Some(entry) = rec.error_log.first() {
            if Utc::now() - entry.at < self.tuning.error_cooldown {
                return Ok(());
            }
        }
        info!(agent_key = %self.config.key, "recovered from error, back to idle");
        self.store.set_agent_status(
            &self.config.key,
            AgentStatus::Idle,
            Some("Recovered from error"),
        )
    }

    /// 评估周期：采信号、组 prompt、产出计划并提交审查
    async fn assess(&self) -> Result<()> {
        let key = &self.config.key;
        self.store
            .set_agent_status(key, AgentStatus::Assessing, Some("Site assessment"))?;
        self.store.log_agent_timeline(
            key,
            TimelineEvent::new("assessment_started", "Started assessment cycle"),
        )?;
        notify_best_effort(self.notifier.as_ref(), key, "Starting site assessment...").await;

        let mut signal_ok = false;
        match self.tools.run(&self.config.signal_tool, None).await {
            Ok(outcome) if outcome.success => {
                if let Some(data) = &outcome.data {
                    match serde_json::from_value::<SignalReport>(data.clone()) {
                        Ok(report) => {
                            self.apply_signal_report(&report)?;
                            signal_ok = true;
                        }
                        Err(e) => warn!(agent_key = %key, error = %e, "unparseable signal data"),
                    }
                }
            }
            Ok(outcome) => {
                warn!(agent_key = %key, output = %truncate(&outcome.output, 200),
                    "signal tool reported failure");
            }
            Err(e) => warn!(agent_key = %key, error = %e, "signal tool unavailable"),
        }

        let rec = self.store.load_agent(key)?;
        if !signal_ok && self.inventory_is_stale(&rec) {
            // 信号为空且盘点过期才跑昂贵的全量盘点
            if let Ok(outcome) = self.tools.run(&self.config.inventory_tool, None).await {
                if outcome.success {
                    if let Some(data) = &outcome.data {
                        if let Ok(report) = serde_json::from_value::<InventoryReport>(data.clone())
                        {
                            self.apply_inventory_report(&report)?;
                        }
                    }
                }
            }
        }

        let rec = self.store.load_agent(key)?;
        self.store
            .set_agent_status(key, AgentStatus::Planning, Some("Creating action plan"))?;
        let system = self.build_assessment_prompt(&rec)?;

        let submission = match self.planner.propose_plan(&system, ASSESSMENT_USER).await {
            Ok(submission) => submission,
            Err(e) => {
                // Planner 失败不是站点故障：留痕后回到空闲，下轮再试
                self.store.log_agent_timeline(
                    key,
                    TimelineEvent::new("assessment_failed", &format!("Planner failed: {}", e)),
                )?;
                self.store.set_agent_status(key, AgentStatus::Idle, None)?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    key,
                    &format!("Assessment failed: {}", truncate(&e.to_string(), 200)),
                )
                .await;
                return Ok(());
            }
        };

        let top_priority = submission.top_priority.clone();
        let plan_name = submission.plan.display_name().to_string();
        self.store.submit_plan(key, submission)?;
        self.trigger_review_now();
        self.store.log_agent_timeline(
            key,
            TimelineEvent::new(
                "assessment_completed",
                &format!("Assessment complete. Priority: {}", top_priority),
            )
            .with_metadata(json!({ "plan_name": plan_name })),
        )?;
        self.store.mark_assessed(key)?;
        notify_best_effort(
            self.notifier.as_ref(),
            key,
            &format!(
                "Assessment complete. Top priority: {}\nPlan '{}' submitted for review.",
                top_priority, plan_name
            ),
        )
        .await;
        Ok(())
    }

    /// 逐步执行已批准的计划
    async fn execute_plan(&self, rec: &AgentRecord) -> Result<()> {
        let key = &self.config.key;
        let Some(pending) = &rec.pending_plan else {
            return Ok(());
        };
        let plan = pending.submission.plan.clone();
        let baseline = rec.kpis.clone();
        let (cooldown_hours, cooldown_reason) =
            determine_reassess_window(&plan, &rec.site_snapshot, &self.policy);

        if plan.steps.is_empty() {
            self.store.complete_task(key, "Empty plan, no steps to execute")?;
            return Ok(());
        }

        // 未知工具剔除而不是整单作废
        let (steps, invalid): (Vec<_>, Vec<_>) = plan
            .steps
            .iter()
            .partition(|s| self.tools.registry().contains(&s.tool));
        if !invalid.is_empty() {
            let names: Vec<&str> = invalid.iter().map(|s| s.tool.as_str()).collect();
            warn!(agent_key = %key, invalid = ?names, "stripped unknown tools from plan");
            if steps.is_empty() {
                self.store.complete_task(
                    key,
                    &format!("Plan had only unknown tools: {}", names.join(", ")),
                )?;
                return Ok(());
            }
        }

        self.store
            .set_agent_status(key, AgentStatus::Executing, Some(plan.display_name()))?;
        self.store.log_agent_timeline(
            key,
            TimelineEvent::new(
                "execution_started",
                &format!("Executing approved plan: {}", plan.display_name()),
            )
            .with_metadata(json!({ "steps": steps.len() })),
        )?;
        notify_best_effort(
            self.notifier.as_ref(),
            key,
            &format!("Executing plan: {} ({} steps)", plan.display_name(), steps.len()),
        )
        .await;

        let mut failed_steps = 0usize;
        let mut tools_ran: HashSet<String> = HashSet::new();

        for (i, step) in steps.iter().enumerate() {
            let step_label = format!(
                "{} (step {}/{}: {})",
                plan.display_name(),
                i + 1,
                steps.len(),
                step.tool
            );
            self.store
                .set_agent_status(key, AgentStatus::Executing, Some(&step_label))?;

            let is_write = self
                .tools
                .registry()
                .resolve(&step.tool)
                .map(|t| t.is_write())
                .unwrap_or(false);

            let outcome = match self.tools.run(&step.tool, step.payload.as_ref()).await {
                Ok(outcome) => outcome,
                Err(e) => ToolOutcome::fail(e.to_string()),
            };
            tools_ran.insert(step.tool.clone());

            if !outcome.success {
                failed_steps += 1;
                let error_msg = format!(
                    "Step {} ({}) failed: {}",
                    i + 1,
                    step.tool,
                    truncate(&outcome.output, 200)
                );
                self.store.log_agent_error(key, &error_msg)?;
                self.store.log_agent_timeline(
                    key,
                    TimelineEvent::new("step_failed", &error_msg)
                        .with_metadata(json!({ "step": i + 1, "tool": step.tool })),
                )?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    key,
                    &format!("Plan step failed: {}", error_msg),
                )
                .await;
                if is_write {
                    self.store.log_write_failure(key, &step.tool, &error_msg)?;
                }
                // 剩余步骤照常执行
                continue;
            }

            if is_write {
                self.store.log_write_activity(key, &step.tool)?;
                // 只有写步骤值得花一次轻量分析
                match self.analyze_step(&step.tool, &outcome).await {
                    Ok(analysis) => match analysis.next_action {
                        StepVerdict::Escalate => {
                            let reason = analysis
                                .escalation_reason
                                .unwrap_or_else(|| "Unknown issue".to_string());
                            self.store.add_escalation(key, &reason)?;
                            notify_best_effort(
                                self.notifier.as_ref(),
                                key,
                                &format!("Escalation: {}", reason),
                            )
                            .await;
                            break;
                        }
                        StepVerdict::Pause => {
                            notify_best_effort(
                                self.notifier.as_ref(),
                                key,
                                &format!("Pausing after step {}: {}", i + 1, analysis.summary),
                            )
                            .await;
                            break;
                        }
                        StepVerdict::Continue => {}
                    },
                    // 分析是可选的，拿不到就继续
                    Err(e) => debug!(agent_key = %key, error = %e, "step analysis unavailable"),
                }
            }
        }

        let post = self.capture_post_kpis(&tools_ran).await?;
        let notes = format!("{}/{} steps succeeded", steps.len() - failed_steps, steps.len());
        let confidence = if failed_steps == 0 { "high" } else { "medium" };
        self.store.record_execution_outcome(
            key,
            plan.display_name(),
            baseline,
            post,
            confidence,
            &notes,
        )?;

        let now = Utc::now();
        let not_before = now + Duration::hours(cooldown_hours as i64);
        let actions: Vec<UrlAction> = plan
            .target_urls
            .iter()
            .map(|url| UrlAction {
                url: url.clone(),
                action: format!(
                    "Plan execution: {} | cooldown={}h | {}",
                    plan.display_name(),
                    cooldown_hours,
                    cooldown_reason
                ),
                acted_at: now,
                review_not_before: not_before,
            })
            .collect();
        self.store.record_url_actions(key, actions)?;

        self.store
            .set_agent_status(key, AgentStatus::Reporting, Some("Generating report"))?;
        self.store
            .complete_task(key, &format!("Plan '{}' completed: {}", plan.display_name(), notes))?;
        notify_best_effort(
            self.notifier.as_ref(),
            key,
            &format!(
                "Plan complete: {}\nExpected impact: {}",
                plan.display_name(),
                plan.expected_impact.as_deref().unwrap_or("N/A")
            ),
        )
        .await;
        Ok(())
    }

    async fn analyze_step(
        &self,
        tool_name: &str,
        outcome: &ToolOutcome,
    ) -> Result<crate::planner::StepAnalysis, crate::core::CoreError> {
        let mut output_text = truncate(&outcome.output, 1500);
        if let Some(data) = &outcome.data {
            if let Some(map) = data.as_object() {
                let keys: Vec<&String> = map.keys().take(20).collect();
                output_text.push_str(&format!("\n\nStructured data keys: {:?}", keys));
            }
        }
        let system = STEP_ANALYSIS_SYSTEM
            .replace("{agent_name}", &self.config.name)
            .replace("{tool_name}", tool_name)
            .replace("{tool_output}", &output_text);
        self.planner.analyze_step(&system, "Analyze these results.").await
    }

    fn apply_signal_report(&self, report: &SignalReport) -> Result<()> {
        let key = &self.config.key;
        let rec = self.store.load_agent(key)?;
        let snapshot = SiteSnapshot {
            total_clicks: report.summary.current_clicks,
            prev_clicks: report.summary.prev_clicks,
            clicks_change_pct: report.summary.change_pct,
            declining_pages: Some(report.drops.len() as u64),
            page2_opportunities: Some(report.page2_opportunities.len() as u64),
            top_page2: report.page2_opportunities.iter().take(5).cloned().collect(),
            updated_at: Some(Utc::now()),
            // 盘点字段由盘点工具维护，这里原样保留
            total_posts: rec.site_snapshot.total_posts,
            orphan_count: rec.site_snapshot.orphan_count,
            inventory_updated_at: rec.site_snapshot.inventory_updated_at,
        };
        self.store.update_site_snapshot(key, snapshot)?;
        self.store
            .update_agent_kpis(key, &signal_kpis(report), Some(&self.config.signal_tool))?;
        Ok(())
    }

    fn apply_inventory_report(&self, report: &InventoryReport) -> Result<()> {
        let key = &self.config.key;
        let rec = self.store.load_agent(key)?;
        let mut snapshot = rec.site_snapshot.clone();
        snapshot.total_posts = report.summary.total_posts;
        snapshot.orphan_count = report.summary.orphan_count;
        snapshot.inventory_updated_at = report.meta.last_updated.or_else(|| Some(Utc::now()));
        self.store.update_site_snapshot(key, snapshot)?;
        if let Some(orphans) = report.summary.orphan_count {
            let mut updates = BTreeMap::new();
            updates.insert("orphan_pages_count".to_string(), Some(orphans as f64));
            self.store
                .update_agent_kpis(key, &updates, Some(&self.config.inventory_tool))?;
        }
        Ok(())
    }

    fn inventory_is_stale(&self, rec: &AgentRecord) -> bool {
        match rec.site_snapshot.inventory_updated_at {
            None => true,
            Some(at) => Utc::now() - at > self.tuning.inventory_fresh_for,
        }
    }

    /// 执行后补采 KPI；计划里已经跑过的工具不再重复跑
    async fn capture_post_kpis(&self, skip: &HashSet<String>) -> Result<KpiSnapshot> {
        let key = &self.config.key;
        if !skip.contains(&self.config.signal_tool) {
            if let Ok(outcome) = self.tools.run(&self.config.signal_tool, None).await {
                if outcome.success {
                    if let Some(data) = &outcome.data {
                        if let Ok(report) = serde_json::from_value::<SignalReport>(data.clone()) {
                            self.apply_signal_report(&report)?;
                        }
                    }
                }
            }
        }
        if !skip.contains(&self.config.audit_tool) {
            if let Ok(outcome) = self.tools.run(&self.config.audit_tool, None).await {
                if outcome.success {
                    if let Some(data) = &outcome.data {
                        if let Ok(report) = serde_json::from_value::<AuditReport>(data.clone()) {
                            let mut updates = BTreeMap::new();
                            updates.insert(
                                "orphan_pages_count".to_string(),
                                Some(report.orphaned_posts.len() as f64),
                            );
                            self.store.update_agent_kpis(
                                key,
                                &updates,
                                Some(&self.config.audit_tool),
                            )?;
                        }
                    }
                }
            }
        }
        Ok(self.store.load_agent(key)?.kpis)
    }

    fn build_assessment_prompt(&self, rec: &AgentRecord) -> Result<String> {
        let snapshot = serde_json::to_string_pretty(&rec.site_snapshot)?;
        let mission = serde_json::to_string_pretty(&rec.mission)?;
        let history: Vec<_> = rec.completed_tasks.iter().take(5).collect();
        let task_history = serde_json::to_string_pretty(&history)?;
        let cooldowns = self.store.get_active_url_cooldowns(&self.config.key)?;
        let cooldowns: BTreeMap<_, _> = cooldowns.into_iter().take(20).collect();
        let url_cooldowns = serde_json::to_string_pretty(&cooldowns)?;

        Ok(ASSESSMENT_SYSTEM
            .replace("{agent_name}", &self.config.name)
            .replace("{site_url}", &self.config.site_url)
            .replace("{niche}", &self.config.niche)
            .replace(
                "{revenue_target}",
                &format!("{:.0}", rec.mission.revenue_target_monthly_usd),
            )
            .replace("{site_snapshot}", &snapshot)
            .replace("{mission_state}", &mission)
            .replace("{task_history}", &task_history)
            .replace("{url_cooldowns}", &url_cooldowns)
            .replace("{tools_list}", &self.tools.registry().describe_all()))
    }

    fn trigger_review_now(&self) {
        if let Some(handle) = self.scheduler.get() {
            handle.review_now();
        }
    }
}

fn signal_kpis(report: &SignalReport) -> BTreeMap<String, Option<f64>> {
    let mut kpis = BTreeMap::new();
    kpis.insert(
        "organic_clicks_28d".to_string(),
        report.summary.current_clicks,
    );
    // page-2 机会数是「能快速赢」的关键词近似
    kpis.insert(
        "top20_keywords_count".to_string(),
        Some(report.page2_opportunities.len() as f64),
    );
    kpis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_kpis_keep_unknown_clicks_as_none() {
        let report = SignalReport {
            summary: SignalSummary::default(),
            drops: vec![],
            page2_opportunities: vec![PageSignal::default(), PageSignal::default()],
        };
        let kpis = signal_kpis(&report);
        assert_eq!(kpis["organic_clicks_28d"], None);
        assert_eq!(kpis["top20_keywords_count"], Some(2.0));
    }

    #[test]
    fn assessment_prompt_template_has_no_leftover_tokens() {
        // 模板里所有占位符都必须被 build_assessment_prompt 替换掉
        for token in [
            "{agent_name}",
            "{site_url}",
            "{niche}",
            "{revenue_target}",
            "{site_snapshot}",
            "{mission_state}",
            "{task_history}",
            "{url_cooldowns}",
            "{tools_list}",
        ] {
            assert!(ASSESSMENT_SYSTEM.contains(token), "missing {}", token);
        }
    }
}
