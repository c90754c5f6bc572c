//! 指挥官：审批循环、组合分配与周期报告
//!
//! 指挥官是所有计划的唯一审查门。审查失败绝不默许放行，而是升级等人工处理。
//! 组合分配按周期重算，给出各站点的投入占比。

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::core::scheduler::SchedulerHandle;
use crate::notify::{notify_best_effort, Notifier};
use crate::planner::{PlannerClient, ReviewVerdict};
use crate::state::records::{
    truncate, AgentRecord, PortfolioAllocation, TimelineEvent,
};
use crate::state::StateStore;

const REVIEW_SYSTEM: &str = r#"You are the fleet commander autonomously reviewing agent plans.
You are FULLY AUTONOMOUS. Approve plans quickly to keep agents moving.

Approve if:
- The plan uses available tools correctly
- The priority order is reasonable (revenue leaks > declining pages > page-2 pushes > orphans > new content)
- The plan is actionable (not vague)

Only reject if:
- The plan would cause damage (deleting content, breaking links)
- The agent is using wrong site data (cross-contamination)
- The plan is completely nonsensical

Default to APPROVE. Speed matters more than perfection.

Respond as JSON:
{
  "decision": "approve" or "reject",
  "reasoning": "1-2 sentences explaining your decision",
  "feedback": "Specific feedback for the agent (if rejecting, what to change)"
}

Reply with JSON only."#;

/// 一条审查结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    Rejected,
    /// 审查本身失败，已登记升级项等人工介入
    Escalated,
}

#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub agent_key: String,
    pub outcome: ReviewOutcome,
    pub feedback: String,
}

pub struct CommanderBrain {
    store: StateStore,
    planner: PlannerClient,
    notifier: Arc<dyn Notifier>,
    agent_keys: Vec<String>,
    scheduler: OnceLock<SchedulerHandle>,
}

impl CommanderBrain {
    pub fn new(
        store: StateStore,
        planner: PlannerClient,
        notifier: Arc<dyn Notifier>,
        agent_keys: Vec<String>,
    ) -> Self {
        Self {
            store,
            planner,
            notifier,
            agent_keys,
            scheduler: OnceLock::new(),
        }
    }

    pub fn attach_scheduler(&self, handle: SchedulerHandle) {
        let _ = self.scheduler.set(handle);
    }

    /// 自主审查循环：逐个处理待审计划。Planner 失败时升级而不是放行。
    pub async fn review_cycle(&self) -> Result<Vec<ReviewResult>> {
        let cmd = self.store.load_commander()?;
        let mut results = Vec::new();

        for review in &cmd.pending_reviews {
            let agent_key = review.agent_key.clone();
            let agent = self.store.load_agent(&agent_key)?;
            let prompt = build_review_prompt(&agent, review)?;

            let decision = match self.planner.review_plan(REVIEW_SYSTEM, &prompt).await {
                Ok(decision) => decision,
                Err(e) => {
                    // 审查失败绝不自动批准
                    let issue = format!(
                        "Plan review failed (planner error: {}). Manual approval needed.",
                        truncate(&e.to_string(), 200)
                    );
                    warn!(agent_key = %agent_key, error = %e, "plan review failed, escalating");
                    self.store.add_escalation(&agent_key, &issue)?;
                    results.push(ReviewResult {
                        agent_key,
                        outcome: ReviewOutcome::Escalated,
                        feedback: issue,
                    });
                    continue;
                }
            };

            match decision.decision {
                ReviewVerdict::Approve => {
                    info!(agent_key = %agent_key, "plan approved");
                    self.store.approve_plan(&agent_key, Some(&decision.feedback))?;
                    // 批准后立刻踢一脚，让执行马上开始
                    if let Some(handle) = self.scheduler.get() {
                        handle.tick_agent(&agent_key);
                    }
                    results.push(ReviewResult {
                        agent_key,
                        outcome: ReviewOutcome::Approved,
                        feedback: decision.feedback,
                    });
                }
                ReviewVerdict::Reject => {
                    info!(agent_key = %agent_key, feedback = %decision.feedback, "plan rejected");
                    self.store.reject_plan(&agent_key, &decision.feedback)?;
                    results.push(ReviewResult {
                        agent_key,
                        outcome: ReviewOutcome::Rejected,
                        feedback: decision.feedback,
                    });
                }
            }
        }

        self.store.mark_review_cycle()?;
        self.refresh_portfolio_if_due()?;
        Ok(results)
    }

    /// 到期则重算组合分配策略
    pub fn refresh_portfolio_if_due(&self) -> Result<()> {
        let mut cmd = self.store.load_commander()?;
        let cadence = Duration::days(cmd.portfolio_strategy.cadence_days.max(1));
        let due = match cmd.portfolio_strategy.last_generated_at {
            None => true,
            Some(at) => Utc::now() - at >= cadence,
        };
        if !due {
            return Ok(());
        }

        let agents = self.load_agents()?;
        let allocations = build_allocations(&agents);
        let notes = allocations
            .first()
            .map(|top| {
                format!(
                    "Top priority: {} at {}% based on revenue gap, declines, orphan load, and trend.",
                    top.agent_key, top.allocation_pct
                )
            })
            .unwrap_or_else(|| "No agents registered.".to_string());

        cmd.portfolio_strategy.last_generated_at = Some(Utc::now());
        cmd.portfolio_strategy.allocations = allocations.clone();
        cmd.portfolio_strategy.notes = notes;
        self.store.save_commander(&mut cmd)?;
        self.store.log_commander_timeline(
            TimelineEvent::new("portfolio_strategy", "Generated portfolio allocation strategy")
                .with_metadata(json!({ "allocations": allocations })),
        )?;
        info!("portfolio strategy refreshed");
        Ok(())
    }

    fn load_agents(&self) -> Result<Vec<AgentRecord>> {
        self.agent_keys
            .iter()
            .map(|key| self.store.load_agent(key))
            .collect()
    }

    /// 从实际状态文件拼装实时状态报告
    pub fn live_status(&self) -> Result<String> {
        let cmd = self.store.load_commander()?;
        let mut lines = vec!["FLEET LIVE STATUS".to_string(), String::new()];

        for rec in self.load_agents()? {
            let mut line = format!("[{}] status: {}", rec.agent_key, rec.status.as_str());
            if let Some(task) = &rec.current_task {
                line.push_str(&format!(" ({})", truncate(task, 80)));
            }
            lines.push(line);

            let snap = &rec.site_snapshot;
            let mut metrics = Vec::new();
            if let Some(clicks) = snap.total_clicks {
                metrics.push(format!("clicks={:.0}", clicks));
            }
            if let Some(orphans) = snap.orphan_count {
                metrics.push(format!("orphans={}", orphans));
            }
            if let Some(declining) = snap.declining_pages {
                metrics.push(format!("declining={}", declining));
            }
            if !metrics.is_empty() {
                lines.push(format!("  {}", metrics.join(" | ")));
            }

            if let Some(plan) = &rec.pending_plan {
                lines.push(format!(
                    "  plan '{}' {:?} (submitted {})",
                    plan.submission.plan.display_name(),
                    plan.status,
                    plan.submitted_at.format("%Y-%m-%d %H:%M")
                ));
            }
            if let Some(last) = rec.completed_tasks.first() {
                lines.push(format!("  last task: {}", truncate(&last.summary, 60)));
            }
            if let Some(progress) = &rec.mission.last_progress_note {
                lines.push(format!("  mission progress: {}", truncate(progress, 70)));
            }
            if let Some(err) = rec.error_log.first() {
                lines.push(format!("  last error: {}", truncate(&err.error, 60)));
            }
            match rec.last_tick {
                Some(t) => lines.push(format!("  last tick: {}", t.format("%Y-%m-%d %H:%M"))),
                None => lines.push("  last tick: never".to_string()),
            }
        }

        if !cmd.pending_reviews.is_empty() {
            lines.push(format!("\nPending reviews: {}", cmd.pending_reviews.len()));
            for r in &cmd.pending_reviews {
                lines.push(format!(
                    "  - {}: submitted {}",
                    r.agent_key,
                    r.submitted_at.format("%Y-%m-%d %H:%M")
                ));
            }
        }

        let open: Vec<_> = cmd.escalations.iter().filter(|e| !e.resolved).collect();
        if !open.is_empty() {
            lines.push(format!("\nOpen escalations: {}", open.len()));
            for e in open {
                lines.push(format!("  - {}: {}", e.agent_key, truncate(&e.issue, 60)));
            }
        }

        if !cmd.portfolio_strategy.allocations.is_empty() {
            lines.push("\nPortfolio allocation:".to_string());
            for a in &cmd.portfolio_strategy.allocations {
                lines.push(format!(
                    "  - {}: {}% (score={}, {})",
                    a.agent_key,
                    a.allocation_pct,
                    a.priority_score,
                    truncate(&a.reason, 45)
                ));
            }
        }

        lines.push(format!(
            "\nGenerated {}",
            Utc::now().format("%Y-%m-%d %H:%M")
        ));
        Ok(lines.join("\n"))
    }

    /// 组合视角报告：分配占比 + 各站最近一次执行的 KPI 变化
    pub fn portfolio_status(&self) -> Result<String> {
        self.refresh_portfolio_if_due()?;
        let cmd = self.store.load_commander()?;
        let mut lines = vec!["PORTFOLIO STATUS".to_string()];
        lines.push(format!("  {}", cmd.portfolio_strategy.notes));

        for rec in self.load_agents()? {
            let alloc = cmd
                .portfolio_strategy
                .allocations
                .iter()
                .find(|a| a.agent_key == rec.agent_key);
            let header = match alloc {
                Some(a) => format!(
                    "[{}] allocation {}% (score {})",
                    rec.agent_key, a.allocation_pct, a.priority_score
                ),
                None => format!("[{}] no allocation yet", rec.agent_key),
            };
            lines.push(header);

            match rec.execution_history.first() {
                Some(outcome) => {
                    lines.push(format!(
                        "  last execution: {} ({})",
                        outcome.plan_name,
                        outcome.at.format("%Y-%m-%d %H:%M")
                    ));
                    for (metric, delta) in &outcome.deltas {
                        let abs = delta
                            .absolute
                            .map(|v| format!("{:+.1}", v))
                            .unwrap_or_else(|| "unknown".to_string());
                        let pct = delta
                            .pct
                            .map(|v| format!(" ({:+.1}%)", v))
                            .unwrap_or_default();
                        lines.push(format!("    {}: {}{}", metric, abs, pct));
                    }
                }
                None => lines.push("  no executions recorded".to_string()),
            }
        }
        Ok(lines.join("\n"))
    }

    /// 周期监控报告：纯数据汇总，不动用 Planner
    pub fn generate_periodic_report(&self) -> Result<String> {
        let window = self.store.flush_activity_window()?;
        let spend = self.planner.spend().flush();

        let window_start = window
            .window_start
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mut lines = vec![format!(
            "FLEET REPORT ({} - {})",
            window_start,
            Utc::now().format("%H:%M")
        )];

        lines.push("\nCHANGES MADE:".to_string());
        if window.writes.is_empty() {
            lines.push("  None, no site writes this window".to_string());
        } else {
            // 按 agent + 工具归并计数
            let mut counts: std::collections::BTreeMap<(String, String), usize> =
                std::collections::BTreeMap::new();
            for w in &window.writes {
                *counts.entry((w.agent_key.clone(), w.tool.clone())).or_default() += 1;
            }
            for ((agent, tool), count) in counts {
                lines.push(format!("  {}: {} x {}", agent, count, tool));
            }
        }

        if !window.failures.is_empty() {
            lines.push("\nFAILURES:".to_string());
            let mut seen = std::collections::HashSet::new();
            for f in window.failures.iter().take(10) {
                if seen.insert((f.agent_key.clone(), f.tool.clone())) {
                    lines.push(format!(
                        "  {}: {} - {}",
                        f.agent_key,
                        f.tool,
                        truncate(&f.error, 80)
                    ));
                }
            }
        }

        lines.push(format!("\nCYCLES: {} total", window.cycles));
        lines.push(format!(
            "PLANNER CALLS: {} ({} prompt chars, {} output chars)",
            spend.calls, spend.prompt_chars, spend.output_chars
        ));

        let cmd = self.store.load_commander()?;
        let new_escalations = cmd
            .escalations
            .iter()
            .filter(|e| !e.resolved && window.window_start.map(|ws| e.at > ws).unwrap_or(true))
            .count();
        lines.push(format!("ESCALATIONS: {} new", new_escalations));

        // 停滞检测：有循环没有写动作说明计划全是只读的
        if window.writes.is_empty() && window.cycles > 5 {
            lines.push(
                "\nWARNING: No site writes in this window.\n\
                 Agents are cycling but producing read-only plans."
                    .to_string(),
            );
        } else if window.writes.is_empty() && window.cycles == 0 {
            lines.push("\nNOTE: No agent activity this window.".to_string());
        }

        Ok(lines.join("\n"))
    }

    /// 生成并播报周期报告
    pub async fn publish_periodic_report(&self) -> Result<()> {
        let report = self.generate_periodic_report()?;
        self.store
            .log_commander_timeline(TimelineEvent::new("periodic_report", &truncate(&report, 500)))?;
        // 报告进对话缓冲，后续查询可以引用
        self.store.add_conversation("assistant", &report)?;
        notify_best_effort(self.notifier.as_ref(), "commander", &report).await;
        Ok(())
    }
}

fn build_review_prompt(
    agent: &AgentRecord,
    review: &crate::state::records::PendingReview,
) -> Result<String> {
    let snapshot = serde_json::to_string(&agent.site_snapshot)?;
    let completed: Vec<_> = agent.completed_tasks.iter().take(5).collect();
    let tasks = serde_json::to_string(&completed)?;
    let plan = serde_json::to_string_pretty(&review.submission)?;
    Ok(format!(
        "Agent: {}\nSite snapshot: {}\nRecent completed tasks: {}\nProposed plan:\n{}",
        agent.agent_key, snapshot, tasks, plan
    ))
}

/// 站点优先级打分：收入缺口是主导项，运行问题加权累加
pub fn priority_score(rec: &AgentRecord) -> (f64, String) {
    let target = rec.mission.revenue_target_monthly_usd;
    let revenue = rec.kpis.get("monthly_revenue_usd").unwrap_or(0.0);
    let revenue_gap = (target - revenue).max(0.0);
    let revenue_gap_ratio = if target > 0.0 {
        (revenue_gap / target).min(1.0)
    } else {
        0.0
    };

    let declines = rec.site_snapshot.declining_pages.unwrap_or(0) as f64;
    let orphans = rec.kpis.get("orphan_pages_count").unwrap_or(0.0);
    let click_delta_pct = rec.site_snapshot.clicks_change_pct.unwrap_or(0.0);
    let negative_trend = click_delta_pct.min(0.0).abs();
    let errors = rec.error_log.len() as f64;

    let mut score = revenue_gap_ratio * 45.0
        + declines.min(20.0) * 2.0
        + orphans.min(100.0) * 0.2
        + negative_trend * 0.8
        + errors * 3.0;
    if score < 1.0 {
        score = 1.0;
    }
    score = (score * 100.0).round() / 100.0;

    let reason = format!(
        "gap=${}/mo, declines={}, orphans={}, trend={:.1}%",
        revenue_gap as i64, declines as i64, orphans as i64, click_delta_pct
    );
    (score, reason)
}

/// 按得分降序分配占比；最后一名吃掉舍入剩余，保证总和恰好 100
pub fn build_allocations(agents: &[AgentRecord]) -> Vec<PortfolioAllocation> {
    let mut scored: Vec<(String, f64, String)> = agents
        .iter()
        .map(|rec| {
            let (score, reason) = priority_score(rec);
            (rec.agent_key.clone(), score, reason)
        })
        .collect();
    let total: f64 = scored.iter().map(|(_, s, _)| s).sum();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut allocations = Vec::new();
    let mut running_pct: i64 = 0;
    let count = scored.len();
    for (idx, (agent_key, score, reason)) in scored.into_iter().enumerate() {
        let pct = if idx == count - 1 {
            (100 - running_pct).max(0)
        } else if total > 0.0 {
            let pct = (score / total * 100.0).round() as i64;
            running_pct += pct;
            pct
        } else {
            0
        };
        allocations.push(PortfolioAllocation {
            agent_key,
            priority_score: score,
            allocation_pct: pct,
            reason,
        });
    }
    allocations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::records::SiteSnapshot;
    use std::collections::BTreeMap;

    fn agent(key: &str, revenue: f64, declines: u64) -> AgentRecord {
        let mut rec = AgentRecord {
            agent_key: key.to_string(),
            site_snapshot: SiteSnapshot {
                declining_pages: Some(declines),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut updates = BTreeMap::new();
        updates.insert("monthly_revenue_usd".to_string(), Some(revenue));
        rec.kpis.merge(&updates, None);
        rec
    }

    #[test]
    fn score_has_a_floor_of_one() {
        let mut rec = agent("done", 2000.0, 0);
        rec.site_snapshot.clicks_change_pct = Some(5.0);
        let (score, _) = priority_score(&rec);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn bigger_revenue_gap_scores_higher() {
        let (behind, _) = priority_score(&agent("behind", 0.0, 0));
        let (close, _) = priority_score(&agent("close", 900.0, 0));
        assert!(behind > close);
    }

    #[test]
    fn allocations_sum_to_exactly_one_hundred() {
        let agents = vec![
            agent("a", 0.0, 20),
            agent("b", 500.0, 3),
            agent("c", 950.0, 0),
        ];
        let allocations = build_allocations(&agents);
        assert_eq!(allocations.len(), 3);
        let total: i64 = allocations.iter().map(|a| a.allocation_pct).sum();
        assert_eq!(total, 100);
        // 降序排列，缺口最大的排最前
        assert_eq!(allocations[0].agent_key, "a");
        assert!(allocations[0].allocation_pct >= allocations[2].allocation_pct);
    }

    #[test]
    fn single_agent_takes_full_allocation() {
        let allocations = build_allocations(&[agent("solo", 0.0, 5)]);
        assert_eq!(allocations[0].allocation_pct, 100);
    }

    fn commander_with(dir: &tempfile::TempDir, keys: Vec<String>) -> CommanderBrain {
        use crate::notify::LogNotifier;
        use crate::planner::{MockPlanner, PlannerClient};
        let store = crate::state::StateStore::new(dir.path().join("state")).unwrap();
        CommanderBrain::new(
            store,
            PlannerClient::new(Arc::new(MockPlanner::new()), 5),
            Arc::new(LogNotifier),
            keys,
        )
    }

    #[tokio::test]
    async fn live_status_reflects_agent_records() {
        let dir = tempfile::tempdir().unwrap();
        let commander = commander_with(&dir, vec!["griddle".to_string()]);
        commander
            .store
            .set_agent_status(
                "griddle",
                crate::state::records::AgentStatus::Assessing,
                Some("Site assessment"),
            )
            .unwrap();

        let status = commander.live_status().unwrap();
        assert!(status.contains("[griddle] status: assessing"));
        assert!(status.contains("Site assessment"));
    }

    #[tokio::test]
    async fn portfolio_status_generates_allocations_on_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let commander = commander_with(&dir, vec!["a".to_string(), "b".to_string()]);
        // 触发一次初始分配
        let status = commander.portfolio_status().unwrap();
        assert!(status.contains("PORTFOLIO STATUS"));
        assert!(status.contains("Top priority:"));

        let cmd = commander.store.load_commander().unwrap();
        assert_eq!(cmd.portfolio_strategy.allocations.len(), 2);
        assert!(cmd.portfolio_strategy.last_generated_at.is_some());
    }
}
