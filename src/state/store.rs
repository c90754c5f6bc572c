//! JSON 文件状态存储
//!
//! 每个智能体一个 `agent_<key>.json`，指挥官一个 `commander.json`。写入永远走
//! 临时文件 + 原子 rename，任何时刻盘上要么是旧的完整文档要么是新的完整文档。
//! 所有业务变更都是这里的具名操作：load、改字段、追加 timeline、save，一步完成。

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::state::records::{
    kpi_deltas, push_timeline, truncate, AgentRecord, AgentStatus, CommanderRecord, CompletedTask,
    ConversationMessage, ErrorEntry, Escalation, ExecutionOutcome, KpiSnapshot, PendingPlan,
    PendingReview, PlanSubmission, ReviewStatus, SiteSnapshot, TimelineEvent, UrlAction,
    WriteActivity, WriteFailure, COMPLETED_TASKS_LIMIT, CONVERSATION_LIMIT, ERROR_LOG_LIMIT,
    EXECUTION_HISTORY_LIMIT, URL_ACTIONS_LIMIT,
};

/// 去重升级项时比较的 issue 前缀长度
const ESCALATION_DEDUP_PREFIX: usize = 80;

/// 崩溃安全的文档存储。克隆廉价，可在各 brain 间共享。
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn agent_path(&self, agent_key: &str) -> PathBuf {
        self.state_dir.join(format!("agent_{}.json", agent_key))
    }

    fn commander_path(&self) -> PathBuf {
        self.state_dir.join("commander.json")
    }

    /// 原子写：同目录临时文件落盘后 rename 到位
    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("serialize state document")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.state_dir)
            .with_context(|| format!("create temp file in {}", self.state_dir.display()))?;
        tmp.write_all(json.as_bytes()).context("write state document")?;
        tmp.persist(path)
            .map_err(|e| anyhow::anyhow!("persist {}: {}", path.display(), e.error))?;
        Ok(())
    }

    /// 加载文档并回填缺省字段；回填改变了内容时立刻重写盘上文件，
    /// 这样 schema 迁移只发生一次
    fn load_or_default<T>(&self, path: &Path) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let doc: T = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", path.display()))?;
        let normalized = serde_json::to_string_pretty(&doc)?;
        if normalized != raw {
            debug!(path = %path.display(), "backfilled missing fields, rewriting document");
            self.write_atomic(path, &doc)?;
        }
        Ok(doc)
    }

    pub fn load_agent(&self, agent_key: &str) -> Result<AgentRecord> {
        let mut rec: AgentRecord = self.load_or_default(&self.agent_path(agent_key))?;
        if rec.agent_key.is_empty() {
            rec.agent_key = agent_key.to_string();
        }
        Ok(rec)
    }

    pub fn save_agent(&self, rec: &mut AgentRecord) -> Result<()> {
        rec.last_updated = Some(Utc::now());
        let path = self.agent_path(&rec.agent_key);
        self.write_atomic(&path, rec)
    }

    pub fn load_commander(&self) -> Result<CommanderRecord> {
        self.load_or_default(&self.commander_path())
    }

    pub fn save_commander(&self, rec: &mut CommanderRecord) -> Result<()> {
        rec.last_updated = Some(Utc::now());
        self.write_atomic(&self.commander_path(), rec)
    }

    // ------------------------------------------------------------------
    // 智能体具名操作
    // ------------------------------------------------------------------

    pub fn set_agent_status(
        &self,
        agent_key: &str,
        status: AgentStatus,
        task: Option<&str>,
    ) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        let prev = rec.status;
        rec.status = status;
        rec.last_tick = Some(Utc::now());
        if let Some(task) = task {
            rec.current_task = Some(task.to_string());
        }
        if prev != status {
            push_timeline(
                &mut rec.timeline,
                TimelineEvent::new(
                    "status_change",
                    &format!("{} -> {}", prev.as_str(), status.as_str()),
                ),
            );
        }
        self.save_agent(&mut rec)
    }

    /// 设置一次性强制重评标志
    pub fn request_reassess(&self, agent_key: &str, reason: &str) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        rec.force_reassess = true;
        rec.force_reassess_reason = Some(reason.to_string());
        push_timeline(
            &mut rec.timeline,
            TimelineEvent::new("reassess_requested", reason),
        );
        self.save_agent(&mut rec)
    }

    /// 原子地读取并清除重评标志；置位时返回原因
    pub fn consume_reassess_request(&self, agent_key: &str) -> Result<Option<String>> {
        let mut rec = self.load_agent(agent_key)?;
        if !rec.force_reassess {
            return Ok(None);
        }
        let reason = rec
            .force_reassess_reason
            .take()
            .unwrap_or_else(|| "unspecified".to_string());
        rec.force_reassess = false;
        self.save_agent(&mut rec)?;
        Ok(Some(reason))
    }

    /// 提交计划待审：写入智能体的 pending_plan 并镜像到指挥官队列
    pub fn submit_plan(&self, agent_key: &str, submission: PlanSubmission) -> Result<()> {
        let now = Utc::now();
        let mut rec = self.load_agent(agent_key)?;
        rec.pending_plan = Some(PendingPlan {
            submitted_at: now,
            submission: submission.clone(),
            status: ReviewStatus::PendingReview,
            feedback: None,
            approved_at: None,
            rejected_at: None,
        });
        rec.status = AgentStatus::AwaitingApproval;
        rec.current_task = Some(format!("Awaiting approval: {}", submission.plan.display_name()));
        push_timeline(
            &mut rec.timeline,
            TimelineEvent::new(
                "plan_submitted",
                &format!("Submitted plan '{}' for review", submission.plan.display_name()),
            ),
        );
        self.save_agent(&mut rec)?;

        let mut cmd = self.load_commander()?;
        cmd.pending_reviews.retain(|r| r.agent_key != agent_key);
        cmd.pending_reviews.push(PendingReview {
            agent_key: agent_key.to_string(),
            submitted_at: now,
            submission,
        });
        self.save_commander(&mut cmd)
    }

    pub fn approve_plan(&self, agent_key: &str, feedback: Option<&str>) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        let Some(plan) = rec.pending_plan.as_mut() else {
            warn!(agent_key, "approve_plan called with no pending plan");
            return Ok(());
        };
        plan.status = ReviewStatus::Approved;
        plan.approved_at = Some(Utc::now());
        plan.feedback = feedback.map(|f| f.to_string());
        let name = plan.submission.plan.display_name().to_string();
        rec.status = AgentStatus::Idle;
        rec.current_task = Some(format!("Plan approved: {}", name));
        push_timeline(
            &mut rec.timeline,
            TimelineEvent::new("plan_approved", &format!("Plan '{}' approved", name)),
        );
        self.save_agent(&mut rec)?;
        self.remove_pending_review(agent_key)
    }

    /// 驳回并清空：计划与上次评估一并作废，智能体回到空闲，下个 tick 重新评估
    pub fn reject_plan(&self, agent_key: &str, feedback: &str) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        let name = rec
            .pending_plan
            .as_ref()
            .map(|p| p.submission.plan.display_name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        rec.pending_plan = None;
        rec.last_assessment = None;
        rec.status = AgentStatus::Idle;
        rec.current_task = Some(format!("Plan rejected: {}", truncate(feedback, 200)));
        push_timeline(
            &mut rec.timeline,
            TimelineEvent::new(
                "plan_rejected",
                &format!("Plan '{}' rejected: {}", name, truncate(feedback, 500)),
            ),
        );
        self.save_agent(&mut rec)?;
        self.remove_pending_review(agent_key)
    }

    /// 任务完成：记录摘要、清空 pending_plan / current_task / last_assessment、
    /// 回到空闲，一次写盘。清掉 last_assessment 让下个 tick 立即重新评估。
    pub fn complete_task(&self, agent_key: &str, summary: &str) -> Result<()> {
        let now = Utc::now();
        let mut rec = self.load_agent(agent_key)?;
        rec.completed_tasks.insert(
            0,
            CompletedTask {
                completed_at: now,
                summary: truncate(summary, 1000),
            },
        );
        rec.completed_tasks.truncate(COMPLETED_TASKS_LIMIT);
        rec.pending_plan = None;
        rec.current_task = None;
        rec.last_assessment = None;
        rec.status = AgentStatus::Idle;
        rec.mission.last_progress_note = Some(truncate(summary, 300));
        rec.mission.last_progress_at = Some(now);
        push_timeline(
            &mut rec.timeline,
            TimelineEvent::new("task_completed", &truncate(summary, 500)),
        );
        self.save_agent(&mut rec)
    }

    pub fn log_agent_error(&self, agent_key: &str, error: &str) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        rec.error_log.insert(
            0,
            ErrorEntry {
                at: Utc::now(),
                error: truncate(error, 1000),
            },
        );
        rec.error_log.truncate(ERROR_LOG_LIMIT);
        rec.status = AgentStatus::Error;
        push_timeline(&mut rec.timeline, TimelineEvent::new("error", &truncate(error, 500)));
        self.save_agent(&mut rec)
    }

    /// 合并站点快照：只有 Some 字段覆盖，盘点字段由调用方负责保留
    pub fn update_site_snapshot(&self, agent_key: &str, snapshot: SiteSnapshot) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        rec.site_snapshot = snapshot;
        self.save_agent(&mut rec)
    }

    pub fn update_agent_kpis(
        &self,
        agent_key: &str,
        updates: &BTreeMap<String, Option<f64>>,
        source: Option<&str>,
    ) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        rec.kpis.merge(updates, source);
        self.save_agent(&mut rec)
    }

    pub fn mark_assessed(&self, agent_key: &str) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        rec.last_assessment = Some(Utc::now());
        self.save_agent(&mut rec)
    }

    /// 记录一次执行结果（before/after KPI 对比）
    pub fn record_execution_outcome(
        &self,
        agent_key: &str,
        plan_name: &str,
        baseline: KpiSnapshot,
        post: KpiSnapshot,
        confidence: &str,
        notes: &str,
    ) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        let deltas = kpi_deltas(&baseline, &post);
        rec.execution_history.insert(
            0,
            ExecutionOutcome {
                at: Utc::now(),
                plan_name: plan_name.to_string(),
                baseline_kpis: baseline,
                post_kpis: post,
                deltas,
                confidence: confidence.to_string(),
                notes: truncate(notes, 1000),
            },
        );
        rec.execution_history.truncate(EXECUTION_HISTORY_LIMIT);
        self.save_agent(&mut rec)
    }

    /// 追加 URL 冷却台账条目
    pub fn record_url_actions(&self, agent_key: &str, actions: Vec<UrlAction>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let mut rec = self.load_agent(agent_key)?;
        for action in actions {
            rec.recent_url_actions.insert(0, action);
        }
        rec.recent_url_actions.truncate(URL_ACTIONS_LIMIT);
        self.save_agent(&mut rec)
    }

    /// 仍在冷却期内的 URL（url -> 冷却截止时间）
    pub fn get_active_url_cooldowns(
        &self,
        agent_key: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let rec = self.load_agent(agent_key)?;
        let now = Utc::now();
        let mut active = BTreeMap::new();
        for action in &rec.recent_url_actions {
            if action.review_not_before > now {
                let entry = active
                    .entry(action.url.clone())
                    .or_insert(action.review_not_before);
                if action.review_not_before > *entry {
                    *entry = action.review_not_before;
                }
            }
        }
        Ok(active)
    }

    pub fn log_agent_timeline(&self, agent_key: &str, event: TimelineEvent) -> Result<()> {
        let mut rec = self.load_agent(agent_key)?;
        push_timeline(&mut rec.timeline, event);
        self.save_agent(&mut rec)
    }

    // ------------------------------------------------------------------
    // 指挥官具名操作
    // ------------------------------------------------------------------

    pub fn log_commander_timeline(&self, event: TimelineEvent) -> Result<()> {
        let mut cmd = self.load_commander()?;
        push_timeline(&mut cmd.timeline, event);
        self.save_commander(&mut cmd)
    }

    /// 对话缓冲是滑动窗口：满了丢最旧的
    pub fn add_conversation(&self, role: &str, text: &str) -> Result<()> {
        let mut cmd = self.load_commander()?;
        cmd.conversation_buffer.push(ConversationMessage {
            role: role.to_string(),
            text: truncate(text, 2000),
            at: Utc::now(),
        });
        let len = cmd.conversation_buffer.len();
        if len > CONVERSATION_LIMIT {
            cmd.conversation_buffer.drain(0..len - CONVERSATION_LIMIT);
        }
        self.save_commander(&mut cmd)
    }

    /// 登记升级项；同一智能体已有未解决的相同问题（前 80 字符不区分大小写）时跳过
    pub fn add_escalation(&self, agent_key: &str, issue: &str) -> Result<()> {
        let mut cmd = self.load_commander()?;
        let prefix = dedup_prefix(issue);
        let duplicate = cmd.escalations.iter().any(|e| {
            !e.resolved && e.agent_key == agent_key && dedup_prefix(&e.issue) == prefix
        });
        if duplicate {
            debug!(agent_key, "skipping duplicate escalation");
            return Ok(());
        }
        cmd.escalations.push(Escalation {
            agent_key: agent_key.to_string(),
            issue: truncate(issue, 1000),
            at: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolution: None,
        });
        push_timeline(
            &mut cmd.timeline,
            TimelineEvent::new(
                "escalation",
                &format!("[{}] {}", agent_key, truncate(issue, 300)),
            ),
        );
        info!(agent_key, "escalation recorded");
        self.save_commander(&mut cmd)
    }

    /// 解决该智能体所有未解决的升级项
    pub fn resolve_escalations(&self, agent_key: &str, resolution: &str) -> Result<usize> {
        let mut cmd = self.load_commander()?;
        let now = Utc::now();
        let mut resolved = 0;
        for e in cmd.escalations.iter_mut() {
            if !e.resolved && e.agent_key == agent_key {
                e.resolved = true;
                e.resolved_at = Some(now);
                e.resolution = Some(resolution.to_string());
                resolved += 1;
            }
        }
        if resolved > 0 {
            self.save_commander(&mut cmd)?;
        }
        Ok(resolved)
    }

    pub fn log_write_activity(&self, agent_key: &str, tool: &str) -> Result<()> {
        let mut cmd = self.load_commander()?;
        let window = &mut cmd.activity_window;
        if window.window_start.is_none() {
            window.window_start = Some(Utc::now());
        }
        window.writes.push(WriteActivity {
            agent_key: agent_key.to_string(),
            tool: tool.to_string(),
            at: Utc::now(),
        });
        self.save_commander(&mut cmd)
    }

    pub fn log_write_failure(&self, agent_key: &str, tool: &str, error: &str) -> Result<()> {
        let mut cmd = self.load_commander()?;
        let window = &mut cmd.activity_window;
        if window.window_start.is_none() {
            window.window_start = Some(Utc::now());
        }
        window.failures.push(WriteFailure {
            agent_key: agent_key.to_string(),
            tool: tool.to_string(),
            error: truncate(error, 500),
            at: Utc::now(),
        });
        self.save_commander(&mut cmd)
    }

    pub fn increment_cycle_count(&self) -> Result<()> {
        let mut cmd = self.load_commander()?;
        if cmd.activity_window.window_start.is_none() {
            cmd.activity_window.window_start = Some(Utc::now());
        }
        cmd.activity_window.cycles += 1;
        self.save_commander(&mut cmd)
    }

    /// 取出并清空活动窗口（周期报告消费）
    pub fn flush_activity_window(&self) -> Result<crate::state::records::ActivityWindow> {
        let mut cmd = self.load_commander()?;
        let window = std::mem::take(&mut cmd.activity_window);
        cmd.activity_window.window_start = Some(Utc::now());
        self.save_commander(&mut cmd)?;
        Ok(window)
    }

    pub fn mark_review_cycle(&self) -> Result<()> {
        let mut cmd = self.load_commander()?;
        cmd.last_review_cycle = Some(Utc::now());
        self.save_commander(&mut cmd)
    }

    fn remove_pending_review(&self, agent_key: &str) -> Result<()> {
        let mut cmd = self.load_commander()?;
        let before = cmd.pending_reviews.len();
        cmd.pending_reviews.retain(|r| r.agent_key != agent_key);
        if cmd.pending_reviews.len() != before {
            self.save_commander(&mut cmd)?;
        }
        Ok(())
    }
}

fn dedup_prefix(issue: &str) -> String {
    issue
        .chars()
        .take(ESCALATION_DEDUP_PREFIX)
        .collect::<String>()
        .to_lowercase()
}

/// 判断上次评估是否已过期
pub fn assessment_is_stale(
    last_assessment: Option<DateTime<Utc>>,
    stale_after: Duration,
) -> bool {
    match last_assessment {
        None => true,
        Some(at) => Utc::now() - at > stale_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::records::{PlanStep, ProposedPlan};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state")).unwrap();
        (dir, store)
    }

    fn submission(name: &str) -> PlanSubmission {
        PlanSubmission {
            assessment: "Traffic is declining on two money pages.".to_string(),
            top_priority: "Recover declining pages".to_string(),
            plan: ProposedPlan {
                name: name.to_string(),
                steps: vec![PlanStep {
                    tool: "refresh_content".to_string(),
                    reason: "Page is stale".to_string(),
                    payload: None,
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn missing_document_loads_as_default() {
        let (_dir, store) = store();
        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.agent_key, "alpha");
        assert_eq!(rec.status, AgentStatus::Idle);
        assert!(rec.pending_plan.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        store
            .set_agent_status("alpha", AgentStatus::Assessing, Some("Running audit"))
            .unwrap();
        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::Assessing);
        assert_eq!(rec.current_task.as_deref(), Some("Running audit"));
        assert!(rec.last_tick.is_some());
        assert_eq!(rec.timeline[0].kind, "status_change");
    }

    #[test]
    fn partial_document_on_disk_is_backfilled_and_rewritten() {
        let (_dir, store) = store();
        let path = store.state_dir().join("agent_alpha.json");
        std::fs::write(&path, r#"{"agent_key": "alpha", "status": "executing"}"#).unwrap();

        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::Executing);
        assert!(rec.timeline.is_empty());

        // 回填后盘上文件应当已是完整 schema
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"mission\""));
        assert!(raw.contains("\"kpis\""));
    }

    #[test]
    fn submit_plan_mirrors_into_commander_queue() {
        let (_dir, store) = store();
        store.submit_plan("alpha", submission("Fix links")).unwrap();

        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::AwaitingApproval);
        let plan = rec.pending_plan.unwrap();
        assert_eq!(plan.status, ReviewStatus::PendingReview);

        let cmd = store.load_commander().unwrap();
        assert_eq!(cmd.pending_reviews.len(), 1);
        assert_eq!(cmd.pending_reviews[0].agent_key, "alpha");
    }

    #[test]
    fn approve_plan_marks_approved_and_clears_queue() {
        let (_dir, store) = store();
        store.submit_plan("alpha", submission("Fix links")).unwrap();
        store.approve_plan("alpha", Some("Looks good")).unwrap();

        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::Idle);
        let plan = rec.pending_plan.unwrap();
        assert_eq!(plan.status, ReviewStatus::Approved);
        assert!(plan.approved_at.is_some());

        let cmd = store.load_commander().unwrap();
        assert!(cmd.pending_reviews.is_empty());
    }

    #[test]
    fn reject_plan_clears_plan_and_assessment() {
        let (_dir, store) = store();
        store.mark_assessed("alpha").unwrap();
        store.submit_plan("alpha", submission("Risky rewrite")).unwrap();
        store.reject_plan("alpha", "Too many pages at once").unwrap();

        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::Idle);
        assert!(rec.pending_plan.is_none());
        assert!(rec.last_assessment.is_none());
        let cmd = store.load_commander().unwrap();
        assert!(cmd.pending_reviews.is_empty());
    }

    #[test]
    fn complete_task_resets_to_idle_atomically() {
        let (_dir, store) = store();
        store.mark_assessed("alpha").unwrap();
        store.submit_plan("alpha", submission("Fix links")).unwrap();
        store.approve_plan("alpha", None).unwrap();
        store.complete_task("alpha", "Executed 1/1 steps").unwrap();

        let rec = store.load_agent("alpha").unwrap();
        assert_eq!(rec.status, AgentStatus::Idle);
        assert!(rec.pending_plan.is_none());
        assert!(rec.current_task.is_none());
        // 上次评估一并清空，下个 tick 直接进入快速重评路径
        assert!(rec.last_assessment.is_none());
        assert_eq!(rec.completed_tasks.len(), 1);
        assert_eq!(
            rec.mission.last_progress_note.as_deref(),
            Some("Executed 1/1 steps")
        );
        assert!(rec.mission.last_progress_at.is_some());
    }

    #[test]
    fn consume_reassess_request_is_one_shot() {
        let (_dir, store) = store();
        store.request_reassess("alpha", "Approved plan finished").unwrap();
        let reason = store.consume_reassess_request("alpha").unwrap();
        assert_eq!(reason.as_deref(), Some("Approved plan finished"));
        assert!(store.consume_reassess_request("alpha").unwrap().is_none());
    }

    #[test]
    fn active_cooldowns_exclude_expired_entries() {
        let (_dir, store) = store();
        let now = Utc::now();
        store
            .record_url_actions(
                "alpha",
                vec![
                    UrlAction {
                        url: "https://site.test/a".to_string(),
                        action: "refresh_content".to_string(),
                        acted_at: now - Duration::hours(100),
                        review_not_before: now - Duration::hours(4),
                    },
                    UrlAction {
                        url: "https://site.test/b".to_string(),
                        action: "refresh_content".to_string(),
                        acted_at: now,
                        review_not_before: now + Duration::hours(96),
                    },
                ],
            )
            .unwrap();

        let active = store.get_active_url_cooldowns("alpha").unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("https://site.test/b"));
    }

    #[test]
    fn escalation_dedup_skips_unresolved_duplicates() {
        let (_dir, store) = store();
        store.add_escalation("alpha", "Tool refresh_content keeps failing").unwrap();
        store.add_escalation("alpha", "TOOL REFRESH_CONTENT KEEPS FAILING").unwrap();
        let cmd = store.load_commander().unwrap();
        assert_eq!(cmd.escalations.len(), 1);

        // 解决后同一问题可以再次升级
        store.resolve_escalations("alpha", "Fixed the script path").unwrap();
        store.add_escalation("alpha", "Tool refresh_content keeps failing").unwrap();
        let cmd = store.load_commander().unwrap();
        assert_eq!(cmd.escalations.len(), 2);
    }

    #[test]
    fn flush_activity_window_resets_counts() {
        let (_dir, store) = store();
        store.log_write_activity("alpha", "refresh_content").unwrap();
        store.log_write_failure("beta", "inject_links", "exit 1").unwrap();
        store.increment_cycle_count().unwrap();

        let window = store.flush_activity_window().unwrap();
        assert_eq!(window.writes.len(), 1);
        assert_eq!(window.failures.len(), 1);
        assert_eq!(window.cycles, 1);

        let cmd = store.load_commander().unwrap();
        assert!(cmd.activity_window.writes.is_empty());
        assert_eq!(cmd.activity_window.cycles, 0);
        assert!(cmd.activity_window.window_start.is_some());
    }

    #[test]
    fn conversation_buffer_drops_oldest() {
        let (_dir, store) = store();
        for i in 0..(CONVERSATION_LIMIT + 5) {
            store.add_conversation("system", &format!("message {}", i)).unwrap();
        }
        let cmd = store.load_commander().unwrap();
        assert_eq!(cmd.conversation_buffer.len(), CONVERSATION_LIMIT);
        assert!(cmd.conversation_buffer[0].text.contains("message 5"));
    }
}
