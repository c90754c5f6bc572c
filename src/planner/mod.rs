//! Planner 抽象层
//!
//! 决策由外部 Planner 进程完成，核心只负责：组 prompt、限时调用、宽容解析 JSON。
//! Planner 输出永远不可信任，解析失败按 Planner 失败处理，调用方自行兜底。

pub mod mock;
pub mod script;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::CoreError;
use crate::state::records::PlanSubmission;

pub use mock::MockPlanner;
pub use script::ScriptPlanner;

/// 按任务分量选择的模型档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// 完整推理档：评估与规划
    Standard,
    /// 轻量档：审查、步骤结果分析等小任务
    Light,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Light => "light",
        }
    }
}

/// Planner 后端接口：一问一答的文本补全
#[async_trait]
pub trait Planner: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        tier: ModelTier,
    ) -> Result<String, CoreError>;
}

/// 审查结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewVerdict {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewDecision {
    pub decision: ReviewVerdict,
    pub reasoning: String,
    pub feedback: String,
}

impl Default for ReviewDecision {
    fn default() -> Self {
        Self {
            decision: ReviewVerdict::Reject,
            reasoning: String::new(),
            feedback: String::new(),
        }
    }
}

/// 写步骤完成后的下一步指示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepVerdict {
    #[default]
    Continue,
    Pause,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StepAnalysis {
    pub summary: String,
    pub next_action: StepVerdict,
    pub escalation_reason: Option<String>,
}

/// 调用量计数：周期报告取走并清零
#[derive(Debug, Default)]
pub struct SpendTracker {
    calls: AtomicU64,
    prompt_chars: AtomicU64,
    output_chars: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SpendWindow {
    pub calls: u64,
    pub prompt_chars: u64,
    pub output_chars: u64,
}

impl SpendTracker {
    pub fn record(&self, prompt_chars: usize, output_chars: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_chars
            .fetch_add(prompt_chars as u64, Ordering::Relaxed);
        self.output_chars
            .fetch_add(output_chars as u64, Ordering::Relaxed);
    }

    /// 取走当前窗口并清零
    pub fn flush(&self) -> SpendWindow {
        SpendWindow {
            calls: self.calls.swap(0, Ordering::Relaxed),
            prompt_chars: self.prompt_chars.swap(0, Ordering::Relaxed),
            output_chars: self.output_chars.swap(0, Ordering::Relaxed),
        }
    }
}

/// 带超时与用量统计的 Planner 门面；各 brain 持有它而不是裸后端
#[derive(Clone)]
pub struct PlannerClient {
    inner: Arc<dyn Planner>,
    timeout: Duration,
    spend: Arc<SpendTracker>,
}

impl PlannerClient {
    pub fn new(inner: Arc<dyn Planner>, timeout_secs: u64) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(timeout_secs),
            spend: Arc::new(SpendTracker::default()),
        }
    }

    pub fn spend(&self) -> &SpendTracker {
        &self.spend
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        tier: ModelTier,
    ) -> Result<String, CoreError> {
        let timeout_secs = self.timeout.as_secs();
        let result = tokio::time::timeout(self.timeout, self.inner.complete(system, user, tier))
            .await
            .map_err(|_| CoreError::PlannerTimeout(timeout_secs))??;
        self.spend
            .record(system.chars().count() + user.chars().count(), result.chars().count());
        debug!(tier = tier.as_str(), output_chars = result.len(), "planner call completed");
        Ok(result)
    }

    /// 评估：产出结构化计划提交
    pub async fn propose_plan(
        &self,
        system: &str,
        user: &str,
    ) -> Result<PlanSubmission, CoreError> {
        let raw = self.complete(system, user, ModelTier::Standard).await?;
        parse_json_payload(&raw)
    }

    /// 审查一份待审计划（轻量档：审查是分类任务，不需要完整推理）
    pub async fn review_plan(
        &self,
        system: &str,
        user: &str,
    ) -> Result<ReviewDecision, CoreError> {
        let raw = self.complete(system, user, ModelTier::Light).await?;
        parse_json_payload(&raw)
    }

    /// 写步骤结果分析（轻量档）
    pub async fn analyze_step(&self, system: &str, user: &str) -> Result<StepAnalysis, CoreError> {
        let raw = self.complete(system, user, ModelTier::Light).await?;
        parse_json_payload(&raw)
    }
}

/// 从 Planner 输出中提取 JSON 块：剥掉 markdown 代码栅栏，再取首个 `{` 到
/// 末个 `}` 之间的内容。Planner 偶尔会在 JSON 前后夹带说明文字。
pub fn extract_json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let without_fence = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        trimmed
    };
    let start = without_fence.find('{')?;
    let end = without_fence.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&without_fence[start..=end])
}

/// 宽容解析：提取 JSON 块后反序列化，缺失字段落默认值
pub fn parse_json_payload<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, CoreError> {
    let block = extract_json_block(raw).ok_or_else(|| {
        warn!(preview = %crate::state::records::truncate(raw, 200), "no JSON block in planner output");
        CoreError::MalformedPlannerOutput("no JSON object found".to_string())
    })?;
    serde_json::from_str(block)
        .map_err(|e| CoreError::MalformedPlannerOutput(format!("invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_block() {
        let raw = "Here is my plan:\n```json\n{\"name\": \"x\"}\n```\nDone.";
        // 栅栏后还有尾注时退回首末花括号截取
        let block = extract_json_block(raw).unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
        let v: serde_json::Value = serde_json::from_str(block).unwrap();
        assert_eq!(v["name"], "x");
    }

    #[test]
    fn extracts_json_with_surrounding_prose() {
        let raw = "Sure! {\"decision\": \"approve\", \"feedback\": \"ok\"} hope that helps";
        let decision: ReviewDecision = parse_json_payload(raw).unwrap();
        assert_eq!(decision.decision, ReviewVerdict::Approve);
    }

    #[test]
    fn missing_json_is_a_planner_error() {
        let err = parse_json_payload::<ReviewDecision>("I could not decide.").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPlannerOutput(_)));
    }

    #[test]
    fn step_analysis_defaults_to_continue() {
        let analysis: StepAnalysis = parse_json_payload("{\"summary\": \"done\"}").unwrap();
        assert_eq!(analysis.next_action, StepVerdict::Continue);
        assert!(analysis.escalation_reason.is_none());
    }

    #[tokio::test]
    async fn review_and_step_analysis_use_light_tier() {
        let mock = Arc::new(MockPlanner::new());
        mock.push_response("{\"decision\": \"approve\", \"feedback\": \"ok\"}");
        mock.push_response("{\"summary\": \"done\"}");
        let client = PlannerClient::new(mock.clone() as Arc<dyn Planner>, 5);

        client.review_plan("system", "review this").await.unwrap();
        client.analyze_step("system", "step result").await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0].1, ModelTier::Light);
        assert_eq!(calls[1].1, ModelTier::Light);
    }

    #[tokio::test]
    async fn propose_plan_uses_standard_tier() {
        let mock = Arc::new(MockPlanner::new());
        mock.push_response("{\"assessment\": \"flat\", \"top_priority\": \"links\", \"plan\": {\"name\": \"Fix links\"}}");
        let client = PlannerClient::new(mock.clone() as Arc<dyn Planner>, 5);

        client.propose_plan("system", "assess").await.unwrap();
        assert_eq!(mock.calls()[0].1, ModelTier::Standard);
    }

    #[test]
    fn spend_flush_resets_counters() {
        let spend = SpendTracker::default();
        spend.record(100, 50);
        spend.record(10, 5);
        let window = spend.flush();
        assert_eq!(window.calls, 2);
        assert_eq!(window.prompt_chars, 110);
        assert_eq!(window.output_chars, 55);
        assert_eq!(spend.flush().calls, 0);
    }
}
