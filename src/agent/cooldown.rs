//! 重评冷却窗口算法
//!
//! 系统侧从计划类别、竞争度、改动规模与内容年龄推出基准时长，再与智能体自己
//! 提议的时长按 0.6 / 0.4 混合。系统基准是主导方，智能体只能拉偏不能决定。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::state::records::{ProposedPlan, SiteSnapshot};

/// 冷却算法的全部可调参数；配置文件 `[cooldown]` 段覆盖
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CooldownPolicy {
    pub monetization_base_hours: f64,
    pub internal_links_base_hours: f64,
    pub new_content_base_hours: f64,
    pub technical_base_hours: f64,
    pub default_base_hours: f64,
    pub critical_cap_hours: f64,
    pub min_hours: f64,
    pub max_hours: f64,
    /// 系统估计在混合中的权重；智能体提议占剩余部分
    pub system_weight: f64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            monetization_base_hours: 120.0,
            internal_links_base_hours: 36.0,
            new_content_base_hours: 96.0,
            technical_base_hours: 24.0,
            default_base_hours: 48.0,
            critical_cap_hours: 24.0,
            min_hours: 12.0,
            max_hours: 336.0,
            system_weight: 0.6,
        }
    }
}

/// 计算计划执行后的重评窗口（小时）与人类可读的依据说明
pub fn determine_reassess_window(
    plan: &ProposedPlan,
    snapshot: &SiteSnapshot,
    policy: &CooldownPolicy,
) -> (u32, String) {
    let tools: Vec<String> = plan
        .steps
        .iter()
        .map(|s| s.tool.trim().to_lowercase())
        .collect();
    let content_type = plan
        .content_type
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let (base_hours, base_reason) = if content_type == "monetization"
        || tools.iter().any(|t| t.contains("affiliate") || t.contains("monetiz"))
    {
        (policy.monetization_base_hours, "monetization changes need longer signal")
    } else if content_type == "internal_links"
        || tools.iter().any(|t| t.contains("link") || t.contains("orphan"))
    {
        (policy.internal_links_base_hours, "internal link changes need crawl + ranking settle")
    } else if content_type == "new_content" {
        (policy.new_content_base_hours, "new content needs index/settle window")
    } else if content_type == "technical" {
        (policy.technical_base_hours, "technical fixes can be validated sooner")
    } else {
        (policy.default_base_hours, "balanced default for mixed updates")
    };

    let competition = match plan.competition_level.as_deref().map(|c| c.trim().to_lowercase()) {
        Some(c) if matches!(c.as_str(), "low" | "medium" | "high") => c,
        _ => infer_competition(&plan.target_urls, snapshot).to_string(),
    };
    let comp_mult = match competition.as_str() {
        "low" => 0.85,
        "high" => 1.3,
        _ => 1.0,
    };

    let scope = match plan.change_scope.as_deref().map(|s| s.trim().to_lowercase()) {
        Some(s) if matches!(s.as_str(), "light" | "medium" | "heavy") => s,
        _ => {
            if plan.steps.len() >= 5 {
                "heavy".to_string()
            } else if plan.steps.len() >= 3 {
                "medium".to_string()
            } else {
                "light".to_string()
            }
        }
    };
    let scope_mult = match scope.as_str() {
        "light" => 0.85,
        "heavy" => 1.25,
        _ => 1.0,
    };

    let ages: Vec<f64> = plan
        .target_urls
        .iter()
        .filter_map(|u| url_age_years(u))
        .collect();
    let (age_mult, age_note) = if ages.is_empty() {
        (1.0, "age unknown")
    } else {
        let avg_age = ages.iter().sum::<f64>() / ages.len() as f64;
        if avg_age < 1.0 {
            (1.15, "fresh content")
        } else if avg_age > 3.0 {
            (0.9, "older stable content")
        } else {
            (1.0, "mid-age content")
        }
    };

    let mut system_hours = base_hours * comp_mult * scope_mult * age_mult;
    if plan.critical_override {
        system_hours = system_hours.min(policy.critical_cap_hours);
    }

    let (final_hours, blend_note) = match plan.reassess_after_hours {
        Some(requested) if requested.is_finite() => {
            let requested = requested.clamp(policy.min_hours, policy.max_hours);
            let agent_weight = 1.0 - policy.system_weight;
            (
                policy.system_weight * system_hours + agent_weight * requested,
                format!("blended with agent proposal {:.0}h", requested),
            )
        }
        _ => (system_hours, "system-derived (no agent proposal)".to_string()),
    };

    let hours = final_hours.clamp(policy.min_hours, policy.max_hours).round() as u32;
    let reason = format!(
        "{}; competition={}; scope={}; {}; {}",
        base_reason, competition, scope, age_note, blend_note
    );
    (hours, reason)
}

/// 未显式给出竞争度时，从快照中目标 URL 的 page-2 信号推断
pub fn infer_competition(target_urls: &[String], snapshot: &SiteSnapshot) -> &'static str {
    if target_urls.is_empty() || snapshot.top_page2.is_empty() {
        return "medium";
    }

    let mut positions = Vec::new();
    let mut impressions = Vec::new();
    for row in &snapshot.top_page2 {
        if target_urls.iter().any(|u| u == &row.url) {
            if let Some(pos) = row.position {
                positions.push(pos);
            }
            if let Some(imp) = row.impressions {
                impressions.push(imp);
            }
        }
    }
    if positions.is_empty() && impressions.is_empty() {
        return "medium";
    }

    let avg_pos = if positions.is_empty() {
        14.0
    } else {
        positions.iter().sum::<f64>() / positions.len() as f64
    };
    let avg_imp = if impressions.is_empty() {
        150.0
    } else {
        impressions.iter().sum::<f64>() / impressions.len() as f64
    };

    // 高曝光或更深的 page-2 位置需要更长的生效窗口
    if avg_imp > 300.0 || avg_pos > 16.0 {
        "high"
    } else if avg_imp < 90.0 && avg_pos <= 13.0 {
        "low"
    } else {
        "medium"
    }
}

/// 从 URL 中的年份 token 估算内容年龄（年）；没有年份时 None
pub fn url_age_years(url: &str) -> Option<f64> {
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = YEAR_RE.get_or_init(|| Regex::new(r"(20\d{2})").unwrap());

    let newest = re
        .captures_iter(url)
        .filter_map(|c| c.get(1)?.as_str().parse::<i32>().ok())
        .max()?;
    let current_year = chrono::Datelike::year(&chrono::Utc::now());
    Some((current_year - newest).max(0) as f64)
}
