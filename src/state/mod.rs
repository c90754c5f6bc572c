//! 持久化状态：文档类型与存储
//!
//! 每个智能体一份 `AgentRecord`，指挥官一份 `CommanderRecord`，均为独立 JSON 文件。
//! 所有字段带 serde 默认值，旧文档加载时自动回填缺失字段（向前兼容的 schema 演进）。

pub mod records;
pub mod store;

pub use records::{
    AgentRecord, AgentStatus, CommanderRecord, KpiDelta, KpiSnapshot, PendingPlan, PlanStep,
    PlanSubmission, ProposedPlan, ReviewStatus, SiteSnapshot, TimelineEvent, UrlAction,
};
pub use store::StateStore;
