//! fleet - 自治站点智能体编排引擎
//!
//! 模块划分：
//! - **agent**: 单智能体决策循环（tick 状态机）与冷却窗口算法
//! - **commander**: 指挥官审批循环、组合分配与周期报告
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、调度器、优雅关闭
//! - **notify**: 通知接口（状态流转播报）
//! - **planner**: Planner 抽象（plan / review / step 分析）与脚本 / Mock 实现
//! - **state**: 持久化状态（JSON 文件 + 原子写 + schema 回填）
//! - **tools**: 工具注册表与调用器（超时 + 审计日志）

pub mod agent;
pub mod commander;
pub mod config;
pub mod core;
pub mod notify;
pub mod observability;
pub mod planner;
pub mod state;
pub mod tools;

pub use crate::core::error::CoreError;
