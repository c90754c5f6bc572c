//! 通知接口
//!
//! 状态流转播报走这里：评估完成、计划执行、错误与升级。默认实现只写日志，
//! 接真实渠道（IM、webhook）时实现同一 trait 即可。

use async_trait::async_trait;
use tracing::{info, warn};

/// 面向人的事件播报通道
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, agent_key: &str, message: &str) -> Result<(), String>;
}

/// 把通知写进结构化日志的默认实现
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, agent_key: &str, message: &str) -> Result<(), String> {
        info!(agent_key, notification = message, "notify");
        Ok(())
    }
}

/// 通知失败绝不影响主流程，只留一条告警
pub async fn notify_best_effort(notifier: &dyn Notifier, agent_key: &str, message: &str) {
    if let Err(e) = notifier.notify(agent_key, message).await {
        warn!(agent_key, error = %e, "notification delivery failed");
    }
}
