//! 脚本化 Mock Planner，仅用于测试
//!
//! 按队列顺序吐出预置回答；队列耗尽后返回错误，方便测试校验调用次数。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::error::CoreError;
use crate::planner::{ModelTier, Planner};

#[derive(Default)]
pub struct MockPlanner {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, ModelTier)>>,
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    pub fn push_error(&self, error: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(error.into()));
    }

    /// 已收到的 (user prompt, tier) 列表
    pub fn calls(&self) -> Vec<(String, ModelTier)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn complete(
        &self,
        _system: &str,
        user: &str,
        tier: ModelTier,
    ) -> Result<String, CoreError> {
        self.calls.lock().unwrap().push((user.to_string(), tier));
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(CoreError::PlannerError(error)),
            None => Err(CoreError::PlannerError(
                "mock planner has no scripted response".to_string(),
            )),
        }
    }
}
