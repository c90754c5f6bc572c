//! 核心基础设施：错误类型、调度器、优雅关闭

pub mod error;
pub mod scheduler;
pub mod shutdown;

pub use error::CoreError;
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerHandle, SchedulerTiming};
pub use shutdown::ShutdownManager;
