//! 定时调度器
//!
//! 每个智能体一条独立的 tick 循环，外加审查循环与周期报告循环。同一智能体的
//! tick 绝不并发（try_lock 跳过），审查循环对「进行中时又被触发」做合并：记一个
//! 标志，当前轮结束后补跑一次。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::AgentBrain;
use crate::commander::CommanderBrain;
use crate::state::records::AgentStatus;
use crate::state::StateStore;

/// 运行期控制命令，经句柄注入
#[derive(Debug)]
pub enum SchedulerCommand {
    /// 立刻 tick 某个智能体（审批通过后指挥官踢一脚）
    TickAgent(String),
    /// 立刻跑一轮审查（评估提交后不等周期窗口）
    ReviewNow,
    /// 调整某个智能体的 tick 间隔
    SetInterval { agent_key: String, minutes: u64 },
}

/// 调度器句柄；克隆廉价，brain 持有它触发即时动作
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn tick_agent(&self, agent_key: &str) {
        let _ = self.tx.send(SchedulerCommand::TickAgent(agent_key.to_string()));
    }

    pub fn review_now(&self) {
        let _ = self.tx.send(SchedulerCommand::ReviewNow);
    }

    pub fn set_interval(&self, agent_key: &str, minutes: u64) {
        let _ = self.tx.send(SchedulerCommand::SetInterval {
            agent_key: agent_key.to_string(),
            minutes,
        });
    }
}

/// 调度时序参数
#[derive(Debug, Clone)]
pub struct SchedulerTiming {
    /// 首个智能体的首次 tick 延迟
    pub first_tick_delay: Duration,
    /// 相邻智能体首次 tick 的错峰间隔
    pub stagger: Duration,
    /// 计划刚完成（空闲且评估已清空）时的快速跟进延迟
    pub quick_follow_up: Duration,
    /// 首轮审查延迟
    pub first_review_delay: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            first_tick_delay: Duration::from_secs(120),
            stagger: Duration::from_secs(30),
            quick_follow_up: Duration::from_secs(15),
            first_review_delay: Duration::from_secs(60),
        }
    }
}

struct AgentEntry {
    key: String,
    brain: Arc<AgentBrain>,
    interval_secs: AtomicU64,
    tick_lock: tokio::sync::Mutex<()>,
}

struct ReviewShared {
    commander: Arc<CommanderBrain>,
    interval: Duration,
    lock: tokio::sync::Mutex<()>,
    retrigger: AtomicBool,
}

pub struct Scheduler {
    cancel: CancellationToken,
    store: StateStore,
    timing: SchedulerTiming,
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    agents: Vec<Arc<AgentEntry>>,
    review: Option<Arc<ReviewShared>>,
    report: Option<(Arc<CommanderBrain>, Duration)>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken, store: StateStore, timing: SchedulerTiming) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            cancel,
            store,
            timing,
            tx,
            rx,
            agents: Vec::new(),
            review: None,
            report: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { tx: self.tx.clone() }
    }

    pub fn register_agent(&mut self, brain: Arc<AgentBrain>, interval_minutes: u64) {
        let key = brain.agent_key().to_string();
        self.agents.push(Arc::new(AgentEntry {
            key,
            brain,
            interval_secs: AtomicU64::new(interval_minutes * 60),
            tick_lock: tokio::sync::Mutex::new(()),
        }));
    }

    pub fn register_review(&mut self, commander: Arc<CommanderBrain>, interval_minutes: u64) {
        self.review = Some(Arc::new(ReviewShared {
            commander,
            interval: Duration::from_secs(interval_minutes * 60),
            lock: tokio::sync::Mutex::new(()),
            retrigger: AtomicBool::new(false),
        }));
    }

    pub fn register_report(&mut self, commander: Arc<CommanderBrain>, interval_hours: u64) {
        self.report = Some((commander, Duration::from_secs(interval_hours * 3600)));
    }

    /// 启动所有循环，返回各任务句柄。取消令牌触发后所有循环退出。
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let cancel = self.cancel;
        let timing = self.timing;

        // 智能体循环：首次 tick 错峰，之后按各自间隔循环
        for (i, entry) in self.agents.iter().enumerate() {
            let entry = Arc::clone(entry);
            let store = self.store.clone();
            let cancel = cancel.clone();
            let timing = timing.clone();
            let first_delay = timing.first_tick_delay + timing.stagger * i as u32;
            info!(agent_key = %entry.key, first_tick_secs = first_delay.as_secs(),
                interval_secs = entry.interval_secs.load(Ordering::Relaxed), "scheduled agent");
            handles.push(tokio::spawn(async move {
                if wait_or_cancelled(&cancel, first_delay).await {
                    return;
                }
                loop {
                    guarded_agent_tick(&entry).await;

                    let mut delay =
                        Duration::from_secs(entry.interval_secs.load(Ordering::Relaxed));
                    // 计划刚完成的空闲智能体很快就该重新评估，不等整个周期
                    match store.load_agent(&entry.key) {
                        Ok(rec)
                            if rec.status == AgentStatus::Idle
                                && rec.last_assessment.is_none() =>
                        {
                            debug!(agent_key = %entry.key, "quick follow-up tick");
                            delay = timing.quick_follow_up;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(agent_key = %entry.key, error = %e,
                            "could not read agent state for follow-up check"),
                    }
                    if wait_or_cancelled(&cancel, delay).await {
                        return;
                    }
                }
            }));
        }

        // 审查循环：固定节拍永远续上，即时触发在命令消费者里处理
        if let Some(review) = self.review.clone() {
            let cancel = cancel.clone();
            let first_delay = timing.first_review_delay;
            info!(first_review_secs = first_delay.as_secs(),
                interval_secs = review.interval.as_secs(), "scheduled review cycle");
            handles.push(tokio::spawn(async move {
                if wait_or_cancelled(&cancel, first_delay).await {
                    return;
                }
                loop {
                    run_review(&review, "scheduled").await;
                    if wait_or_cancelled(&cancel, review.interval).await {
                        return;
                    }
                }
            }));
        }

        // 周期报告循环
        if let Some((commander, interval)) = self.report.clone() {
            let cancel = cancel.clone();
            info!(interval_secs = interval.as_secs(), "scheduled periodic report");
            handles.push(tokio::spawn(async move {
                loop {
                    if wait_or_cancelled(&cancel, interval).await {
                        return;
                    }
                    if let Err(e) = commander.publish_periodic_report().await {
                        error!(error = %e, "periodic report failed");
                    }
                }
            }));
        }

        // 命令消费者
        let agents = self.agents;
        let review = self.review;
        let mut rx = self.rx;
        handles.push(tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    _ = cancel.cancelled() => return,
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => return,
                    },
                };
                match command {
                    SchedulerCommand::TickAgent(key) => {
                        match agents.iter().find(|e| e.key == key) {
                            Some(entry) => {
                                let entry = Arc::clone(entry);
                                tokio::spawn(async move {
                                    guarded_agent_tick(&entry).await;
                                });
                            }
                            None => warn!(agent_key = %key, "tick requested for unknown agent"),
                        }
                    }
                    SchedulerCommand::ReviewNow => {
                        if let Some(review) = review.clone() {
                            tokio::spawn(async move {
                                run_review(&review, "immediate").await;
                            });
                        }
                    }
                    SchedulerCommand::SetInterval { agent_key, minutes } => {
                        match agents.iter().find(|e| e.key == agent_key) {
                            Some(entry) => {
                                entry.interval_secs.store(minutes * 60, Ordering::Relaxed);
                                info!(agent_key = %agent_key, minutes, "agent interval updated");
                            }
                            None => warn!(agent_key = %agent_key,
                                "interval change for unknown agent"),
                        }
                    }
                }
            }
        }));

        handles
    }
}

/// 等待 delay；取消先到则返回 true
async fn wait_or_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// 同一智能体的 tick 互斥：拿不到锁直接跳过本次
async fn guarded_agent_tick(entry: &AgentEntry) {
    let Ok(_guard) = entry.tick_lock.try_lock() else {
        debug!(agent_key = %entry.key, "tick skipped, already running");
        return;
    };
    entry.brain.tick().await;
}

/// 跑一轮审查。已有审查在跑时记合并标志；本轮结束后把积压的触发补跑掉。
async fn run_review(shared: &Arc<ReviewShared>, source: &str) {
    let Ok(_guard) = shared.lock.try_lock() else {
        shared.retrigger.store(true, Ordering::SeqCst);
        debug!(source, "review already running, queued retrigger");
        return;
    };
    loop {
        match shared.commander.review_cycle().await {
            Ok(results) => {
                if !results.is_empty() {
                    info!(source, reviewed = results.len(), "review cycle completed");
                }
            }
            Err(e) => error!(source, error = %e, "review cycle failed"),
        }
        // 进行中积压的触发合并为一次补跑
        if !shared.retrigger.swap(false, Ordering::SeqCst) {
            break;
        }
        debug!("draining queued review retrigger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::planner::{MockPlanner, PlannerClient};

    fn review_shared(dir: &tempfile::TempDir) -> Arc<ReviewShared> {
        let store = StateStore::new(dir.path().join("state")).unwrap();
        let planner = PlannerClient::new(Arc::new(MockPlanner::new()), 5);
        let commander = Arc::new(CommanderBrain::new(
            store,
            planner,
            Arc::new(LogNotifier),
            vec![],
        ));
        Arc::new(ReviewShared {
            commander,
            interval: Duration::from_secs(900),
            lock: tokio::sync::Mutex::new(()),
            retrigger: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn concurrent_review_trigger_is_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let shared = review_shared(&dir);

        let guard = shared.lock.try_lock().unwrap();
        run_review(&shared, "immediate").await;
        assert!(shared.retrigger.load(Ordering::SeqCst));
        drop(guard);

        // 锁释放后补跑会清掉合并标志
        run_review(&shared, "queued").await;
        assert!(!shared.retrigger.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrent_agent_tick_is_skipped_not_queued() {
        use crate::agent::{AgentConfig, AgentTuning, CooldownPolicy};
        use crate::tools::{ToolInvoker, ToolRegistry};

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state")).unwrap();
        let brain = Arc::new(crate::agent::AgentBrain::new(
            AgentConfig {
                key: "alpha".to_string(),
                name: "Alpha".to_string(),
                site_url: "https://alpha.example".to_string(),
                niche: "test".to_string(),
                signal_tool: "traffic_audit".to_string(),
                inventory_tool: "build_inventory".to_string(),
                audit_tool: "site_audit".to_string(),
            },
            AgentTuning::default(),
            CooldownPolicy::default(),
            store.clone(),
            ToolInvoker::new(ToolRegistry::new(), 5),
            PlannerClient::new(Arc::new(MockPlanner::new()), 5),
            Arc::new(LogNotifier),
        ));
        let entry = AgentEntry {
            key: "alpha".to_string(),
            brain,
            interval_secs: AtomicU64::new(3600),
            tick_lock: tokio::sync::Mutex::new(()),
        };

        // tick 进行中时的触发直接丢弃
        let guard = entry.tick_lock.try_lock().unwrap();
        guarded_agent_tick(&entry).await;
        assert_eq!(store.load_commander().unwrap().activity_window.cycles, 0);
        drop(guard);

        guarded_agent_tick(&entry).await;
        assert_eq!(store.load_commander().unwrap().activity_window.cycles, 1);
    }

    #[tokio::test]
    async fn handle_commands_are_fire_and_forget() {
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state")).unwrap();
        let scheduler = Scheduler::new(cancel.clone(), store, SchedulerTiming::default());
        let handle = scheduler.handle();

        let tasks = scheduler.start();
        handle.tick_agent("missing");
        handle.review_now();
        handle.set_interval("missing", 5);

        cancel.cancel();
        for task in tasks {
            task.await.unwrap();
        }
    }
}
