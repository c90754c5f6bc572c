//! fleet 主程序：装配状态存储、工具、Planner 与调度器，然后等待关闭信号

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use fleet::agent::{AgentBrain, AgentConfig, AgentTuning};
use fleet::commander::CommanderBrain;
use fleet::config::load_config;
use fleet::core::{Scheduler, SchedulerTiming, ShutdownManager};
use fleet::notify::{LogNotifier, Notifier};
use fleet::observability;
use fleet::planner::{PlannerClient, ScriptPlanner};
use fleet::state::StateStore;
use fleet::tools::{ScriptTool, ToolInvoker, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("load configuration")?;
    let app_name = cfg.app.name.clone().unwrap_or_else(|| "fleet".to_string());
    info!(app = %app_name, agents = cfg.agents.len(), "starting");

    if cfg.agents.is_empty() {
        anyhow::bail!("no agents configured; add [[agents]] sections to config/default.toml");
    }
    if cfg.planner.command.is_empty() {
        anyhow::bail!("no planner command configured; set [planner] command");
    }

    let store = StateStore::new(&cfg.app.state_dir)?;

    let mut registry = ToolRegistry::new();
    for script in &cfg.tools.scripts {
        let mut tool = ScriptTool::new(
            &script.name,
            &script.description,
            script.command.clone(),
            script.is_write,
        );
        if let Some(path) = &script.instructions_file {
            tool = tool.with_instructions_file(path);
        }
        if let Some(path) = &script.output_file {
            tool = tool.with_output_file(path);
        }
        registry.register(Arc::new(tool));
    }
    for (alias, canonical) in &cfg.tools.aliases {
        registry.register_alias(alias, canonical);
    }
    let invoker = ToolInvoker::new(registry, cfg.tools.tool_timeout_secs);

    let backend = ScriptPlanner::new(&cfg.planner.command)
        .map_err(|e| anyhow::anyhow!("planner setup: {}", e))?;
    let planner = PlannerClient::new(Arc::new(backend), cfg.planner.timeout_secs);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let tuning = AgentTuning {
        stale_assessment: chrono::Duration::hours(cfg.tuning.stale_assessment_hours as i64),
        error_cooldown: chrono::Duration::minutes(cfg.tuning.error_cooldown_minutes as i64),
        inventory_fresh_for: chrono::Duration::hours(cfg.tuning.inventory_fresh_hours as i64),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let timing = SchedulerTiming {
        first_tick_delay: Duration::from_secs(cfg.scheduler.first_tick_delay_secs),
        stagger: Duration::from_secs(cfg.scheduler.stagger_secs),
        quick_follow_up: Duration::from_secs(cfg.scheduler.quick_follow_up_secs),
        first_review_delay: Duration::from_secs(cfg.scheduler.first_review_delay_secs),
    };
    let mut scheduler = Scheduler::new(shutdown.token(), store.clone(), timing);

    let mut agent_keys = Vec::new();
    let mut brains = Vec::new();
    for section in &cfg.agents {
        let agent_cfg = AgentConfig {
            key: section.key.clone(),
            name: section.name.clone(),
            site_url: section.site_url.clone(),
            niche: section.niche.clone(),
            signal_tool: cfg.tuning.signal_tool.clone(),
            inventory_tool: cfg.tuning.inventory_tool.clone(),
            audit_tool: cfg.tuning.audit_tool.clone(),
        };
        let brain = Arc::new(AgentBrain::new(
            agent_cfg,
            tuning.clone(),
            cfg.cooldown.clone(),
            store.clone(),
            invoker.clone(),
            planner.clone(),
            Arc::clone(&notifier),
        ));
        scheduler.register_agent(
            Arc::clone(&brain),
            section
                .interval_minutes
                .unwrap_or(cfg.scheduler.agent_interval_minutes),
        );
        agent_keys.push(section.key.clone());
        brains.push(brain);
    }

    let commander = Arc::new(CommanderBrain::new(
        store,
        planner,
        Arc::clone(&notifier),
        agent_keys,
    ));
    scheduler.register_review(Arc::clone(&commander), cfg.scheduler.review_interval_minutes);
    scheduler.register_report(Arc::clone(&commander), cfg.scheduler.report_interval_hours);

    let handle = scheduler.handle();
    for brain in &brains {
        brain.attach_scheduler(handle.clone());
    }
    commander.attach_scheduler(handle);

    let tasks = scheduler.start();
    info!("scheduler started, waiting for shutdown signal");

    shutdown.wait_for_shutdown().await;
    info!("shutting down, draining scheduler loops");
    for task in tasks {
        let _ = task.await;
    }
    info!("shutdown complete");
    Ok(())
}
