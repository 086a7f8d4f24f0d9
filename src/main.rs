//! hive-worker - worker daemon entry point
//!
//! Polls this worker's queue and runs each task through the agent loop.

use std::sync::Arc;

use anyhow::Context;
use hive_worker::{
    activity::{ActivitySink, StoreActivityLog},
    agent::AgentLoop,
    backend::{create_backend, EventCallback},
    config::Config,
    store::{open_store, Keys, TaskStore},
    task::{TaskBoard, TaskLifecycle},
    tools::{Coordination, ToolContext, ToolRegistry},
    worker::Worker,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // One task at a time; a single-threaded runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hive_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = open_store(&config.store_url)
        .await
        .with_context(|| format!("Failed to open store {}", config.store_url))?;
    store
        .ping()
        .await
        .with_context(|| format!("Store {} is not reachable", config.store_url))?;
    if !store.is_persistent() {
        warn!("Store {} is not persistent; tasks are lost on exit", config.store_url);
    }

    let keys = Keys::new(config.key_prefix.clone());
    let activity: Arc<dyn ActivitySink> = Arc::new(StoreActivityLog::new(store.clone(), keys.clone()));
    let board = TaskBoard::new(store, keys);
    let lifecycle = Arc::new(TaskLifecycle::new(board, config.worker_id.clone(), activity.clone()));

    let on_cli_event: EventCallback = Arc::new(|event| debug!("CLI event: {}", event));
    let backend = create_backend(&config.backend, &config.workspace, Some(on_cli_event))
        .await
        .context("Failed to initialize backend")?;

    let tools = Arc::new(ToolRegistry::new(Coordination::for_worker(lifecycle.clone())));
    let tool_ctx = ToolContext::new(&config.workspace)
        .with_path_policy(config.path_policy)
        .with_bash_timeout(config.bash_timeout)
        .with_shell_home(config.agent_home.clone());

    info!("Worker: {}", config.worker_id);
    info!("Workspace: {}", config.workspace.display());
    info!("Backend: {} (model {})", backend.name(), config.backend.model);
    let tool_names: Vec<String> = tools.list_tools().into_iter().map(|t| t.name).collect();
    info!("Tools: {}", tool_names.join(", "));
    info!(
        "Poll interval {:?}, max iterations {}, path policy {}",
        config.poll_interval, config.max_iterations, config.path_policy
    );

    let agent = AgentLoop::new(config.worker_id.clone(), backend, tools, tool_ctx, activity)
        .with_max_iterations(config.max_iterations)
        .with_max_output_tokens(config.max_output_tokens);

    let worker = Worker::new(lifecycle, agent)
        .with_poll_interval(config.poll_interval)
        .with_error_pause(config.error_pause);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current task before exit");
            signal.cancel();
        }
    });

    worker.run(shutdown).await;
    Ok(())
}
