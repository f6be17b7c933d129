//! gantryd — the gantry server.
//!
//! Wires the cluster view, run-once scheduler, long-running-manager client,
//! stack executor and the REST API into one process.
//!
//! # Usage
//!
//! ```text
//! gantryd --master 10.0.0.1:5050 --marathon http://10.0.0.1:8080 \
//!         --storage file:/var/lib/gantry/framework.json \
//!         --data-dir /var/lib/gantry --var region=eu
//! gantryd --dev
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use gantry_api::ApiState;
use gantry_cluster::{ClusterView, HttpStateSource, RestDriver};
use gantry_core::{RunRequest, Stack, Variables};
use gantry_engine::{AdapterRegistry, HttpManager, StackExecutor, TaskRunner};
use gantry_scheduler::{OnceTaskRunner, RunOnceRunner, Scheduler, SchedulerConfig};
use gantry_state::{
    FrameworkStorage, MemoryStackStore, MemoryStateStore, NoopUserStore, RedbStackStore,
    RedbStateStore, RedbUserStore, StackStorage, StateStorage, UserStorage,
};

#[derive(Parser)]
#[command(name = "gantryd", about = "gantry stack deployment server")]
struct Cli {
    /// Cluster manager master address <ip:port>.
    #[arg(long, default_value = "127.0.0.1:5050")]
    master: String,

    /// Long-running manager address.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    marathon: String,

    /// Framework persistence URI, e.g. `file:/var/lib/gantry/framework.json`.
    /// Required unless --dev.
    #[arg(long)]
    storage: Option<String>,

    /// API server bind address.
    #[arg(long, default_value = "0.0.0.0:4200")]
    api: String,

    /// Stack file to bootstrap with.
    #[arg(long)]
    bootstrap: Option<PathBuf>,

    /// Directory for the embedded database.
    #[arg(long, default_value = "/var/lib/gantry")]
    data_dir: PathBuf,

    /// Connection attempts against the managers before giving up.
    #[arg(long, default_value = "10")]
    connect_retries: u32,

    /// Seconds between connection attempts.
    #[arg(long, default_value = "10")]
    connect_backoff: u64,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Developer mode: in-memory storage, no auth, zero failover timeout.
    #[arg(long)]
    dev: bool,

    /// User the framework registers as.
    #[arg(long, default_value = "")]
    framework_user: String,

    /// Name the framework registers under.
    #[arg(long, default_value = "gantry")]
    framework_name: String,

    /// Resource role the framework registers for.
    #[arg(long, default_value = "*")]
    framework_role: String,

    /// Seconds the registration survives a disconnect.
    #[arg(long, default_value = "604800")]
    failover_timeout: u64,

    /// Global variable `key=value` added to every run context. Repeatable.
    #[arg(long = "var", value_parser = parse_key_value)]
    vars: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.parse().unwrap()),
        )
        .init();

    info!("gantry server starting");
    let backoff = Duration::from_secs(cli.connect_backoff);
    let globals: HashMap<String, String> = cli.vars.iter().cloned().collect();

    // ── External collaborators ─────────────────────────────────

    let manager = Arc::new(
        HttpManager::connect(&cli.marathon, cli.connect_retries, backoff)
            .await
            .context("long-running manager unreachable")?,
    );

    let cluster = Arc::new(ClusterView::new(Box::new(HttpStateSource::new(
        &cli.master,
    ))));
    refresh_with_retries(&cluster, cli.connect_retries, backoff)
        .await
        .context("cluster manager unreachable")?;

    let driver = Arc::new(RestDriver::new(&cli.master));

    // ── Framework persistence ──────────────────────────────────

    let storage_uri = match (&cli.storage, cli.dev) {
        (Some(uri), _) => uri.clone(),
        (None, true) => "file:gantry-framework.json".to_string(),
        (None, false) => anyhow::bail!(
            "--storage is required; example: file:/var/lib/gantry/framework.json"
        ),
    };
    let mut framework = FrameworkStorage::open(&storage_uri)?;
    framework.load();
    let framework = Arc::new(Mutex::new(framework));

    // ── Scheduler ──────────────────────────────────────────────

    let failover_timeout = if cli.dev {
        Duration::ZERO
    } else {
        Duration::from_secs(cli.failover_timeout)
    };
    let config = SchedulerConfig {
        master: cli.master.clone(),
        framework_name: cli.framework_name.clone(),
        framework_role: cli.framework_role.clone(),
        framework_user: cli.framework_user.clone(),
        failover_timeout,
    };

    let mut once_runners: HashMap<String, Arc<dyn OnceTaskRunner>> = HashMap::new();
    once_runners.insert("run-once".to_string(), Arc::new(RunOnceRunner::new()));
    let run_once_types: HashSet<String> = once_runners.keys().cloned().collect();

    let scheduler = Arc::new(Scheduler::new(
        config,
        driver.clone(),
        cluster.clone(),
        once_runners,
        framework.clone(),
    ));
    scheduler.start().await?;

    // Type-specific adapters plug in here.
    let task_runners: HashMap<String, Arc<dyn TaskRunner>> = HashMap::new();
    let adapters = Arc::new(AdapterRegistry::new(task_runners, run_once_types));

    // ── Storage ────────────────────────────────────────────────

    let (stacks, state, users): (
        Arc<dyn StackStorage>,
        Arc<dyn StateStorage>,
        Arc<dyn UserStorage>,
    ) = if cli.dev {
        warn!("starting in developer mode, DO NOT use this in production");
        (
            Arc::new(MemoryStackStore::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::new(NoopUserStore),
        )
    } else {
        std::fs::create_dir_all(&cli.data_dir)?;
        let db = gantry_state::open_database(&cli.data_dir.join("gantry.redb"))?;
        let (user_store, admin_key) = RedbUserStore::new(db.clone())?;
        if let Some(key) = admin_key {
            println!("***\nAdmin user key: {key}\n***");
        }
        (
            Arc::new(RedbStackStore::new(db.clone())?),
            Arc::new(RedbStateStore::new(db)?),
            Arc::new(user_store),
        )
    };

    let executor = Arc::new(StackExecutor::new(
        manager.clone(),
        scheduler.clone(),
        adapters,
        state.clone(),
    ));

    // ── Bootstrap ──────────────────────────────────────────────

    if let Some(path) = &cli.bootstrap {
        bootstrap(
            path,
            &executor,
            framework.clone(),
            &globals,
            cli.connect_retries,
            backoff,
        )
        .await?;
    }

    // ── Event pump + API server ────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pump = tokio::spawn(event_pump(
        driver,
        scheduler.clone(),
        framework.clone(),
        shutdown_rx,
    ));

    let api_state = ApiState {
        stacks,
        state,
        users,
        executor,
        scheduler,
        globals: Arc::new(globals),
    };
    let router = gantry_api::build_router(api_state);

    let addr: SocketAddr = cli.api.parse().context("invalid --api address")?;
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = pump.await;
    info!("gantry server stopped");
    Ok(())
}

async fn refresh_with_retries(
    cluster: &ClusterView,
    retries: u32,
    backoff: Duration,
) -> anyhow::Result<()> {
    let mut last = None;
    for attempt in 1..=retries.max(1) {
        match cluster.refresh().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                info!(attempt, error = %e, "cluster state not available yet");
                last = Some(e);
            }
        }
        tokio::time::sleep(backoff).await;
    }

    Err(anyhow::anyhow!(last.unwrap().to_string()))
}

/// Run the bootstrap stack and persist its context, or restore a context
/// persisted by a previous run.
async fn bootstrap(
    path: &PathBuf,
    executor: &Arc<StackExecutor>,
    framework: Arc<Mutex<FrameworkStorage>>,
    globals: &HashMap<String, String>,
    retries: u32,
    backoff: Duration,
) -> anyhow::Result<()> {
    {
        let framework = framework.lock().expect("framework storage poisoned");
        let restored = &framework.bootstrap_context;
        if !restored.stack.is_empty() || !restored.global.is_empty() {
            info!("restored bootstrap context from persistent storage");
            return Ok(());
        }
    }

    info!(path = %path.display(), "bootstrapping");
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("can't read bootstrap file {}", path.display()))?;
    let stack = Stack::from_yaml(&document)?;
    let request = RunRequest::new(stack.name.clone(), "");

    let mut last_error = None;
    for attempt in 1..=retries.max(1) {
        let vars = Variables::new();
        for (key, value) in globals {
            vars.set_global(key.clone(), value.clone());
        }

        match executor.run(&stack, &request, Arc::new(vars)).await {
            Ok(context) => {
                let mut framework = framework.lock().expect("framework storage poisoned");
                framework.bootstrap_context = context.snapshot();
                framework.save()?;
                info!("bootstrap complete");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "bootstrap attempt failed");
                last_error = Some(e);
            }
        }
        tokio::time::sleep(backoff).await;
    }

    Err(anyhow::anyhow!(last_error.unwrap().to_string()))
}

/// Poll the cluster manager for offers and status updates and feed them to
/// the scheduler.
async fn event_pump(
    driver: Arc<RestDriver>,
    scheduler: Arc<Scheduler>,
    framework: Arc<Mutex<FrameworkStorage>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let framework_id = framework
            .lock()
            .expect("framework storage poisoned")
            .framework_id
            .clone()
            .unwrap_or_default();

        tokio::select! {
            result = driver.poll_events(&framework_id) => match result {
                Ok(events) => {
                    for event in events {
                        scheduler.handle_event(event).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "event poll failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
