use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use crucible_bus::EventBus;
use crucible_config::OperatorConfig;
use crucible_dispatcher::{dispatch_once, DispatchOutcome, Dispatcher};
use crucible_domain::{Evaluation, EvaluationId};
use crucible_pool::ExecutorPool;
use crucible_queue::{Task, TaskQueue};
use crucible_reaper::Reaper;
use crucible_reconciler::{Reconciler, ReconcilerHandle, ReconcilingBus};
use crucible_statemachine::TransitionTable;
use crucible_store::{DurableStore, EphemeralStore, OutputStore};
use crucible_watcher::WatchConfig;
use tracing::{error, info, warn};

use crate::backend;
use crate::cli::{CancelArgs, ServeArgs, SubmitArgs};
use crate::output;

pub async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let cfg = args.operator.clone();
    let backends = backend::build(&args.backends).await?;
    let pool = Arc::new(ExecutorPool::new(cfg.pool_size));
    let table = Arc::new(TransitionTable::default_table());
    let drivers = Arc::new(backend::build_driver_registry(&cfg)?);
    let outputs = Arc::new(OutputStore::new(cfg.output_store_root.clone(), cfg.large_output_threshold_bytes));

    let reconciler = Arc::new(Reconciler {
        durable: backends.durable.clone(),
        ephemeral: backends.ephemeral.clone(),
        pool: pool.clone(),
        table: table.clone(),
        outputs,
    });
    let reconciler_handle = Arc::new(ReconcilerHandle::spawn(reconciler, args.reconciler_shards));
    let bus: Arc<dyn EventBus> = Arc::new(ReconcilingBus::new(backends.bus.clone(), reconciler_handle));

    let dispatcher = Arc::new(Dispatcher {
        queue: backends.queue.clone(),
        pool: pool.clone(),
        durable: backends.durable.clone(),
        ephemeral: backends.ephemeral.clone(),
        bus: bus.clone(),
        table: table.clone(),
        drivers: drivers.clone(),
    });

    tokio::spawn(dispatch_and_watch_loop(
        dispatcher,
        Arc::new(cfg.clone()),
        Duration::from_secs(args.dispatch_visibility_secs),
        cfg.dispatcher_backoff_base(),
        cfg.dispatcher_backoff_cap(),
    ));

    let reaper = Arc::new(Reaper {
        durable: backends.durable.clone(),
        ephemeral: backends.ephemeral.clone(),
        pool: pool.clone(),
        table: table.clone(),
        grace_window: cfg.reaper_grace_window(),
    });
    tokio::spawn(crucible_reaper::run(reaper, cfg.reaper_interval()));

    let state = crucible_api::AppState {
        durable: backends.durable.clone(),
        pool: pool.clone(),
        queue: backends.queue.clone(),
        bus,
        auth_token: crucible_api::auth_token(args.auth_token),
    };
    let app = crucible_api::build_app(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "crucible ops API listening");
    axum::serve(listener, app).await.context("ops API server error")?;
    Ok(())
}

/// Drives `dispatch_once` in a loop with the same jittered-backoff shape
/// `crucible_dispatcher::run` uses, extended to spawn
/// `crucible_watcher::watch` for every sandbox it starts — the bare worker
/// loop has no hook for that, since `dispatch_once` only returns the
/// started handle, not a running watcher.
async fn dispatch_and_watch_loop(
    dispatcher: Arc<Dispatcher>,
    cfg: Arc<OperatorConfig>,
    visibility_timeout: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
) -> ! {
    let mut backoff = backoff_base;
    loop {
        match dispatch_once(&dispatcher, visibility_timeout).await {
            Ok(DispatchOutcome::Dispatched { evaluation_id, handle, .. }) => {
                backoff = backoff_base;
                spawn_watcher(dispatcher.clone(), cfg.clone(), evaluation_id, handle);
            }
            Ok(DispatchOutcome::AlreadyHandled | DispatchOutcome::CreateFailed) => {
                backoff = backoff_base;
            }
            Ok(DispatchOutcome::Idle | DispatchOutcome::NoSlotAvailable) => {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(backoff_cap);
            }
            Err(e) => {
                error!(error = %e, "dispatch iteration failed");
                tokio::time::sleep(backoff_base).await;
            }
        }
    }
}

fn spawn_watcher(dispatcher: Arc<Dispatcher>, cfg: Arc<OperatorConfig>, evaluation_id: EvaluationId, handle: serde_json::Value) {
    tokio::spawn(async move {
        let evaluation = match dispatcher.durable.get_evaluation(&evaluation_id).await {
            Ok(Some(e)) => e,
            Ok(None) => {
                warn!(%evaluation_id, "dispatched evaluation vanished before the watcher could start");
                return;
            }
            Err(e) => {
                error!(%evaluation_id, error = %e, "failed to load evaluation for watcher start");
                return;
            }
        };
        let driver = match dispatcher.drivers.resolve(&evaluation.language) {
            Ok(d) => d,
            Err(e) => {
                error!(%evaluation_id, error = %e, "no driver configured, cannot watch");
                return;
            }
        };
        let config = WatchConfig {
            timeout: Duration::from_secs(evaluation.timeout_secs as u64),
            slack: Duration::from_secs(cfg.timeout_slack_secs as u64),
            log_buffer_cap: cfg.log_buffer_size,
        };
        if let Err(e) =
            crucible_watcher::watch(evaluation_id, handle, driver, dispatcher.ephemeral.clone(), dispatcher.bus.clone(), config).await
        {
            error!(error = %e, "watcher exited with an error");
        }
    });
}

/// How long a `pending:{id}` marker survives before the reaper would
/// otherwise have to treat the evaluation as orphaned; the dispatcher is
/// expected to pick it up and reach `provisioning` well within this.
const PENDING_MARKER_TTL: Duration = Duration::from_secs(300);

pub async fn submit(args: SubmitArgs) -> anyhow::Result<()> {
    let backends = backend::build(&args.backends).await?;
    let table = TransitionTable::default_table();

    let code = match args.code {
        Some(c) => c,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read code from stdin")?;
            buf
        }
    };
    let metadata: serde_json::Value = serde_json::from_str(&args.metadata).context("--metadata must be valid JSON")?;

    let mut evaluation =
        Evaluation::new(code, args.language, args.priority.into(), args.timeout_secs, metadata, Utc::now());

    let (ok, reason) = table.validate_transition(evaluation.status, crucible_domain::Status::Queued);
    if !ok {
        anyhow::bail!("cannot admit a freshly submitted evaluation: {}", reason.unwrap_or_default());
    }
    evaluation.status = crucible_domain::Status::Queued;

    backends.durable.upsert_evaluation(&evaluation).await.context("failed to write evaluation")?;
    backends
        .ephemeral
        .mark_pending(&evaluation.id, PENDING_MARKER_TTL)
        .await
        .context("failed to mark evaluation pending")?;
    backends
        .queue
        .push(Task::new(evaluation.id.clone(), evaluation.priority))
        .await
        .context("failed to enqueue evaluation")?;
    let _ = backends.bus.publish(&evaluation.id, crucible_domain::EventPayload::Queued).await;

    println!("{}", evaluation.id);
    Ok(())
}

pub async fn cancel(args: CancelArgs) -> anyhow::Result<()> {
    let backends = backend::build(&args.backends).await?;
    let id = EvaluationId::from_string(args.evaluation_id);
    backends
        .bus
        .publish(&id, crucible_domain::EventPayload::CancelRequested)
        .await
        .context("failed to publish cancel_requested")?;
    println!("Cancellation requested for {id}");
    Ok(())
}

pub async fn status(remote: String, token: Option<String>, evaluation_id: String) -> anyhow::Result<()> {
    let client = authed_client(token.as_deref())?;
    let body = get_json(&client, &format!("{}/evaluations/{}", remote.trim_end_matches('/'), evaluation_id)).await?;
    println!("{}", output::render_evaluation(&body));
    Ok(())
}

pub async fn pool(remote: String, token: Option<String>) -> anyhow::Result<()> {
    let client = authed_client(token.as_deref())?;
    let body = get_json(&client, &format!("{}/pool", remote.trim_end_matches('/'))).await?;
    println!("{}", output::render_pool(&body));
    Ok(())
}

pub async fn queue(remote: String, token: Option<String>) -> anyhow::Result<()> {
    let client = authed_client(token.as_deref())?;
    let body = get_json(&client, &format!("{}/queue", remote.trim_end_matches('/'))).await?;
    println!("{}", output::render_queue(&body));
    Ok(())
}

async fn get_json(client: &reqwest::Client, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = client.get(url).send().await.with_context(|| format!("failed to reach {url}"))?;
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("{url} returned {status}: {text}");
    }
    serde_json::from_str(&text).with_context(|| format!("failed to parse response from {url}"))
}

fn authed_client(token: Option<&str>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(token) = token {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {token}")).context("token contains invalid header characters")?,
        );
        builder = builder.default_headers(headers);
    }
    builder.build().context("failed to build HTTP client")
}
