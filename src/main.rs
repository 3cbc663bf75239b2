// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use futures::StreamExt;
use herd::{
    config::{ControllerConfig, RancherConfig},
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RETRY_PERIOD_SECS, HEALTH_PATH,
        HTTP_SERVER_BIND_ADDRESS, HTTP_SERVER_PORT, KIND_PIPELINE, KIND_STACK, METRICS_PATH,
        REQUEUE_WHEN_NOT_READY_SECS,
    },
    context::Context,
    crd::{DeploymentPhase, Pipeline, Stack},
    events::KubeEventPublisher,
    fleet::{Bundle, KubeBundles},
    health::HealthState,
    labels::{HERD_OWNER_KIND_LABEL, HERD_OWNER_NAME_LABEL, HERD_OWNER_NAMESPACE_LABEL},
    metrics,
    rancher::RancherClient,
    reconcilers::{reconcile_pipeline, reconcile_stack},
};
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, watcher::Config, Controller},
    Api, Client, Resource, ResourceExt,
};
use kube_lease_manager::LeaseManagerBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let config = ControllerConfig::from_env();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_count)
        .thread_name("herd-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Herd controller");
}

/// Assemble the shared controller context from environment configuration.
async fn initialize_context(config: ControllerConfig) -> Result<Arc<Context>> {
    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let rancher_config = RancherConfig::from_env()?;
    let inventory = Arc::new(RancherClient::new(&rancher_config)?);
    debug!(url = %rancher_config.url, "Rancher client initialized");

    let bundles = Arc::new(KubeBundles::new(client.clone()));
    let events = Arc::new(KubeEventPublisher::new(client.clone(), "herd-controller"));
    let health = Arc::new(HealthState::new(config.resync_interval));

    Ok(Arc::new(Context::new(
        client, inventory, bundles, events, health, config,
    )))
}

async fn healthz(State(health): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if health.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler() -> String {
    match metrics::gather_metrics() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            String::from("# Error gathering metrics\n")
        }
    }
}

/// Start the health/metrics HTTP server.
fn start_http_server(health: Arc<HealthState>) -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = HTTP_SERVER_BIND_ADDRESS,
        port = HTTP_SERVER_PORT,
        "Starting health/metrics HTTP server"
    );

    tokio::spawn(async move {
        let app = Router::new()
            .route(HEALTH_PATH, get(healthz))
            .route(METRICS_PATH, get(metrics_handler))
            .with_state(health);

        let bind_addr = format!("{HTTP_SERVER_BIND_ADDRESS}:{HTTP_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind HTTP server to {bind_addr}: {e}");
                return;
            }
        };

        info!("HTTP server listening on http://{bind_addr}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {e}");
        }
    })
}

/// Leader election configuration
struct LeaderElectionConfig {
    enabled: bool,
    lease_name: String,
    lease_namespace: String,
    identity: String,
    lease_duration: u64,
    retry_period: u64,
}

/// Load leader election configuration from environment variables
fn load_leader_election_config() -> LeaderElectionConfig {
    let enabled = std::env::var("HERD_ENABLE_LEADER_ELECTION")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let lease_name =
        std::env::var("HERD_LEASE_NAME").unwrap_or_else(|_| "herd-leader".to_string());

    let lease_namespace = std::env::var("HERD_LEASE_NAMESPACE")
        .or_else(|_| std::env::var("POD_NAMESPACE"))
        .unwrap_or_else(|_| "herd-system".to_string());

    let lease_duration = std::env::var("HERD_LEASE_DURATION_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_DURATION_SECS);

    let retry_period = std::env::var("HERD_LEASE_RETRY_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RETRY_PERIOD_SECS);

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("herd-{}", rand::random::<u32>()));

    LeaderElectionConfig {
        enabled,
        lease_name,
        lease_namespace,
        identity,
        lease_duration,
        retry_period,
    }
}

async fn async_main(config: ControllerConfig) -> Result<()> {
    initialize_logging();

    let ctx = initialize_context(config).await?;

    let _http_handle = start_http_server(ctx.health.clone());

    let leader_config = load_leader_election_config();

    if leader_config.enabled {
        info!(
            lease_name = %leader_config.lease_name,
            lease_namespace = %leader_config.lease_namespace,
            identity = %leader_config.identity,
            "Leader election enabled, waiting to acquire leadership..."
        );

        let lease_manager =
            LeaseManagerBuilder::new(ctx.client.clone(), &leader_config.lease_name)
                .with_namespace(&leader_config.lease_namespace)
                .with_identity(&leader_config.identity)
                .with_duration(leader_config.lease_duration)
                .with_grace(leader_config.retry_period)
                .build()
                .await?;

        let (leader_rx, _lease_handle) = lease_manager.watch().await;

        let mut rx = leader_rx.clone();
        while !*rx.borrow_and_update() {
            rx.changed().await?;
        }

        info!("Leadership acquired, starting controllers");

        run_controllers(ctx, Some(leader_rx)).await
    } else {
        warn!("Leader election DISABLED - running without high availability");
        run_controllers(ctx, None).await
    }
}

/// Monitor leadership status - returns when leadership is lost or an error occurs
async fn monitor_leadership(
    mut leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        leader_rx.changed().await?;
        if !*leader_rx.borrow() {
            return Ok(());
        }
    }
}

/// Run both controllers with signal handling and optional leadership
/// monitoring. Returns on SIGINT/SIGTERM, leadership loss, or controller
/// exit.
async fn run_controllers(
    ctx: Arc<Context>,
    leader_rx: Option<tokio::sync::watch::Receiver<bool>>,
) -> Result<()> {
    ctx.health.mark_synced();

    let leadership = async {
        match leader_rx {
            Some(rx) => monitor_leadership(rx).await,
            None => std::future::pending().await,
        }
    };

    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }

        result = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                sigterm.recv().await;
                Ok::<(), anyhow::Error>(())
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            }
        } => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }

        result = leadership => {
            match result {
                Ok(()) => {
                    warn!("Leadership lost! Stopping all controllers...");
                    anyhow::bail!("Leadership lost - stepping down")
                }
                Err(e) => {
                    error!("Leadership monitor error: {:?}", e);
                    anyhow::bail!("Leadership monitoring failed: {e}")
                }
            }
        }

        result = run_stack_controller(ctx.clone()) => {
            error!("CRITICAL: Stack controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Stack controller exited unexpectedly without error")
        }

        result = run_pipeline_controller(ctx.clone()) => {
            error!("CRITICAL: Pipeline controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Pipeline controller exited unexpectedly without error")
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Map a Bundle event to its owning parent of kind `owner_kind`, via the
/// owner labels the synthesizer stamps on every Bundle.
fn bundle_owner_ref<K>(bundle: &Bundle, owner_kind: &str) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let labels = bundle.metadata.labels.as_ref()?;
    if labels.get(HERD_OWNER_KIND_LABEL)? != owner_kind {
        return None;
    }
    let name = labels.get(HERD_OWNER_NAME_LABEL)?;
    let namespace = labels.get(HERD_OWNER_NAMESPACE_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Run the `Stack` controller.
///
/// Watches Stacks for spec changes (semantic filtering avoids
/// status-update loops) and owned Bundles for deployment-state changes.
async fn run_stack_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Stack controller");

    let api = Api::<Stack>::all(ctx.client.clone());
    let bundle_api = Api::<Bundle>::all(ctx.client.clone());

    Controller::new(api, Config::default().any_semantic())
        .watches(bundle_api, Config::default(), |bundle: Bundle| {
            bundle_owner_ref::<Stack>(&bundle, "stack")
        })
        .run(reconcile_stack_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `Pipeline` controller.
async fn run_pipeline_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Pipeline controller");

    let api = Api::<Pipeline>::all(ctx.client.clone());
    let bundle_api = Api::<Bundle>::all(ctx.client.clone());

    Controller::new(api, Config::default().any_semantic())
        .watches(bundle_api, Config::default(), |bundle: Bundle| {
            bundle_owner_ref::<Pipeline>(&bundle, "pipeline")
        })
        .run(reconcile_pipeline_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn object_key<K: ResourceExt>(resource: &K) -> String {
    format!(
        "{}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    )
}

/// Reconcile wrapper for `Stack`
async fn reconcile_stack_wrapper(
    stack: Arc<Stack>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    let key = object_key(stack.as_ref());
    ctx.health.heartbeat();

    let result = reconcile_stack(ctx.clone(), (*stack).clone()).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!("Successfully reconciled Stack: {}", stack.name_any());
            metrics::record_reconciliation_success(KIND_STACK, duration);
            ctx.reset_error_backoff(&key);

            // Settled resources resync on the slow interval; in-flight
            // deployments are observed more frequently
            let settled = fetch_stack_phase(&ctx, &stack).await.is_some_and(|phase| {
                matches!(phase, DeploymentPhase::Deployed | DeploymentPhase::Failed)
            });

            if settled {
                Ok(Action::requeue(ctx.config.resync_interval))
            } else {
                Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_WHEN_NOT_READY_SECS,
                )))
            }
        }
        Err(e) => {
            error!("Failed to reconcile Stack {}: {}", stack.name_any(), e);
            metrics::record_reconciliation_error(KIND_STACK, duration);
            metrics::record_error(KIND_STACK, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `Pipeline`
async fn reconcile_pipeline_wrapper(
    pipeline: Arc<Pipeline>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    let key = object_key(pipeline.as_ref());
    ctx.health.heartbeat();

    let result = reconcile_pipeline(ctx.clone(), (*pipeline).clone()).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!("Successfully reconciled Pipeline: {}", pipeline.name_any());
            metrics::record_reconciliation_success(KIND_PIPELINE, duration);
            ctx.reset_error_backoff(&key);

            let settled = fetch_pipeline_phase(&ctx, &pipeline)
                .await
                .is_some_and(|phase| {
                    matches!(phase, DeploymentPhase::Deployed | DeploymentPhase::Failed)
                });

            if settled {
                Ok(Action::requeue(ctx.config.resync_interval))
            } else {
                Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_WHEN_NOT_READY_SECS,
                )))
            }
        }
        Err(e) => {
            error!(
                "Failed to reconcile Pipeline {}: {}",
                pipeline.name_any(),
                e
            );
            metrics::record_reconciliation_error(KIND_PIPELINE, duration);
            metrics::record_error(KIND_PIPELINE, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Fetch the freshly written phase; the object handed to the reconciler
/// predates this pass's status update.
async fn fetch_stack_phase(ctx: &Context, stack: &Stack) -> Option<DeploymentPhase> {
    let api: Api<Stack> =
        Api::namespaced(ctx.client.clone(), &stack.namespace().unwrap_or_default());
    api.get_opt(&stack.name_any())
        .await
        .ok()
        .flatten()
        .and_then(|s| s.status.map(|status| status.phase))
}

async fn fetch_pipeline_phase(ctx: &Context, pipeline: &Pipeline) -> Option<DeploymentPhase> {
    let api: Api<Pipeline> =
        Api::namespaced(ctx.client.clone(), &pipeline.namespace().unwrap_or_default());
    api.get_opt(&pipeline.name_any())
        .await
        .ok()
        .flatten()
        .and_then(|p| p.status.map(|status| status.phase))
}

/// Error policy shared by both controllers: requeue with per-key
/// exponential backoff (1s base, 5 minute cap).
fn error_policy<T>(resource: Arc<T>, _err: &ReconcileError, ctx: Arc<Context>) -> Action
where
    T: ResourceExt,
{
    let key = object_key(resource.as_ref());
    Action::requeue(ctx.error_backoff(&key))
}
