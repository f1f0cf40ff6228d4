// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use pflb::{
    config::Settings,
    constants::{ERROR_REQUEUE_DURATION_SECS, TOKIO_WORKER_THREADS},
    firewall::FirewallService,
    metrics,
    pfsense::{FirewallClient, PfsenseClient},
    reconcilers::{reconcile_service, KubeServiceStore, ReconcilerConfig},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Shared state handed to every reconcile invocation.
struct Context {
    client: Client,
    firewall: Arc<FirewallService>,
    reconciler_config: ReconcilerConfig,
}

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("pflb-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize logging with custom format
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Example: RUST_LOG=debug cargo run
    //
    // Respects RUST_LOG_FORMAT environment variable for output format
    // Example: RUST_LOG_FORMAT=json cargo run
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

    let settings = Settings::parse();
    info!("Starting pfSense LoadBalancer Controller");
    debug!(
        subnet = %settings.subnet,
        exclusions = settings.exclusions.len(),
        dry_run = settings.dry_run,
        class = %settings.load_balancer_class,
        "Configuration loaded"
    );

    // Firewall client and the allocate/update/release façade over it
    let pfsense: Arc<dyn FirewallClient> = Arc::new(PfsenseClient::new(
        &settings.pfsense_url,
        &settings.pfsense_username,
        &settings.pfsense_password,
        settings.pfsense_insecure,
    )?);
    let firewall = Arc::new(FirewallService::new(
        pfsense.clone(),
        settings.subnet,
        settings.exclusions.clone(),
        settings.dry_run,
    ));

    // Initialize Kubernetes client
    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    // Telemetry server: /metrics, /healthz and a /readyz that probes the
    // firewall, so the pod only reports ready when pfSense is reachable
    let telemetry_addr = settings.telemetry_bind_address;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_telemetry(telemetry_addr, pfsense).await {
            error!("Telemetry server exited: {e:?}");
        }
    });

    let context = Arc::new(Context {
        client: client.clone(),
        firewall,
        reconciler_config: settings.reconciler_config(),
    });

    run_service_controller(client, context).await
}

/// Run the `Service` controller until shutdown.
async fn run_service_controller(client: Client, context: Arc<Context>) -> Result<()> {
    info!("Starting Service controller");

    let api = Api::<Service>::all(client);

    Controller::new(api, Config::default())
        .shutdown_on_signal()
        .run(reconcile_service_wrapper, error_policy, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    info!("Service controller stopped");
    Ok(())
}

/// Reconcile wrapper for `Service`
async fn reconcile_service_wrapper(
    svc: Arc<Service>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    debug!(namespace, name, "Reconcile wrapper called for Service");

    let store = KubeServiceStore::new(Api::namespaced(ctx.client.clone(), &namespace));

    match reconcile_service(&store, ctx.firewall.as_ref(), &ctx.reconciler_config, &name).await {
        Ok(action) => {
            metrics::record_reconciliation_success(start.elapsed());
            Ok(action)
        }
        Err(e) => {
            metrics::record_reconciliation_error(start.elapsed(), e.status_reason());
            error!(namespace, name, "Failed to reconcile Service: {e}");
            Err(ReconcileError(anyhow::Error::new(e)))
        }
    }
}

/// Error policy for the controller: fixed-delay requeue, leaving backoff
/// scheduling to the runtime's queue.
fn error_policy(_resource: Arc<Service>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    debug!("Requeueing after reconcile error: {err}");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
