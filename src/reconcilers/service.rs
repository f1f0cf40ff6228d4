// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for LoadBalancer Services.
//!
//! The reconciler is a stateless handler: every invocation re-derives the
//! Service's position in the lifecycle from its current fields and moves
//! it one persisted step forward. There is no per-object state held
//! between invocations, so the handler converges from any prior state the
//! watch machinery happens to deliver (level-triggered, not
//! edge-triggered).
//!
//! Lifecycle, re-derived per call:
//!
//! 1. Fetch - a missing object was already cleaned up
//! 2. Teardown - finalizer present and the object is being deleted *or*
//!    stopped qualifying: release every recorded address before the
//!    finalizer comes off
//! 3. Ownership filter - not our class/type: skip
//! 4. Finalizer bootstrap - persist the finalizer and stop; the write
//!    re-triggers reconciliation, guaranteeing the marker is durable
//!    before any allocation is attempted
//! 5. Provisioning - allocate, write status, then the ports-hash
//!    annotation; a failed status write releases the fresh address so the
//!    firewall never holds a rule for an address the cluster won't record
//! 6. Port-change detection - hash mismatch replaces the rules in place
//!
//! Kubernetes 409 conflicts are expected under concurrent edits and are
//! converted into a short fixed-delay requeue; everything else propagates
//! to the controller's error policy.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, PortStatus, Service, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::PostParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::constants::{
    CONFLICT_REQUEUE_SECS, DEFAULT_FINALIZER, DEFAULT_LOAD_BALANCER_CLASS,
    DEFAULT_PORTS_HASH_ANNOTATION, IP_MODE_VIP,
};
use crate::firewall::{LoadBalancerProvider, ServicePort};
use crate::lb_errors::{is_conflict, LbError};
use crate::reconcilers::finalizers::{add_finalizer, has_finalizer, remove_finalizer};

/// The identity strings this controller owns on a Service.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// `spec.loadBalancerClass` value a Service must declare to opt in
    pub load_balancer_class: String,
    /// Finalizer guarding address cleanup
    pub finalizer: String,
    /// Annotation key storing the last-synchronized ports hash
    pub ports_hash_annotation: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            load_balancer_class: DEFAULT_LOAD_BALANCER_CLASS.to_string(),
            finalizer: DEFAULT_FINALIZER.to_string(),
            ports_hash_annotation: DEFAULT_PORTS_HASH_ANNOTATION.to_string(),
        }
    }
}

/// Persistence boundary for the Service object being reconciled.
///
/// The reconciler only ever needs three operations against the object
/// store; putting them behind a trait keeps the state machine a pure
/// function of fetched state and lets tests drive it without an API
/// server. The store is scoped to one namespace, matching the per-key
/// serialization the controller runtime guarantees.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Fetch the current object, `None` if it no longer exists.
    async fn get(&self, name: &str) -> Result<Option<Service>, LbError>;

    /// Replace the main resource (metadata + spec).
    async fn update(&self, svc: &Service) -> Result<(), LbError>;

    /// Replace the status subresource.
    async fn update_status(&self, svc: &Service) -> Result<(), LbError>;
}

/// [`ServiceStore`] over a namespaced `kube::Api`.
pub struct KubeServiceStore {
    api: Api<Service>,
}

impl KubeServiceStore {
    /// Wrap an already-namespaced Service API.
    #[must_use]
    pub fn new(api: Api<Service>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get(&self, name: &str) -> Result<Option<Service>, LbError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn update(&self, svc: &Service) -> Result<(), LbError> {
        self.api
            .replace(&svc.name_any(), &PostParams::default(), svc)
            .await?;
        Ok(())
    }

    async fn update_status(&self, svc: &Service) -> Result<(), LbError> {
        self.api
            .replace_status(&svc.name_any(), &PostParams::default(), svc)
            .await?;
        Ok(())
    }
}

/// Reconcile one Service identity.
///
/// # Errors
///
/// Propagates firewall and Kubernetes errors for the controller's error
/// policy to requeue, except 409 conflicts, which return success with a
/// fixed short requeue.
pub async fn reconcile_service(
    store: &dyn ServiceStore,
    provider: &dyn LoadBalancerProvider,
    cfg: &ReconcilerConfig,
    name: &str,
) -> Result<Action, LbError> {
    let Some(mut svc) = store.get(name).await? else {
        // Already gone; the finalizer would have forced cleanup first.
        debug!(name, "service not found, nothing to reconcile");
        return Ok(Action::await_change());
    };

    // Always handle teardown while the finalizer is present, even if the
    // object merely stopped qualifying (type or class changed) - the
    // address it holds must not outlive its eligibility.
    if has_finalizer(&svc, &cfg.finalizer)
        && (svc.metadata.deletion_timestamp.is_some() || !is_our_service(&svc, cfg))
    {
        return handle_teardown(store, provider, cfg, &mut svc).await;
    }

    if !is_our_service(&svc, cfg) {
        debug!(
            name,
            service_type = svc.spec.as_ref().and_then(|s| s.type_.as_deref()),
            lb_class = svc
                .spec
                .as_ref()
                .and_then(|s| s.load_balancer_class.as_deref()),
            "skipping service: not our load balancer class or type"
        );
        return Ok(Action::await_change());
    }

    match handle_create_or_update(store, provider, cfg, &mut svc).await {
        Err(LbError::Kube(e)) if is_conflict(&e) => {
            debug!(name, error = %e, "conflict updating service, requeuing");
            Ok(Action::requeue(Duration::from_secs(CONFLICT_REQUEUE_SECS)))
        }
        other => other,
    }
}

/// True if the Service opted into this controller.
fn is_our_service(svc: &Service, cfg: &ReconcilerConfig) -> bool {
    let Some(spec) = svc.spec.as_ref() else {
        return false;
    };
    spec.type_.as_deref() == Some("LoadBalancer")
        && spec.load_balancer_class.as_deref() == Some(cfg.load_balancer_class.as_str())
}

async fn handle_create_or_update(
    store: &dyn ServiceStore,
    provider: &dyn LoadBalancerProvider,
    cfg: &ReconcilerConfig,
    svc: &mut Service,
) -> Result<Action, LbError> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();

    // The finalizer must be durable before anything is allocated; persist
    // it and stop. The update re-triggers reconciliation, which continues
    // below with the marker in place.
    if !has_finalizer(svc, &cfg.finalizer) {
        add_finalizer(svc, &cfg.finalizer);
        store.update(svc).await?;
        info!(namespace, name, "added cleanup finalizer to service");
        return Ok(Action::await_change());
    }

    let ports = extract_service_ports(svc);
    let current_hash = compute_ports_hash(&ports);

    let assigned_ip = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|entry| entry.ip.clone());

    if let Some(ip) = assigned_ip {
        // An address is assigned at most once; from here on only the rule
        // set may change.
        let recorded_hash = svc
            .annotations()
            .get(&cfg.ports_hash_annotation)
            .cloned()
            .unwrap_or_default();
        if recorded_hash == current_hash {
            debug!(namespace, name, ip, "ports unchanged, nothing to do");
            return Ok(Action::await_change());
        }

        info!(namespace, name, ip, "ports changed, updating firewall rules");
        provider.update_ports(&ip, &ports).await?;

        set_ingress_status(svc, &ip, &ports);
        store.update_status(svc).await?;
        set_ports_hash(svc, cfg, &current_hash);
        store.update(svc).await?;
        info!(namespace, name, ip, "synchronized firewall rules for service");
    } else {
        let target_ip = cluster_ip(svc).ok_or_else(|| LbError::MissingField {
            namespace: namespace.clone(),
            name: name.clone(),
            field: "spec.clusterIP".to_string(),
        })?;

        let ip = provider
            .allocate_ip(&namespace, &name, &target_ip, &ports)
            .await?;

        set_ingress_status(svc, &ip, &ports);
        if let Err(err) = store.update_status(svc).await {
            // The cluster will never record this address; take it back so
            // the firewall doesn't keep rules for an orphan.
            warn!(
                namespace,
                name,
                ip,
                error = %err,
                "status update failed after provisioning, releasing address"
            );
            if let Err(release_err) = provider.release_ip(&ip).await {
                error!(
                    namespace,
                    name,
                    ip,
                    error = %release_err,
                    "failed to release address after status update failure"
                );
                return Err(LbError::Generic(format!(
                    "update status: {err}; release {ip}: {release_err}"
                )));
            }
            return Err(err);
        }
        info!(namespace, name, ip, "assigned load balancer address to service");

        set_ports_hash(svc, cfg, &current_hash);
        store.update(svc).await?;
    }

    Ok(Action::await_change())
}

async fn handle_teardown(
    store: &dyn ServiceStore,
    provider: &dyn LoadBalancerProvider,
    cfg: &ReconcilerConfig,
    svc: &mut Service,
) -> Result<Action, LbError> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();

    let ingress_ips: Vec<String> = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|entry| entry.ip.clone())
                .filter(|ip| !ip.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for ip in &ingress_ips {
        // A failed release keeps the finalizer in place; the framework
        // requeues and teardown runs again.
        provider.release_ip(ip).await?;
        info!(namespace, name, ip, "released load balancer address");
    }

    remove_finalizer(svc, &cfg.finalizer);
    store.update(svc).await?;
    info!(namespace, name, "removed cleanup finalizer from service");

    Ok(Action::await_change())
}

/// Extract the port set for this reconcile pass.
///
/// Named target ports resolve through endpoints, which this controller
/// does not track; they fall back to the node port, which reaches the
/// workload regardless.
#[must_use]
pub fn extract_service_ports(svc: &Service) -> Vec<ServicePort> {
    svc.spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    let node_port = p.node_port.unwrap_or_default();
                    let target_port = match p.target_port.as_ref() {
                        Some(IntOrString::Int(i)) => *i,
                        Some(IntOrString::String(_)) | None => node_port,
                    };
                    ServicePort {
                        name: p.name.clone().unwrap_or_default(),
                        protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                        app_protocol: p.app_protocol.clone(),
                        node_port,
                        target_port,
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fingerprint of a port set, used to detect changes cheaply.
///
/// The list is sorted by name and node port before serialization so
/// reordering an otherwise identical port list does not read as a change.
#[must_use]
pub fn compute_ports_hash(ports: &[ServicePort]) -> String {
    let mut canonical: Vec<&ServicePort> = ports.iter().collect();
    canonical.sort_by(|a, b| a.name.cmp(&b.name).then(a.node_port.cmp(&b.node_port)));

    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cluster_ip(svc: &Service) -> Option<String> {
    svc.spec
        .as_ref()
        .and_then(|s| s.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
}

fn set_ingress_status(svc: &mut Service, ip: &str, ports: &[ServicePort]) {
    let entry = LoadBalancerIngress {
        ip: Some(ip.to_string()),
        ip_mode: Some(IP_MODE_VIP.to_string()),
        ports: Some(
            ports
                .iter()
                .map(|p| PortStatus {
                    port: p.node_port,
                    protocol: p.protocol.clone(),
                    error: None,
                })
                .collect(),
        ),
        ..Default::default()
    };

    svc.status
        .get_or_insert_with(ServiceStatus::default)
        .load_balancer
        .get_or_insert_with(LoadBalancerStatus::default)
        .ingress = Some(vec![entry]);
}

fn set_ports_hash(svc: &mut Service, cfg: &ReconcilerConfig, hash: &str) {
    svc.annotations_mut()
        .insert(cfg.ports_hash_annotation.clone(), hash.to_string());
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
