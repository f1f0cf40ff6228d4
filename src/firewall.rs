// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Firewall-backed load-balancer provisioning.
//!
//! [`FirewallService`] combines the address allocator with the NAT rule
//! synchronizer behind the [`LoadBalancerProvider`] capability the
//! reconciler consumes:
//!
//! - `allocate_ip` - pick a free address and install one port-forward rule
//!   per Service port
//! - `update_ports` - replace the rule set of an already-allocated address
//! - `release_ip` - drop every rule addressed to an address
//!
//! Every operation fetches the NAT section fresh from the firewall and
//! writes the whole section back. The rule table itself is the allocation
//! ledger; there is no local cache to go stale. In dry-run mode the
//! persist step logs the computed payload instead of contacting the
//! firewall, after the payload has been fully derived, so validation runs
//! observe exactly what a real run would write.

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{allocate_address, ExclusionRange};
use crate::constants::{NAT_DESCR_PREFIX, NAT_RULE_INTERFACE};
use crate::lb_errors::LbError;
use crate::pfsense::{FirewallClient, NatRule, NatSection};

/// The subset of a Service port the firewall cares about.
///
/// Extracted once per reconcile pass and immutable afterwards; also the
/// unit the ports hash is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePort {
    /// Port name within the Service (may be empty for single-port Services)
    pub name: String,
    /// `TCP` or `UDP`
    pub protocol: String,
    /// Application protocol hint, if declared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_protocol: Option<String>,
    /// Port assigned on the cluster nodes
    pub node_port: i32,
    /// Port the workload listens on behind the cluster IP
    pub target_port: i32,
}

/// Capability the reconciler uses to manage external addresses.
///
/// [`FirewallService`] is the production implementation; tests substitute
/// recording fakes to pin the reconciler's call pattern.
#[async_trait]
pub trait LoadBalancerProvider: Send + Sync {
    /// Allocate a free external address for `namespace/name` and install
    /// its port-forward rules targeting `target_ip`.
    async fn allocate_ip(
        &self,
        namespace: &str,
        name: &str,
        target_ip: &str,
        ports: &[ServicePort],
    ) -> Result<String, LbError>;

    /// Replace the port-forward rules of an already-allocated address.
    async fn update_ports(&self, external_ip: &str, ports: &[ServicePort])
        -> Result<(), LbError>;

    /// Remove every rule addressed to `external_ip`. Idempotent.
    async fn release_ip(&self, external_ip: &str) -> Result<(), LbError>;
}

/// Allocator + NAT synchronizer over a [`FirewallClient`].
pub struct FirewallService {
    client: Arc<dyn FirewallClient>,
    subnet: IpNet,
    exclusions: Vec<ExclusionRange>,
    dry_run: bool,
}

impl FirewallService {
    /// Build a service allocating from `subnet` minus `exclusions`.
    #[must_use]
    pub fn new(
        client: Arc<dyn FirewallClient>,
        subnet: IpNet,
        exclusions: Vec<ExclusionRange>,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            subnet,
            exclusions,
            dry_run,
        }
    }

    /// Derive the port-forward rules for one Service on one address.
    ///
    /// One rule per port: external `ip:node_port` forwarded to
    /// `target_ip:target_port`, with a description embedding
    /// namespace/name/port so operators can trace a rule back to its
    /// Service from the firewall UI.
    #[must_use]
    pub fn rules_for_service(
        external_ip: &str,
        target_ip: &str,
        namespace: &str,
        name: &str,
        ports: &[ServicePort],
    ) -> Vec<NatRule> {
        ports
            .iter()
            .map(|port| {
                let port_label = if port.name.is_empty() {
                    port.node_port.to_string()
                } else {
                    port.name.clone()
                };
                NatRule {
                    interface: NAT_RULE_INTERFACE.to_string(),
                    protocol: port.protocol.to_lowercase(),
                    target: target_ip.to_string(),
                    local_port: port.target_port.to_string(),
                    destination_address: external_ip.to_string(),
                    destination_port: port.node_port.to_string(),
                    descr: format!("{NAT_DESCR_PREFIX}/{namespace}/{name}/{port_label}"),
                    extra: Default::default(),
                }
            })
            .collect()
    }

    /// Persist the section, or log it when dry-run is enabled.
    ///
    /// The short-circuit happens here, after the caller computed the final
    /// payload, so every mutating path honors the flag with the payload it
    /// would really have written.
    async fn persist(&self, section: &NatSection) -> Result<(), LbError> {
        if self.dry_run {
            info!(
                rules = section.rules.len(),
                addresses = ?section.claimed_addresses(),
                "dry-run: skipping nat section write"
            );
            return Ok(());
        }
        self.client.persist_nat_section(section).await?;
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerProvider for FirewallService {
    async fn allocate_ip(
        &self,
        namespace: &str,
        name: &str,
        target_ip: &str,
        ports: &[ServicePort],
    ) -> Result<String, LbError> {
        let mut section = self.client.fetch_nat_section().await?;
        let claimed = section.claimed_addresses();

        let external_ip = allocate_address(&self.subnet, &self.exclusions, &claimed)?;
        debug!(
            namespace,
            name,
            ip = %external_ip,
            claimed = claimed.len(),
            "allocated address from nat rule table"
        );

        section.rules.extend(Self::rules_for_service(
            &external_ip,
            target_ip,
            namespace,
            name,
            ports,
        ));
        self.persist(&section).await?;
        crate::metrics::record_ip_allocated();

        info!(
            namespace,
            name,
            ip = %external_ip,
            ports = ports.len(),
            "provisioned load balancer address"
        );
        Ok(external_ip)
    }

    async fn update_ports(
        &self,
        external_ip: &str,
        ports: &[ServicePort],
    ) -> Result<(), LbError> {
        let mut section = self.client.fetch_nat_section().await?;

        let existing: Vec<NatRule> = section
            .rules
            .iter()
            .filter(|r| r.destination_address == external_ip)
            .cloned()
            .collect();
        if existing.is_empty() {
            warn!(
                ip = %external_ip,
                "no nat rules recorded for address, nothing to update"
            );
            return Ok(());
        }

        // The surviving rules carry the recorded target address and the
        // namespace/name in their description; re-derive the rule set from
        // those rather than trusting the caller to repeat them.
        let target_ip = existing[0].target.clone();
        let (namespace, name) = split_descr(&existing[0].descr);

        section
            .rules
            .retain(|r| r.destination_address != external_ip);
        section.rules.extend(Self::rules_for_service(
            external_ip,
            &target_ip,
            &namespace,
            &name,
            ports,
        ));
        self.persist(&section).await?;

        info!(ip = %external_ip, ports = ports.len(), "updated nat rules for address");
        Ok(())
    }

    async fn release_ip(&self, external_ip: &str) -> Result<(), LbError> {
        let mut section = self.client.fetch_nat_section().await?;

        let before = section.rules.len();
        section
            .rules
            .retain(|r| r.destination_address != external_ip);

        if section.rules.len() == before {
            debug!(ip = %external_ip, "no nat rules for address, release is a no-op");
            return Ok(());
        }

        self.persist(&section).await?;
        crate::metrics::record_ip_released();
        info!(
            ip = %external_ip,
            removed = before - section.rules.len(),
            "released load balancer address"
        );
        Ok(())
    }
}

/// Pull `(namespace, name)` back out of a rule description written by
/// [`FirewallService::rules_for_service`]. Unrecognized descriptions fall
/// back to empty components rather than failing an update.
fn split_descr(descr: &str) -> (String, String) {
    let mut parts = descr.splitn(4, '/');
    let prefix = parts.next().unwrap_or_default();
    if prefix != NAT_DESCR_PREFIX {
        return (String::new(), String::new());
    }
    let namespace = parts.next().unwrap_or_default().to_string();
    let name = parts.next().unwrap_or_default().to_string();
    (namespace, name)
}

#[cfg(test)]
#[path = "firewall_tests.rs"]
mod firewall_tests;
