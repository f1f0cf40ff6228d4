// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! All settings come in through clap, each flag doubling as a `PFLB_*`
//! environment variable so the deployment manifest can configure the
//! operator without argument plumbing. Only the firewall endpoint,
//! credentials and subnet are required; everything else has defaults from
//! [`crate::constants`].

use std::net::SocketAddr;

use clap::Parser;
use ipnet::IpNet;
use url::Url;

use crate::allocator::ExclusionRange;
use crate::constants::{
    DEFAULT_FINALIZER, DEFAULT_LOAD_BALANCER_CLASS, DEFAULT_PORTS_HASH_ANNOTATION,
    TELEMETRY_BIND_ADDRESS,
};
use crate::reconcilers::ReconcilerConfig;

/// Runtime settings for the operator.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pflb",
    version,
    about = "pfSense LoadBalancer Operator for Kubernetes"
)]
pub struct Settings {
    /// Base URL of the pfSense web UI (the XML-RPC endpoint lives under it)
    #[arg(long, env = "PFLB_PFSENSE_URL")]
    pub pfsense_url: Url,

    /// Firewall account used for XML-RPC calls
    #[arg(long, env = "PFLB_PFSENSE_USERNAME", default_value = "admin")]
    pub pfsense_username: String,

    /// Password for the firewall account
    #[arg(long, env = "PFLB_PFSENSE_PASSWORD", hide_env_values = true)]
    pub pfsense_password: String,

    /// Skip TLS certificate verification (self-signed firewall certs).
    /// Security-sensitive; the client logs a warning when enabled.
    #[arg(long, env = "PFLB_PFSENSE_INSECURE")]
    pub pfsense_insecure: bool,

    /// CIDR subnet external addresses are allocated from
    #[arg(long, env = "PFLB_SUBNET")]
    pub subnet: IpNet,

    /// Inclusive address ranges never handed out, comma-separated
    /// (e.g. `150.150.150.1-150.150.150.9,150.150.150.250-150.150.150.254`)
    #[arg(long, env = "PFLB_EXCLUSIONS", value_delimiter = ',')]
    pub exclusions: Vec<ExclusionRange>,

    /// Log would-be firewall writes instead of performing them
    #[arg(long, env = "PFLB_DRY_RUN")]
    pub dry_run: bool,

    /// `spec.loadBalancerClass` value a Service must declare to opt in
    #[arg(
        long,
        env = "PFLB_LOAD_BALANCER_CLASS",
        default_value = DEFAULT_LOAD_BALANCER_CLASS
    )]
    pub load_balancer_class: String,

    /// Finalizer placed on managed Services to guard address cleanup
    #[arg(long, env = "PFLB_FINALIZER", default_value = DEFAULT_FINALIZER)]
    pub finalizer: String,

    /// Annotation key storing the last-synchronized ports hash
    #[arg(
        long,
        env = "PFLB_PORTS_HASH_ANNOTATION",
        default_value = DEFAULT_PORTS_HASH_ANNOTATION
    )]
    pub ports_hash_annotation: String,

    /// Bind address for the metrics/health HTTP server
    #[arg(
        long,
        env = "PFLB_TELEMETRY_BIND_ADDRESS",
        default_value = TELEMETRY_BIND_ADDRESS
    )]
    pub telemetry_bind_address: SocketAddr,
}

impl Settings {
    /// The identity strings the reconciler needs.
    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            load_balancer_class: self.load_balancer_class.clone(),
            finalizer: self.finalizer.clone(),
            ports_hash_annotation: self.ports_hash_annotation.clone(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
