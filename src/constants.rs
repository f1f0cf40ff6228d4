// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the pflb operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Controller Identity Constants
// ============================================================================

/// Domain owned by this controller for annotations and finalizers
pub const CONTROLLER_DOMAIN: &str = "pflb.io";

/// Default load-balancer class a Service must declare to opt in
pub const DEFAULT_LOAD_BALANCER_CLASS: &str = "pflb.io/pfsense";

/// Default finalizer guaranteeing IP cleanup before Service deletion
pub const DEFAULT_FINALIZER: &str = "loadbalancer.pflb.io/ip-cleanup";

/// Default annotation key storing the last-synchronized ports hash
pub const DEFAULT_PORTS_HASH_ANNOTATION: &str = "loadbalancer.pflb.io/ports-hash";

/// `ipMode` written to load-balancer ingress status entries
pub const IP_MODE_VIP: &str = "VIP";

// ============================================================================
// Firewall Constants
// ============================================================================

/// Path of the pfSense XML-RPC endpoint, relative to the base URL
pub const FIREWALL_RPC_PATH: &str = "xmlrpc.php";

/// Configuration section holding port-forward rules
pub const NAT_SECTION: &str = "nat";

/// Request timeout for firewall RPC calls (firewall config writes can
/// take a while on loaded appliances)
pub const FIREWALL_TIMEOUT_SECS: u64 = 30;

/// Interface generated port-forward rules are attached to
pub const NAT_RULE_INTERFACE: &str = "wan";

/// Description prefix for rules owned by this controller
pub const NAT_DESCR_PREFIX: &str = "k8s-lb";

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration after a Kubernetes 409 conflict (2 seconds)
pub const CONFLICT_REQUEUE_SECS: u64 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Telemetry Server Constants
// ============================================================================

/// Default bind address for the metrics/health HTTP server
pub const TELEMETRY_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";
