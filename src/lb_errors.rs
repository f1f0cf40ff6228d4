// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load-balancer operation error types for pflb.
//!
//! This module provides specialized error types for:
//! - Address allocation failures (subnet exhaustion, bad input)
//! - pfSense XML-RPC operations (persist rejections, faults, transport)
//! - Kubernetes object persistence (conflicts, not-found)
//!
//! These errors provide structured error handling for load-balancer
//! operations, enabling the reconciler to distinguish compensatable
//! failures (a rejected persist) from transient ones (a 409 conflict).

use thiserror::Error;

/// Errors produced by the address allocator.
#[derive(Error, Debug, Clone)]
pub enum AllocatorError {
    /// The subnet is exhausted: every host address is excluded or in use.
    #[error("no free address available in subnet {subnet}")]
    NoFreeAddress {
        /// The subnet that was scanned
        subnet: String,
    },

    /// An entry in the "already used" input failed to parse as an IP address.
    ///
    /// This is a fatal input error, not a skippable one: a malformed entry
    /// means the firewall rule table contains something we do not
    /// understand, and silently skipping it could hand out a duplicate IP.
    #[error("failed to parse in-use address '{address}'")]
    InvalidAddress {
        /// The offending entry as found in the rule table
        address: String,
    },
}

/// Errors that can occur while talking to the pfSense firewall.
#[derive(Error, Debug)]
pub enum FirewallError {
    /// The firewall processed the request but reported a non-success result.
    ///
    /// pfSense returns a structured boolean from `restore_config_section`;
    /// `false` means the write was not applied. Callers must treat any
    /// address allocated in the same pass as not committed.
    #[error("pfsense rejected the {section} section write")]
    PersistRejected {
        /// The configuration section that was being written
        section: String,
    },

    /// The firewall returned an XML-RPC fault.
    #[error("pfsense fault {code}: {message}")]
    Fault {
        /// XML-RPC fault code
        code: i64,
        /// XML-RPC fault string
        message: String,
    },

    /// The response was not well-formed XML-RPC, or had an unexpected shape.
    #[error("malformed pfsense response: {reason}")]
    Protocol {
        /// What was wrong with the payload
        reason: String,
    },

    /// The HTTP endpoint answered with a non-success status code.
    #[error("pfsense endpoint returned HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// The RPC/network layer failed (connect, TLS, timeout).
    #[error("pfsense transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Composite error type for the reconciler and firewall service.
///
/// This is the primary error type returned by pflb's operations. The
/// surrounding controller framework retries anything that propagates out
/// of a reconcile, so the distinctions here exist for compensation logic
/// and observability, not for retry scheduling.
#[derive(Error, Debug)]
pub enum LbError {
    /// Address allocation failed
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocatorError),

    /// Firewall operation failed
    #[error(transparent)]
    Firewall(#[from] FirewallError),

    /// Kubernetes API operation failed
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// A Service object was missing a field the controller requires
    /// (e.g. a LoadBalancer Service without a cluster IP).
    #[error("service {namespace}/{name} is missing {field}")]
    MissingField {
        /// Namespace of the Service
        namespace: String,
        /// Name of the Service
        name: String,
        /// The absent field
        field: String,
    },

    /// Generic error for operations that don't fit other categories
    #[error("load balancer operation failed: {0}")]
    Generic(String),
}

impl LbError {
    /// Returns true if this error is transient and the operation should be
    /// retried by the framework without operator attention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Firewall(FirewallError::Transport(_) | FirewallError::Http { .. })
            | Self::Generic(_) => true,
            Self::Kube(e) => is_conflict(e) || is_retryable_api_error(e),
            // Exhausted subnets, rejected persists and malformed input need
            // a config or firewall-side fix before a retry can succeed.
            Self::Allocation(_)
            | Self::Firewall(
                FirewallError::PersistRejected { .. }
                | FirewallError::Fault { .. }
                | FirewallError::Protocol { .. },
            )
            | Self::MissingField { .. } => false,
        }
    }

    /// Returns a short reason code for this error, used as a metrics label
    /// and in event/log records.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Allocation(AllocatorError::NoFreeAddress { .. }) => "NoFreeAddress",
            Self::Allocation(AllocatorError::InvalidAddress { .. }) => "InvalidAddress",
            Self::Firewall(FirewallError::PersistRejected { .. }) => "PersistFailed",
            Self::Firewall(FirewallError::Fault { .. }) => "FirewallFault",
            Self::Firewall(FirewallError::Protocol { .. }) => "ProtocolError",
            Self::Firewall(FirewallError::Http { .. }) => "HttpError",
            Self::Firewall(FirewallError::Transport(_)) => "TransportFailed",
            Self::Kube(e) if is_conflict(e) => "ObjectConflict",
            Self::Kube(e) if is_not_found(e) => "ObjectNotFound",
            Self::Kube(_) => "KubeApiError",
            Self::MissingField { .. } => "MissingField",
            Self::Generic(_) => "OperationFailed",
        }
    }
}

impl From<anyhow::Error> for LbError {
    fn from(err: anyhow::Error) -> Self {
        Self::Generic(err.to_string())
    }
}

/// True if the error is a Kubernetes optimistic-concurrency conflict (409).
///
/// Conflicts are expected under concurrent external edits and are swallowed
/// into a short fixed-delay requeue rather than surfaced as failures.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 409)
}

/// True if the error is a Kubernetes not-found (404).
///
/// A missing object during reconcile means it was already cleaned up (or
/// never existed); the reconciler treats this as success.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

/// True for API errors the framework can usefully retry (429 and 5xx).
fn is_retryable_api_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "lb_errors_tests.rs"]
mod lb_errors_tests;
