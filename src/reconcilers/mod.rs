// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation for LoadBalancer Services.
//!
//! This module contains the reconciliation logic for the one resource this
//! operator manages: core `Service` objects of type `LoadBalancer` that
//! declare our load-balancer class.
//!
//! # Reconciliation Architecture
//!
//! pflb follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Monitor Service changes via Kubernetes API
//! 2. **Reconcile** - Re-derive the Service's lifecycle position from its
//!    current fields (level-triggered; no state is kept between calls)
//! 3. **Synchronize** - Drive the firewall's NAT rule table to match
//! 4. **Record** - Write ingress status and the ports-hash annotation back
//!
//! # Modules
//!
//! - [`service`] - the per-Service state machine (provision, update,
//!   teardown) and the `ServiceStore` persistence seam
//! - [`finalizers`] - cleanup-finalizer helpers guaranteeing an address is
//!   released before its Service disappears

pub mod finalizers;
pub mod service;

pub use service::{reconcile_service, KubeServiceStore, ReconcilerConfig};
