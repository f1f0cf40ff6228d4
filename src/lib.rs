// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # pflb - pfSense LoadBalancer Operator for Kubernetes
//!
//! pflb is a Kubernetes operator written in Rust that provisions external
//! load-balancer addresses from a pfSense firewall for `Service` objects
//! of type `LoadBalancer` carrying the `pflb.io/pfsense` class.
//!
//! ## Overview
//!
//! This library provides the core functionality for the operator,
//! including:
//!
//! - A pure address allocator scanning the firewall's live NAT rule table
//! - A NAT synchronizer translating Service ports into port-forward rules
//! - Reconciliation logic driving Services through allocation,
//!   synchronization and teardown
//! - An XML-RPC client for the pfSense configuration endpoint
//!
//! ## Modules
//!
//! - [`allocator`] - lowest-free-address selection over a subnet
//! - [`firewall`] - the allocate/update/release façade the reconciler uses
//! - [`pfsense`] - NAT section model and the firewall RPC client
//! - [`reconcilers`] - reconciliation logic for LoadBalancer Services
//! - [`config`] - operator settings (flags and `PFLB_*` environment)
//! - [`metrics`] - Prometheus metrics and the telemetry HTTP server
//!
//! ## How an address is granted
//!
//! The firewall's rule table is the only allocation ledger. Every
//! provision fetches the NAT section, derives the set of claimed
//! addresses from the rules' destinations, picks the lowest free host
//! address in the configured subnet, appends one port-forward rule per
//! Service port and writes the section back. The Service records the
//! grant in `status.loadBalancer.ingress`, and a cleanup finalizer
//! guarantees the rules are removed before the Service disappears.

pub mod allocator;
pub mod config;
pub mod constants;
pub mod firewall;
pub mod lb_errors;
pub mod metrics;
pub mod pfsense;
pub mod reconcilers;
