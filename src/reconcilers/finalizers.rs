// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for Service objects.
//!
//! The cleanup finalizer is what guarantees an allocated firewall address
//! outlives its Service only while teardown is still pending. These
//! helpers mutate the in-memory object; the caller persists the change and
//! owns the ordering guarantee (the finalizer write must land before any
//! allocation is attempted).

use k8s_openapi::api::core::v1::Service;

/// True if `finalizer` is present on the Service.
#[must_use]
pub fn has_finalizer(svc: &Service, finalizer: &str) -> bool {
    svc.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == finalizer))
}

/// Add `finalizer` to the Service if not already present.
///
/// Idempotent; the caller must persist the object for the marker to take
/// effect.
pub fn add_finalizer(svc: &mut Service, finalizer: &str) {
    if !has_finalizer(svc, finalizer) {
        svc.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
    }
}

/// Remove `finalizer` from the Service if present.
///
/// Idempotent; once the caller persists the removal, Kubernetes is free to
/// delete the object.
pub fn remove_finalizer(svc: &mut Service, finalizer: &str) {
    if let Some(finalizers) = svc.metadata.finalizers.as_mut() {
        finalizers.retain(|existing| existing != finalizer);
        if finalizers.is_empty() {
            svc.metadata.finalizers = None;
        }
    }
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
