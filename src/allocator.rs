// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Address allocation for load-balancer Services.
//!
//! The allocator is a pure function: given a subnet, a set of excluded
//! ranges and the addresses already claimed by firewall rules, it returns
//! the lowest unused host address. There is no allocator-local state — the
//! caller re-derives the in-use set from the firewall's live rule table on
//! every call, which keeps the firewall the single source of truth and
//! makes repeated calls with identical inputs return the identical address.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;

use crate::lb_errors::AllocatorError;

/// An inclusive range of addresses never eligible for allocation.
///
/// Parsed from configuration as `"start-end"`, e.g.
/// `"10.0.0.1-10.0.0.9"`. Both endpoints are excluded along with
/// everything between them. Overlapping ranges are tolerated and treated
/// as a union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRange {
    /// First excluded address (inclusive)
    pub start: IpAddr,
    /// Last excluded address (inclusive)
    pub end: IpAddr,
}

impl ExclusionRange {
    /// True if `addr` falls within this range, bounds included.
    #[must_use]
    pub fn contains(&self, addr: &IpAddr) -> bool {
        *addr >= self.start && *addr <= self.end
    }
}

impl FromStr for ExclusionRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("exclusion range '{s}' must be 'start-end'"))?;
        let start = IpAddr::from_str(start.trim())
            .map_err(|e| format!("bad range start '{start}': {e}"))?;
        let end =
            IpAddr::from_str(end.trim()).map_err(|e| format!("bad range end '{end}': {e}"))?;
        if end < start {
            return Err(format!("exclusion range '{s}' ends before it starts"));
        }
        Ok(Self { start, end })
    }
}

/// Pick the lowest free host address in `subnet`.
///
/// Host addresses are scanned in ascending numeric order, strictly after
/// the network address and (for IPv4) strictly before the broadcast
/// address. An address is skipped if it falls inside any exclusion range
/// or appears in `in_use`.
///
/// # Errors
///
/// - [`AllocatorError::InvalidAddress`] if any `in_use` entry fails to
///   parse — a malformed rule table must never cause a duplicate grant.
/// - [`AllocatorError::NoFreeAddress`] if the scan exhausts the subnet,
///   including subnets too small to contain any host address.
pub fn allocate_address(
    subnet: &IpNet,
    exclusions: &[ExclusionRange],
    in_use: &[String],
) -> Result<String, AllocatorError> {
    let mut used: HashSet<IpAddr> = HashSet::with_capacity(in_use.len());
    for entry in in_use {
        let addr = IpAddr::from_str(entry).map_err(|_| AllocatorError::InvalidAddress {
            address: entry.clone(),
        })?;
        used.insert(addr);
    }

    let free = host_addresses(subnet)
        .find(|addr| !used.contains(addr) && !exclusions.iter().any(|r| r.contains(addr)));

    free.map(|addr| addr.to_string())
        .ok_or_else(|| AllocatorError::NoFreeAddress {
            subnet: subnet.to_string(),
        })
}

/// Iterate the usable host addresses of a subnet in ascending order.
///
/// IPv4 excludes the network and broadcast addresses, so a /31 or /32
/// yields nothing. IPv6 has no broadcast; everything after the network
/// address is usable.
fn host_addresses(subnet: &IpNet) -> Box<dyn Iterator<Item = IpAddr>> {
    match subnet {
        IpNet::V4(net) => {
            let first = u32::from(net.network()).saturating_add(1);
            let last = u32::from(net.broadcast());
            Box::new((first..last).map(|raw| IpAddr::V4(Ipv4Addr::from(raw))))
        }
        IpNet::V6(net) => {
            let first = u128::from(net.network()).saturating_add(1);
            let last = u128::from(net.broadcast());
            Box::new((first..=last).map(|raw| IpAddr::V6(Ipv6Addr::from(raw))))
        }
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod allocator_tests;
