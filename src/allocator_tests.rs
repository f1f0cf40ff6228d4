// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the address allocator.

#[cfg(test)]
mod tests {
    use crate::allocator::{allocate_address, ExclusionRange};
    use crate::lb_errors::AllocatorError;
    use ipnet::IpNet;
    use std::str::FromStr;

    fn subnet(s: &str) -> IpNet {
        IpNet::from_str(s).unwrap()
    }

    fn range(s: &str) -> ExclusionRange {
        ExclusionRange::from_str(s).unwrap()
    }

    fn used(addrs: &[&str]) -> Vec<String> {
        addrs.iter().map(|a| (*a).to_string()).collect()
    }

    #[test]
    fn test_allocates_lowest_host_address() {
        let ip = allocate_address(&subnet("10.1.0.0/24"), &[], &[]).unwrap();
        assert_eq!(ip, "10.1.0.1");
    }

    #[test]
    fn test_skips_in_use_addresses() {
        let ip = allocate_address(
            &subnet("10.1.0.0/24"),
            &[],
            &used(&["10.1.0.1", "10.1.0.2"]),
        )
        .unwrap();
        assert_eq!(ip, "10.1.0.3");
    }

    #[test]
    fn test_exclusion_bounds_are_inclusive() {
        // Exact example pinned by the specification of the allocator:
        // exclusion covers .2 through .4 inclusive, .1 is taken, so the
        // first grant is .5.
        let ip = allocate_address(
            &subnet("150.150.150.0/24"),
            &[range("150.150.150.2-150.150.150.4")],
            &used(&["150.150.150.1"]),
        )
        .unwrap();
        assert_eq!(ip, "150.150.150.5");
    }

    #[test]
    fn test_address_just_outside_exclusion_is_eligible() {
        let ip = allocate_address(
            &subnet("10.1.0.0/24"),
            &[range("10.1.0.1-10.1.0.9")],
            &[],
        )
        .unwrap();
        assert_eq!(ip, "10.1.0.10");
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let net = subnet("10.1.0.0/24");
        let exclusions = vec![range("10.1.0.1-10.1.0.3")];
        let in_use = used(&["10.1.0.4"]);

        let first = allocate_address(&net, &exclusions, &in_use).unwrap();
        let second = allocate_address(&net, &exclusions, &in_use).unwrap();

        assert_eq!(first, "10.1.0.5");
        assert_eq!(first, second);
    }

    #[test]
    fn test_exhausted_subnet_fails() {
        // /30 has exactly two host addresses, both taken.
        let err = allocate_address(
            &subnet("10.1.0.0/30"),
            &[],
            &used(&["10.1.0.1", "10.1.0.2"]),
        )
        .unwrap_err();
        assert!(matches!(err, AllocatorError::NoFreeAddress { .. }));
    }

    #[test]
    fn test_subnet_fully_excluded_fails() {
        let err = allocate_address(
            &subnet("10.1.0.0/29"),
            &[range("10.1.0.0-10.1.0.7")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, AllocatorError::NoFreeAddress { .. }));
    }

    #[test]
    fn test_subnet_without_host_addresses_fails() {
        // A /31 holds only the network and broadcast addresses.
        let err = allocate_address(&subnet("10.1.0.0/31"), &[], &[]).unwrap_err();
        assert!(matches!(err, AllocatorError::NoFreeAddress { .. }));
    }

    #[test]
    fn test_overlapping_exclusions_are_a_union() {
        let ip = allocate_address(
            &subnet("10.1.0.0/24"),
            &[range("10.1.0.1-10.1.0.5"), range("10.1.0.4-10.1.0.8")],
            &[],
        )
        .unwrap();
        assert_eq!(ip, "10.1.0.9");
    }

    #[test]
    fn test_unparsable_in_use_entry_is_fatal() {
        let err =
            allocate_address(&subnet("10.1.0.0/24"), &[], &used(&["garbage"])).unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::InvalidAddress { ref address } if address == "garbage"
        ));
    }

    #[test]
    fn test_network_and_broadcast_never_allocated() {
        // Everything except the network and broadcast address is in use.
        let in_use: Vec<String> = (1..=254).map(|i| format!("10.1.0.{i}")).collect();
        let err = allocate_address(&subnet("10.1.0.0/24"), &[], &in_use).unwrap_err();
        assert!(matches!(err, AllocatorError::NoFreeAddress { .. }));
    }

    #[test]
    fn test_ipv6_allocation() {
        let ip = allocate_address(&subnet("fd00::/120"), &[], &used(&["fd00::1"])).unwrap();
        assert_eq!(ip, "fd00::2");
    }

    #[test]
    fn test_exclusion_range_parse() {
        let r = range("10.0.0.1-10.0.0.9");
        assert_eq!(r.start.to_string(), "10.0.0.1");
        assert_eq!(r.end.to_string(), "10.0.0.9");

        assert!(ExclusionRange::from_str("10.0.0.1").is_err());
        assert!(ExclusionRange::from_str("10.0.0.9-10.0.0.1").is_err());
        assert!(ExclusionRange::from_str("x-y").is_err());
    }
}
