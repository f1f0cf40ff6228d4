// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the firewall service.

#[cfg(test)]
mod tests {
    use crate::allocator::ExclusionRange;
    use crate::firewall::{FirewallService, LoadBalancerProvider, ServicePort};
    use crate::lb_errors::{FirewallError, LbError};
    use crate::pfsense::{FirewallClient, NatRule, NatSection};
    use async_trait::async_trait;
    use ipnet::IpNet;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory firewall: a NAT section behind a mutex, with persist
    /// counting and injectable persist rejection.
    #[derive(Default)]
    struct FakeFirewall {
        section: Mutex<NatSection>,
        persists: AtomicUsize,
        reject_persist: AtomicBool,
    }

    impl FakeFirewall {
        fn with_rules(rules: Vec<NatRule>) -> Self {
            Self {
                section: Mutex::new(NatSection {
                    rules,
                    ..NatSection::default()
                }),
                ..Self::default()
            }
        }

        fn rules(&self) -> Vec<NatRule> {
            self.section.lock().unwrap().rules.clone()
        }

        fn persist_count(&self) -> usize {
            self.persists.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FirewallClient for FakeFirewall {
        async fn fetch_nat_section(&self) -> Result<NatSection, FirewallError> {
            Ok(self.section.lock().unwrap().clone())
        }

        async fn persist_nat_section(&self, section: &NatSection) -> Result<(), FirewallError> {
            if self.reject_persist.load(Ordering::SeqCst) {
                return Err(FirewallError::PersistRejected {
                    section: "nat".to_string(),
                });
            }
            self.persists.fetch_add(1, Ordering::SeqCst);
            *self.section.lock().unwrap() = section.clone();
            Ok(())
        }

        async fn firmware_version(&self) -> Result<String, FirewallError> {
            Ok("test".to_string())
        }
    }

    fn rule_for(ip: &str) -> NatRule {
        NatRule {
            interface: "wan".to_string(),
            protocol: "tcp".to_string(),
            target: "10.2.0.15".to_string(),
            local_port: "80".to_string(),
            destination_address: ip.to_string(),
            destination_port: "30080".to_string(),
            descr: "k8s-lb/default/web/http".to_string(),
            ..NatRule::default()
        }
    }

    fn ports() -> Vec<ServicePort> {
        vec![
            ServicePort {
                name: "http".to_string(),
                protocol: "TCP".to_string(),
                app_protocol: Some("http".to_string()),
                node_port: 30080,
                target_port: 80,
            },
            ServicePort {
                name: "dns".to_string(),
                protocol: "UDP".to_string(),
                app_protocol: None,
                node_port: 30053,
                target_port: 53,
            },
        ]
    }

    fn service(firewall: &Arc<FakeFirewall>) -> FirewallService {
        service_with(firewall, &[], false)
    }

    fn service_with(
        firewall: &Arc<FakeFirewall>,
        exclusions: &[&str],
        dry_run: bool,
    ) -> FirewallService {
        FirewallService::new(
            firewall.clone() as Arc<dyn FirewallClient>,
            IpNet::from_str("150.150.150.0/24").unwrap(),
            exclusions
                .iter()
                .map(|e| ExclusionRange::from_str(e).unwrap())
                .collect(),
            dry_run,
        )
    }

    #[tokio::test]
    async fn test_allocate_installs_one_rule_per_port() {
        let firewall = Arc::new(FakeFirewall::default());
        let svc = service(&firewall);

        let ip = svc
            .allocate_ip("default", "web", "10.2.0.15", &ports())
            .await
            .unwrap();

        assert_eq!(ip, "150.150.150.1");
        let rules = firewall.rules();
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].interface, "wan");
        assert_eq!(rules[0].protocol, "tcp");
        assert_eq!(rules[0].target, "10.2.0.15");
        assert_eq!(rules[0].local_port, "80");
        assert_eq!(rules[0].destination_address, "150.150.150.1");
        assert_eq!(rules[0].destination_port, "30080");
        assert_eq!(rules[0].descr, "k8s-lb/default/web/http");

        assert_eq!(rules[1].protocol, "udp");
        assert_eq!(rules[1].destination_port, "30053");
        assert_eq!(rules[1].descr, "k8s-lb/default/web/dns");

        assert_eq!(firewall.persist_count(), 1);
    }

    #[tokio::test]
    async fn test_allocate_skips_claimed_and_excluded_addresses() {
        let firewall = Arc::new(FakeFirewall::with_rules(vec![rule_for("150.150.150.1")]));
        let svc = service_with(&firewall, &["150.150.150.2-150.150.150.4"], false);

        let ip = svc
            .allocate_ip("default", "api", "10.2.0.16", &ports())
            .await
            .unwrap();

        assert_eq!(ip, "150.150.150.5");
        // Pre-existing rules survive the write untouched.
        assert_eq!(firewall.rules()[0], rule_for("150.150.150.1"));
    }

    #[tokio::test]
    async fn test_allocate_exhausted_subnet_is_allocation_error() {
        let firewall = Arc::new(FakeFirewall::default());
        let svc = service_with(&firewall, &["150.150.150.1-150.150.150.254"], false);

        let err = svc
            .allocate_ip("default", "web", "10.2.0.15", &ports())
            .await
            .unwrap_err();

        assert!(matches!(err, LbError::Allocation(_)));
        assert_eq!(firewall.persist_count(), 0);
    }

    #[tokio::test]
    async fn test_allocate_persist_rejection_surfaces() {
        let firewall = Arc::new(FakeFirewall::default());
        firewall.reject_persist.store(true, Ordering::SeqCst);
        let svc = service(&firewall);

        let err = svc
            .allocate_ip("default", "web", "10.2.0.15", &ports())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LbError::Firewall(FirewallError::PersistRejected { .. })
        ));
        // The fake rejected the write, so the rule table is unchanged and
        // the address is not committed.
        assert!(firewall.rules().is_empty());
    }

    #[tokio::test]
    async fn test_release_removes_all_rules_for_address() {
        let firewall = Arc::new(FakeFirewall::with_rules(vec![
            rule_for("150.150.150.1"),
            NatRule {
                destination_port: "30053".to_string(),
                ..rule_for("150.150.150.1")
            },
            rule_for("150.150.150.2"),
        ]));
        let svc = service(&firewall);

        svc.release_ip("150.150.150.1").await.unwrap();

        let rules = firewall.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].destination_address, "150.150.150.2");
        assert_eq!(firewall.persist_count(), 1);
    }

    #[tokio::test]
    async fn test_release_without_matching_rules_is_idempotent() {
        let firewall = Arc::new(FakeFirewall::with_rules(vec![rule_for("150.150.150.2")]));
        let svc = service(&firewall);

        svc.release_ip("150.150.150.9").await.unwrap();

        // Success without touching the rule table.
        assert_eq!(firewall.persist_count(), 0);
        assert_eq!(firewall.rules().len(), 1);
    }

    #[tokio::test]
    async fn test_update_ports_replaces_in_place() {
        let firewall = Arc::new(FakeFirewall::with_rules(vec![
            rule_for("150.150.150.1"),
            rule_for("150.150.150.2"),
        ]));
        let svc = service(&firewall);

        let new_ports = vec![ServicePort {
            name: "https".to_string(),
            protocol: "TCP".to_string(),
            app_protocol: None,
            node_port: 30443,
            target_port: 443,
        }];
        svc.update_ports("150.150.150.1", &new_ports).await.unwrap();

        let rules = firewall.rules();
        assert_eq!(rules.len(), 2);

        let updated: Vec<&NatRule> = rules
            .iter()
            .filter(|r| r.destination_address == "150.150.150.1")
            .collect();
        assert_eq!(updated.len(), 1);
        // Target and namespace/name are carried over from the replaced rules.
        assert_eq!(updated[0].target, "10.2.0.15");
        assert_eq!(updated[0].destination_port, "30443");
        assert_eq!(updated[0].local_port, "443");
        assert_eq!(updated[0].descr, "k8s-lb/default/web/https");

        // The other address's rule is untouched.
        assert!(rules.iter().any(|r| r.destination_address == "150.150.150.2"));
    }

    #[tokio::test]
    async fn test_update_ports_with_no_rules_is_a_noop() {
        let firewall = Arc::new(FakeFirewall::default());
        let svc = service(&firewall);

        svc.update_ports("150.150.150.1", &ports()).await.unwrap();

        assert_eq!(firewall.persist_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_computes_but_never_persists() {
        let firewall = Arc::new(FakeFirewall::default());
        let svc = service_with(&firewall, &[], true);

        let ip = svc
            .allocate_ip("default", "web", "10.2.0.15", &ports())
            .await
            .unwrap();

        // The address is still derived from live state...
        assert_eq!(ip, "150.150.150.1");
        // ...but nothing reaches the firewall.
        assert_eq!(firewall.persist_count(), 0);
        assert!(firewall.rules().is_empty());

        svc.release_ip("150.150.150.1").await.unwrap();
        assert_eq!(firewall.persist_count(), 0);
    }

    #[test]
    fn test_rules_for_unnamed_port_use_port_number_label() {
        let ports = vec![ServicePort {
            name: String::new(),
            protocol: "TCP".to_string(),
            app_protocol: None,
            node_port: 31000,
            target_port: 9000,
        }];

        let rules =
            FirewallService::rules_for_service("150.150.150.7", "10.2.0.20", "prod", "db", &ports);

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].descr, "k8s-lb/prod/db/31000");
    }
}
