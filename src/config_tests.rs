// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for configuration parsing.

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use clap::Parser;

    fn required_args() -> Vec<&'static str> {
        vec![
            "pflb",
            "--pfsense-url",
            "https://firewall.example.net",
            "--pfsense-password",
            "secret",
            "--subnet",
            "150.150.150.0/24",
        ]
    }

    #[test]
    fn test_minimal_settings_use_defaults() {
        let settings = Settings::try_parse_from(required_args()).unwrap();

        assert_eq!(settings.pfsense_username, "admin");
        assert!(!settings.pfsense_insecure);
        assert!(!settings.dry_run);
        assert!(settings.exclusions.is_empty());
        assert_eq!(settings.load_balancer_class, "pflb.io/pfsense");
        assert_eq!(settings.finalizer, "loadbalancer.pflb.io/ip-cleanup");
        assert_eq!(
            settings.ports_hash_annotation,
            "loadbalancer.pflb.io/ports-hash"
        );
        assert_eq!(
            settings.telemetry_bind_address.to_string(),
            "0.0.0.0:8080"
        );
        assert_eq!(settings.subnet.to_string(), "150.150.150.0/24");
    }

    #[test]
    fn test_exclusion_list_parsing() {
        let mut args = required_args();
        args.extend([
            "--exclusions",
            "150.150.150.1-150.150.150.9,150.150.150.250-150.150.150.254",
        ]);

        let settings = Settings::try_parse_from(args).unwrap();

        assert_eq!(settings.exclusions.len(), 2);
        assert_eq!(settings.exclusions[0].start.to_string(), "150.150.150.1");
        assert_eq!(settings.exclusions[1].end.to_string(), "150.150.150.254");
    }

    #[test]
    fn test_bad_exclusion_is_rejected() {
        let mut args = required_args();
        args.extend(["--exclusions", "150.150.150.9"]);

        assert!(Settings::try_parse_from(args).is_err());
    }

    #[test]
    fn test_missing_subnet_is_rejected() {
        let args = vec![
            "pflb",
            "--pfsense-url",
            "https://firewall.example.net",
            "--pfsense-password",
            "secret",
        ];

        assert!(Settings::try_parse_from(args).is_err());
    }

    #[test]
    fn test_bad_subnet_is_rejected() {
        let mut args = required_args();
        args[6] = "150.150.150.0/33";

        assert!(Settings::try_parse_from(args).is_err());
    }

    #[test]
    fn test_reconciler_config_mirrors_settings() {
        let mut args = required_args();
        args.extend(["--load-balancer-class", "corp.example/lb"]);

        let settings = Settings::try_parse_from(args).unwrap();
        let cfg = settings.reconciler_config();

        assert_eq!(cfg.load_balancer_class, "corp.example/lb");
        assert_eq!(cfg.finalizer, settings.finalizer);
        assert_eq!(cfg.ports_hash_annotation, settings.ports_hash_annotation);
    }
}
