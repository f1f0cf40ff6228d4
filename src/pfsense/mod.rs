// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! pfSense firewall client.
//!
//! This module provides the typed view of the firewall's NAT
//! configuration section and the [`FirewallClient`] capability used by the
//! firewall service:
//!
//! - [`NatRule`] / [`NatSection`] - the port-forward entries of the `nat`
//!   config section, with unrecognized members preserved verbatim so a
//!   fetch-modify-write cycle never destroys admin-managed configuration
//! - [`FirewallClient`] - fetch/persist/liveness boundary, implemented by
//!   [`PfsenseClient`] over XML-RPC and mocked in tests
//!
//! The firewall is the single source of truth: every operation fetches the
//! section fresh, and persisting rewrites the whole section. pfSense offers
//! no optimistic-concurrency token on `restore_config_section`, so two
//! controllers writing concurrently would race; the operator runs as a
//! single replica.

pub mod xmlrpc;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::constants::{FIREWALL_RPC_PATH, FIREWALL_TIMEOUT_SECS, NAT_SECTION};
use crate::lb_errors::FirewallError;
use xmlrpc::Value;

/// A single port-forward rule in the firewall's NAT section.
///
/// Only the fields this controller reads or writes are typed; anything
/// else the firewall stores on a rule rides along in `extra` and is
/// written back untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NatRule {
    /// Firewall interface the rule is attached to (e.g. `wan`)
    pub interface: String,
    /// Lowercase protocol (`tcp` / `udp`)
    pub protocol: String,
    /// Internal target address traffic is forwarded to
    pub target: String,
    /// Port on the target address
    pub local_port: String,
    /// External address the rule matches
    pub destination_address: String,
    /// External port the rule matches
    pub destination_port: String,
    /// Human-readable description embedding namespace/name/port
    pub descr: String,
    /// Unrecognized rule members, preserved across fetch-modify-write
    pub extra: BTreeMap<String, Value>,
}

impl NatRule {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let (destination_address, destination_port) = match value.get("destination") {
            Some(dest) => (
                dest.get("address")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                dest.get("port")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            None => (String::new(), String::new()),
        };

        let known = [
            "interface",
            "protocol",
            "target",
            "local-port",
            "destination",
            "descr",
        ];
        let extra = match value {
            Value::Struct(members) => members
                .iter()
                .filter(|(k, _)| !known.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => BTreeMap::new(),
        };

        Self {
            interface: text("interface"),
            protocol: text("protocol"),
            target: text("target"),
            local_port: text("local-port"),
            destination_address,
            destination_port,
            descr: text("descr"),
            extra,
        }
    }

    fn to_value(&self) -> Value {
        let mut members = self.extra.clone();
        members.insert("interface".to_string(), Value::Str(self.interface.clone()));
        members.insert("protocol".to_string(), Value::Str(self.protocol.clone()));
        members.insert("target".to_string(), Value::Str(self.target.clone()));
        members.insert(
            "local-port".to_string(),
            Value::Str(self.local_port.clone()),
        );
        members.insert("descr".to_string(), Value::Str(self.descr.clone()));

        let mut destination = BTreeMap::new();
        destination.insert(
            "address".to_string(),
            Value::Str(self.destination_address.clone()),
        );
        destination.insert(
            "port".to_string(),
            Value::Str(self.destination_port.clone()),
        );
        members.insert("destination".to_string(), Value::Struct(destination));

        Value::Struct(members)
    }
}

/// Snapshot of the firewall's NAT configuration section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NatSection {
    /// Port-forward rules, in firewall order
    pub rules: Vec<NatRule>,
    /// Non-`rule` members of the section (e.g. outbound NAT settings),
    /// preserved across fetch-modify-write
    pub extra: BTreeMap<String, Value>,
}

impl NatSection {
    /// Build the typed section from the `nat` member of a
    /// `backup_config_section` response. A missing member or rule list is
    /// an empty section, not an error - a fresh firewall has neither.
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };

        let rules = value
            .get("rule")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(NatRule::from_value).collect())
            .unwrap_or_default();

        let extra = match value {
            Value::Struct(members) => members
                .iter()
                .filter(|(k, _)| k.as_str() != "rule")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => BTreeMap::new(),
        };

        Self { rules, extra }
    }

    /// Encode the section for `restore_config_section`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut members = self.extra.clone();
        members.insert(
            "rule".to_string(),
            Value::Array(self.rules.iter().map(NatRule::to_value).collect()),
        );
        Value::Struct(members)
    }

    /// Addresses currently claimed by port-forward rules.
    #[must_use]
    pub fn claimed_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .rules
            .iter()
            .map(|r| r.destination_address.clone())
            .filter(|a| !a.is_empty())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }
}

/// RPC capability against the firewall.
///
/// The firewall service depends on this trait rather than the concrete
/// XML-RPC client so the synchronizer's behavior is testable without a
/// firewall, and so a future firewall backend only has to supply these
/// three calls.
#[async_trait]
pub trait FirewallClient: Send + Sync {
    /// Fetch the current NAT section.
    async fn fetch_nat_section(&self) -> Result<NatSection, FirewallError>;

    /// Persist a full NAT section, replacing the firewall's copy.
    ///
    /// A structured non-success result from the firewall surfaces as
    /// [`FirewallError::PersistRejected`], distinct from transport
    /// failures, so callers can run release-on-failure compensation.
    async fn persist_nat_section(&self, section: &NatSection) -> Result<(), FirewallError>;

    /// Liveness probe; returns the firewall's firmware version.
    async fn firmware_version(&self) -> Result<String, FirewallError>;
}

/// XML-RPC client for a pfSense firewall.
///
/// Authenticates with HTTP basic credentials against `<base>/xmlrpc.php`.
/// Self-signed firewall certificates are common in the field, so
/// certificate verification can be disabled explicitly; doing so is
/// security-sensitive and logged at construction.
pub struct PfsenseClient {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    password: String,
}

impl PfsenseClient {
    /// Build a client for the firewall at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed or the
    /// URL cannot be extended with the RPC path.
    pub fn new(
        base_url: &Url,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Self, FirewallError> {
        if insecure {
            tracing::warn!(
                url = %base_url,
                "TLS certificate verification disabled for pfsense endpoint"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FIREWALL_TIMEOUT_SECS))
            .danger_accept_invalid_certs(insecure)
            .build()?;

        let endpoint = base_url.join(FIREWALL_RPC_PATH).map_err(|e| {
            FirewallError::Protocol {
                reason: format!("bad pfsense url: {e}"),
            }
        })?;

        Ok(Self {
            http,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, FirewallError> {
        debug!(method, "calling pfsense");

        let body = xmlrpc::encode_request(method, params);
        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FirewallError::Http {
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        xmlrpc::parse_response(&text)
    }
}

#[async_trait]
impl FirewallClient for PfsenseClient {
    async fn fetch_nat_section(&self) -> Result<NatSection, FirewallError> {
        let sections = self
            .call(
                "pfsense.backup_config_section",
                &[Value::Array(vec![Value::Str(NAT_SECTION.to_string())])],
            )
            .await?;

        Ok(NatSection::from_value(sections.get(NAT_SECTION)))
    }

    async fn persist_nat_section(&self, section: &NatSection) -> Result<(), FirewallError> {
        let mut sections = BTreeMap::new();
        sections.insert(NAT_SECTION.to_string(), section.to_value());

        let result = self
            .call(
                "pfsense.restore_config_section",
                &[Value::Struct(sections)],
            )
            .await?;

        if result.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(FirewallError::PersistRejected {
                section: NAT_SECTION.to_string(),
            })
        }
    }

    async fn firmware_version(&self) -> Result<String, FirewallError> {
        let info = self.call("pfsense.host_firmware_version", &[]).await?;

        let version = info
            .get("firmware")
            .and_then(|fw| fw.get("version"))
            .and_then(Value::as_str)
            .or_else(|| info.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(version)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
