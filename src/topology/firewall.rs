//! Firewall scope resolution
//!
//! Expands rule names from the role catalog into concrete rules bound to the
//! cluster's own address ranges. The records map 1:1 onto provider firewall
//! rules (direction, protocol, port, source list, description).

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::address::{cidr_string, ip_cidr_string, parse_ip_cidr, ClusterNetwork};
use super::roles::{required_rules, Role, RuleName};
use super::PlanError;

/// Any IPv4 source
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Any IPv6 source
pub const ANY_IPV6: &str = "::/0";

pub const SSH_PORT: u16 = 22;
pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;
pub const SWARM_MANAGEMENT_PORT: u16 = 2377;
pub const SWARM_GOSSIP_PORT: u16 = 7946;
pub const SWARM_OVERLAY_PORT: u16 = 4789;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// A concrete firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Rule name this record was expanded from
    pub rule: RuleName,
    pub direction: Direction,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ips: Vec<String>,
    pub description: String,
}

impl FirewallRule {
    fn inbound(
        rule: RuleName,
        protocol: Protocol,
        port: u16,
        source_ips: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            direction: Direction::In,
            protocol,
            port: Some(port),
            source_ips,
            destination_ips: Vec::new(),
            description: description.into(),
        }
    }
}

/// Expands rule names into rules scoped to the cluster's ranges
#[derive(Debug, Clone)]
pub struct FirewallScopeResolver {
    admin_sources: Vec<String>,
    bastion_source: String,
    cluster_sources: Vec<String>,
}

impl FirewallScopeResolver {
    /// Build a resolver for a parsed network.
    ///
    /// Fails with `InvalidCidr` if an admin source is malformed.
    pub fn new(
        network: &ClusterNetwork,
        admin_cidrs: &[String],
        bastion_ip: Ipv4Addr,
    ) -> Result<Self, PlanError> {
        let admin_sources = admin_cidrs
            .iter()
            .enumerate()
            .map(|(i, value)| {
                parse_ip_cidr(&format!("admin_cidrs[{}]", i), value).map(|c| ip_cidr_string(&c))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            admin_sources,
            // host route only, never a subnet
            bastion_source: format!("{}/32", bastion_ip),
            cluster_sources: vec![
                cidr_string(&network.management),
                cidr_string(&network.application),
            ],
        })
    }

    /// Concrete rules for one rule name
    pub fn expand(&self, rule: RuleName) -> Vec<FirewallRule> {
        match rule {
            RuleName::AdminSsh => vec![FirewallRule::inbound(
                rule,
                Protocol::Tcp,
                SSH_PORT,
                self.admin_sources.clone(),
                "SSH from administrator networks",
            )],
            RuleName::InternalSsh => vec![FirewallRule::inbound(
                rule,
                Protocol::Tcp,
                SSH_PORT,
                vec![self.bastion_source.clone()],
                "SSH from bastion",
            )],
            RuleName::SwarmControl => vec![
                FirewallRule::inbound(
                    rule,
                    Protocol::Tcp,
                    SWARM_MANAGEMENT_PORT,
                    self.cluster_sources.clone(),
                    "Swarm cluster management",
                ),
                FirewallRule::inbound(
                    rule,
                    Protocol::Tcp,
                    SWARM_GOSSIP_PORT,
                    self.cluster_sources.clone(),
                    "Swarm node communication (tcp)",
                ),
                FirewallRule::inbound(
                    rule,
                    Protocol::Udp,
                    SWARM_GOSSIP_PORT,
                    self.cluster_sources.clone(),
                    "Swarm node communication (udp)",
                ),
                FirewallRule::inbound(
                    rule,
                    Protocol::Udp,
                    SWARM_OVERLAY_PORT,
                    self.cluster_sources.clone(),
                    "Swarm overlay network",
                ),
            ],
            RuleName::WebTraffic => {
                let anywhere = vec![ANY_IPV4.to_string(), ANY_IPV6.to_string()];
                vec![
                    FirewallRule::inbound(rule, Protocol::Tcp, HTTP_PORT, anywhere.clone(), "HTTP"),
                    FirewallRule::inbound(rule, Protocol::Tcp, HTTPS_PORT, anywhere, "HTTPS"),
                ]
            }
        }
    }

    /// Concrete rules for every rule a role requires, in catalog order
    pub fn resolve_role(&self, role: Role) -> Vec<FirewallRule> {
        required_rules(role)
            .iter()
            .flat_map(|rule| self.expand(*rule))
            .collect()
    }
}
