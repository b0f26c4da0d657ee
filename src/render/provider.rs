//! Cloud provider resource document
//!
//! Mirrors the provider's network, server and firewall schemas so a
//! provisioning tool can create one resource per record.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::topology::{ClusterPlan, Direction, FirewallRule, Protocol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubnet {
    #[serde(rename = "type")]
    pub subnet_type: String,
    pub network_zone: String,
    pub ip_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderNetwork {
    pub name: String,
    pub ip_range: String,
    pub subnets: Vec<ProviderSubnet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicNet {
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderServer {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: String,
    pub labels: BTreeMap<String, String>,
    pub firewalls: Vec<String>,
    pub private_ip: Ipv4Addr,
    pub public_net: PublicNet,
}

/// Firewall rule in provider form: ports are strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFirewallRule {
    pub direction: Direction,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ips: Vec<String>,
    pub description: String,
}

impl From<&FirewallRule> for ProviderFirewallRule {
    fn from(rule: &FirewallRule) -> Self {
        Self {
            direction: rule.direction,
            protocol: rule.protocol,
            port: rule.port.map(|p| p.to_string()),
            source_ips: rule.source_ips.clone(),
            destination_ips: rule.destination_ips.clone(),
            description: rule.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFirewall {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub rules: Vec<ProviderFirewallRule>,
    pub apply_to: Vec<String>,
}

/// All provider resources for one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDocument {
    pub network: ProviderNetwork,
    pub servers: Vec<ProviderServer>,
    pub firewalls: Vec<ProviderFirewall>,
}

fn resource_labels(plan: &ClusterPlan, role: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("cluster".to_string(), plan.cluster.clone());
    labels.insert("environment".to_string(), plan.environment.to_string());
    labels.insert("role".to_string(), role.to_string());
    labels
}

impl ProviderDocument {
    pub fn from_plan(plan: &ClusterPlan) -> Self {
        let subnet = |range: &str| ProviderSubnet {
            subnet_type: "cloud".to_string(),
            network_zone: plan.network.zone.clone(),
            ip_range: range.to_string(),
        };

        let network = ProviderNetwork {
            name: format!("{}-network", plan.cluster),
            ip_range: plan.network.cidr.clone(),
            subnets: vec![
                subnet(&plan.network.management_subnet),
                subnet(&plan.network.application_subnet),
            ],
        };

        let servers = plan
            .nodes
            .iter()
            .map(|node| ProviderServer {
                name: node.name.clone(),
                server_type: node.server_type.clone(),
                image: plan.image.clone(),
                location: plan.location.clone(),
                labels: resource_labels(plan, node.role.as_str()),
                firewalls: plan
                    .firewalls
                    .iter()
                    .filter(|f| f.applies_to.contains(&node.name))
                    .map(|f| f.name.clone())
                    .collect(),
                private_ip: node.private_ip,
                public_net: PublicNet {
                    ipv4_enabled: node.public_ip,
                    ipv6_enabled: node.public_ip,
                },
            })
            .collect();

        let firewalls = plan
            .firewalls
            .iter()
            .map(|f| ProviderFirewall {
                name: f.name.clone(),
                labels: resource_labels(plan, f.role.as_str()),
                rules: f.rules.iter().map(ProviderFirewallRule::from).collect(),
                apply_to: f.applies_to.clone(),
            })
            .collect();

        Self {
            network,
            servers,
            firewalls,
        }
    }
}
