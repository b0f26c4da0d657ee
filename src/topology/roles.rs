//! Role catalog
//!
//! Every node belongs to exactly one role. The role decides which firewall
//! rules a node gets, whether it has a public address, and how it takes part
//! in the swarm. Only edge nodes receive the public web-traffic rule; the
//! match arms below are the single place that grants it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClusterSpec;

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Bastion,
    Manager,
    Edge,
    Worker,
}

/// How a node participates in the swarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmMembership {
    Manager,
    Worker,
}

/// Named firewall rule, expanded into concrete rules by the scope resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleName {
    /// SSH from operator networks to the bastion
    AdminSsh,
    /// SSH from the bastion to cluster nodes
    InternalSsh,
    /// Swarm management, gossip and overlay traffic between cluster subnets
    SwarmControl,
    /// Public HTTP/HTTPS
    WebTraffic,
}

impl Role {
    /// Planning order
    pub const ALL: [Role; 4] = [Role::Bastion, Role::Manager, Role::Edge, Role::Worker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Bastion => "bastion",
            Role::Manager => "manager",
            Role::Edge => "edge",
            Role::Worker => "worker",
        }
    }

    /// Number of nodes of this role requested by the spec
    pub fn count(&self, spec: &ClusterSpec) -> u32 {
        match self {
            Role::Bastion => 1,
            Role::Manager => spec.manager_count,
            Role::Edge => spec.edge_count,
            Role::Worker => spec.worker_count,
        }
    }

    pub fn has_public_ip(&self) -> bool {
        matches!(self, Role::Bastion | Role::Edge)
    }

    pub fn swarm_membership(&self) -> Option<SwarmMembership> {
        match self {
            Role::Bastion => None,
            Role::Manager => Some(SwarmMembership::Manager),
            Role::Edge | Role::Worker => Some(SwarmMembership::Worker),
        }
    }

    /// Node name for the given zero-based index
    pub fn node_name(&self, cluster: &str, index: u32) -> String {
        match self {
            Role::Bastion => format!("{}-bastion", cluster),
            role => format!("{}-{}-{}", cluster, role.as_str(), index + 1),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::AdminSsh => "admin-ssh",
            RuleName::InternalSsh => "internal-ssh",
            RuleName::SwarmControl => "swarm-control",
            RuleName::WebTraffic => "web-traffic",
        }
    }

    /// Whether the rule admits traffic from the public internet to cluster workloads
    pub fn is_public(&self) -> bool {
        matches!(self, RuleName::WebTraffic)
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firewall rules a role requires
pub fn required_rules(role: Role) -> &'static [RuleName] {
    match role {
        Role::Bastion => &[RuleName::AdminSsh],
        Role::Manager => &[RuleName::InternalSsh, RuleName::SwarmControl],
        Role::Edge => &[
            RuleName::InternalSsh,
            RuleName::SwarmControl,
            RuleName::WebTraffic,
        ],
        Role::Worker => &[RuleName::InternalSsh, RuleName::SwarmControl],
    }
}

/// Swarm node labels for a role. Empty for nodes outside the swarm.
pub fn node_labels(role: Role) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if role.swarm_membership().is_none() {
        return labels;
    }
    labels.insert("role".to_string(), role.as_str().to_string());
    if role == Role::Edge {
        labels.insert("ingress".to_string(), "true".to_string());
    }
    labels
}
