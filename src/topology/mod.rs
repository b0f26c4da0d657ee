//! # Cluster topology planning
//!
//! Derives a complete Docker Swarm layout from a `ClusterSpec`. The pieces,
//! leaves first:
//!
//! - **address**: (role, index) to private IPv4
//! - **roles**: role catalog, per-role firewall rule names and labels
//! - **firewall**: expands rule names into rules bound to the cluster ranges
//! - **planner**: composes the above into a `ClusterPlan`
//!
//! ```text
//!                 ┌──────────────┐
//!    admin ──22──▶│   bastion    │ 10.0.1.5
//!                 └──────┬───────┘
//!                        │ ssh (bastion/32 only)
//!      ┌─────────────────┼──────────────────┐
//!      ▼                 ▼                  ▼
//! ┌──────────┐     ┌──────────┐       ┌──────────┐
//! │ managers │◀───▶│   edge   │◀─────▶│ workers  │
//! │ .1.10+   │swarm│ .1.20+   │ swarm │ .2.15+   │
//! └──────────┘     └────▲─────┘       └──────────┘
//!                       │ 80/443
//!                    internet
//! ```
//!
//! Everything in this module is pure and synchronous.

pub mod address;
pub mod firewall;
pub mod planner;
pub mod roles;

pub use address::{AddressAllocator, ClusterNetwork, NetworkSummary};
pub use firewall::{Direction, FirewallRule, FirewallScopeResolver, Protocol};
pub use planner::{plan, validate_spec, ClusterPlan, JoinStep, NodeSpec, RoleFirewall};
pub use roles::{node_labels, required_rules, Role, RuleName, SwarmMembership};

use thiserror::Error;

/// Planning failures. All of them mean the cluster spec has to be fixed; none are
/// worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Invalid cluster spec: {0}")]
    InvalidSpec(String),

    #[error("Address range exhausted for {role}: index {index} exceeds the {capacity} addresses available in {subnet}")]
    RangeExhausted {
        role: Role,
        index: u32,
        capacity: u32,
        subnet: String,
    },

    #[error("Invalid CIDR for {field}: '{value}' ({reason})")]
    InvalidCidr {
        field: String,
        value: String,
        reason: String,
    },
}
