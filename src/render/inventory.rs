//! Configuration-management inventory
//!
//! Groups hosts by role and renders an INI inventory with one `[role]`
//! section per role. The bastion is the only host reached directly; every
//! other host, edge nodes included, is reached through it on its private
//! address, matching the internal-ssh firewall rule.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::config::PublicAddresses;
use crate::topology::{ClusterPlan, Role};

/// One inventory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHost {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<Ipv4Addr>,
    pub private_ip: Ipv4Addr,
}

impl InventoryHost {
    /// Address for a direct connection: public when known, else private
    pub fn ansible_host(&self) -> Ipv4Addr {
        self.public_ip.unwrap_or(self.private_ip)
    }
}

/// Role to hosts mapping for one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub cluster: String,
    pub environment: String,
    pub groups: BTreeMap<Role, Vec<InventoryHost>>,
}

impl Inventory {
    /// Build the inventory from a plan.
    ///
    /// Provider addresses are only used for nodes planned with a public
    /// address; anything else in `public` is ignored.
    pub fn from_plan(plan: &ClusterPlan, public: &PublicAddresses) -> Self {
        let mut groups: BTreeMap<Role, Vec<InventoryHost>> =
            Role::ALL.iter().map(|r| (*r, Vec::new())).collect();

        for node in &plan.nodes {
            let public_ip = if node.public_ip {
                public.get(&node.name).copied()
            } else {
                None
            };
            groups.entry(node.role).or_default().push(InventoryHost {
                name: node.name.clone(),
                public_ip,
                private_ip: node.private_ip,
            });
        }

        Self {
            cluster: plan.cluster.clone(),
            environment: plan.environment.to_string(),
            groups,
        }
    }

    pub fn hosts(&self, role: Role) -> &[InventoryHost] {
        self.groups.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Public address of the bastion, if the provider reported one
    pub fn bastion_public_ip(&self) -> Option<Ipv4Addr> {
        self.hosts(Role::Bastion).first().and_then(|h| h.public_ip)
    }

    /// Render as an INI inventory
    pub fn to_ini(&self, ssh_user: &str) -> String {
        let mut output = String::new();
        let jump = self
            .bastion_public_ip()
            .map(|ip| format!("{}@{}", ssh_user, ip));

        output.push_str(&format!(
            "# Generated by swarmplan for cluster '{}' ({})\n\n",
            self.cluster, self.environment
        ));
        output.push_str("[all:vars]\n");
        output.push_str(&format!("ansible_user={}\n", ssh_user));

        for (role, hosts) in &self.groups {
            output.push_str(&format!("\n[{}]\n", role));
            let direct = *role == Role::Bastion;
            for host in hosts {
                let address = if direct {
                    host.ansible_host()
                } else {
                    host.private_ip
                };
                output.push_str(&format!(
                    "{} ansible_host={} private_ip={}",
                    host.name, address, host.private_ip
                ));
                if direct {
                    output.push('\n');
                    continue;
                }
                if let Some(public_ip) = host.public_ip {
                    output.push_str(&format!(" public_ip={}", public_ip));
                }
                if let Some(ref jump) = jump {
                    output.push_str(&format!(
                        " ansible_ssh_common_args='-o ProxyJump={}'",
                        jump
                    ));
                }
                output.push('\n');
            }
        }

        output.push_str("\n[swarm:children]\n");
        for role in Role::ALL {
            if role.swarm_membership().is_some() {
                output.push_str(&format!("{}\n", role));
            }
        }

        output
    }
}
