//! Topology planner
//!
//! `plan` turns a `ClusterSpec` into a complete `ClusterPlan` in a single
//! pass: nodes, addresses, firewall sets, labels and the swarm join order.
//! Output ordering is fixed (role order, then index) and all maps are
//! ordered, so the same spec always serializes to the same bytes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::address::{AddressAllocator, ClusterNetwork, NetworkSummary};
use super::firewall::{FirewallRule, FirewallScopeResolver};
use super::roles::{node_labels, required_rules, Role, RuleName, SwarmMembership};
use super::PlanError;
use crate::config::{ClusterSpec, Environment};

/// One provisioned node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: Role,
    /// Zero-based index within the role
    pub index: u32,
    pub private_ip: Ipv4Addr,
    /// Whether the node gets a public address
    pub public_ip: bool,
    pub firewall_rules: BTreeSet<RuleName>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub server_type: String,
}

/// Provider firewall for all nodes of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFirewall {
    pub name: String,
    pub role: Role,
    pub rules: Vec<FirewallRule>,
    pub applies_to: Vec<String>,
}

/// A single step of bringing the swarm up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum JoinStep {
    /// Initialize the swarm on the primary manager
    InitPrimaryManager { node: String, advertise_addr: Ipv4Addr },
    /// Join a secondary manager against the primary
    JoinManager {
        node: String,
        advertise_addr: Ipv4Addr,
        primary_addr: Ipv4Addr,
    },
    /// Join an edge or worker node against the primary
    JoinWorker {
        node: String,
        advertise_addr: Ipv4Addr,
        primary_addr: Ipv4Addr,
    },
    /// Apply node labels (run on the primary)
    LabelNode {
        node: String,
        labels: BTreeMap<String, String>,
    },
}

impl JoinStep {
    /// Node the step is about
    pub fn node(&self) -> &str {
        match self {
            JoinStep::InitPrimaryManager { node, .. }
            | JoinStep::JoinManager { node, .. }
            | JoinStep::JoinWorker { node, .. }
            | JoinStep::LabelNode { node, .. } => node,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JoinStep::InitPrimaryManager { .. } => "init-primary-manager",
            JoinStep::JoinManager { .. } => "join-manager",
            JoinStep::JoinWorker { .. } => "join-worker",
            JoinStep::LabelNode { .. } => "label-node",
        }
    }
}

impl std::fmt::Display for JoinStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.node())
    }
}

/// Fully derived cluster layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlan {
    pub cluster: String,
    pub environment: Environment,
    pub location: String,
    pub image: String,
    pub network: NetworkSummary,
    pub nodes: Vec<NodeSpec>,
    pub firewalls: Vec<RoleFirewall>,
    /// Name of manager 0, which initializes the swarm
    pub primary_manager: String,
    /// Manager failures the swarm survives, floor(managers / 2)
    pub quorum_tolerance: u32,
    pub join_order: Vec<JoinStep>,
}

impl ClusterPlan {
    pub fn nodes_with_role(&self, role: Role) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn count(&self, role: Role) -> usize {
        self.nodes_with_role(role).count()
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn primary(&self) -> Option<&NodeSpec> {
        self.node(&self.primary_manager)
    }

    pub fn bastion(&self) -> Option<&NodeSpec> {
        self.nodes_with_role(Role::Bastion).next()
    }

    /// SHA-256 of the canonical JSON form, hex encoded
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

fn cluster_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{0,30}$").expect("valid regex"))
}

/// Check the counts and name; address checks happen during planning
pub fn validate_spec(spec: &ClusterSpec) -> Result<(), PlanError> {
    if !cluster_name_regex().is_match(&spec.name) {
        return Err(PlanError::InvalidSpec(format!(
            "cluster name '{}' must be lowercase alphanumeric with dashes, starting with a letter, at most 31 characters",
            spec.name
        )));
    }

    if spec.manager_count % 2 == 0 {
        return Err(PlanError::InvalidSpec(format!(
            "manager_count must be odd for quorum, got {}",
            spec.manager_count
        )));
    }

    if spec.edge_count == 0 {
        return Err(PlanError::InvalidSpec(
            "edge_count must be at least 1".to_string(),
        ));
    }

    if spec.admin_cidrs.is_empty() {
        return Err(PlanError::InvalidSpec(
            "admin_cidrs must list at least one source".to_string(),
        ));
    }

    let offsets = spec.address_offsets;
    for (role, offset) in [
        (Role::Bastion, offsets.bastion),
        (Role::Manager, offsets.manager),
        (Role::Edge, offsets.edge),
        (Role::Worker, offsets.worker),
    ] {
        if offset == 0 {
            return Err(PlanError::InvalidSpec(format!(
                "address offset for {} must be at least 1",
                role
            )));
        }
    }

    Ok(())
}

fn server_type(spec: &ClusterSpec, role: Role) -> &str {
    match role {
        Role::Bastion => &spec.server_types.bastion,
        Role::Manager => &spec.server_types.manager,
        Role::Edge => &spec.server_types.edge,
        Role::Worker => &spec.server_types.worker,
    }
}

/// Derive the full cluster plan from a spec.
///
/// Pure: no I/O, no hidden state. Fails before producing anything if the spec
/// is inconsistent.
pub fn plan(spec: &ClusterSpec) -> Result<ClusterPlan, PlanError> {
    validate_spec(spec)?;

    let network = ClusterNetwork::parse(&spec.network)?;
    let allocator = AddressAllocator::new(network, spec.address_offsets);
    for role in Role::ALL {
        if role.count(spec) > 0 {
            allocator.check_fits(role)?;
        }
    }
    let bastion_ip = allocator.allocate(Role::Bastion, 0)?;
    let resolver = FirewallScopeResolver::new(&network, &spec.admin_cidrs, bastion_ip)?;

    let mut nodes = Vec::new();
    for role in Role::ALL {
        for index in 0..role.count(spec) {
            nodes.push(NodeSpec {
                name: role.node_name(&spec.name, index),
                role,
                index,
                private_ip: allocator.allocate(role, index)?,
                public_ip: role.has_public_ip(),
                firewall_rules: required_rules(role).iter().copied().collect(),
                labels: node_labels(role),
                server_type: server_type(spec, role).to_string(),
            });
        }
    }

    let mut seen: HashMap<Ipv4Addr, &str> = HashMap::new();
    for node in &nodes {
        if let Some(other) = seen.insert(node.private_ip, &node.name) {
            return Err(PlanError::InvalidSpec(format!(
                "{} and {} both resolve to {}; adjust address_offsets or role counts",
                other, node.name, node.private_ip
            )));
        }
    }

    let firewalls = Role::ALL
        .iter()
        .filter_map(|role| {
            let members: Vec<String> = nodes
                .iter()
                .filter(|n| n.role == *role)
                .map(|n| n.name.clone())
                .collect();
            if members.is_empty() {
                return None;
            }
            Some(RoleFirewall {
                name: format!("{}-{}", spec.name, role),
                role: *role,
                rules: resolver.resolve_role(*role),
                applies_to: members,
            })
        })
        .collect();

    let primary = nodes
        .iter()
        .find(|n| n.role == Role::Manager && n.index == 0)
        .ok_or_else(|| PlanError::InvalidSpec("no manager to act as primary".to_string()))?;
    let primary_manager = primary.name.clone();
    let join_order = join_order(&nodes, primary);

    let plan = ClusterPlan {
        cluster: spec.name.clone(),
        environment: spec.environment,
        location: spec.location.clone(),
        image: spec.image.clone(),
        network: network.summary(&spec.network.zone),
        primary_manager,
        quorum_tolerance: spec.manager_count / 2,
        join_order,
        firewalls,
        nodes,
    };

    debug!(
        "Planned cluster '{}': {} nodes, {} join steps, quorum tolerance {}",
        plan.cluster,
        plan.nodes.len(),
        plan.join_order.len(),
        plan.quorum_tolerance
    );

    Ok(plan)
}

/// Init on the primary, secondary managers, then edge and workers, then labels
fn join_order(nodes: &[NodeSpec], primary: &NodeSpec) -> Vec<JoinStep> {
    let mut steps = vec![JoinStep::InitPrimaryManager {
        node: primary.name.clone(),
        advertise_addr: primary.private_ip,
    }];

    // nodes is already in role order, so edge joins precede worker joins
    for node in nodes.iter().filter(|n| n.name != primary.name) {
        match node.role.swarm_membership() {
            Some(SwarmMembership::Manager) => steps.push(JoinStep::JoinManager {
                node: node.name.clone(),
                advertise_addr: node.private_ip,
                primary_addr: primary.private_ip,
            }),
            Some(SwarmMembership::Worker) => steps.push(JoinStep::JoinWorker {
                node: node.name.clone(),
                advertise_addr: node.private_ip,
                primary_addr: primary.private_ip,
            }),
            None => {}
        }
    }

    for node in nodes.iter().filter(|n| !n.labels.is_empty()) {
        steps.push(JoinStep::LabelNode {
            node: node.name.clone(),
            labels: node.labels.clone(),
        });
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_a_addresses() {
        let plan = plan(&ClusterSpec::new(3, 2, 5)).unwrap();

        let managers: Vec<_> = plan.nodes_with_role(Role::Manager).map(|n| n.private_ip).collect();
        assert_eq!(
            managers,
            vec![
                Ipv4Addr::new(10, 0, 1, 10),
                Ipv4Addr::new(10, 0, 1, 11),
                Ipv4Addr::new(10, 0, 1, 12)
            ]
        );
        let edges: Vec<_> = plan.nodes_with_role(Role::Edge).map(|n| n.private_ip).collect();
        assert_eq!(edges, vec![Ipv4Addr::new(10, 0, 1, 20), Ipv4Addr::new(10, 0, 1, 21)]);
        let workers: Vec<_> = plan.nodes_with_role(Role::Worker).map(|n| n.private_ip).collect();
        assert_eq!(workers.first(), Some(&Ipv4Addr::new(10, 0, 2, 15)));
        assert_eq!(workers.last(), Some(&Ipv4Addr::new(10, 0, 2, 19)));

        assert_eq!(plan.primary().unwrap().private_ip, Ipv4Addr::new(10, 0, 1, 10));
        assert_eq!(plan.quorum_tolerance, 1);
    }

    #[test]
    fn test_scenario_b_minimum_cluster() {
        let plan = plan(&ClusterSpec::new(1, 1, 1)).unwrap();
        assert_eq!(plan.quorum_tolerance, 0);
        assert_eq!(plan.nodes.len(), 4);
        assert_eq!(plan.primary_manager, "swarm-manager-1");
    }

    #[test]
    fn test_scenario_c_even_managers() {
        let err = plan(&ClusterSpec::new(2, 1, 1)).unwrap_err();
        assert!(matches!(err, PlanError::InvalidSpec(_)));
    }

    #[test]
    fn test_zero_managers_rejected() {
        assert!(matches!(
            plan(&ClusterSpec::new(0, 1, 1)),
            Err(PlanError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_zero_edges_rejected() {
        assert!(matches!(
            plan(&ClusterSpec::new(1, 0, 1)),
            Err(PlanError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_zero_workers_allowed() {
        let plan = plan(&ClusterSpec::new(3, 1, 0)).unwrap();
        assert_eq!(plan.count(Role::Worker), 0);
        assert!(plan.firewalls.iter().all(|f| f.role != Role::Worker));
    }

    #[test]
    fn test_invalid_name() {
        let spec = ClusterSpec::new(1, 1, 1).with_name("Prod_Cluster");
        assert!(matches!(plan(&spec), Err(PlanError::InvalidSpec(_))));
    }

    #[test]
    fn test_worker_range_exhausted() {
        // 255 - 15 = 240 workers fit in a /24
        assert!(plan(&ClusterSpec::new(1, 1, 240)).is_ok());
        assert!(matches!(
            plan(&ClusterSpec::new(1, 1, 241)),
            Err(PlanError::RangeExhausted { role: Role::Worker, .. })
        ));
    }

    #[test]
    fn test_bare_subnet_address_is_invalid_cidr() {
        let spec = ClusterSpec::new(1, 1, 1).with_network(crate::config::NetworkSpec {
            management_subnet: "10.0.1.0".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            plan(&spec),
            Err(PlanError::InvalidCidr { ref field, .. }) if field == "network.management_subnet"
        ));
    }

    #[test]
    fn test_subnet_too_small_for_offsets() {
        let spec = ClusterSpec::new(1, 1, 1).with_network(crate::config::NetworkSpec {
            application_subnet: "10.0.2.0/28".to_string(),
            ..Default::default()
        });
        // .1 to .14 usable, worker offset is 15
        assert!(matches!(plan(&spec), Err(PlanError::InvalidSpec(msg)) if msg.contains("10.0.2.0/28")));

        // no workers requested, so the small subnet is fine
        let spec = ClusterSpec::new(1, 1, 0).with_network(crate::config::NetworkSpec {
            application_subnet: "10.0.2.0/28".to_string(),
            ..Default::default()
        });
        assert!(plan(&spec).is_ok());
    }

    #[test]
    fn test_manager_edge_collision() {
        // managers 10..=20 run into the first edge address
        let err = plan(&ClusterSpec::new(11, 1, 0)).unwrap_err();
        assert!(matches!(err, PlanError::InvalidSpec(msg) if msg.contains("10.0.1.20")));
    }

    #[test]
    fn test_firewall_sets_by_role() {
        let plan = plan(&ClusterSpec::new(3, 2, 2)).unwrap();
        for node in &plan.nodes {
            let web = node.firewall_rules.contains(&RuleName::WebTraffic);
            assert_eq!(web, node.role == Role::Edge, "{}", node.name);
        }
        let bastion = plan.bastion().unwrap();
        assert_eq!(
            bastion.firewall_rules.iter().copied().collect::<Vec<_>>(),
            vec![RuleName::AdminSsh]
        );
    }

    #[test]
    fn test_join_order() {
        let plan = plan(&ClusterSpec::new(3, 1, 2)).unwrap();
        let kinds: Vec<_> = plan.join_order.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "init-primary-manager",
                "join-manager",
                "join-manager",
                "join-worker",
                "join-worker",
                "join-worker",
                "label-node",
                "label-node",
                "label-node",
                "label-node",
                "label-node",
                "label-node",
            ]
        );
        assert_eq!(plan.join_order[3].node(), "swarm-edge-1");
        assert!(plan.join_order.iter().all(|s| s.node() != "swarm-bastion"));
    }

    #[test]
    fn test_joins_target_primary() {
        let plan = plan(&ClusterSpec::new(3, 1, 1)).unwrap();
        let primary = Ipv4Addr::new(10, 0, 1, 10);
        for step in &plan.join_order {
            match step {
                JoinStep::JoinManager { primary_addr, .. }
                | JoinStep::JoinWorker { primary_addr, .. } => assert_eq!(*primary_addr, primary),
                _ => {}
            }
        }
    }

    #[test]
    fn test_deterministic_bytes() {
        let spec = ClusterSpec::new(5, 2, 7);
        let a = serde_json::to_vec(&plan(&spec).unwrap()).unwrap();
        let b = serde_json::to_vec(&plan(&spec).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_spec() {
        let a = plan(&ClusterSpec::new(3, 2, 5)).unwrap().fingerprint().unwrap();
        let b = plan(&ClusterSpec::new(3, 2, 6)).unwrap().fingerprint().unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_join_step_serialization() {
        let step = JoinStep::InitPrimaryManager {
            node: "swarm-manager-1".to_string(),
            advertise_addr: Ipv4Addr::new(10, 0, 1, 10),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "init-primary-manager");
        assert_eq!(json["advertise_addr"], "10.0.1.10");
    }
}
