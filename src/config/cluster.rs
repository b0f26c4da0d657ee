use std::fmt;

use serde::{Deserialize, Serialize};

/// Default host offset of the bastion inside the management subnet
pub const BASTION_HOST_OFFSET: u32 = 5;

/// Default first host offset for managers inside the management subnet
pub const MANAGER_HOST_OFFSET: u32 = 10;

/// Default first host offset for edge nodes inside the management subnet
pub const EDGE_HOST_OFFSET: u32 = 20;

/// Default first host offset for workers inside the application subnet
pub const WORKER_HOST_OFFSET: u32 = 15;

/// Deployment environment of a cluster
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-provided cluster parameters.
///
/// This is the only input of the planner. Subnets are kept as strings so a
/// malformed range surfaces as a planning error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name, used as prefix for server and firewall names
    #[serde(default = "default_cluster_name")]
    pub name: String,

    #[serde(default)]
    pub environment: Environment,

    /// Number of swarm managers (must be odd)
    pub manager_count: u32,

    /// Number of edge nodes exposed to public web traffic
    pub edge_count: u32,

    /// Number of internal worker nodes
    #[serde(default)]
    pub worker_count: u32,

    #[serde(default)]
    pub network: NetworkSpec,

    /// Provider location (e.g. "nbg1", "fsn1")
    #[serde(default = "default_location")]
    pub location: String,

    /// Provider OS image
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default)]
    pub server_types: ServerTypes,

    /// Sources allowed to reach the bastion over SSH
    #[serde(default = "default_admin_cidrs")]
    pub admin_cidrs: Vec<String>,

    #[serde(default)]
    pub address_offsets: AddressOffsets,
}

/// Private network layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Whole private network range
    #[serde(default = "default_network_cidr")]
    pub cidr: String,

    /// Subnet hosting bastion, managers and edge nodes
    #[serde(default = "default_management_subnet")]
    pub management_subnet: String,

    /// Subnet hosting workers
    #[serde(default = "default_application_subnet")]
    pub application_subnet: String,

    /// Provider network zone
    #[serde(default = "default_network_zone")]
    pub zone: String,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            cidr: default_network_cidr(),
            management_subnet: default_management_subnet(),
            application_subnet: default_application_subnet(),
            zone: default_network_zone(),
        }
    }
}

/// Provider server type per role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTypes {
    #[serde(default = "default_small_server")]
    pub bastion: String,
    #[serde(default = "default_small_server")]
    pub manager: String,
    #[serde(default = "default_small_server")]
    pub edge: String,
    #[serde(default = "default_worker_server")]
    pub worker: String,
}

impl Default for ServerTypes {
    fn default() -> Self {
        Self {
            bastion: default_small_server(),
            manager: default_small_server(),
            edge: default_small_server(),
            worker: default_worker_server(),
        }
    }
}

/// Host offsets of each role inside its subnet.
///
/// Managers and edge nodes share the management subnet, so their ranges are
/// spaced apart rather than derived from subnet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressOffsets {
    #[serde(default = "default_bastion_offset")]
    pub bastion: u32,
    #[serde(default = "default_manager_offset")]
    pub manager: u32,
    #[serde(default = "default_edge_offset")]
    pub edge: u32,
    #[serde(default = "default_worker_offset")]
    pub worker: u32,
}

impl Default for AddressOffsets {
    fn default() -> Self {
        Self {
            bastion: BASTION_HOST_OFFSET,
            manager: MANAGER_HOST_OFFSET,
            edge: EDGE_HOST_OFFSET,
            worker: WORKER_HOST_OFFSET,
        }
    }
}

fn default_cluster_name() -> String {
    "swarm".to_string()
}

fn default_location() -> String {
    "nbg1".to_string()
}

fn default_image() -> String {
    "ubuntu-24.04".to_string()
}

fn default_admin_cidrs() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

fn default_network_cidr() -> String {
    "10.0.0.0/16".to_string()
}

fn default_management_subnet() -> String {
    "10.0.1.0/24".to_string()
}

fn default_application_subnet() -> String {
    "10.0.2.0/24".to_string()
}

fn default_network_zone() -> String {
    "eu-central".to_string()
}

fn default_small_server() -> String {
    "cx22".to_string()
}

fn default_worker_server() -> String {
    "cx32".to_string()
}

fn default_bastion_offset() -> u32 {
    BASTION_HOST_OFFSET
}

fn default_manager_offset() -> u32 {
    MANAGER_HOST_OFFSET
}

fn default_edge_offset() -> u32 {
    EDGE_HOST_OFFSET
}

fn default_worker_offset() -> u32 {
    WORKER_HOST_OFFSET
}

impl ClusterSpec {
    /// Spec with the given role counts and defaults for everything else
    pub fn new(manager_count: u32, edge_count: u32, worker_count: u32) -> Self {
        Self {
            name: default_cluster_name(),
            environment: Environment::default(),
            manager_count,
            edge_count,
            worker_count,
            network: NetworkSpec::default(),
            location: default_location(),
            image: default_image(),
            server_types: ServerTypes::default(),
            admin_cidrs: default_admin_cidrs(),
            address_offsets: AddressOffsets::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_network(mut self, network: NetworkSpec) -> Self {
        self.network = network;
        self
    }

    pub fn with_admin_cidrs<I, S>(mut self, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_cidrs = cidrs.into_iter().map(Into::into).collect();
        self
    }
}
