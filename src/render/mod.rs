//! Plan rendering
//!
//! Turns a `ClusterPlan` into the artifacts downstream tools read: an
//! inventory, a flat variable set, a provider resource document and the plan
//! itself. Rendering is pure; `write_artifacts` is the only function that
//! touches the filesystem.

pub mod inventory;
pub mod provider;

pub use inventory::{Inventory, InventoryHost};
pub use provider::{ProviderDocument, ProviderFirewall, ProviderServer};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::config::PublicAddresses;
use crate::topology::{ClusterPlan, Role};

pub const INVENTORY_FILE: &str = "inventory.ini";
pub const VARIABLES_FILE: &str = "group_vars/all.yml";
pub const PROVIDER_FILE: &str = "provider.json";
pub const PLAN_FILE: &str = "plan.json";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RenderError {
    fn from(e: serde_json::Error) -> Self {
        RenderError::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for RenderError {
    fn from(e: serde_yaml::Error) -> Self {
        RenderError::Serialize(e.to_string())
    }
}

/// Flat key/value set for downstream tooling
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSet(pub BTreeMap<String, Value>);

impl VariableSet {
    pub fn from_plan(plan: &ClusterPlan) -> Result<Self, RenderError> {
        let mut vars = BTreeMap::new();
        let mut set = |key: &str, value: Value| {
            vars.insert(key.to_string(), value);
        };

        set("cluster_name", json!(plan.cluster));
        set("environment", json!(plan.environment));
        set("manager_count", json!(plan.count(Role::Manager)));
        set("edge_count", json!(plan.count(Role::Edge)));
        set("worker_count", json!(plan.count(Role::Worker)));
        set("quorum_tolerance", json!(plan.quorum_tolerance));
        set("network_cidr", json!(plan.network.cidr));
        set("management_subnet", json!(plan.network.management_subnet));
        set("application_subnet", json!(plan.network.application_subnet));
        set("primary_manager_name", json!(plan.primary_manager));
        set(
            "primary_manager_ip",
            json!(plan.primary().map(|n| n.private_ip.to_string())),
        );
        set(
            "bastion_private_ip",
            json!(plan.bastion().map(|n| n.private_ip.to_string())),
        );
        set("plan_fingerprint", json!(plan.fingerprint()?));

        Ok(Self(vars))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn to_yaml(&self) -> Result<String, RenderError> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

/// Rendered file contents, keyed by path relative to the output directory
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifacts {
    pub inventory: String,
    pub variables: String,
    pub provider: String,
    pub plan: String,
}

impl RenderedArtifacts {
    pub fn files(&self) -> [(&'static str, &str); 4] {
        [
            (INVENTORY_FILE, self.inventory.as_str()),
            (VARIABLES_FILE, self.variables.as_str()),
            (PROVIDER_FILE, self.provider.as_str()),
            (PLAN_FILE, self.plan.as_str()),
        ]
    }
}

// ============================================================================
// Pure rendering
// ============================================================================

pub fn render_artifacts(
    plan: &ClusterPlan,
    public: &PublicAddresses,
    ssh_user: &str,
) -> Result<RenderedArtifacts, RenderError> {
    let inventory = Inventory::from_plan(plan, public).to_ini(ssh_user);
    let variables = VariableSet::from_plan(plan)?.to_yaml()?;
    let provider = serde_json::to_string_pretty(&ProviderDocument::from_plan(plan))?;
    let plan = serde_json::to_string_pretty(plan)?;

    Ok(RenderedArtifacts {
        inventory,
        variables,
        provider,
        plan,
    })
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Write all artifacts below `dir`, returning the written paths
pub fn write_artifacts(artifacts: &RenderedArtifacts, dir: &Path) -> Result<Vec<PathBuf>, RenderError> {
    let mut written = Vec::new();
    for (relative, content) in artifacts.files() {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
