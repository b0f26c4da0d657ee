//! Step execution over SSH
//!
//! Every node except the bastion is only reachable through the bastion, so
//! all commands go through an explicit bastion `ProxyCommand`. Command construction is pure and tested
//! separately from the process spawning.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ExecutionError, StepExecutor};
use crate::topology::firewall::SWARM_MANAGEMENT_PORT;
use crate::topology::{ClusterPlan, JoinStep, SwarmMembership};

/// Default SSH connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default remote command timeout in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// How to reach the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// Public address of the bastion
    pub bastion: Ipv4Addr,
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl SshConfig {
    pub fn new(bastion: Ipv4Addr) -> Self {
        Self {
            bastion,
            user: "root".to_string(),
            identity_file: default_identity_file(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Use the given key; `~` is expanded
    pub fn with_identity_file(mut self, path: &str) -> Self {
        self.identity_file = Some(expand_path(path));
        self
    }
}

/// ~/.ssh/id_ed25519 if it exists
pub fn default_identity_file() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("id_ed25519"))
        .filter(|path| path.exists())
}

pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// State reported by `docker info` for the local swarm node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmState {
    Inactive,
    Pending,
    Active,
    Locked,
    Error,
    Unknown(String),
}

/// Local swarm state plus whether the node is a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmStatus {
    pub state: SwarmState,
    pub control_available: bool,
}

impl SwarmStatus {
    pub fn is_active_manager(&self) -> bool {
        self.state == SwarmState::Active && self.control_available
    }

    pub fn is_active(&self) -> bool {
        self.state == SwarmState::Active
    }
}

// ============================================================================
// Pure command builders (no I/O)
// ============================================================================

/// Quote an argument for the remote shell
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Options shared by the bastion hop and the final hop
fn common_options(config: &SshConfig) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", config.connect_timeout_secs),
    ];

    if let Some(ref key) = config.identity_file {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args
}

/// `ProxyCommand` for the bastion hop.
///
/// `-J` would build its own hop command without the key and batch options,
/// so the hop is spelled out. ssh runs this through a shell, hence the quoting.
pub fn proxy_command(config: &SshConfig) -> String {
    let mut parts = vec!["ssh".to_string()];
    parts.extend(common_options(config).iter().map(|a| shell_quote(a)));
    parts.push("-W".to_string());
    parts.push("%h:%p".to_string());
    parts.push(format!("{}@{}", config.user, config.bastion));
    parts.join(" ")
}

/// Arguments for `ssh` running `remote` on `target` through the bastion
pub fn ssh_args(config: &SshConfig, target: Ipv4Addr, remote: &[String]) -> Vec<String> {
    let mut args = common_options(config);
    args.push("-o".to_string());
    args.push(format!("ProxyCommand={}", proxy_command(config)));
    args.push(format!("{}@{}", config.user, target));
    args.push("--".to_string());
    args.extend(remote.iter().map(|a| shell_quote(a)));
    args
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn swarm_status_command() -> Vec<String> {
    to_args(&[
        "docker",
        "info",
        "--format",
        "{{.Swarm.LocalNodeState}} {{.Swarm.ControlAvailable}}",
    ])
}

pub fn init_command(advertise_addr: Ipv4Addr) -> Vec<String> {
    vec![
        "docker".to_string(),
        "swarm".to_string(),
        "init".to_string(),
        "--advertise-addr".to_string(),
        advertise_addr.to_string(),
        "--listen-addr".to_string(),
        format!("{}:{}", advertise_addr, SWARM_MANAGEMENT_PORT),
    ]
}

pub fn join_token_command(membership: SwarmMembership) -> Vec<String> {
    let kind = match membership {
        SwarmMembership::Manager => "manager",
        SwarmMembership::Worker => "worker",
    };
    to_args(&["docker", "swarm", "join-token", "-q", kind])
}

pub fn join_command(token: &str, advertise_addr: Ipv4Addr, primary_addr: Ipv4Addr) -> Vec<String> {
    vec![
        "docker".to_string(),
        "swarm".to_string(),
        "join".to_string(),
        "--token".to_string(),
        token.to_string(),
        "--advertise-addr".to_string(),
        advertise_addr.to_string(),
        format!("{}:{}", primary_addr, SWARM_MANAGEMENT_PORT),
    ]
}

pub fn promote_command(node: &str) -> Vec<String> {
    to_args(&["docker", "node", "promote", node])
}

pub fn inspect_labels_command(node: &str) -> Vec<String> {
    to_args(&["docker", "node", "inspect", "--format", "{{json .Spec.Labels}}", node])
}

pub fn label_command(node: &str, labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = to_args(&["docker", "node", "update"]);
    for (key, value) in labels {
        args.push("--label-add".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(node.to_string());
    args
}

pub fn parse_swarm_state(output: &str) -> SwarmState {
    match output.trim() {
        "inactive" => SwarmState::Inactive,
        "pending" => SwarmState::Pending,
        "active" => SwarmState::Active,
        "locked" => SwarmState::Locked,
        "error" => SwarmState::Error,
        other => SwarmState::Unknown(other.to_string()),
    }
}

/// Parse `<LocalNodeState> <ControlAvailable>` from `docker info`
pub fn parse_swarm_status(output: &str) -> SwarmStatus {
    let mut fields = output.split_whitespace();
    let state = parse_swarm_state(fields.next().unwrap_or_default());
    let control_available = fields.next() == Some("true");
    SwarmStatus {
        state,
        control_available,
    }
}

/// Whether the inspected labels already contain every wanted label
pub fn labels_satisfied(
    output: &str,
    wanted: &BTreeMap<String, String>,
) -> Result<bool, serde_json::Error> {
    let trimmed = output.trim();
    // docker prints `null` for a node without labels
    let current: BTreeMap<String, String> = if trimmed.is_empty() || trimmed == "null" {
        BTreeMap::new()
    } else {
        serde_json::from_str(trimmed)?
    };
    Ok(wanted.iter().all(|(k, v)| current.get(k) == Some(v)))
}

// ============================================================================
// I/O implementation (real ssh processes)
// ============================================================================

pub struct SshExecutor {
    config: SshConfig,
    addresses: HashMap<String, Ipv4Addr>,
    primary: String,
}

impl SshExecutor {
    pub fn new(config: SshConfig, plan: &ClusterPlan) -> Self {
        Self {
            config,
            addresses: plan
                .nodes
                .iter()
                .map(|n| (n.name.clone(), n.private_ip))
                .collect(),
            primary: plan.primary_manager.clone(),
        }
    }

    async fn run(&self, node: &str, remote: &[String]) -> Result<String, ExecutionError> {
        let target = self
            .addresses
            .get(node)
            .copied()
            .ok_or_else(|| ExecutionError::UnknownNode(node.to_string()))?;
        let args = ssh_args(&self.config, target, remote);
        debug!("ssh {} ({}): {}", node, target, remote.join(" "));

        let mut cmd = Command::new("ssh");
        cmd.args(&args).kill_on_drop(true);

        let secs = self.config.command_timeout_secs;
        let output = tokio::time::timeout(Duration::from_secs(secs), cmd.output())
            .await
            .map_err(|_| ExecutionError::Timeout {
                node: node.to_string(),
                secs,
            })?
            .map_err(|e| ExecutionError::CommandFailed {
                node: node.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::CommandFailed {
                node: node.to_string(),
                message: format!(
                    "Exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn swarm_status(&self, node: &str) -> Result<SwarmStatus, ExecutionError> {
        let output = self.run(node, &swarm_status_command()).await?;
        Ok(parse_swarm_status(&output))
    }

    async fn join_token(&self, membership: SwarmMembership) -> Result<String, ExecutionError> {
        let token = self
            .run(&self.primary, &join_token_command(membership))
            .await?;
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(ExecutionError::UnexpectedOutput {
                node: self.primary.clone(),
                output: token,
            });
        }
        Ok(token)
    }
}

#[async_trait]
impl StepExecutor for SshExecutor {
    async fn is_satisfied(&self, step: &JoinStep) -> Result<bool, ExecutionError> {
        match step {
            JoinStep::InitPrimaryManager { node, .. } | JoinStep::JoinManager { node, .. } => {
                Ok(self.swarm_status(node).await?.is_active_manager())
            }
            JoinStep::JoinWorker { node, .. } => Ok(self.swarm_status(node).await?.is_active()),
            JoinStep::LabelNode { node, labels } => {
                // labels can only be read once the node has joined
                let output = match self.run(&self.primary, &inspect_labels_command(node)).await {
                    Ok(output) => output,
                    Err(ExecutionError::CommandFailed { .. }) => return Ok(false),
                    Err(e) => return Err(e),
                };
                labels_satisfied(&output, labels).map_err(|_| ExecutionError::UnexpectedOutput {
                    node: self.primary.clone(),
                    output,
                })
            }
        }
    }

    async fn execute(&self, step: &JoinStep) -> Result<(), ExecutionError> {
        match step {
            JoinStep::InitPrimaryManager {
                node,
                advertise_addr,
            } => {
                self.run(node, &init_command(*advertise_addr)).await?;
            }
            JoinStep::JoinManager {
                node,
                advertise_addr,
                primary_addr,
            } => {
                // joined earlier as a worker: promote instead of joining again
                if self.swarm_status(node).await?.is_active() {
                    self.run(&self.primary, &promote_command(node)).await?;
                    return Ok(());
                }
                let token = self.join_token(SwarmMembership::Manager).await?;
                self.run(node, &join_command(&token, *advertise_addr, *primary_addr))
                    .await?;
            }
            JoinStep::JoinWorker {
                node,
                advertise_addr,
                primary_addr,
            } => {
                let token = self.join_token(SwarmMembership::Worker).await?;
                self.run(node, &join_command(&token, *advertise_addr, *primary_addr))
                    .await?;
            }
            JoinStep::LabelNode { node, labels } => {
                self.run(&self.primary, &label_command(node, labels)).await?;
            }
        }
        Ok(())
    }
}
