//! Command implementations for the CLI
//!
//! Commands return Results; printing is left to the caller.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{self, ClusterSpec, ConfigError, Environment, PublicAddresses};
use crate::reconcile::{
    ExecutionError, ReconcileOptions, ReconcileReport, Reconciler, RetryPolicy, SshConfig,
    SshExecutor, StepExecutor,
};
use crate::render::{self, RenderError};
use crate::topology::{self, ClusterPlan, PlanError};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

impl CommandError {
    /// Planning and config failures need a spec fix; retrying will not help
    pub fn is_planning_failure(&self) -> bool {
        matches!(self, CommandError::Config(_) | CommandError::Plan(_))
    }

    pub fn is_execution_failure(&self) -> bool {
        matches!(self, CommandError::Execution(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_planning_failure() {
            2
        } else if self.is_execution_failure() {
            3
        } else {
            1
        }
    }
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Plan / validate
// ============================================================================

/// Load a cluster spec, applying an environment override
pub fn load_spec(path: &Path, environment: Option<Environment>) -> CommandResult<ClusterSpec> {
    let mut spec = config::load_cluster_file(path)?;
    if let Some(env) = environment {
        spec.environment = env;
    }
    Ok(spec)
}

/// Load a cluster spec and plan it
pub fn plan_from_file(path: &Path, environment: Option<Environment>) -> CommandResult<ClusterPlan> {
    let spec = load_spec(path, environment)?;
    let plan = topology::plan(&spec)?;
    info!(
        "Planned {} nodes for cluster '{}' ({})",
        plan.nodes.len(),
        plan.cluster,
        plan.environment
    );
    Ok(plan)
}

/// Outcome of validating a cluster spec
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub nodes: usize,
    pub quorum_tolerance: u32,
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}

/// Validate a cluster spec file. Failures are reported, not returned.
pub fn validate_cluster(path: &Path, environment: Option<Environment>) -> ValidationResult {
    match plan_from_file(path, environment) {
        Ok(plan) => ValidationResult {
            valid: true,
            nodes: plan.nodes.len(),
            quorum_tolerance: plan.quorum_tolerance,
            fingerprint: plan.fingerprint().ok(),
            error: None,
        },
        Err(e) => ValidationResult {
            valid: false,
            nodes: 0,
            quorum_tolerance: 0,
            fingerprint: None,
            error: Some(e.to_string()),
        },
    }
}

// ============================================================================
// Render
// ============================================================================

/// Files produced (or that would be produced) by a render
#[derive(Debug, Clone)]
pub struct RenderSummary {
    pub files: Vec<PathBuf>,
    pub written: bool,
}

pub fn render_cluster(
    plan: &ClusterPlan,
    public_ips: Option<&Path>,
    ssh_user: &str,
    out: &Path,
    dry_run: bool,
) -> CommandResult<RenderSummary> {
    let public = match public_ips {
        Some(path) => config::load_public_addresses(path)?,
        None => PublicAddresses::new(),
    };
    let artifacts = render::render_artifacts(plan, &public, ssh_user)?;

    if dry_run {
        let files = artifacts
            .files()
            .iter()
            .map(|(relative, _)| out.join(relative))
            .collect();
        return Ok(RenderSummary {
            files,
            written: false,
        });
    }

    let files = render::write_artifacts(&artifacts, out)?;
    Ok(RenderSummary {
        files,
        written: true,
    })
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub bastion: Ipv4Addr,
    pub ssh_user: String,
    pub ssh_key: Option<String>,
    pub retries: u32,
    pub command_timeout: u64,
    pub force: bool,
    pub dry_run: bool,
}

impl From<&super::ApplyArgs> for ApplyOptions {
    fn from(args: &super::ApplyArgs) -> Self {
        Self {
            bastion: args.bastion,
            ssh_user: args.ssh_user.clone(),
            ssh_key: args.ssh_key.clone(),
            retries: args.retries,
            command_timeout: args.command_timeout,
            force: args.force,
            dry_run: args.dry_run,
        }
    }
}

/// Build the SSH executor for a plan
pub fn ssh_executor(plan: &ClusterPlan, options: &ApplyOptions) -> SshExecutor {
    let mut ssh = SshConfig::new(options.bastion).with_user(&options.ssh_user);
    if let Some(ref key) = options.ssh_key {
        ssh = ssh.with_identity_file(key);
    }
    ssh.command_timeout_secs = options.command_timeout;
    SshExecutor::new(ssh, plan)
}

/// Replay the plan's join steps through `executor`
pub async fn apply_cluster(
    plan: &ClusterPlan,
    executor: Arc<dyn StepExecutor>,
    options: &ApplyOptions,
) -> CommandResult<ReconcileReport> {
    let policy = RetryPolicy::default().with_max_attempts(options.retries);

    let report = Reconciler::new(executor)
        .with_policy(policy)
        .run(
            plan,
            ReconcileOptions {
                dry_run: options.dry_run,
                force: options.force,
            },
        )
        .await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn spec_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_plan_from_file_with_override() {
        let file = spec_file("manager_count: 3\nedge_count: 2\nworker_count: 5\n");
        let plan = plan_from_file(file.path(), Some(Environment::Staging)).unwrap();
        assert_eq!(plan.environment, Environment::Staging);
        assert_eq!(plan.nodes.len(), 11);
    }

    #[test]
    fn test_validate_reports_even_managers() {
        let file = spec_file("manager_count: 2\nedge_count: 1\n");
        let result = validate_cluster(file.path(), None);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("odd"));
    }

    #[test]
    fn test_validate_ok() {
        let file = spec_file("manager_count: 1\nedge_count: 1\nworker_count: 1\n");
        let result = validate_cluster(file.path(), None);
        assert!(result.valid);
        assert_eq!(result.nodes, 4);
        assert_eq!(result.quorum_tolerance, 0);
        assert!(result.fingerprint.is_some());
    }

    #[test]
    fn test_error_classification() {
        let file = spec_file("manager_count: 4\nedge_count: 1\n");
        let err = plan_from_file(file.path(), None).unwrap_err();
        assert!(err.is_planning_failure());
        assert_eq!(err.exit_code(), 2);

        let err = CommandError::from(ExecutionError::UnknownNode("x".to_string()));
        assert!(err.is_execution_failure());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_render_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let plan = topology::plan(&ClusterSpec::new(1, 1, 1)).unwrap();

        let summary = render_cluster(&plan, None, "root", &out, true).unwrap();
        assert!(!summary.written);
        assert_eq!(summary.files.len(), 4);
        assert!(!out.exists());
    }

    #[test]
    fn test_render_with_public_ips() {
        let dir = tempfile::tempdir().unwrap();
        let mut ips = Builder::new().suffix(".json").tempfile().unwrap();
        ips.write_all(br#"{"swarm-bastion": "203.0.113.5"}"#).unwrap();
        let plan = topology::plan(&ClusterSpec::new(1, 1, 1)).unwrap();

        let summary = render_cluster(&plan, Some(ips.path()), "root", dir.path(), false).unwrap();
        assert!(summary.written);
        let inventory = std::fs::read_to_string(dir.path().join("inventory.ini")).unwrap();
        assert!(inventory.contains("ProxyJump=root@203.0.113.5"));
    }

    #[tokio::test]
    async fn test_apply_dry_run() {
        let plan = topology::plan(&ClusterSpec::new(3, 1, 1)).unwrap();
        let options = ApplyOptions {
            bastion: Ipv4Addr::new(203, 0, 113, 5),
            ssh_user: "root".to_string(),
            ssh_key: None,
            retries: 1,
            command_timeout: 5,
            force: false,
            dry_run: true,
        };
        let executor = Arc::new(ssh_executor(&plan, &options));
        let report = apply_cluster(&plan, executor, &options).await.unwrap();
        assert_eq!(report.outcomes.len(), plan.join_order.len());
    }
}
