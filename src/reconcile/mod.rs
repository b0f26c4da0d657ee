//! Join reconciliation
//!
//! Replays a plan's `join_order` against real nodes. Each step is checked
//! first and skipped when the cluster already satisfies it, so re-running the
//! same plan is safe. Failed steps are retried with exponential backoff; the
//! run stops at the first step that exhausts its attempts.

pub mod ssh;

pub use ssh::{SshConfig, SshExecutor};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::topology::{ClusterPlan, JoinStep};

/// Failures while talking to nodes. Unlike planning errors, command
/// failures and timeouts may be transient; see `is_retryable`.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed on {node}: {message}")]
    CommandFailed { node: String, message: String },

    #[error("Command on {node} timed out after {secs}s")]
    Timeout { node: String, secs: u64 },

    #[error("Node '{0}' is not part of the plan")]
    UnknownNode(String),

    #[error("Unexpected output from {node}: {output}")]
    UnexpectedOutput { node: String, output: String },

    #[error("Step '{step}' failed after {attempts} attempts: {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        source: Box<ExecutionError>,
    },

    #[error("Failed to fingerprint plan: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Only command failures and timeouts can succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::CommandFailed { .. } | ExecutionError::Timeout { .. }
        )
    }
}

// ============================================================================
// Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Whether the cluster already reflects this step
    async fn is_satisfied(&self, step: &JoinStep) -> Result<bool, ExecutionError>;

    /// Perform the step
    async fn execute(&self, step: &JoinStep) -> Result<(), ExecutionError>;
}

/// Attempts and backoff per step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Report the steps without contacting any node
    pub dry_run: bool,
    /// Execute steps even when they look satisfied
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Already satisfied, nothing done
    Skipped,
    /// Dry run, would be executed
    Planned,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: JoinStep,
    pub status: StepStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub plan_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<StepOutcome>,
}

impl ReconcileReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Runs join steps in order through a `StepExecutor`
pub struct Reconciler {
    executor: Arc<dyn StepExecutor>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(
        &self,
        plan: &ClusterPlan,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport, ExecutionError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let plan_fingerprint = plan.fingerprint()?;
        info!(
            "Reconcile run {} for cluster '{}': {} steps{}",
            run_id,
            plan.cluster,
            plan.join_order.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        let mut outcomes = Vec::with_capacity(plan.join_order.len());
        for step in &plan.join_order {
            let outcome = self.run_step(step, options).await?;
            info!("{}: {:?}", step, outcome.status);
            outcomes.push(outcome);
        }

        Ok(ReconcileReport {
            run_id,
            plan_fingerprint,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        })
    }

    async fn run_step(
        &self,
        step: &JoinStep,
        options: ReconcileOptions,
    ) -> Result<StepOutcome, ExecutionError> {
        if options.dry_run {
            return Ok(StepOutcome {
                step: step.clone(),
                status: StepStatus::Planned,
                attempts: 0,
            });
        }

        let mut attempt = 1;
        loop {
            match self.attempt(step, options.force).await {
                Ok(status) => {
                    return Ok(StepOutcome {
                        step: step.clone(),
                        status,
                        attempts: attempt,
                    })
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        step, attempt, self.policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ExecutionError::StepFailed {
                        step: step.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    async fn attempt(&self, step: &JoinStep, force: bool) -> Result<StepStatus, ExecutionError> {
        if !force && self.executor.is_satisfied(step).await? {
            return Ok(StepStatus::Skipped);
        }
        self.executor.execute(step).await?;
        Ok(StepStatus::Applied)
    }
}

// ============================================================================
// Mock implementation for testing (no I/O)
// ============================================================================
