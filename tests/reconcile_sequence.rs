//! Reconciler tests against an in-memory swarm

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use swarmplan::config::ClusterSpec;
use swarmplan::reconcile::{
    ExecutionError, ReconcileOptions, Reconciler, RetryPolicy, StepExecutor, StepStatus,
};
use swarmplan::topology::{plan, ClusterPlan, JoinStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Manager,
    Worker,
}

/// Tracks swarm membership and labels the way `docker node ls` would report them
#[derive(Default)]
struct FakeSwarm {
    members: Mutex<HashMap<String, Membership>>,
    labels: Mutex<HashMap<String, BTreeMap<String, String>>>,
    log: Mutex<Vec<String>>,
    /// Node whose execution always fails
    broken: Option<String>,
    /// Transient failures left before executions start succeeding
    flaky: AtomicUsize,
}

impl FakeSwarm {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for FakeSwarm {
    async fn is_satisfied(&self, step: &JoinStep) -> Result<bool, ExecutionError> {
        let members = self.members.lock().unwrap();
        Ok(match step {
            JoinStep::InitPrimaryManager { node, .. } | JoinStep::JoinManager { node, .. } => {
                members.get(node) == Some(&Membership::Manager)
            }
            JoinStep::JoinWorker { node, .. } => members.contains_key(node),
            JoinStep::LabelNode { node, labels } => self
                .labels
                .lock()
                .unwrap()
                .get(node)
                .map(|current| labels.iter().all(|(k, v)| current.get(k) == Some(v)))
                .unwrap_or(false),
        })
    }

    async fn execute(&self, step: &JoinStep) -> Result<(), ExecutionError> {
        if self.broken.as_deref() == Some(step.node()) {
            return Err(ExecutionError::CommandFailed {
                node: step.node().to_string(),
                message: "permission denied".to_string(),
            });
        }
        if self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExecutionError::Timeout {
                node: step.node().to_string(),
                secs: 1,
            });
        }

        let mut members = self.members.lock().unwrap();
        match step {
            JoinStep::InitPrimaryManager { node, .. } => {
                members.insert(node.clone(), Membership::Manager);
            }
            JoinStep::JoinManager { node, .. } => {
                if members.is_empty() {
                    return Err(ExecutionError::CommandFailed {
                        node: node.clone(),
                        message: "no swarm to join".to_string(),
                    });
                }
                members.insert(node.clone(), Membership::Manager);
            }
            JoinStep::JoinWorker { node, .. } => {
                members.insert(node.clone(), Membership::Worker);
            }
            JoinStep::LabelNode { node, labels } => {
                if !members.contains_key(node) {
                    return Err(ExecutionError::UnknownNode(node.clone()));
                }
                self.labels
                    .lock()
                    .unwrap()
                    .entry(node.clone())
                    .or_default()
                    .extend(labels.clone());
            }
        }
        self.log.lock().unwrap().push(step.to_string());
        Ok(())
    }
}

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

fn sample_plan() -> ClusterPlan {
    plan(&ClusterSpec::new(3, 2, 2)).unwrap()
}

const APPLY: ReconcileOptions = ReconcileOptions {
    dry_run: false,
    force: false,
};

#[tokio::test]
async fn test_fresh_cluster_applies_every_step() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm::default());

    let report = Reconciler::new(swarm.clone())
        .with_policy(fast_policy(1))
        .run(&plan, APPLY)
        .await
        .unwrap();

    assert_eq!(report.count(StepStatus::Applied), plan.join_order.len());
    assert_eq!(report.plan_fingerprint, plan.fingerprint().unwrap());
    let expected: Vec<String> = plan.join_order.iter().map(|s| s.to_string()).collect();
    assert_eq!(swarm.log(), expected);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm::default());
    let reconciler = Reconciler::new(swarm.clone()).with_policy(fast_policy(1));

    reconciler.run(&plan, APPLY).await.unwrap();
    let executed = swarm.log().len();

    let report = reconciler.run(&plan, APPLY).await.unwrap();
    assert_eq!(report.count(StepStatus::Skipped), plan.join_order.len());
    assert_eq!(swarm.log().len(), executed);
}

#[tokio::test]
async fn test_force_reapplies() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm::default());
    let reconciler = Reconciler::new(swarm.clone()).with_policy(fast_policy(1));

    reconciler.run(&plan, APPLY).await.unwrap();
    let report = reconciler
        .run(
            &plan,
            ReconcileOptions {
                dry_run: false,
                force: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.count(StepStatus::Applied), plan.join_order.len());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm {
        flaky: AtomicUsize::new(2),
        ..FakeSwarm::default()
    });

    let report = Reconciler::new(swarm.clone())
        .with_policy(fast_policy(3))
        .run(&plan, APPLY)
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].attempts, 3);
    assert!(report.outcomes[1..].iter().all(|o| o.attempts == 1));
}

#[tokio::test]
async fn test_stops_at_first_exhausted_step() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm {
        broken: Some("swarm-manager-2".to_string()),
        ..FakeSwarm::default()
    });

    let err = Reconciler::new(swarm.clone())
        .with_policy(fast_policy(2))
        .run(&plan, APPLY)
        .await
        .unwrap_err();

    match err {
        ExecutionError::StepFailed { step, attempts, .. } => {
            assert_eq!(step, "join-manager swarm-manager-2");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    // only the primary made it in; nothing after the failed step ran
    assert_eq!(swarm.log(), vec!["init-primary-manager swarm-manager-1"]);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let plan = sample_plan();
    let swarm = Arc::new(FakeSwarm::default());

    let report = Reconciler::new(swarm.clone())
        .run(
            &plan,
            ReconcileOptions {
                dry_run: true,
                force: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.count(StepStatus::Planned), plan.join_order.len());
    assert!(swarm.log().is_empty());
    assert!(swarm.members.lock().unwrap().is_empty());
}
