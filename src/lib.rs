//! swarmplan: derive, render and reconcile multi-tier Docker Swarm clusters
//!
//! `topology` and `render` are pure. `reconcile` is the only module that
//! touches remote hosts, and it does so through the `StepExecutor` trait.

pub mod cli;
pub mod config;
pub mod reconcile;
pub mod render;
pub mod topology;
