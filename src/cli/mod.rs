//! CLI module for swarmplan
//!
//! Subcommands:
//! - `swarmplan plan` - Show the derived cluster layout
//! - `swarmplan validate` - Check a cluster spec without rendering anything
//! - `swarmplan render` - Write inventory, variables and provider resources
//! - `swarmplan apply` - Bring the swarm up through the bastion

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::config::{default_cluster_path, Environment, CLUSTER_FILE_ENV};

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "swarmplan")]
#[command(about = "Plan and reconcile multi-tier Docker Swarm clusters")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the cluster spec (YAML or JSON)
    #[arg(short, long, global = true, env = CLUSTER_FILE_ENV, default_value_os_t = default_cluster_path())]
    pub file: PathBuf,

    /// Override the environment set in the cluster spec
    #[arg(long, global = true, value_enum)]
    pub environment: Option<Environment>,

    /// Path to a .env file to load before running
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the derived cluster plan
    Plan(PlanArgs),

    /// Validate the cluster spec
    Validate,

    /// Render inventory, variables and provider resources
    Render(RenderArgs),

    /// Initialize and join the swarm according to the plan
    Apply(ApplyArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Arguments for the render command
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Output directory
    #[arg(short, long, default_value = "rendered")]
    pub out: PathBuf,

    /// JSON map of node name to public IPv4, e.g. provider output
    #[arg(long, value_name = "FILE")]
    pub public_ips: Option<PathBuf>,

    /// Remote user written into the inventory
    #[arg(long, default_value = "root")]
    pub ssh_user: String,

    /// Render without writing files
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the apply command
#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Public address of the bastion host
    #[arg(long, env = "SWARMPLAN_BASTION")]
    pub bastion: Ipv4Addr,

    /// Remote user on all nodes
    #[arg(long, default_value = "root")]
    pub ssh_user: String,

    /// SSH private key (default: ~/.ssh/id_ed25519 if present)
    #[arg(long, value_name = "FILE")]
    pub ssh_key: Option<String>,

    /// Attempts per step before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Timeout per remote command in seconds
    #[arg(long, default_value_t = 120)]
    pub command_timeout: u64,

    /// Run every step even if the cluster already satisfies it
    #[arg(long)]
    pub force: bool,

    /// Show the steps without contacting any node
    #[arg(long)]
    pub dry_run: bool,
}
