pub mod cluster;

pub use cluster::{AddressOffsets, ClusterSpec, Environment, NetworkSpec, ServerTypes};

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable overriding the cluster file location
pub const CLUSTER_FILE_ENV: &str = "SWARMPLAN_CLUSTER";

/// Default cluster file: ./cluster.yaml
pub fn default_cluster_path() -> PathBuf {
    PathBuf::from("cluster.yaml")
}

/// Errors for file I/O and parsing (separate from planning errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse {format} content: {message}")]
    ParseError { format: FileFormat, message: String },
}

/// Serialization format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    /// Pick a format from the file extension, falling back to JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            _ => FileFormat::Json,
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Yaml => f.write_str("YAML"),
            FileFormat::Json => f.write_str("JSON"),
        }
    }
}

/// Node name to public IPv4 address, as reported by the provider
pub type PublicAddresses = BTreeMap<String, Ipv4Addr>;

// ============================================================================
// Pure parsing functions (no I/O)
// ============================================================================

/// Parse a cluster spec from a string in the given format
pub fn parse_cluster_spec(content: &str, format: FileFormat) -> Result<ClusterSpec, ConfigError> {
    let parsed = match format {
        FileFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        FileFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::ParseError { format, message })
}

/// Parse a flat `{"node-name": "203.0.113.10"}` JSON map
pub fn parse_public_addresses(content: &str) -> Result<PublicAddresses, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        format: FileFormat::Json,
        message: e.to_string(),
    })
}

// ============================================================================
// I/O boundary - thin layer over the pure functions
// ============================================================================

/// Load and parse a cluster spec file from disk
pub fn load_cluster_file(path: &Path) -> Result<ClusterSpec, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_cluster_spec(&content, FileFormat::from_path(path))
}

/// Load provider-reported public addresses from disk
pub fn load_public_addresses(path: &Path) -> Result<PublicAddresses, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_public_addresses(&content)
}
