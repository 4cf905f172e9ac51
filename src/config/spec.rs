//! Configuration specification types for a convergence run.
//!
//! This module defines all the structs that map to the `convergent.yaml`
//! file. The `resources` section is the declarative manifest; the other
//! sections tune how a run is carried out.

use crate::engine::{ClusterSettings, EngineOptions, Lifecycle, RetryPolicy};
use crate::target::TargetKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// Cluster-wide settings.
    pub cluster: ClusterConfig,
    /// Target selected when none is given on the command line.
    #[serde(default)]
    pub target: TargetKind,
    /// Scheduler tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Document output.
    #[serde(default)]
    pub output: OutputConfig,
    /// Local simulated cloud.
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Infrastructure manifest.
    pub resources: ResourcesConfig,
}

/// Cluster-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name, used in the `KubernetesCluster` tag.
    pub name: String,
    /// Tags applied to every resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ClusterConfig {
    /// Converts to the settings carried in the run context.
    #[must_use]
    pub fn settings(&self) -> ClusterSettings {
        self.tags
            .iter()
            .fold(ClusterSettings::new(&self.name), |settings, (k, v)| {
                settings.with_tag(k, v)
            })
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of tasks worked on at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Converts to engine options.
    #[must_use]
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            max_concurrency: self.max_concurrency,
            retry: self.retry.policy(),
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum attempts per task, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total retry budget per task, in seconds.
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            budget_secs: default_budget_secs(),
        }
    }
}

impl RetryConfig {
    /// Converts to a retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_secs(self.budget_secs),
        )
    }
}

/// Document output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Directory emitted documents are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Local simulated cloud settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudConfig {
    /// Snapshot file of the local cloud.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

/// The infrastructure manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourcesConfig {
    /// The cluster network.
    pub network: NetworkConfig,
    /// Subnets inside the network.
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
    /// Load balancers.
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerConfig>,
}

impl ResourcesConfig {
    /// All resource names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(self.network.name.as_str())
            .chain(self.subnets.iter().map(|s| s.name.as_str()))
            .chain(self.load_balancers.iter().map(|l| l.name.as_str()))
            .collect()
    }
}

/// Network definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Resource name.
    pub name: String,
    /// Address range, e.g. `172.20.0.0/16`.
    pub cidr: String,
    /// Whether DNS resolution and hostnames are enabled.
    #[serde(default = "default_enable_dns")]
    pub enable_dns: bool,
    /// Existing provider ID to adopt.
    #[serde(default)]
    pub id: Option<String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Resource tags, merged over the cluster tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies by resource name.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Subnet definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetConfig {
    /// Resource name.
    pub name: String,
    /// Address range.
    pub cidr: String,
    /// Availability zone.
    pub zone: String,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Resource tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies by resource name.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Load balancer definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    /// Resource name.
    pub name: String,
    /// Subnet names the balancer attaches to.
    pub subnets: Vec<String>,
    /// Forwarded ports, e.g. `443/tcp`.
    pub listeners: Vec<ListenerConfig>,
    /// Whether the balancer is internal-only.
    #[serde(default)]
    pub internal: bool,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Resource tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies by resource name.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A forwarded port, written `PORT/PROTOCOL` (protocol defaults to TCP).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct ListenerConfig {
    /// Port number.
    pub port: u16,
    /// Protocol, upper case.
    pub protocol: String,
}

impl TryFrom<String> for ListenerConfig {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (port, protocol) = s.split_once('/').unwrap_or((s.as_str(), "tcp"));
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| format!("Invalid listener port in '{s}'"))?;
        let protocol = protocol.trim().to_uppercase();
        match protocol.as_str() {
            "TCP" | "SSL" | "HTTP" | "HTTPS" => Ok(Self { port, protocol }),
            other => Err(format!("Unknown listener protocol '{other}' in '{s}'")),
        }
    }
}

impl From<ListenerConfig> for String {
    fn from(listener: ListenerConfig) -> Self {
        format!("{}/{}", listener.port, listener.protocol.to_lowercase())
    }
}

// Default value functions

const fn default_max_concurrency() -> usize {
    10
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_budget_secs() -> u64 {
    600
}

const fn default_enable_dns() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".convergent/cloud.json")
}
