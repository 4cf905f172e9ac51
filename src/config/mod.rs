//! Configuration module for convergence runs.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `convergent.yaml`
//! - Environment overrides and `.env` loading
//! - Validation of configuration values

mod spec;
mod parser;
mod validator;

pub use spec::{
    CloudConfig, ClusterConfig, EngineConfig, ListenerConfig, LoadBalancerConfig, NetworkConfig,
    OutputConfig, ResourcesConfig, RetryConfig, RunConfig, SubnetConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
