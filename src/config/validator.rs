//! Configuration validation for run configurations.
//!
//! This module checks a [`RunConfig`] for problems that would otherwise only
//! surface halfway through a run: bad names, malformed address ranges and
//! dangling references between resources.

use crate::error::{ConfigError, ConvergeError, Result};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::debug;

use super::spec::{LoadBalancerConfig, ResourcesConfig, RunConfig, SubnetConfig};

/// Validator for run configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

/// An IPv4 address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        Some(Self {
            base: u32::from(addr),
            prefix,
        })
    }

    const fn mask(self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    const fn contains(self, other: Self) -> bool {
        other.prefix >= self.prefix && (other.base & self.mask()) == (self.base & self.mask())
    }

    const fn overlaps(self, other: Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a run configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found. Use
    /// [`ConfigValidator::check`] to get all of them.
    pub fn validate(&self, config: &RunConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConvergeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &RunConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.cluster.name.is_empty() {
            result.error("cluster.name", "Cluster name cannot be empty");
        } else if !is_valid_name(&config.cluster.name) {
            result.error(
                "cluster.name",
                format!(
                    "Cluster name '{}' is invalid. Must be alphanumeric with '-', '_' or '.'.",
                    config.cluster.name
                ),
            );
        }

        if config.engine.max_concurrency == 0 {
            result.error("engine.max_concurrency", "Concurrency must be at least 1");
        }
        if config.engine.retry.max_attempts == 0 {
            result.error("engine.retry.max_attempts", "Max attempts must be at least 1");
        }
        if config.engine.retry.initial_delay_ms > config.engine.retry.max_delay_ms {
            result.warnings.push(String::from(
                "engine.retry: initial delay exceeds max delay, every retry waits the max delay",
            ));
        }

        Self::validate_resources(&config.resources, &mut result);
        result
    }

    fn validate_resources(resources: &ResourcesConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for name in resources.names() {
            if name.is_empty() {
                result.error("resources", "Resource name cannot be empty");
            } else if !is_valid_name(name) {
                result.error(
                    "resources",
                    format!("Resource name '{name}' is invalid. Must be alphanumeric with '-', '_' or '.'."),
                );
            }
            if !seen.insert(name) {
                result.error("resources", format!("Duplicate resource name: {name}"));
            }
        }

        let subnet_names = resources.subnets.iter().map(|s| s.name.as_str());
        let lb_names = resources.load_balancers.iter().map(|l| l.name.as_str());
        Self::validate_document_keys("resources.subnets", subnet_names, result);
        Self::validate_document_keys("resources.load_balancers", lb_names, result);

        let network = Cidr::parse(&resources.network.cidr);
        if network.is_none() {
            result.error(
                "resources.network.cidr",
                format!("Invalid CIDR '{}'", resources.network.cidr),
            );
        }

        Self::validate_subnets(&resources.subnets, network, result);

        let subnet_names: HashSet<&str> = resources.subnets.iter().map(|s| s.name.as_str()).collect();
        for (i, lb) in resources.load_balancers.iter().enumerate() {
            Self::validate_load_balancer(lb, &format!("resources.load_balancers[{i}]"), &subnet_names, result);
        }

        let dependencies = std::iter::once(("resources.network", &resources.network.depends_on))
            .chain(resources.subnets.iter().map(|s| ("resources.subnets", &s.depends_on)))
            .chain(
                resources
                    .load_balancers
                    .iter()
                    .map(|l| ("resources.load_balancers", &l.depends_on)),
            );
        for (prefix, depends_on) in dependencies {
            for dep in depends_on {
                if !seen.contains(dep.as_str()) {
                    result.error(
                        format!("{prefix}.depends_on"),
                        format!("Unknown dependency '{dep}'"),
                    );
                }
            }
        }
    }

    /// Names of one kind must stay distinct once reduced to the characters
    /// every document format keeps.
    fn validate_document_keys<'a>(
        field: &str,
        names: impl Iterator<Item = &'a str>,
        result: &mut ValidationResult,
    ) {
        let mut keys: HashMap<String, &str> = HashMap::new();
        for name in names {
            let key: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
            match keys.get(&key) {
                Some(other) if *other != name => result.error(
                    field,
                    format!("Resource names '{other}' and '{name}' collide in emitted documents"),
                ),
                Some(_) => {}
                None => {
                    keys.insert(key, name);
                }
            }
        }
    }

    fn validate_subnets(
        subnets: &[SubnetConfig],
        network: Option<Cidr>,
        result: &mut ValidationResult,
    ) {
        let mut ranges: Vec<(&str, Cidr)> = Vec::new();
        for (i, subnet) in subnets.iter().enumerate() {
            let prefix = format!("resources.subnets[{i}]");

            if subnet.zone.is_empty() {
                result.error(format!("{prefix}.zone"), "Zone cannot be empty");
            }

            let Some(cidr) = Cidr::parse(&subnet.cidr) else {
                result.error(format!("{prefix}.cidr"), format!("Invalid CIDR '{}'", subnet.cidr));
                continue;
            };
            if let Some(network) = network {
                if !network.contains(cidr) {
                    result.error(
                        format!("{prefix}.cidr"),
                        format!("Subnet range {} is outside the network range", subnet.cidr),
                    );
                }
            }
            if let Some((other, _)) = ranges.iter().find(|(_, r)| r.overlaps(cidr)) {
                result.error(
                    format!("{prefix}.cidr"),
                    format!("Subnet range {} overlaps subnet '{other}'", subnet.cidr),
                );
            }
            ranges.push((subnet.name.as_str(), cidr));
        }
    }

    fn validate_load_balancer(
        lb: &LoadBalancerConfig,
        prefix: &str,
        subnets: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        if lb.subnets.is_empty() {
            result.error(format!("{prefix}.subnets"), "At least one subnet is required");
        } else if lb.subnets.len() == 1 {
            result.warnings.push(format!(
                "{prefix}.subnets: a single subnet leaves '{}' in one zone",
                lb.name
            ));
        }
        for subnet in &lb.subnets {
            if !subnets.contains(subnet.as_str()) {
                result.error(
                    format!("{prefix}.subnets"),
                    format!("Unknown subnet '{subnet}'"),
                );
            }
        }

        if lb.listeners.is_empty() {
            result.error(format!("{prefix}.listeners"), "At least one listener is required");
        }
        let mut ports = HashSet::new();
        for listener in &lb.listeners {
            if !ports.insert(listener.port) {
                result.error(
                    format!("{prefix}.listeners"),
                    format!("Duplicate listener port {}", listener.port),
                );
            }
        }
    }
}

/// Checks if a name is valid for resources and clusters.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn config(resources: &str) -> RunConfig {
        let yaml = format!("cluster:\n  name: prod\nresources:\n{resources}");
        ConfigParser::parse_yaml(&yaml, None).unwrap()
    }

    const VALID: &str = r"
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: subnet-a
      cidr: 172.20.32.0/19
      zone: us-east-1a
    - name: subnet-b
      cidr: 172.20.64.0/19
      zone: us-east-1b
  load_balancers:
    - name: api
      subnets: [subnet-a, subnet-b]
      listeners: ['443']
";

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&config(VALID)).unwrap();
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_invalid_cidr() {
        let result = ConfigValidator::new().check(&config(
            "  network:\n    name: vpc\n    cidr: 172.20.0.0/40\n",
        ));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "resources.network.cidr");
    }

    #[test]
    fn test_subnet_outside_network() {
        let yaml = r"
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: subnet-a
      cidr: 10.0.0.0/24
      zone: us-east-1a
";
        let result = ConfigValidator::new().check(&config(yaml));
        assert!(result.errors.iter().any(|e| e.message.contains("outside")));
    }

    #[test]
    fn test_overlapping_subnets() {
        let yaml = r"
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: subnet-a
      cidr: 172.20.0.0/19
      zone: us-east-1a
    - name: subnet-b
      cidr: 172.20.16.0/20
      zone: us-east-1b
";
        let result = ConfigValidator::new().check(&config(yaml));
        assert!(result.errors.iter().any(|e| e.message.contains("overlaps subnet 'subnet-a'")));
    }

    #[test]
    fn test_duplicate_names_and_unknown_references() {
        let yaml = r"
  network:
    name: vpc
    cidr: 172.20.0.0/16
    depends_on: [missing]
  subnets:
    - name: vpc
      cidr: 172.20.32.0/19
      zone: us-east-1a
  load_balancers:
    - name: api
      subnets: [subnet-z]
      listeners: ['443', '443/tcp']
";
        let result = ConfigValidator::new().check(&config(yaml));
        let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"Duplicate resource name: vpc"));
        assert!(messages.contains(&"Unknown subnet 'subnet-z'"));
        assert!(messages.contains(&"Unknown dependency 'missing'"));
        assert!(messages.contains(&"Duplicate listener port 443"));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_names_colliding_in_documents() {
        let yaml = r"
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: zone.a
      cidr: 172.20.32.0/19
      zone: us-east-1a
    - name: zone-a
      cidr: 172.20.64.0/19
      zone: us-east-1b
  load_balancers:
    - name: zonea
      subnets: [zone.a, zone-a]
      listeners: ['443']
";
        let result = ConfigValidator::new().check(&config(yaml));
        let collisions: Vec<&ValidationError> = result
            .errors
            .iter()
            .filter(|e| e.message.contains("collide"))
            .collect();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].field, "resources.subnets");
        assert!(collisions[0].message.contains("'zone.a' and 'zone-a'"));
    }

    #[test]
    fn test_zero_concurrency_fails_validation() {
        let mut cfg = config(VALID);
        cfg.engine.max_concurrency = 0;
        let err = ConfigValidator::new().validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("Concurrency must be at least 1"));
    }

    #[test]
    fn test_cidr_containment() {
        let net = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(net.contains(Cidr::parse("10.1.0.0/16").unwrap()));
        assert!(!net.contains(Cidr::parse("11.0.0.0/16").unwrap()));
        assert!(Cidr::parse("0.0.0.0/0").unwrap().contains(net));
        assert!(Cidr::parse("10.0.0.0").is_none());
    }
}
