// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![warn(warnings)]                    // All warnings are reported
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Convergent
//!
//! A declarative, idempotent task reconciliation engine for cluster cloud
//! infrastructure.
//!
//! ## Overview
//!
//! Each resource is a **task** that knows how to find its live counterpart,
//! compare it field by field with the desired state, and render the
//! difference. The same task set can be:
//!
//! - Applied directly through a cloud API
//! - Planned as a dry run, with a human-readable change report
//! - Emitted as a Terraform or CloudFormation document
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `convergent.yaml`
//! 2. **Observed State**: Queried through the [`cloud::Cloud`] handle
//! 3. **Engine**: Orders tasks by dependency, diffs and renders them
//!    concurrently, retrying transient failures
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`engine`]: Task model, diffing, dependency graph and scheduler
//! - [`target`]: Live, dry-run and document targets
//! - [`cloud`]: Cloud capability handle and simulated clouds
//! - [`resources`]: Network, subnet and load balancer tasks
//! - [`reconciler`]: Run orchestration, drift checks and address discovery
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: prod
//! target: terraform
//!
//! resources:
//!   network:
//!     name: vpc
//!     cidr: 172.20.0.0/16
//!   subnets:
//!     - name: subnet-a
//!       cidr: 172.20.32.0/19
//!       zone: us-east-1a
//!   load_balancers:
//!     - name: api
//!       subnets: [subnet-a]
//!       listeners: ["443/tcp"]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod resources;
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{Cloud, CloudResource, LocalCloud, MemoryCloud};
pub use config::{ConfigParser, ConfigValidator, RunConfig};
pub use engine::{Context, Engine, EngineOptions, RunReport, Task, TaskSet, TaskStatus};
pub use error::{ConvergeError, Result};
pub use reconciler::{DriftReport, Reconciler, RunOutcome};
pub use resources::{LoadBalancer, Network, Subnet, build_tasks, default_registry};
pub use target::{RenderRegistry, Target, TargetKind, TargetOutput};
