//! Error types for the convergence engine.
//!
//! Errors are layered the way the engine interprets them: pre-flight
//! errors ([`GraphError`], [`TargetError::RenderUnsupported`]) abort a run
//! before anything is observed, [`TaskError`] values fail a single task
//! (and, transitively, its dependents), and retryable conditions are
//! consumed by the scheduler's backoff loop.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the convergence engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph errors.
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Target errors.
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Task errors surfaced outside a run (e.g. address discovery).
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Cloud errors.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override could not be applied.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Errors raised while building the dependency graph.
///
/// All of these are static: they are reported before any task is observed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The declared dependencies form a cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyCycle {
        /// Task names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A task references itself.
    #[error("Task '{task}' depends on itself")]
    SelfReference {
        /// The offending task.
        task: String,
    },

    /// A task references a name that is not in the task set.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The referencing task.
        task: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two tasks share a name.
    #[error("Duplicate task name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },
}

/// Errors raised by rendering targets.
#[derive(Debug, Error)]
pub enum TargetError {
    /// No renderer exists for this task kind on the active target.
    #[error("Task kind '{task_kind}' cannot be rendered by the {target_kind} target")]
    RenderUnsupported {
        /// Kind of the task.
        task_kind: String,
        /// Kind of the target.
        target_kind: String,
    },

    /// A document would link to a task that is not emitted into it and has
    /// no provider ID to use instead.
    #[error("Task '{task}' references '{reference}', which is not emitted and has no provider ID")]
    UnresolvableLink {
        /// The referencing task.
        task: String,
        /// The referenced task.
        reference: String,
    },

    /// The target was already finalized.
    #[error("Target has already been finalized")]
    AlreadyFinalized,

    /// A resource block with the same address was already emitted.
    #[error("Resource {resource_type}.{name} was rendered twice")]
    DuplicateResource {
        /// Resource type in the emitted document.
        resource_type: String,
        /// Resource name in the emitted document.
        name: String,
    },

    /// The renderer was handed a task or target of the wrong type.
    #[error("Renderer type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The document could not be serialized.
    #[error("Failed to serialize document: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The document could not be written.
    #[error("Failed to write {path}: {message}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Description of the IO error.
        message: String,
    },
}

/// Errors returned by the lifecycle calls of a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A mandatory attribute is absent at creation time.
    #[error("Field is required: {0}")]
    RequiredField(String),

    /// The change touches an attribute that is immutable once created.
    #[error("Field cannot be changed: {0}")]
    CannotChangeField(String),

    /// The operation should be retried after a delay.
    #[error("Try again later: {0}")]
    TryAgainLater(String),

    /// The lifecycle requires the resource to exist, but it does not.
    #[error("Resource {kind} '{name}' was not found")]
    NotFound {
        /// Kind of the task.
        kind: String,
        /// Name of the task.
        name: String,
    },

    /// The lifecycle forbids applying changes.
    #[error("Resource '{name}' differs from its specification in: {}", fields.join(", "))]
    ChangesNotAllowed {
        /// Name of the task.
        name: String,
        /// Fields that differ.
        fields: Vec<String>,
    },

    /// A referenced task has no known provider identifier.
    #[error("Reference to '{reference}' could not be resolved to a provider ID")]
    UnresolvedReference {
        /// The referenced task name.
        reference: String,
    },

    /// Cloud call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Target failed to accept the render.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Errors returned by cloud capability handles.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// The resource does not exist.
    #[error("Cloud resource not found: {id}")]
    NotFound {
        /// ID or name that was looked up.
        id: String,
    },

    /// The provider is rate limiting requests.
    #[error("Cloud API throttled, retry after {retry_after_ms}ms")]
    Throttled {
        /// Suggested wait in milliseconds.
        retry_after_ms: u64,
    },

    /// A dependent object is not yet visible (eventual consistency).
    #[error("Dependent object not yet visible: {message}")]
    NotYetVisible {
        /// What is not visible yet.
        message: String,
    },

    /// The caller lacks permission.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description from the provider.
        message: String,
    },

    /// The request conflicts with existing state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Provider-side failure.
    #[error("Cloud internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error aborts a run before any task is touched.
    #[must_use]
    pub const fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Graph(_)
                | Self::Target(
                    TargetError::RenderUnsupported { .. } | TargetError::UnresolvableLink { .. }
                )
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl TaskError {
    /// Shorthand for [`TaskError::RequiredField`].
    #[must_use]
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredField(field.into())
    }

    /// Shorthand for [`TaskError::CannotChangeField`].
    #[must_use]
    pub fn cannot_change(field: impl Into<String>) -> Self {
        Self::CannotChangeField(field.into())
    }

    /// Returns true if the scheduler should retry the task.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::TryAgainLater(_) => true,
            Self::Cloud(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the delay the error itself asks for, if any.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Cloud(e) => e.retry_delay(),
            _ => None,
        }
    }
}

impl CloudError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-yet-visible error.
    #[must_use]
    pub fn not_yet_visible(message: impl Into<String>) -> Self {
        Self::NotYetVisible {
            message: message.into(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::NotYetVisible { .. })
    }

    /// Returns the suggested retry delay, if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }
}

impl TargetError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}
