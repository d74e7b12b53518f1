//! Error types for eventing test preparation
//!
//! Errors are structured with fields so that a failed step report names the
//! operation that failed and why. Conflicts are a distinct variant because
//! every create-if-absent path treats them as success.

use thiserror::Error;

/// Main error type for preparation operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not a conflict
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A call to the cluster API, the registry or an HTTP endpoint failed
    #[error("network error [{operation}]: {message}")]
    TransientNetwork {
        /// Operation that issued the call (e.g., "add_scenario")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Create-if-absent target already exists
    #[error("already exists: {resource}")]
    Conflict {
        /// Resource that already exists (e.g., "scenario skr-scenario-1")
        resource: String,
    },

    /// A bounded wait exhausted its budget
    #[error("timed out [{operation}] after {attempts} attempt(s): {message}")]
    Timeout {
        /// Operation being waited on
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Last observed failure
        message: String,
    },

    /// Scenario registration failed in a specific sub-step
    #[error("scenario registration failed in {sub_step}: {message}")]
    Registration {
        /// Sub-step that failed (e.g., "assign_runtime")
        sub_step: String,
        /// Underlying cause
        message: String,
    },

    /// Unrecoverable failure while preparing test assets
    #[error("preparation failed in {step}: {message}")]
    Preparation {
        /// Preparation sub-step that failed
        step: String,
        /// Underlying cause
        message: String,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// One or more sequencer steps failed
    #[error("{} step(s) failed: {}", failed.len(), failed.join(", "))]
    StepsFailed {
        /// Names of the failed steps in execution order
        failed: Vec<String>,
    },
}

impl Error {
    /// Create a network error for the given operation
    pub fn network(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientNetwork {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a conflict error for an already existing resource
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, attempts: u32, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            attempts,
            message: msg.into(),
        }
    }

    /// Create a registration error naming the failed sub-step
    pub fn registration(sub_step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Registration {
            sub_step: sub_step.into(),
            message: msg.into(),
        }
    }

    /// Create a preparation error naming the failed step
    pub fn preparation(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Preparation {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Returns true if this error means the target already exists
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube {
                source: kube::Error::Api(resp),
            } => resp.code == 409,
            _ => false,
        }
    }

    /// Returns true if this error means the target does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Kube {
                source: kube::Error::Api(resp)
            } if resp.code == 404
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let operation = e
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "http".to_string());
        Self::network(operation, e.to_string())
    }
}
