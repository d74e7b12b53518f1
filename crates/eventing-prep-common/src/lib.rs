//! Shared types and utilities for eventing test preparation
//!
//! This crate holds the pieces every other crate in the workspace leans on:
//!
//! - [`error`] - The error taxonomy (transient, conflict, timeout, preparation)
//! - [`retry`] - Retry with optional exponential backoff and jitter
//! - [`kube_utils`] - Client creation, dynamic resources, create-if-absent, polling
//! - [`telemetry`] - Tracing subscriber setup

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

// =============================================================================
// Shared Constants
// =============================================================================

/// Field manager used for every server-side apply issued by this tool
pub const FIELD_MANAGER: &str = "eventing-test-prep";

/// Namespace hosting the Kyma system components (NATS, eventing manager)
pub const KYMA_SYSTEM_NAMESPACE: &str = "kyma-system";

/// Label key for the application name (Kubernetes recommended label)
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label key marking resources created for the eventing tests
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for [`LABEL_MANAGED_BY`] on resources created by this tool
pub const LABEL_MANAGED_BY_PREP: &str = "eventing-test-prep";
