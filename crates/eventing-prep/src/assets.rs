//! Test asset preparation
//!
//! Chooses between deploying the commerce mock standalone or through the
//! Compass registry. Exactly one path runs per call.

use std::fmt;

use tracing::info;

use eventing_prep_common::retry::{retry_with_backoff, RetryConfig};
use eventing_prep_common::Error;
use eventing_prep_compass::{ensure_scenario_registered, RegistryClient};

use crate::fixture::MockFixture;
use crate::runtime::RuntimeResolver;

/// Which preparation path ran
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetPath {
    /// Mock deployed without the registry
    Local,
    /// Scenario registered and mock attached through the registry
    Registry,
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Registry => write!(f, "registry"),
        }
    }
}

/// Inputs of the no-registry path
#[derive(Clone, Debug)]
pub struct LocalAssets {
    /// Namespace for the mock
    pub mock_namespace: String,
    /// Namespace for the test resources
    pub test_namespace: String,
    /// Prepare for v1alpha2 subscriptions as well
    pub with_v1alpha2: bool,
    /// EventMesh namespace recorded by the backend Secret step
    pub event_source_namespace: Option<String>,
}

/// Inputs and collaborators of the registry path
pub struct RegistryAssets<'a> {
    /// Registry holding scenarios and runtime associations
    pub registry: &'a dyn RegistryClient,
    /// Resolves the runtime identity from the shoot name
    pub runtimes: &'a dyn RuntimeResolver,
    /// Gardener shoot of the runtime
    pub shoot_name: &'a str,
    /// Scenario linking runtime and mock application
    pub scenario: &'a str,
    /// Mock application name
    pub app_name: &'a str,
}

/// What to prepare
pub enum AssetPlan<'a> {
    /// Deploy the mock standalone
    Local(LocalAssets),
    /// Register the scenario, then deploy the mock through the registry
    Registry {
        /// Namespaces as for the local path
        namespaces: LocalAssets,
        /// Registry inputs
        registry: RegistryAssets<'a>,
    },
}

/// Run exactly one asset preparation path.
///
/// The no-registry path gets one immediate fresh retry; a second failure
/// surfaces as [`Error::Preparation`] carrying the cause. The registry path
/// is not retried: its sub-steps are individually idempotent. A failure in
/// any of its stages surfaces as [`Error::Preparation`] naming the stage.
pub async fn prepare_assets(
    fixture: &dyn MockFixture,
    plan: AssetPlan<'_>,
) -> Result<AssetPath, Error> {
    match plan {
        AssetPlan::Local(local) => {
            prepare_local(fixture, &local).await?;
            Ok(AssetPath::Local)
        }
        AssetPlan::Registry {
            namespaces,
            registry,
        } => {
            prepare_with_registry(fixture, &namespaces, &registry).await?;
            Ok(AssetPath::Registry)
        }
    }
}

async fn prepare_local(fixture: &dyn MockFixture, local: &LocalAssets) -> Result<(), Error> {
    retry_with_backoff(&RetryConfig::single_retry(), "ensure_local_fixture", move || {
        fixture.ensure_local(
            &local.mock_namespace,
            &local.test_namespace,
            local.with_v1alpha2,
            local.event_source_namespace.clone(),
        )
    })
    .await
    .map_err(|e| Error::preparation("ensure_local_fixture", e.to_string()))?;

    info!(namespace = %local.mock_namespace, "Prepared assets without Compass");
    Ok(())
}

async fn prepare_with_registry(
    fixture: &dyn MockFixture,
    namespaces: &LocalAssets,
    registry: &RegistryAssets<'_>,
) -> Result<(), Error> {
    let runtime_id = registry
        .runtimes
        .runtime_id(registry.shoot_name)
        .await
        .map_err(|e| Error::preparation("resolve_runtime_id", e.to_string()))?;

    let report = ensure_scenario_registered(registry.registry, registry.scenario, &runtime_id)
        .await
        .map_err(|e| Error::preparation("ensure_scenario_registered", e.to_string()))?;
    if report.scenario_preexisted() {
        info!(scenario = %registry.scenario, "Scenario already existed in Compass");
    }

    fixture
        .ensure_with_registry(
            registry.app_name,
            registry.scenario,
            &namespaces.mock_namespace,
            &namespaces.test_namespace,
            report.scenario_preexisted(),
        )
        .await
        .map_err(|e| Error::preparation("ensure_with_registry", e.to_string()))?;

    info!(
        scenario = %registry.scenario,
        runtime_id = %runtime_id,
        "Prepared assets with Compass"
    );
    Ok(())
}
