//! Orchestrating sequencer
//!
//! Runs the fixed preparation plan. Skip decisions are computed up front
//! from [`StepFlags`]; each step runs independently so one failure does not
//! stop the rest. A failed step triggers a full cleanup, and the NATS
//! APIRule exposed before the first step is always removed at the end.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use eventing_prep_common::{Error, KYMA_SYSTEM_NAMESPACE};
use eventing_prep_compass::RegistryClient;

use crate::assets::{prepare_assets, AssetPath, AssetPlan, LocalAssets, RegistryAssets};
use crate::broker::BrokerIntrospector;
use crate::cleanup::Cleanup;
use crate::cluster::{backend_secret_payload, ClusterOps};
use crate::config::{RunConfiguration, StepFlags};
use crate::fixture::MockFixture;
use crate::functions::{FunctionOps, SubscriptionVersion};
use crate::reachability::wait_until_reachable;
use crate::runtime::{KubeconfigSource, RuntimeResolver};

// =============================================================================
// Plan
// =============================================================================

/// The preparation steps, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Log the run configuration
    PrintConfig,
    /// Switch to the managed runtime's kubeconfig
    PrepareSkrKubeconfig,
    /// Create the EventMesh backend Secret
    PrepareEventMeshSecret,
    /// Capture the JetStream baseline
    PrepareJetStreamConfigMap,
    /// Deploy the mock without the registry
    PrepareAssetsLocal,
    /// Deploy the mock through the registry
    PrepareAssetsWithCompass,
    /// Deploy the sink function and wait for it
    PrepareSinkFunction,
    /// Probe the sink function through its APIRule
    SinkReachable,
    /// Deploy v1alpha1 subscriptions
    SubscriptionsV1Alpha1,
    /// Deploy v1alpha2 subscriptions
    SubscriptionsV1Alpha2,
}

impl StepKind {
    /// Every step in execution order
    pub const ALL: [StepKind; 10] = [
        StepKind::PrintConfig,
        StepKind::PrepareSkrKubeconfig,
        StepKind::PrepareEventMeshSecret,
        StepKind::PrepareJetStreamConfigMap,
        StepKind::PrepareAssetsLocal,
        StepKind::PrepareAssetsWithCompass,
        StepKind::PrepareSinkFunction,
        StepKind::SinkReachable,
        StepKind::SubscriptionsV1Alpha1,
        StepKind::SubscriptionsV1Alpha2,
    ];

    /// Label used in logs and the run summary
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrintConfig => "Print test initial configs",
            Self::PrepareSkrKubeconfig => "Prepare SKR kubeconfig if needed",
            Self::PrepareEventMeshSecret => "Prepare EventMesh secret",
            Self::PrepareJetStreamConfigMap => "Prepare JetStream data configmap",
            Self::PrepareAssetsLocal => "Prepare assets without Compass flow",
            Self::PrepareAssetsWithCompass => "Prepare assets with Compass flow",
            Self::PrepareSinkFunction => "Prepare eventing-sink function",
            Self::SinkReachable => "Eventing-sink function should be reachable through API Rule",
            Self::SubscriptionsV1Alpha1 => "Prepare v1alpha1 subscriptions",
            Self::SubscriptionsV1Alpha2 => "Prepare v1alpha2 subscriptions",
        }
    }

    /// Why this step is skipped under `flags`, if it is
    fn skip_reason(&self, flags: &StepFlags) -> Option<&'static str> {
        match self {
            Self::PrepareSkrKubeconfig if !flags.is_skr => Some("not a managed runtime"),
            Self::PrepareSkrKubeconfig if !flags.has_skr_instance_id => {
                Some("SKR instance ID is not set")
            }
            Self::PrepareEventMeshSecret if !flags.has_backend_secret_file => {
                Some("no EventMesh secret file, using the existing backend secret")
            }
            Self::PrepareAssetsLocal if flags.test_compass_flow => Some("Compass flow enabled"),
            Self::PrepareAssetsWithCompass if !flags.test_compass_flow => {
                Some("Compass flow disabled")
            }
            Self::SubscriptionsV1Alpha2 if !flags.test_subscription_v1alpha2 => {
                Some("v1alpha2 subscriptions disabled")
            }
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A planned step with its precomputed skip decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Which step
    pub kind: StepKind,
    /// Set when the step will not run
    pub skip: Option<&'static str>,
}

/// Compute the run plan before any step executes
pub fn plan(flags: &StepFlags) -> Vec<StepDescriptor> {
    StepKind::ALL
        .iter()
        .map(|kind| StepDescriptor {
            kind: *kind,
            skip: kind.skip_reason(flags),
        })
        .collect()
}

// =============================================================================
// Reports
// =============================================================================

/// Result of one step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Ran and succeeded
    Passed,
    /// Not run
    Skipped {
        /// Why
        reason: String,
    },
    /// Ran and failed
    Failed {
        /// What went wrong
        error: String,
    },
}

/// One line of the run summary
#[derive(Clone, Debug)]
pub struct StepReport {
    /// Which step
    pub kind: StepKind,
    /// How it ended
    pub outcome: StepOutcome,
    /// Wall time spent in the step
    pub duration: Duration,
}

/// Everything a run produced
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// One entry per planned step, in order
    pub steps: Vec<StepReport>,
    /// Asset path taken, if assets were prepared
    pub asset_path: Option<AssetPath>,
}

impl RunReport {
    /// Outcome of a step, if it was planned
    pub fn outcome(&self, kind: StepKind) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.kind == kind).map(|s| &s.outcome)
    }

    /// Names of failed steps
    pub fn failed(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .map(|s| s.kind.name().to_string())
            .collect()
    }

    /// Log the run summary table
    pub fn log_summary(&self) {
        let total: Duration = self.steps.iter().map(|s| s.duration).sum();
        let count = |f: fn(&StepOutcome) -> bool| {
            self.steps.iter().filter(|s| f(&s.outcome)).count()
        };
        let passed = count(|o| matches!(o, StepOutcome::Passed));
        let skipped = count(|o| matches!(o, StepOutcome::Skipped { .. }));
        let failed = count(|o| matches!(o, StepOutcome::Failed { .. }));

        info!("========================================");
        info!("  EVENTING TESTS PREPARATION");
        info!("========================================");
        for s in &self.steps {
            let tag = match s.outcome {
                StepOutcome::Passed => "PASS",
                StepOutcome::Skipped { .. } => "SKIP",
                StepOutcome::Failed { .. } => "FAIL",
            };
            info!("  {tag}  {:62} {:.1}s", s.kind.name(), s.duration.as_secs_f64());
            match &s.outcome {
                StepOutcome::Skipped { reason } => info!("        -> {reason}"),
                StepOutcome::Failed { error } => {
                    // Keep the summary readable
                    let truncated: String = error.chars().take(200).collect();
                    info!("        -> {truncated}");
                }
                StepOutcome::Passed => {}
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} skipped, {} failed ({:.1}s total)",
            passed,
            skipped,
            failed,
            total.as_secs_f64()
        );
        info!("========================================");
    }

    /// `Ok` if no step failed, otherwise [`Error::StepsFailed`]
    pub fn into_result(self) -> Result<RunReport, Error> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(Error::StepsFailed { failed })
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Everything the steps talk to
#[derive(Clone)]
pub struct Collaborators {
    /// APIRules, Secrets and ConfigMaps
    pub cluster: Arc<dyn ClusterOps>,
    /// JetStream baseline
    pub broker: Arc<dyn BrokerIntrospector>,
    /// Sink function and subscriptions
    pub functions: Arc<dyn FunctionOps>,
    /// Commerce mock
    pub fixture: Arc<dyn MockFixture>,
    /// Teardown after a failed step
    pub cleanup: Arc<dyn Cleanup>,
    /// Compass registry, required for the Compass flow
    pub registry: Option<Arc<dyn RegistryClient>>,
    /// Runtime identity lookup, required for the Compass flow
    pub runtimes: Option<Arc<dyn RuntimeResolver>>,
    /// Managed runtime kubeconfig, required on SKR with an instance ID
    pub kubeconfigs: Option<Arc<dyn KubeconfigSource>>,
}

/// Values produced by one step and consumed by a later one
#[derive(Debug, Default)]
struct RunState {
    nats_host: String,
    event_source_namespace: Option<String>,
    asset_path: Option<AssetPath>,
}

/// One preparation run
pub struct Preparation {
    config: RunConfiguration,
    deps: Collaborators,
}

impl Preparation {
    /// Prepare a run over the given configuration and collaborators
    pub fn new(config: RunConfiguration, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    /// Run every step and fail if any step failed
    pub async fn run(&self) -> Result<RunReport, Error> {
        self.execute().await?.into_result()
    }

    /// Run every step and return the report.
    ///
    /// Errors only if the NATS monitoring endpoint cannot be exposed, in
    /// which case no step runs.
    pub async fn execute(&self) -> Result<RunReport, Error> {
        let mut state = RunState::default();

        if let Err(e) = self.before(&mut state).await {
            error!(error = %e, "Failed to expose NATS, aborting run");
            self.after().await;
            return Err(e);
        }

        let mut report = RunReport::default();
        for step in plan(&self.config.step_flags()) {
            report.steps.push(self.run_step(&step, &mut state).await);
        }
        report.asset_path = state.asset_path;

        self.after().await;
        report.log_summary();
        Ok(report)
    }

    async fn before(&self, state: &mut RunState) -> Result<(), Error> {
        debug!("Exposing the eventing-nats service with an APIRule");
        let rule = self
            .deps
            .cluster
            .create_ingress_rule(
                &self.config.nats_apirule_name,
                KYMA_SYSTEM_NAMESPACE,
                &self.config.nats_service,
                self.config.nats_port,
            )
            .await?;
        state.nats_host = rule.host;
        Ok(())
    }

    async fn after(&self) {
        if let Err(e) = self
            .deps
            .cluster
            .delete_ingress_rule(&self.config.nats_apirule_name, KYMA_SYSTEM_NAMESPACE)
            .await
        {
            warn!(
                apirule = %self.config.nats_apirule_name,
                error = %e,
                "Failed to delete NATS APIRule"
            );
        }
    }

    async fn run_step(&self, step: &StepDescriptor, state: &mut RunState) -> StepReport {
        if let Some(reason) = step.skip {
            info!(step = %step.kind, reason = %reason, "Skipping step");
            return StepReport {
                kind: step.kind,
                outcome: StepOutcome::Skipped {
                    reason: reason.to_string(),
                },
                duration: Duration::ZERO,
            };
        }

        info!(step = %step.kind, "Running step");
        let start = Instant::now();
        let result = AssertUnwindSafe(self.step_body(step.kind, state))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(Ok(())) => StepOutcome::Passed,
            Ok(Err(e)) => StepOutcome::Failed {
                error: e.to_string(),
            },
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                StepOutcome::Failed {
                    error: format!("PANIC: {msg}"),
                }
            }
        };

        if let StepOutcome::Failed { error } = &outcome {
            error!(step = %step.kind, error = %error, "Step failed, cleaning up test resources");
            if let Err(e) = self.deps.cleanup.cleanup_all().await {
                warn!(step = %step.kind, error = %e, "Cleanup after failed step did not complete");
            }
        }

        StepReport {
            kind: step.kind,
            outcome,
            duration: start.elapsed(),
        }
    }

    async fn step_body(&self, kind: StepKind, state: &mut RunState) -> Result<(), Error> {
        let config = &self.config;
        match kind {
            StepKind::PrintConfig => {
                info!(
                    mock_namespace = %config.mock_namespace,
                    test_namespace = %config.test_namespace,
                    kyma_version = %config.kyma_version,
                    is_skr = config.is_skr,
                    skr_instance_id = %config.skr_instance_id,
                    shoot_name = %config.shoot_name,
                    test_compass_flow = config.test_compass_flow,
                    test_subscription_v1alpha2 = config.test_subscription_v1alpha2,
                    subscription_crd_version = %config.subscription_crd_version,
                    "Test initial configs"
                );
                Ok(())
            }
            StepKind::PrepareSkrKubeconfig => {
                let source = self
                    .deps
                    .kubeconfigs
                    .as_ref()
                    .ok_or_else(|| Error::config("SKR kubeconfig requires KEB_URL"))?;
                debug!(instance_id = %config.skr_instance_id, "Fetching SKR kubeconfig");
                source.activate_runtime(&config.skr_instance_id).await
            }
            StepKind::PrepareEventMeshSecret => {
                let path = config
                    .backend_secret_file
                    .as_deref()
                    .ok_or_else(|| Error::config("EventMesh secret file is not set"))?;
                let payload = read_service_key(path).await?;
                let secret = self
                    .deps
                    .cluster
                    .create_secret(
                        &payload,
                        &config.backend_secret_name,
                        &config.backend_secret_namespace,
                    )
                    .await?;
                state.event_source_namespace = secret.event_source_namespace;
                Ok(())
            }
            StepKind::PrepareJetStreamConfigMap => {
                match self.deps.broker.stream_snapshot(&state.nats_host).await? {
                    Some(stream) => {
                        self.deps
                            .cluster
                            .create_config_map(
                                &stream.to_config_map_data()?,
                                &config.test_data_configmap,
                                &config.test_data_namespace,
                            )
                            .await
                    }
                    None => {
                        debug!(
                            stream = %config.stream_name,
                            "Skipping test data configmap, stream does not exist"
                        );
                        Ok(())
                    }
                }
            }
            StepKind::PrepareAssetsLocal => {
                let plan = AssetPlan::Local(self.local_assets(state));
                state.asset_path = Some(prepare_assets(self.deps.fixture.as_ref(), plan).await?);
                Ok(())
            }
            StepKind::PrepareAssetsWithCompass => {
                let missing =
                    || Error::config("Compass flow requires DIRECTOR_URL and a Gardener kubeconfig");
                let registry = self.deps.registry.as_deref().ok_or_else(missing)?;
                let runtimes = self.deps.runtimes.as_deref().ok_or_else(missing)?;
                let plan = AssetPlan::Registry {
                    namespaces: self.local_assets(state),
                    registry: RegistryAssets {
                        registry,
                        runtimes,
                        shoot_name: &config.shoot_name,
                        scenario: &config.scenario_name,
                        app_name: &config.app_name,
                    },
                };
                state.asset_path = Some(prepare_assets(self.deps.fixture.as_ref(), plan).await?);
                Ok(())
            }
            StepKind::PrepareSinkFunction => {
                self.deps.functions.deploy_sink_function().await?;
                self.deps.functions.wait_for_sink_function().await
            }
            StepKind::SinkReachable => {
                wait_until_reachable(
                    self.deps.functions.as_ref(),
                    &config.sink_name,
                    &config.test_namespace,
                    config.reachability,
                )
                .await?;
                Ok(())
            }
            StepKind::SubscriptionsV1Alpha1 => {
                self.deploy_subscriptions(SubscriptionVersion::V1Alpha1, state)
                    .await
            }
            StepKind::SubscriptionsV1Alpha2 => {
                self.deploy_subscriptions(SubscriptionVersion::V1Alpha2, state)
                    .await
            }
        }
    }

    fn local_assets(&self, state: &RunState) -> LocalAssets {
        LocalAssets {
            mock_namespace: self.config.mock_namespace.clone(),
            test_namespace: self.config.test_namespace.clone(),
            with_v1alpha2: self.config.test_subscription_v1alpha2,
            event_source_namespace: state.event_source_namespace.clone(),
        }
    }

    async fn deploy_subscriptions(
        &self,
        version: SubscriptionVersion,
        state: &RunState,
    ) -> Result<(), Error> {
        let source = state.event_source_namespace.as_deref().unwrap_or_default();
        self.deps
            .functions
            .deploy_subscriptions(version, source)
            .await
    }
}

/// Read a service key file into backend Secret data
async fn read_service_key(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    let key: serde_json::Value = serde_json::from_str(&raw)?;
    backend_secret_payload(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn flags() -> StepFlags {
        StepFlags::default()
    }

    fn skipped(plan: &[StepDescriptor]) -> Vec<StepKind> {
        plan.iter()
            .filter(|s| s.skip.is_some())
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn plan_lists_every_step_in_order() {
        let plan = plan(&flags());
        let kinds: Vec<_> = plan.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StepKind::ALL.to_vec());
        assert_eq!(plan[0].kind.name(), "Print test initial configs");
        assert_eq!(
            plan[7].kind.name(),
            "Eventing-sink function should be reachable through API Rule"
        );
    }

    #[test]
    fn default_flags_skip_optional_steps() {
        assert_eq!(
            skipped(&plan(&flags())),
            vec![
                StepKind::PrepareSkrKubeconfig,
                StepKind::PrepareEventMeshSecret,
                StepKind::PrepareAssetsWithCompass,
                StepKind::SubscriptionsV1Alpha2,
            ]
        );
    }

    #[rstest]
    #[case(false, false)]
    #[case(true, false)]
    #[case(false, true)]
    #[case(true, true)]
    fn exactly_one_asset_step_runs(#[case] compass: bool, #[case] skr: bool) {
        let plan = plan(&StepFlags {
            test_compass_flow: compass,
            is_skr: skr,
            ..flags()
        });
        let running: Vec<_> = plan
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    StepKind::PrepareAssetsLocal | StepKind::PrepareAssetsWithCompass
                ) && s.skip.is_none()
            })
            .map(|s| s.kind)
            .collect();
        let expected = if compass {
            StepKind::PrepareAssetsWithCompass
        } else {
            StepKind::PrepareAssetsLocal
        };
        assert_eq!(running, vec![expected]);
    }

    #[test]
    fn skr_without_instance_id_is_skipped_with_reason() {
        let plan = plan(&StepFlags {
            is_skr: true,
            ..flags()
        });
        assert_eq!(plan[1].skip, Some("SKR instance ID is not set"));

        let plan = super::plan(&StepFlags {
            is_skr: true,
            has_skr_instance_id: true,
            ..flags()
        });
        assert_eq!(plan[1].skip, None);
    }

    #[test]
    fn print_config_and_sink_steps_are_never_skipped() {
        let all_on = StepFlags {
            is_skr: true,
            has_skr_instance_id: true,
            has_backend_secret_file: true,
            test_compass_flow: true,
            test_subscription_v1alpha2: true,
        };
        for flags in [flags(), all_on] {
            let plan = plan(&flags);
            for kind in [
                StepKind::PrintConfig,
                StepKind::PrepareJetStreamConfigMap,
                StepKind::PrepareSinkFunction,
                StepKind::SinkReachable,
                StepKind::SubscriptionsV1Alpha1,
            ] {
                assert!(plan.iter().any(|s| s.kind == kind && s.skip.is_none()));
            }
        }
    }

    #[test]
    fn failed_steps_become_steps_failed_error() {
        let report = RunReport {
            steps: vec![
                StepReport {
                    kind: StepKind::PrintConfig,
                    outcome: StepOutcome::Passed,
                    duration: Duration::ZERO,
                },
                StepReport {
                    kind: StepKind::PrepareSinkFunction,
                    outcome: StepOutcome::Failed {
                        error: "timed out".to_string(),
                    },
                    duration: Duration::from_secs(3),
                },
            ],
            asset_path: None,
        };

        match report.into_result() {
            Err(Error::StepsFailed { failed }) => {
                assert_eq!(failed, vec!["Prepare eventing-sink function".to_string()])
            }
            other => panic!("expected StepsFailed, got {other:?}"),
        }
    }

    mod with_mocks {
        use super::*;
        use crate::broker::MockBrokerIntrospector;
        use crate::cleanup::MockCleanup;
        use crate::cluster::{BackendSecretInfo, IngressRule, MockClusterOps};
        use crate::config::Args;
        use crate::fixture::MockMockFixture;
        use crate::functions::MockFunctionOps;
        use crate::runtime::MockKubeconfigSource;
        use clap::Parser;

        fn cluster() -> MockClusterOps {
            let mut cluster = MockClusterOps::new();
            cluster
                .expect_create_ingress_rule()
                .times(1)
                .returning(|name, ns, service, port| {
                    Ok(IngressRule {
                        name: name.to_string(),
                        namespace: ns.to_string(),
                        service: service.to_string(),
                        port,
                        host: "nats.example.com".to_string(),
                    })
                });
            cluster
                .expect_delete_ingress_rule()
                .times(1)
                .returning(|_, _| Ok(()));
            cluster
        }

        fn functions() -> MockFunctionOps {
            let mut functions = MockFunctionOps::new();
            functions.expect_deploy_sink_function().returning(|| Ok(()));
            functions.expect_wait_for_sink_function().returning(|| Ok(()));
            functions
                .expect_service_host()
                .returning(|_, _| Ok("sink.example.com".to_string()));
            functions
                .expect_check_reachable()
                .returning(|_, _, _| Ok(()));
            functions
        }

        fn collaborators(
            cluster: MockClusterOps,
            functions: MockFunctionOps,
            kubeconfigs: Option<MockKubeconfigSource>,
        ) -> Collaborators {
            let mut broker = MockBrokerIntrospector::new();
            broker.expect_stream_snapshot().returning(|_| Ok(None));
            let mut fixture = MockMockFixture::new();
            fixture
                .expect_ensure_local()
                .times(1)
                .returning(|_, _, _, _| Ok(()));
            let mut cleanup = MockCleanup::new();
            cleanup.expect_cleanup_all().times(0);

            Collaborators {
                cluster: Arc::new(cluster),
                broker: Arc::new(broker),
                functions: Arc::new(functions),
                fixture: Arc::new(fixture),
                cleanup: Arc::new(cleanup),
                registry: None,
                runtimes: None,
                kubeconfigs: kubeconfigs
                    .map(|k| Arc::new(k) as Arc<dyn KubeconfigSource>),
            }
        }

        fn config(extra: &[&str]) -> RunConfiguration {
            let mut argv = vec!["eventing-prep"];
            argv.extend_from_slice(extra);
            RunConfiguration::from(&Args::try_parse_from(argv).unwrap())
        }

        #[tokio::test]
        async fn skr_run_activates_runtime_kubeconfig() {
            let mut kubeconfigs = MockKubeconfigSource::new();
            kubeconfigs
                .expect_activate_runtime()
                .withf(|id| id == "inst-1")
                .times(1)
                .returning(|_| Ok(()));

            let mut functions = functions();
            functions
                .expect_deploy_subscriptions()
                .returning(|_, _| Ok(()));

            let prep = Preparation::new(
                config(&["--kyma-type", "SKR", "--skr-instance-id", "inst-1"]),
                collaborators(cluster(), functions, Some(kubeconfigs)),
            );
            let report = prep.run().await.unwrap();
            assert_eq!(
                report.outcome(StepKind::PrepareSkrKubeconfig),
                Some(&StepOutcome::Passed)
            );
        }

        #[tokio::test]
        async fn event_source_from_secret_reaches_subscriptions() {
            let path = std::env::temp_dir().join(format!(
                "eventing-prep-event-source-{}.json",
                std::process::id()
            ));
            tokio::fs::write(&path, r#"{"namespace":"default/kyma/id"}"#)
                .await
                .unwrap();

            let mut cluster = cluster();
            cluster
                .expect_create_secret()
                .withf(|payload, name, ns| {
                    payload["namespace"] == "default/kyma/id"
                        && name == "eventing-backend"
                        && ns == "default"
                })
                .times(1)
                .returning(|payload, _, _| {
                    Ok(BackendSecretInfo {
                        event_source_namespace: payload.get("namespace").cloned(),
                    })
                });

            let mut functions = functions();
            functions
                .expect_deploy_subscriptions()
                .withf(|version, source| {
                    *version == SubscriptionVersion::V1Alpha1 && source == "default/kyma/id"
                })
                .times(1)
                .returning(|_, _| Ok(()));

            let prep = Preparation::new(
                config(&["--eventmesh-secret-file", path.to_str().unwrap()]),
                collaborators(cluster, functions, None),
            );
            let result = prep.run().await;
            tokio::fs::remove_file(&path).await.unwrap();

            let report = result.unwrap();
            assert_eq!(
                report.outcome(StepKind::PrepareEventMeshSecret),
                Some(&StepOutcome::Passed)
            );
        }
    }

    #[tokio::test]
    async fn service_key_file_is_read_and_flattened() {
        let path = std::env::temp_dir().join(format!(
            "eventing-prep-service-key-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, r#"{"namespace":"default/kyma/id","uaa":{"clientid":"c"}}"#)
            .await
            .unwrap();

        let payload = read_service_key(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(payload["namespace"], "default/kyma/id");
        assert!(payload["uaa"].contains("clientid"));
    }

    #[tokio::test]
    async fn missing_service_key_file_is_a_config_error() {
        let err = read_service_key(Path::new("/nonexistent/service-key.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
