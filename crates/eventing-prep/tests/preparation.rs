//! End-to-end runs of the preparation sequencer against in-memory collaborators

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;

use eventing_prep::assets::AssetPath;
use eventing_prep::broker::{BrokerIntrospector, StreamInfo, CM_STREAM_NAME};
use eventing_prep::cleanup::Cleanup;
use eventing_prep::cluster::{BackendSecretInfo, ClusterOps, IngressRule};
use eventing_prep::config::{Args, RunConfiguration};
use eventing_prep::fixture::MockFixture;
use eventing_prep::functions::{FunctionOps, SubscriptionVersion};
use eventing_prep::sequencer::{Collaborators, Preparation, StepKind, StepOutcome};
use eventing_prep_common::Error;

// =============================================================================
// In-memory collaborators
// =============================================================================

#[derive(Default)]
struct FakeCluster {
    fail_ingress: bool,
    ingress_created: Mutex<Vec<String>>,
    ingress_deleted: Mutex<Vec<String>>,
    config_maps: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn create_ingress_rule(
        &self,
        name: &str,
        namespace: &str,
        service: &str,
        port: u16,
    ) -> Result<IngressRule, Error> {
        if self.fail_ingress {
            return Err(Error::network("create_ingress_rule", "admission webhook denied"));
        }
        self.ingress_created.lock().push(format!("{namespace}/{name}"));
        Ok(IngressRule {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service: service.to_string(),
            port,
            host: format!("{name}.c-1.kyma.example.com"),
        })
    }

    async fn delete_ingress_rule(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.ingress_deleted.lock().push(format!("{namespace}/{name}"));
        Ok(())
    }

    async fn create_secret(
        &self,
        payload: &BTreeMap<String, String>,
        _name: &str,
        _namespace: &str,
    ) -> Result<BackendSecretInfo, Error> {
        Ok(BackendSecretInfo {
            event_source_namespace: payload.get("namespace").cloned(),
        })
    }

    async fn create_config_map(
        &self,
        data: &BTreeMap<String, String>,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        self.config_maps
            .lock()
            .insert(format!("{namespace}/{name}"), data.clone());
        Ok(())
    }
}

struct FakeBroker {
    stream: Option<StreamInfo>,
    hosts: Mutex<Vec<String>>,
}

impl FakeBroker {
    fn with_stream() -> Self {
        Self {
            stream: Some(StreamInfo {
                name: "sap".to_string(),
                created: "2024-03-01T10:00:00Z".to_string(),
                ..Default::default()
            }),
            hosts: Mutex::new(Vec::new()),
        }
    }

    fn without_stream() -> Self {
        Self {
            stream: None,
            hosts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrokerIntrospector for FakeBroker {
    async fn stream_snapshot(&self, host: &str) -> Result<Option<StreamInfo>, Error> {
        self.hosts.lock().push(host.to_string());
        Ok(self.stream.clone())
    }
}

#[derive(Default)]
struct FakeFunctions {
    fail_deploy: bool,
    unreachable: bool,
    /// Host lookups that report nothing published before the host appears
    unpublished_lookups: u32,
    host_lookups: AtomicU32,
    probes: AtomicU32,
    subscriptions: Mutex<Vec<(SubscriptionVersion, String)>>,
}

#[async_trait]
impl FunctionOps for FakeFunctions {
    async fn deploy_sink_function(&self) -> Result<(), Error> {
        if self.fail_deploy {
            return Err(Error::network("deploy_sink_function", "function controller unavailable"));
        }
        Ok(())
    }

    async fn wait_for_sink_function(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn deploy_subscriptions(
        &self,
        version: SubscriptionVersion,
        event_source: &str,
    ) -> Result<(), Error> {
        self.subscriptions
            .lock()
            .push((version, event_source.to_string()));
        Ok(())
    }

    async fn service_host(&self, name: &str, _namespace: &str) -> Result<String, Error> {
        let lookup = self.host_lookups.fetch_add(1, Ordering::SeqCst);
        if lookup < self.unpublished_lookups {
            return Ok(String::new());
        }
        Ok(format!("{name}.c-1.kyma.example.com"))
    }

    async fn check_reachable(&self, _name: &str, _namespace: &str, _host: &str) -> Result<(), Error> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            Err(Error::network("check_reachable", "503 Service Unavailable"))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct FakeFixture {
    local_calls: AtomicU32,
    registry_calls: AtomicU32,
}

#[async_trait]
impl MockFixture for FakeFixture {
    async fn ensure_local(
        &self,
        _mock_namespace: &str,
        _test_namespace: &str,
        _with_v1alpha2: bool,
        _event_source_namespace: Option<String>,
    ) -> Result<(), Error> {
        self.local_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_with_registry(
        &self,
        _app_name: &str,
        _scenario: &str,
        _mock_namespace: &str,
        _test_namespace: &str,
        _scenario_preexisted: bool,
    ) -> Result<(), Error> {
        self.registry_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeCleanup {
    runs: AtomicU32,
}

#[async_trait]
impl Cleanup for FakeCleanup {
    async fn cleanup_all(&self) -> Result<(), Error> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct World {
    cluster: Arc<FakeCluster>,
    broker: Arc<FakeBroker>,
    functions: Arc<FakeFunctions>,
    fixture: Arc<FakeFixture>,
    cleanup: Arc<FakeCleanup>,
}

impl World {
    fn new() -> Self {
        Self {
            cluster: Arc::new(FakeCluster::default()),
            broker: Arc::new(FakeBroker::with_stream()),
            functions: Arc::new(FakeFunctions::default()),
            fixture: Arc::new(FakeFixture::default()),
            cleanup: Arc::new(FakeCleanup::default()),
        }
    }

    fn preparation(&self, extra_args: &[&str]) -> Preparation {
        let mut argv = vec!["eventing-prep", "--reachability-interval-secs", "0"];
        argv.extend_from_slice(extra_args);
        let config = RunConfiguration::from(&Args::try_parse_from(argv).unwrap());

        Preparation::new(
            config,
            Collaborators {
                cluster: self.cluster.clone(),
                broker: self.broker.clone(),
                functions: self.functions.clone(),
                fixture: self.fixture.clone(),
                cleanup: self.cleanup.clone(),
                registry: None,
                runtimes: None,
                kubeconfigs: None,
            },
        )
    }
}

const NATS_RULE: &str = "kyma-system/eventing-nats-apirule";

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn default_run_prepares_everything_without_cleanup() {
    let world = World::new();

    let report = world.preparation(&[]).run().await.unwrap();

    assert_eq!(report.outcome(StepKind::PrintConfig), Some(&StepOutcome::Passed));
    assert!(matches!(
        report.outcome(StepKind::PrepareSkrKubeconfig),
        Some(StepOutcome::Skipped { .. })
    ));
    assert!(matches!(
        report.outcome(StepKind::PrepareAssetsWithCompass),
        Some(StepOutcome::Skipped { .. })
    ));
    assert_eq!(
        report.outcome(StepKind::SinkReachable),
        Some(&StepOutcome::Passed)
    );
    assert_eq!(report.asset_path, Some(AssetPath::Local));

    assert_eq!(world.fixture.local_calls.load(Ordering::SeqCst), 1);
    assert_eq!(world.fixture.registry_calls.load(Ordering::SeqCst), 0);
    assert_eq!(world.cleanup.runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        *world.functions.subscriptions.lock(),
        vec![(SubscriptionVersion::V1Alpha1, String::new())]
    );

    assert_eq!(*world.cluster.ingress_created.lock(), vec![NATS_RULE]);
    assert_eq!(*world.cluster.ingress_deleted.lock(), vec![NATS_RULE]);
}

#[tokio::test]
async fn baseline_is_read_through_the_exposed_nats_host() {
    let world = World::new();

    world.preparation(&[]).run().await.unwrap();

    assert_eq!(
        *world.broker.hosts.lock(),
        vec!["eventing-nats-apirule.c-1.kyma.example.com".to_string()]
    );
    let config_maps = world.cluster.config_maps.lock();
    let data = &config_maps["default/eventing-test-data"];
    assert_eq!(data[CM_STREAM_NAME], "sap");
}

#[tokio::test]
async fn missing_stream_passes_without_config_map() {
    let mut world = World::new();
    world.broker = Arc::new(FakeBroker::without_stream());

    let report = world.preparation(&[]).run().await.unwrap();

    assert_eq!(
        report.outcome(StepKind::PrepareJetStreamConfigMap),
        Some(&StepOutcome::Passed)
    );
    assert!(world.cluster.config_maps.lock().is_empty());
}

#[tokio::test]
async fn failed_step_cleans_up_and_later_steps_still_run() {
    let mut world = World::new();
    world.functions = Arc::new(FakeFunctions {
        fail_deploy: true,
        ..Default::default()
    });

    let preparation = world.preparation(&["--test-subscription-v1alpha2", "true"]);
    let report = preparation.execute().await.unwrap();

    assert!(matches!(
        report.outcome(StepKind::PrepareSinkFunction),
        Some(StepOutcome::Failed { error }) if error.contains("function controller unavailable")
    ));
    assert_eq!(
        report.outcome(StepKind::SubscriptionsV1Alpha1),
        Some(&StepOutcome::Passed)
    );
    assert_eq!(
        report.outcome(StepKind::SubscriptionsV1Alpha2),
        Some(&StepOutcome::Passed)
    );
    assert_eq!(world.cleanup.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*world.cluster.ingress_deleted.lock(), vec![NATS_RULE]);

    match report.into_result() {
        Err(Error::StepsFailed { failed }) => {
            assert_eq!(failed, vec!["Prepare eventing-sink function".to_string()])
        }
        other => panic!("expected StepsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_sink_fails_after_bounded_attempts() {
    let mut world = World::new();
    world.functions = Arc::new(FakeFunctions {
        unreachable: true,
        ..Default::default()
    });

    let report = world.preparation(&[]).execute().await.unwrap();

    assert!(matches!(
        report.outcome(StepKind::SinkReachable),
        Some(StepOutcome::Failed { .. })
    ));
    assert_eq!(world.functions.probes.load(Ordering::SeqCst), 5);
    assert_eq!(world.cleanup.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sink_host_published_late_is_picked_up_by_the_wait() {
    let mut world = World::new();
    world.functions = Arc::new(FakeFunctions {
        unpublished_lookups: 2,
        ..Default::default()
    });

    let report = world.preparation(&[]).execute().await.unwrap();

    assert_eq!(
        report.outcome(StepKind::SinkReachable),
        Some(&StepOutcome::Passed)
    );
    assert_eq!(world.functions.host_lookups.load(Ordering::SeqCst), 3);
    assert_eq!(world.functions.probes.load(Ordering::SeqCst), 1);
    assert_eq!(world.cleanup.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn nats_exposure_failure_aborts_before_any_step() {
    let mut world = World::new();
    world.cluster = Arc::new(FakeCluster {
        fail_ingress: true,
        ..Default::default()
    });

    let err = world.preparation(&[]).run().await.unwrap_err();

    assert!(matches!(err, Error::TransientNetwork { .. }));
    assert_eq!(world.fixture.local_calls.load(Ordering::SeqCst), 0);
    assert_eq!(world.cleanup.runs.load(Ordering::SeqCst), 0);
    assert_eq!(*world.cluster.ingress_deleted.lock(), vec![NATS_RULE]);
}

#[tokio::test]
async fn compass_flow_without_director_fails_only_that_step() {
    let world = World::new();

    let report = world
        .preparation(&["--test-compass-flow", "true", "--shoot-name", "c-1a2b3c"])
        .execute()
        .await
        .unwrap();

    assert!(matches!(
        report.outcome(StepKind::PrepareAssetsLocal),
        Some(StepOutcome::Skipped { .. })
    ));
    assert!(matches!(
        report.outcome(StepKind::PrepareAssetsWithCompass),
        Some(StepOutcome::Failed { error }) if error.contains("DIRECTOR_URL")
    ));
    assert_eq!(world.fixture.local_calls.load(Ordering::SeqCst), 0);
    assert_eq!(world.fixture.registry_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.failed().len(), 1);
}
