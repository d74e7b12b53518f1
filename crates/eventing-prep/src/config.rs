//! Run configuration
//!
//! Every flag and name the preparation needs is resolved once from the
//! command line (with environment variable fallbacks) into an immutable
//! [`RunConfiguration`]. Nothing below `main` reads the environment.
//!
//! Connection settings for external services (Director, KEB, Gardener) are
//! kept apart in [`Connections`] because only collaborator construction
//! needs them.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};

use eventing_prep_common::Error;

/// Value of `KYMA_TYPE` that marks a managed runtime
pub const KYMA_TYPE_SKR: &str = "SKR";

/// Prepare a Kyma cluster for the eventing end-to-end tests
#[derive(Parser, Debug, Clone)]
#[command(name = "eventing-prep", version, about, long_about = None)]
pub struct Args {
    /// Kubeconfig of the cluster under test (defaults to the inferred config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace for the mock application
    #[arg(long, env = "MOCK_NAMESPACE", default_value = "mocks")]
    pub mock_namespace: String,

    /// Namespace for the test function and subscriptions
    #[arg(long, env = "TEST_NAMESPACE", default_value = "test")]
    pub test_namespace: String,

    /// Kyma version under test (informational)
    #[arg(long, env = "KYMA_VERSION", default_value = "")]
    pub kyma_version: String,

    /// Cluster type; `SKR` marks a managed runtime
    #[arg(long, env = "KYMA_TYPE", default_value = "")]
    pub kyma_type: String,

    /// Instance ID of the managed runtime
    #[arg(long, env = "INSTANCE_ID", default_value = "")]
    pub skr_instance_id: String,

    /// Gardener shoot name of the managed runtime
    #[arg(long, env = "SHOOT_NAME", default_value = "")]
    pub shoot_name: String,

    /// Prepare assets through the Compass registry
    #[arg(
        long,
        env = "TEST_COMPASS_FLOW",
        action = ArgAction::Set,
        value_parser = FalseyValueParser::new(),
        default_value = "false"
    )]
    pub test_compass_flow: bool,

    /// Also deploy v1alpha2 subscriptions
    #[arg(
        long,
        env = "TEST_SUBSCRIPTION_V1ALPHA2",
        action = ArgAction::Set,
        value_parser = FalseyValueParser::new(),
        default_value = "false"
    )]
    pub test_subscription_v1alpha2: bool,

    /// Subscription CRD version served by the cluster (informational)
    #[arg(long, env = "SUBSCRIPTION_CRD_VERSION", default_value = "v1alpha1")]
    pub subscription_crd_version: String,

    /// Name of the eventing backend Secret
    #[arg(long, env = "BACKEND_SECRET_NAME", default_value = "eventing-backend")]
    pub backend_secret_name: String,

    /// Namespace of the eventing backend Secret
    #[arg(long, env = "BACKEND_SECRET_NAMESPACE", default_value = "default")]
    pub backend_secret_namespace: String,

    /// EventMesh service key file; when unset the existing backend Secret is used
    #[arg(long, env = "EVENTMESH_SECRET_FILE")]
    pub eventmesh_secret_file: Option<PathBuf>,

    /// Name of the ConfigMap holding the JetStream baseline
    #[arg(long, env = "TEST_DATA_CONFIGMAP", default_value = "eventing-test-data")]
    pub test_data_configmap: String,

    /// Namespace of the JetStream baseline ConfigMap
    #[arg(long, env = "TEST_DATA_NAMESPACE", default_value = "default")]
    pub test_data_namespace: String,

    /// NATS service exposing the monitoring endpoint
    #[arg(long, env = "EVENTING_NATS_SERVICE", default_value = "eventing-nats")]
    pub nats_service: String,

    /// NATS monitoring port
    #[arg(long, env = "EVENTING_NATS_PORT", default_value_t = 8222)]
    pub nats_port: u16,

    /// Name of the APIRule exposing NATS
    #[arg(long, env = "EVENTING_NATS_APIRULE", default_value = "eventing-nats-apirule")]
    pub nats_apirule_name: String,

    /// JetStream stream whose metadata is captured
    #[arg(long, env = "JETSTREAM_STREAM_NAME", default_value = "sap")]
    pub stream_name: String,

    /// Name of the eventing-sink function
    #[arg(long, env = "EVENTING_SINK_NAME", default_value = "eventing-sink")]
    pub sink_name: String,

    /// Mock application name
    #[arg(long, env = "APP_NAME", default_value = "commerce")]
    pub app_name: String,

    /// Compass scenario name
    #[arg(long, env = "SCENARIO_NAME", default_value = "test-eventing")]
    pub scenario_name: String,

    /// Reachability check attempts
    #[arg(long, env = "REACHABILITY_ATTEMPTS", default_value_t = 5)]
    pub reachability_attempts: u32,

    /// Seconds between reachability attempts
    #[arg(long, env = "REACHABILITY_INTERVAL_SECS", default_value_t = 5)]
    pub reachability_interval_secs: u64,

    /// Timeout for the whole run in seconds
    #[arg(long, env = "PREP_TIMEOUT_SECS", default_value_t = 1800)]
    pub timeout_secs: u64,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Compass Director GraphQL URL
    #[arg(long, env = "DIRECTOR_URL")]
    pub director_url: Option<String>,

    /// Compass tenant ID
    #[arg(long, env = "COMPASS_TENANT", default_value = "")]
    pub compass_tenant: String,

    /// OAuth token URL for the Director
    #[arg(long, env = "COMPASS_TOKEN_URL", default_value = "")]
    pub compass_token_url: String,

    /// OAuth client ID for the Director
    #[arg(long, env = "COMPASS_CLIENT_ID", default_value = "")]
    pub compass_client_id: String,

    /// OAuth client secret for the Director
    #[arg(long, env = "COMPASS_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub compass_client_secret: String,

    /// Kyma Environment Broker base URL
    #[arg(long, env = "KEB_URL")]
    pub keb_url: Option<String>,

    /// Bearer token for the Kyma Environment Broker
    #[arg(long, env = "KEB_TOKEN", default_value = "", hide_env_values = true)]
    pub keb_token: String,

    /// Kubeconfig of the Gardener project
    #[arg(long, env = "GARDENER_KUBECONFIG")]
    pub gardener_kubeconfig: Option<PathBuf>,

    /// Gardener project name
    #[arg(long, env = "GARDENER_PROJECT_NAME", default_value = "")]
    pub gardener_project: String,
}

/// Bounded budget for the reachability check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReachabilityBudget {
    /// Maximum attempts
    pub attempts: u32,
    /// Fixed interval between attempts
    pub interval: Duration,
}

impl Default for ReachabilityBudget {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

/// Immutable flags and names for one run
#[derive(Clone, Debug)]
pub struct RunConfiguration {
    /// Namespace for the mock application
    pub mock_namespace: String,
    /// Namespace for the sink function and subscriptions
    pub test_namespace: String,
    /// Kyma version under test
    pub kyma_version: String,
    /// True on a managed runtime
    pub is_skr: bool,
    /// Managed runtime instance ID (may be empty)
    pub skr_instance_id: String,
    /// Gardener shoot name of the runtime
    pub shoot_name: String,
    /// Prepare assets through the registry
    pub test_compass_flow: bool,
    /// Also deploy v1alpha2 subscriptions
    pub test_subscription_v1alpha2: bool,
    /// Subscription CRD version served by the cluster
    pub subscription_crd_version: String,
    /// Backend Secret name
    pub backend_secret_name: String,
    /// Backend Secret namespace
    pub backend_secret_namespace: String,
    /// Service key file for the backend Secret
    pub backend_secret_file: Option<PathBuf>,
    /// Baseline ConfigMap name
    pub test_data_configmap: String,
    /// Baseline ConfigMap namespace
    pub test_data_namespace: String,
    /// NATS service name
    pub nats_service: String,
    /// NATS monitoring port
    pub nats_port: u16,
    /// APIRule exposing NATS
    pub nats_apirule_name: String,
    /// JetStream stream to capture
    pub stream_name: String,
    /// Sink function name
    pub sink_name: String,
    /// Mock application name
    pub app_name: String,
    /// Compass scenario name
    pub scenario_name: String,
    /// Reachability check budget
    pub reachability: ReachabilityBudget,
    /// Whole-run timeout
    pub timeout: Duration,
}

/// Precomputed step predicates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepFlags {
    /// Running against a managed runtime
    pub is_skr: bool,
    /// A runtime instance ID was provided
    pub has_skr_instance_id: bool,
    /// A backend service key file was provided
    pub has_backend_secret_file: bool,
    /// Registry path selected
    pub test_compass_flow: bool,
    /// v1alpha2 subscriptions requested
    pub test_subscription_v1alpha2: bool,
}

impl RunConfiguration {
    /// Derive the predicates the sequencer evaluates
    pub fn step_flags(&self) -> StepFlags {
        StepFlags {
            is_skr: self.is_skr,
            has_skr_instance_id: !self.skr_instance_id.is_empty(),
            has_backend_secret_file: self.backend_secret_file.is_some(),
            test_compass_flow: self.test_compass_flow,
            test_subscription_v1alpha2: self.test_subscription_v1alpha2,
        }
    }

    /// Validate combinations that would only fail late in the run
    pub fn validate(&self) -> Result<(), Error> {
        if self.test_compass_flow && self.shoot_name.is_empty() {
            return Err(Error::config(
                "Compass flow requires SHOOT_NAME to resolve the runtime identity",
            ));
        }
        if self.reachability.attempts == 0 {
            return Err(Error::config("reachability attempts must be at least 1"));
        }
        for (field, value) in [
            ("test namespace", &self.test_namespace),
            ("mock namespace", &self.mock_namespace),
            ("scenario name", &self.scenario_name),
        ] {
            if value.is_empty() {
                return Err(Error::config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}

impl From<&Args> for RunConfiguration {
    fn from(args: &Args) -> Self {
        Self {
            mock_namespace: args.mock_namespace.clone(),
            test_namespace: args.test_namespace.clone(),
            kyma_version: args.kyma_version.clone(),
            is_skr: args.kyma_type.eq_ignore_ascii_case(KYMA_TYPE_SKR),
            skr_instance_id: args.skr_instance_id.clone(),
            shoot_name: args.shoot_name.clone(),
            test_compass_flow: args.test_compass_flow,
            test_subscription_v1alpha2: args.test_subscription_v1alpha2,
            subscription_crd_version: args.subscription_crd_version.clone(),
            backend_secret_name: args.backend_secret_name.clone(),
            backend_secret_namespace: args.backend_secret_namespace.clone(),
            backend_secret_file: args.eventmesh_secret_file.clone(),
            test_data_configmap: args.test_data_configmap.clone(),
            test_data_namespace: args.test_data_namespace.clone(),
            nats_service: args.nats_service.clone(),
            nats_port: args.nats_port,
            nats_apirule_name: args.nats_apirule_name.clone(),
            stream_name: args.stream_name.clone(),
            sink_name: args.sink_name.clone(),
            app_name: args.app_name.clone(),
            scenario_name: args.scenario_name.clone(),
            reachability: ReachabilityBudget {
                attempts: args.reachability_attempts,
                interval: Duration::from_secs(args.reachability_interval_secs),
            },
            timeout: Duration::from_secs(args.timeout_secs),
        }
    }
}

/// Director connection settings
#[derive(Clone, Debug)]
pub struct CompassConnection {
    /// GraphQL URL
    pub url: String,
    /// Tenant ID
    pub tenant: String,
    /// OAuth token URL
    pub token_url: String,
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

/// Connection settings for external services
#[derive(Clone, Debug, Default)]
pub struct Connections {
    /// Kubeconfig for the cluster under test
    pub kubeconfig: Option<PathBuf>,
    /// Director, when configured
    pub compass: Option<CompassConnection>,
    /// KEB base URL and token, when configured
    pub keb: Option<(String, String)>,
    /// Gardener kubeconfig and project namespace, when configured
    pub gardener: Option<(PathBuf, String)>,
}

impl From<&Args> for Connections {
    fn from(args: &Args) -> Self {
        Self {
            kubeconfig: args.kubeconfig.clone(),
            compass: args.director_url.as_ref().map(|url| CompassConnection {
                url: url.clone(),
                tenant: args.compass_tenant.clone(),
                token_url: args.compass_token_url.clone(),
                client_id: args.compass_client_id.clone(),
                client_secret: args.compass_client_secret.clone(),
            }),
            keb: args
                .keb_url
                .as_ref()
                .map(|url| (url.clone(), args.keb_token.clone())),
            gardener: args
                .gardener_kubeconfig
                .as_ref()
                .map(|path| (path.clone(), format!("garden-{}", args.gardener_project))),
        }
    }
}
