//! Eventing-sink function and subscriptions
//!
//! The sink is a serverless Function exposed through its own APIRule. The
//! reachability check probes it through that host; subscriptions route the
//! test events to its cluster-local service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::kube_utils::{
    apply_dynamic, build_api_resource, dynamic_object, ensure_namespace, poll_until, KubeContext,
    DEFAULT_POLL_INTERVAL,
};
use eventing_prep_common::Error;

use crate::cluster::virtual_service_host;
use crate::manifests::{
    apirule_spec, event_type, sink_function_spec, sink_url, subscription_v1alpha1_spec,
    subscription_v1alpha2_spec, APIRULE_API_VERSION, APIRULE_KIND, FUNCTION_API_VERSION,
    FUNCTION_KIND, SINK_EVENTS, SUBSCRIPTION_KIND,
};

/// How long the function gets to build and start
const FUNCTION_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Port of a serverless Function's service
const FUNCTION_PORT: u16 = 80;

/// Conditions a Function reports once it serves traffic
const FUNCTION_READY_CONDITIONS: &[&str] = &["ConfigurationReady", "BuildReady", "Running"];

/// Subscription CRD versions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionVersion {
    /// `eventing.kyma-project.io/v1alpha1`
    V1Alpha1,
    /// `eventing.kyma-project.io/v1alpha2`
    V1Alpha2,
}

impl SubscriptionVersion {
    /// Full apiVersion
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::V1Alpha1 => "eventing.kyma-project.io/v1alpha1",
            Self::V1Alpha2 => "eventing.kyma-project.io/v1alpha2",
        }
    }

    fn name_suffix(&self) -> &'static str {
        match self {
            Self::V1Alpha1 => "",
            Self::V1Alpha2 => "-v1alpha2",
        }
    }
}

/// One Subscription to create
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionManifest {
    /// Resource name
    pub name: String,
    /// Spec body
    pub spec: Value,
}

/// Subscriptions routing every sink event of `app` to the sink function
pub fn sink_subscriptions(
    version: SubscriptionVersion,
    sink_name: &str,
    namespace: &str,
    app: &str,
    event_source: &str,
) -> Vec<SubscriptionManifest> {
    let sink = sink_url(sink_name, namespace);
    SINK_EVENTS
        .iter()
        .map(|(event, event_version)| {
            let name = format!(
                "{}-{}-{}{}",
                sink_name,
                event.replace('.', "-"),
                event_version,
                version.name_suffix()
            );
            let spec = match version {
                SubscriptionVersion::V1Alpha1 => subscription_v1alpha1_spec(
                    &sink,
                    event_source,
                    &event_type(app, event, event_version),
                ),
                SubscriptionVersion::V1Alpha2 => subscription_v1alpha2_spec(
                    &sink,
                    app,
                    &event_type(app, event, event_version),
                ),
            };
            SubscriptionManifest { name, spec }
        })
        .collect()
}

/// True when every readiness condition of a Function is `True`
pub fn function_is_ready(function: &DynamicObject) -> bool {
    let conditions = function
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array);
    let Some(conditions) = conditions else {
        return false;
    };
    FUNCTION_READY_CONDITIONS.iter().all(|wanted| {
        conditions.iter().any(|c| {
            c.get("type").and_then(Value::as_str) == Some(*wanted)
                && c.get("status").and_then(Value::as_str) == Some("True")
        })
    })
}

/// Sink function and subscription operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FunctionOps: Send + Sync {
    /// Deploy the eventing-sink function and its APIRule
    async fn deploy_sink_function(&self) -> Result<(), Error>;

    /// Wait until the eventing-sink function is running
    async fn wait_for_sink_function(&self) -> Result<(), Error>;

    /// Deploy the sink subscriptions in the given CRD version
    async fn deploy_subscriptions(
        &self,
        version: SubscriptionVersion,
        event_source: &str,
    ) -> Result<(), Error>;

    /// Public host of a function's APIRule; empty if none is published
    async fn service_host(&self, name: &str, namespace: &str) -> Result<String, Error>;

    /// Probe a function through its public host once
    async fn check_reachable(&self, name: &str, namespace: &str, host: &str) -> Result<(), Error>;
}

/// Names the function operations work with
#[derive(Clone, Debug)]
pub struct SinkSettings {
    /// Function name
    pub sink_name: String,
    /// Test namespace
    pub namespace: String,
    /// Application whose events are subscribed
    pub app_name: String,
}

/// Kubernetes-backed [`FunctionOps`]
pub struct KubeFunctionOps {
    kube: Arc<KubeContext>,
    http: reqwest::Client,
    settings: SinkSettings,
}

impl KubeFunctionOps {
    /// Create function operations over the shared client
    pub fn new(kube: Arc<KubeContext>, settings: SinkSettings) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            kube,
            http,
            settings,
        })
    }
}

#[async_trait]
impl FunctionOps for KubeFunctionOps {
    async fn deploy_sink_function(&self) -> Result<(), Error> {
        let client = self.kube.client();
        let SinkSettings {
            sink_name,
            namespace,
            ..
        } = &self.settings;

        ensure_namespace(&client, namespace).await?;

        let function = dynamic_object(
            FUNCTION_API_VERSION,
            FUNCTION_KIND,
            sink_name,
            namespace,
            sink_function_spec(),
        )?;
        apply_dynamic(
            &client,
            &build_api_resource(FUNCTION_API_VERSION, FUNCTION_KIND),
            namespace,
            &function,
        )
        .await?;

        let rule = dynamic_object(
            APIRULE_API_VERSION,
            APIRULE_KIND,
            sink_name,
            namespace,
            apirule_spec(sink_name, sink_name, FUNCTION_PORT),
        )?;
        apply_dynamic(
            &client,
            &build_api_resource(APIRULE_API_VERSION, APIRULE_KIND),
            namespace,
            &rule,
        )
        .await?;

        info!(function = %sink_name, namespace = %namespace, "Deployed eventing-sink function");
        Ok(())
    }

    async fn wait_for_sink_function(&self) -> Result<(), Error> {
        let client = self.kube.client();
        let ar = build_api_resource(FUNCTION_API_VERSION, FUNCTION_KIND);
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, &self.settings.namespace, &ar);
        let name = self.settings.sink_name.as_str();

        poll_until(
            "eventing_sink_ready",
            FUNCTION_READY_TIMEOUT,
            DEFAULT_POLL_INTERVAL,
            || {
                let api = api.clone();
                async move { Ok(function_is_ready(&api.get(name).await?)) }
            },
        )
        .await?;

        info!(function = %name, "Eventing-sink function is ready");
        Ok(())
    }

    async fn deploy_subscriptions(
        &self,
        version: SubscriptionVersion,
        event_source: &str,
    ) -> Result<(), Error> {
        let client = self.kube.client();
        let SinkSettings {
            sink_name,
            namespace,
            app_name,
        } = &self.settings;
        let ar = build_api_resource(version.api_version(), SUBSCRIPTION_KIND);

        let subscriptions = sink_subscriptions(version, sink_name, namespace, app_name, event_source);
        for sub in &subscriptions {
            let obj = dynamic_object(
                version.api_version(),
                SUBSCRIPTION_KIND,
                &sub.name,
                namespace,
                sub.spec.clone(),
            )?;
            apply_dynamic(&client, &ar, namespace, &obj).await?;
        }

        info!(
            version = %version.api_version(),
            count = subscriptions.len(),
            namespace = %namespace,
            "Deployed subscriptions"
        );
        Ok(())
    }

    async fn service_host(&self, name: &str, namespace: &str) -> Result<String, Error> {
        let host = virtual_service_host(&self.kube.client(), name, namespace).await?;
        Ok(host.unwrap_or_default())
    }

    async fn check_reachable(&self, name: &str, namespace: &str, host: &str) -> Result<(), Error> {
        let url = format!("https://{}/", host);
        let status = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network("check_reachable", e.to_string()))?
            .status();
        debug!(function = %name, namespace = %namespace, status = %status, "Probed function");

        if status.is_success() {
            Ok(())
        } else {
            Err(Error::network(
                "check_reachable",
                format!("{} answered {}", url, status),
            ))
        }
    }
}
