//! Managed runtime access
//!
//! On a managed runtime (SKR) the run needs two things from outside the
//! cluster: the runtime's registry identity, read from its Gardener Shoot,
//! and the runtime kubeconfig, served by the Kyma Environment Broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::kube_utils::{build_api_resource, client_from_kubeconfig_yaml, KubeContext};
use eventing_prep_common::Error;

/// Gardener Shoot API version
pub const SHOOT_API_VERSION: &str = "core.gardener.cloud/v1beta1";
/// Gardener Shoot kind
pub const SHOOT_KIND: &str = "Shoot";
/// Shoot annotation carrying the Compass runtime ID
pub const RUNTIME_ID_ANNOTATION: &str = "compass.provisioning.kyma-project.io/runtime-id";

/// Resolves the registry identity of a runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeResolver: Send + Sync {
    /// Runtime ID of the cluster provisioned as `shoot_name`
    async fn runtime_id(&self, shoot_name: &str) -> Result<String, Error>;
}

/// Switches the run to a managed runtime's cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeconfigSource: Send + Sync {
    /// Fetch the runtime kubeconfig and make it the current cluster client
    async fn activate_runtime(&self, instance_id: &str) -> Result<(), Error>;
}

/// Read the runtime ID annotation of a Shoot
pub fn runtime_id_from_shoot(shoot: &DynamicObject) -> Option<String> {
    shoot
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RUNTIME_ID_ANNOTATION))
        .filter(|id| !id.is_empty())
        .cloned()
}

/// [`RuntimeResolver`] reading Shoots from the Gardener project namespace
pub struct GardenerRuntimeResolver {
    client: Client,
    namespace: String,
}

impl GardenerRuntimeResolver {
    /// Resolver over a Gardener client and project namespace (`garden-<project>`)
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl RuntimeResolver for GardenerRuntimeResolver {
    async fn runtime_id(&self, shoot_name: &str) -> Result<String, Error> {
        let ar = build_api_resource(SHOOT_API_VERSION, SHOOT_KIND);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &ar);
        let shoot = api.get(shoot_name).await?;

        let id = runtime_id_from_shoot(&shoot).ok_or_else(|| {
            Error::preparation(
                "resolve_runtime_id",
                format!(
                    "shoot {}/{} has no {} annotation",
                    self.namespace, shoot_name, RUNTIME_ID_ANNOTATION
                ),
            )
        })?;
        debug!(shoot = %shoot_name, runtime_id = %id, "Resolved runtime ID");
        Ok(id)
    }
}

/// KEB URL serving the kubeconfig of `instance_id`
pub fn kubeconfig_url(base_url: &str, instance_id: &str) -> String {
    format!("{}/kubeconfig/{}", base_url.trim_end_matches('/'), instance_id)
}

/// [`KubeconfigSource`] backed by the Kyma Environment Broker
pub struct KebKubeconfigSource {
    http: reqwest::Client,
    base_url: String,
    token: String,
    kube: Arc<KubeContext>,
}

impl KebKubeconfigSource {
    /// Source reading from `base_url` and swapping the client in `kube`
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        kube: Arc<KubeContext>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            kube,
        })
    }
}

#[async_trait]
impl KubeconfigSource for KebKubeconfigSource {
    async fn activate_runtime(&self, instance_id: &str) -> Result<(), Error> {
        let url = kubeconfig_url(&self.base_url, instance_id);
        debug!(instance_id = %instance_id, "Fetching runtime kubeconfig");

        let mut request = self.http.get(&url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let yaml = request.send().await?.error_for_status()?.text().await?;

        let client = client_from_kubeconfig_yaml(&yaml).await?;
        self.kube.replace(client);
        info!(instance_id = %instance_id, "Switched to managed runtime kubeconfig");
        Ok(())
    }
}
