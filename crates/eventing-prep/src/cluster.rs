//! Cluster resource operations
//!
//! Exposes internal services through APIRules and provisions the backend
//! Secret and the baseline ConfigMap. Every create is idempotent-if-absent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DynamicObject, ListParams, ObjectMeta};
use kube::Client;
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::kube_utils::{
    apply_dynamic, build_api_resource, create_if_absent, delete_if_exists, dynamic_object,
    poll_for, prep_labels, KubeContext, DEFAULT_POLL_INTERVAL,
};
use eventing_prep_common::Error;

use crate::manifests::{
    apirule_spec, apirule_vs_selector, APIRULE_API_VERSION, APIRULE_KIND,
    VIRTUAL_SERVICE_API_VERSION, VIRTUAL_SERVICE_KIND,
};

/// Label marking the eventing backend Secret
pub const BACKEND_SECRET_LABEL: &str = "kyma-project.io/eventing-backend";
/// Value of [`BACKEND_SECRET_LABEL`] for an EventMesh backend
pub const BACKEND_SECRET_LABEL_VALUE: &str = "BEB";

/// How long to wait for the APIRule controller to publish a host
const HOST_TIMEOUT: Duration = Duration::from_secs(120);

/// One exposed route
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    /// APIRule name
    pub name: String,
    /// Namespace of the APIRule and the target service
    pub namespace: String,
    /// Target service name
    pub service: String,
    /// Target service port
    pub port: u16,
    /// Public host the rule resolved to
    pub host: String,
}

/// What the backend Secret step hands to later steps
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendSecretInfo {
    /// EventMesh namespace from the service key, used as event source
    pub event_source_namespace: Option<String>,
}

/// Cluster resource operations used by the preparation steps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Expose `service:port` through an APIRule and return the resolved rule
    async fn create_ingress_rule(
        &self,
        name: &str,
        namespace: &str,
        service: &str,
        port: u16,
    ) -> Result<IngressRule, Error>;

    /// Delete an APIRule; a missing rule is not an error
    async fn delete_ingress_rule(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Create the backend Secret unless it already exists
    async fn create_secret(
        &self,
        payload: &BTreeMap<String, String>,
        name: &str,
        namespace: &str,
    ) -> Result<BackendSecretInfo, Error>;

    /// Create a ConfigMap unless it already exists
    async fn create_config_map(
        &self,
        data: &BTreeMap<String, String>,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error>;
}

/// Flatten a service key JSON document into Secret string data.
///
/// String fields are stored as-is, every other field as its JSON encoding.
pub fn backend_secret_payload(service_key: &Value) -> Result<BTreeMap<String, String>, Error> {
    let object = service_key
        .as_object()
        .ok_or_else(|| Error::config("service key must be a JSON object"))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}

/// Read the public host of the VirtualService generated for an APIRule
pub async fn virtual_service_host(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Option<String>, Error> {
    let ar = build_api_resource(VIRTUAL_SERVICE_API_VERSION, VIRTUAL_SERVICE_KIND);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    let list = api
        .list(&ListParams::default().labels(&apirule_vs_selector(name, namespace)))
        .await?;
    Ok(list.items.first().and_then(first_host))
}

fn first_host(vs: &DynamicObject) -> Option<String> {
    vs.data
        .get("spec")
        .and_then(|s| s.get("hosts"))
        .and_then(Value::as_array)
        .and_then(|hosts| hosts.first())
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Kubernetes-backed [`ClusterOps`]
pub struct KubeClusterOps {
    kube: Arc<KubeContext>,
}

impl KubeClusterOps {
    /// Create cluster operations over the shared client
    pub fn new(kube: Arc<KubeContext>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn create_ingress_rule(
        &self,
        name: &str,
        namespace: &str,
        service: &str,
        port: u16,
    ) -> Result<IngressRule, Error> {
        let client = self.kube.client();
        let ar = build_api_resource(APIRULE_API_VERSION, APIRULE_KIND);
        let rule = dynamic_object(
            APIRULE_API_VERSION,
            APIRULE_KIND,
            name,
            namespace,
            apirule_spec(name, service, port),
        )?;
        apply_dynamic(&client, &ar, namespace, &rule).await?;

        let host = poll_for("apirule_host", HOST_TIMEOUT, DEFAULT_POLL_INTERVAL, || {
            let client = client.clone();
            async move { virtual_service_host(&client, name, namespace).await }
        })
        .await?;

        info!(apirule = %name, namespace = %namespace, host = %host, "Exposed service");
        Ok(IngressRule {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service: service.to_string(),
            port,
            host,
        })
    }

    async fn delete_ingress_rule(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let ar = build_api_resource(APIRULE_API_VERSION, APIRULE_KIND);
        let api: Api<DynamicObject> = Api::namespaced_with(self.kube.client(), namespace, &ar);
        if delete_if_exists(&api, name).await? {
            info!(apirule = %name, namespace = %namespace, "Deleted APIRule");
        }
        Ok(())
    }

    async fn create_secret(
        &self,
        payload: &BTreeMap<String, String>,
        name: &str,
        namespace: &str,
    ) -> Result<BackendSecretInfo, Error> {
        let mut labels = prep_labels(name);
        labels.insert(
            BACKEND_SECRET_LABEL.to_string(),
            BACKEND_SECRET_LABEL_VALUE.to_string(),
        );
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            string_data: Some(payload.clone()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        let api: Api<Secret> = Api::namespaced(self.kube.client(), namespace);
        let created = create_if_absent(&api, &secret, name).await?;
        debug!(secret = %name, namespace = %namespace, created, "Backend secret ready");

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
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(prep_labels(name)),
                ..Default::default()
            },
            data: Some(data.clone()),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.kube.client(), namespace);
        let created = create_if_absent(&api, &cm, name).await?;
        debug!(configmap = %name, namespace = %namespace, created, "ConfigMap ready");
        Ok(())
    }
}
