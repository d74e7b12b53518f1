//! Shared Kubernetes utilities using kube-rs
//!
//! Provides the handful of kubectl-equivalent operations the preparation
//! steps need: client creation (from a path or an in-memory kubeconfig),
//! untyped access to Kyma CRDs, create-if-absent, delete-if-present and a
//! generic polling helper.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{Error, FIELD_MANAGER, LABEL_MANAGED_BY, LABEL_MANAGED_BY_PREP, LABEL_NAME};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between polls of a resource condition
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Client Creation
// =============================================================================

/// Create a kube client from an optional kubeconfig path.
///
/// `None` falls back to `Config::infer()` (`KUBECONFIG`, `~/.kube/config`,
/// or the in-cluster service account).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    client_from_config(config)
}

/// Create a kube client from kubeconfig YAML held in memory.
///
/// Used when a runtime's kubeconfig is fetched over HTTP instead of read
/// from disk.
pub async fn client_from_kubeconfig_yaml(yaml: &str) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml)
        .map_err(|e| Error::config(format!("failed to parse kubeconfig: {}", e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?;
    client_from_config(config)
}

fn client_from_config(mut config: Config) -> Result<Client, Error> {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}

/// The cluster client shared by every Kubernetes-backed collaborator.
///
/// The client can be swapped once the run switches to a managed runtime's
/// kubeconfig; callers take a cheap clone per operation.
pub struct KubeContext {
    client: RwLock<Client>,
}

impl KubeContext {
    /// Wrap an initial client
    pub fn new(client: Client) -> Self {
        Self {
            client: RwLock::new(client),
        }
    }

    /// Current client
    pub fn client(&self) -> Client {
        self.client.read().clone()
    }

    /// Replace the client used by all subsequent operations
    pub fn replace(&self, client: Client) {
        *self.client.write() = client;
    }
}

// =============================================================================
// Dynamic Resources
// =============================================================================

/// Build an ApiResource from an apiVersion and kind.
///
/// # Example
/// ```ignore
/// let ar = build_api_resource("gateway.kyma-project.io/v1beta1", "APIRule");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "kyma-system", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version). Core resources have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind using the standard lowercase rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Standard labels for every resource created by this tool
pub fn prep_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_PREP.to_string(),
        ),
    ])
}

/// Build a namespaced DynamicObject with a spec body and standard labels
pub fn dynamic_object(
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: &str,
    spec: serde_json::Value,
) -> Result<DynamicObject, Error> {
    let value = serde_json::json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": prep_labels(name),
        },
        "spec": spec,
    });
    Ok(serde_json::from_value(value)?)
}

/// Server-side apply a DynamicObject into its namespace
pub async fn apply_dynamic(
    client: &Client,
    ar: &ApiResource,
    namespace: &str,
    obj: &DynamicObject,
) -> Result<DynamicObject, Error> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::config(format!("{} without metadata.name", ar.kind)))?;
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, ar);
    let applied = api
        .patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
    debug!(kind = %ar.kind, name = %name, namespace = %namespace, "Applied resource");
    Ok(applied)
}

/// Create a resource unless it already exists.
///
/// Returns `true` if this call created it, `false` if it was already there.
pub async fn create_if_absent<K>(api: &Api<K>, resource: &K, name: &str) -> Result<bool, Error>
where
    K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.create(&PostParams::default(), resource).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(resp)) if resp.code == 409 => {
            debug!(name = %name, "Resource already exists, leaving it in place");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a resource, treating "not found" as success.
///
/// Returns `true` if a delete was issued for an existing resource.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool, Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Ensure a namespace exists (idempotent, server-side apply)
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

// =============================================================================
// Polling
// =============================================================================

/// Poll until a condition is met or timeout is reached
///
/// The check returns `Ok(true)` when done, `Ok(false)` to keep polling.
/// Errors from the check are treated as "not yet"; the last one is reported
/// in the timeout error.
pub async fn poll_until<F, Fut>(
    operation: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    poll_for(operation, timeout, poll_interval, || {
        let check = check_fn();
        async move { Ok(check.await?.then_some(())) }
    })
    .await
}

/// Poll until the check yields a value or timeout is reached
///
/// Same contract as [`poll_until`], for checks that produce something
/// (e.g., a host name once a controller has published it).
pub async fn poll_for<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut check_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let start = tokio::time::Instant::now();
    let mut attempts = 0u32;
    let mut last = String::from("condition not met");

    loop {
        attempts += 1;
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => trace!(operation = %operation, "Polling condition not yet met"),
            Err(e) => {
                trace!(operation = %operation, error = %e, "Polling check returned error");
                last = e.to_string();
            }
        }

        if start.elapsed() + poll_interval > timeout {
            return Err(Error::timeout(operation, attempts, last));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[rstest]
    #[case("APIRule", "apirules")]
    #[case("VirtualService", "virtualservices")]
    #[case("Subscription", "subscriptions")]
    #[case("Function", "functions")]
    #[case("Shoot", "shoots")]
    #[case("Policy", "policies")]
    #[case("Gateway", "gateways")]
    fn pluralizes_kinds(#[case] kind: &str, #[case] plural: &str) {
        assert_eq!(pluralize_kind(kind), plural);
    }

    #[test]
    fn parses_grouped_and_core_api_versions() {
        assert_eq!(
            parse_api_version("eventing.kyma-project.io/v1alpha2"),
            ("eventing.kyma-project.io".to_string(), "v1alpha2".to_string())
        );
        assert_eq!(
            parse_api_version("v1"),
            (String::new(), "v1".to_string())
        );
    }

    #[test]
    fn builds_api_resource_for_kyma_crd() {
        let ar = build_api_resource("gateway.kyma-project.io/v1beta1", "APIRule");
        assert_eq!(ar.group, "gateway.kyma-project.io");
        assert_eq!(ar.version, "v1beta1");
        assert_eq!(ar.kind, "APIRule");
        assert_eq!(ar.plural, "apirules");
    }

    #[test]
    fn dynamic_object_carries_labels_and_spec() {
        let obj = dynamic_object(
            "serverless.kyma-project.io/v1alpha2",
            "Function",
            "eventing-sink",
            "test",
            serde_json::json!({ "runtime": "nodejs20" }),
        )
        .unwrap();

        assert_eq!(obj.metadata.name.as_deref(), Some("eventing-sink"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("test"));
        let labels = obj.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_NAME], "eventing-sink");
        assert_eq!(labels[LABEL_MANAGED_BY], LABEL_MANAGED_BY_PREP);
        assert_eq!(obj.data["spec"]["runtime"], "nodejs20");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_when_condition_met() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = poll_until(
            "ready",
            Duration::from_secs(60),
            Duration::from_secs(1),
            || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_for_returns_the_value() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let host = poll_for(
            "host",
            Duration::from_secs(60),
            Duration::from_secs(1),
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(None)
                    } else {
                        Ok(Some("sink.example.com".to_string()))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(host, "sink.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out_with_last_error() {
        let result = poll_until(
            "function ready",
            Duration::from_secs(5),
            Duration::from_secs(1),
            || async { Err(Error::network("get_function", "connection reset")) },
        )
        .await;

        match result {
            Err(Error::Timeout {
                operation, message, ..
            }) => {
                assert_eq!(operation, "function ready");
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
