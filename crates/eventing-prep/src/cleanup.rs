//! Removal of everything the preparation created
//!
//! Runs after a failed step so the next attempt starts from a clean cluster.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::kube_utils::{build_api_resource, delete_if_exists, KubeContext};
use eventing_prep_common::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_PREP};

use crate::functions::SubscriptionVersion;
use crate::manifests::{APIRULE_API_VERSION, APIRULE_KIND, SUBSCRIPTION_KIND};

/// Tears down test resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cleanup: Send + Sync {
    /// Delete every resource the preparation created, best-effort
    async fn cleanup_all(&self) -> Result<(), Error>;
}

/// Kubernetes-backed [`Cleanup`]
///
/// Deletes labeled subscriptions and APIRules in the test namespace, then
/// both test namespaces. Every deletion is attempted; the first failure is
/// returned after the rest have run.
pub struct KubeCleanup {
    kube: Arc<KubeContext>,
    test_namespace: String,
    mock_namespace: String,
}

impl KubeCleanup {
    /// Cleanup of the given namespaces
    pub fn new(
        kube: Arc<KubeContext>,
        test_namespace: impl Into<String>,
        mock_namespace: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            test_namespace: test_namespace.into(),
            mock_namespace: mock_namespace.into(),
        }
    }

    async fn delete_labeled(&self, api_version: &str, kind: &str) -> Result<(), Error> {
        let ar = build_api_resource(api_version, kind);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.kube.client(), &self.test_namespace, &ar);
        let selector = format!("{}={}", LABEL_MANAGED_BY, LABEL_MANAGED_BY_PREP);
        match api
            .delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                // CRD not served by this cluster
                if e.is_not_found() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[async_trait]
impl Cleanup for KubeCleanup {
    async fn cleanup_all(&self) -> Result<(), Error> {
        let mut first_error = None;
        let mut record = |what: &str, result: Result<(), Error>| {
            if let Err(e) = result {
                warn!(resource = %what, error = %e, "Cleanup failed");
                first_error.get_or_insert(e);
            }
        };

        for version in [SubscriptionVersion::V1Alpha1, SubscriptionVersion::V1Alpha2] {
            let result = self
                .delete_labeled(version.api_version(), SUBSCRIPTION_KIND)
                .await;
            record(version.api_version(), result);
        }
        let result = self.delete_labeled(APIRULE_API_VERSION, APIRULE_KIND).await;
        record(APIRULE_KIND, result);

        let namespaces: Api<Namespace> = Api::all(self.kube.client());
        for ns in [&self.test_namespace, &self.mock_namespace] {
            let result = delete_if_exists(&namespaces, ns).await.map(|_| ());
            record(ns, result);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    test_namespace = %self.test_namespace,
                    mock_namespace = %self.mock_namespace,
                    "Cleaned up test resources"
                );
                Ok(())
            }
        }
    }
}
