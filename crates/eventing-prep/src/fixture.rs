//! Commerce mock fixture
//!
//! Deploys the mock application that publishes the test events, either
//! standalone (no registry) or registered in Compass and attached to the
//! test scenario.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::kube_utils::{create_if_absent, ensure_namespace, KubeContext};
use eventing_prep_common::Error;
use eventing_prep_compass::{ensure_present, ApplicationRegistry, RegistrationStep};

use crate::manifests::{mock_deployment, mock_service};

/// Name of the mock Deployment and Service
pub const MOCK_NAME: &str = "commerce-mock";

/// Image of the mock application
pub const MOCK_IMAGE: &str = "europe-docker.pkg.dev/kyma-project/prod/commerce-mock:latest";

/// Mock application setup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MockFixture: Send + Sync {
    /// Deploy the mock without any registry involvement
    async fn ensure_local(
        &self,
        mock_namespace: &str,
        test_namespace: &str,
        with_v1alpha2: bool,
        event_source_namespace: Option<String>,
    ) -> Result<(), Error>;

    /// Register the mock application, attach it to `scenario` and deploy it
    async fn ensure_with_registry(
        &self,
        app_name: &str,
        scenario: &str,
        mock_namespace: &str,
        test_namespace: &str,
        scenario_preexisted: bool,
    ) -> Result<(), Error>;
}

/// Register `app_name` and attach it to `scenario`, returning its ID.
///
/// Both sub-steps check before creating. A freshly created scenario cannot
/// have the application attached yet, so the assignment check is skipped
/// unless the scenario pre-existed.
pub async fn ensure_application_registered(
    registry: &dyn ApplicationRegistry,
    app_name: &str,
    scenario: &str,
    scenario_preexisted: bool,
) -> Result<String, Error> {
    ensure_present(
        RegistrationStep::RegisterApplication,
        || async { Ok(registry.application_id(app_name).await?.is_some()) },
        || async { registry.register_application(app_name).await.map(|_| ()) },
    )
    .await?;

    let app_id = registry.application_id(app_name).await?.ok_or_else(|| {
        Error::registration(
            RegistrationStep::RegisterApplication.check_name(),
            format!("application {} not found after registration", app_name),
        )
    })?;

    let outcome = ensure_present(
        RegistrationStep::AssignApplication,
        || async {
            if !scenario_preexisted {
                return Ok(false);
            }
            registry.is_application_assigned(&app_id, scenario).await
        },
        || registry.assign_application(&app_id, scenario),
    )
    .await?;
    debug!(application = %app_name, scenario = %scenario, ?outcome, "Application assignment");

    Ok(app_id)
}

/// Kubernetes-backed [`MockFixture`]
pub struct KubeMockFixture {
    kube: Arc<KubeContext>,
    applications: Option<Arc<dyn ApplicationRegistry>>,
    app_name: String,
}

impl KubeMockFixture {
    /// Create a fixture; `applications` is required for the registry path
    pub fn new(
        kube: Arc<KubeContext>,
        applications: Option<Arc<dyn ApplicationRegistry>>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            applications,
            app_name: app_name.into(),
        }
    }

    async fn deploy_mock(
        &self,
        mock_namespace: &str,
        test_namespace: &str,
        env: &[(&str, &str)],
    ) -> Result<(), Error> {
        let client = self.kube.client();
        ensure_namespace(&client, mock_namespace).await?;
        ensure_namespace(&client, test_namespace).await?;

        let deployment: Deployment = serde_json::from_value(mock_deployment(
            MOCK_NAME,
            mock_namespace,
            MOCK_IMAGE,
            env,
        ))?;
        let service: Service = serde_json::from_value(mock_service(MOCK_NAME, mock_namespace))?;

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), mock_namespace);
        let created = create_if_absent(&deployments, &deployment, MOCK_NAME).await?;
        debug!(deployment = %MOCK_NAME, namespace = %mock_namespace, created, "Mock deployment ready");

        let services: Api<Service> = Api::namespaced(client, mock_namespace);
        create_if_absent(&services, &service, MOCK_NAME).await?;
        Ok(())
    }
}

#[async_trait]
impl MockFixture for KubeMockFixture {
    async fn ensure_local(
        &self,
        mock_namespace: &str,
        test_namespace: &str,
        with_v1alpha2: bool,
        event_source_namespace: Option<String>,
    ) -> Result<(), Error> {
        let event_source = event_source_namespace.unwrap_or_else(|| self.app_name.clone());
        let v1alpha2 = with_v1alpha2.to_string();
        self.deploy_mock(
            mock_namespace,
            test_namespace,
            &[
                ("APP_NAME", self.app_name.as_str()),
                ("EVENT_SOURCE", event_source.as_str()),
                ("TEST_NAMESPACE", test_namespace),
                ("SUBSCRIPTION_V1ALPHA2", v1alpha2.as_str()),
            ],
        )
        .await?;

        info!(namespace = %mock_namespace, "Commerce mock deployed without Compass");
        Ok(())
    }

    async fn ensure_with_registry(
        &self,
        app_name: &str,
        scenario: &str,
        mock_namespace: &str,
        test_namespace: &str,
        scenario_preexisted: bool,
    ) -> Result<(), Error> {
        let registry = self.applications.as_deref().ok_or_else(|| {
            Error::config("Compass flow requires a Director connection (DIRECTOR_URL)")
        })?;

        let app_id =
            ensure_application_registered(registry, app_name, scenario, scenario_preexisted)
                .await?;

        self.deploy_mock(
            mock_namespace,
            test_namespace,
            &[
                ("APP_NAME", app_name),
                ("EVENT_SOURCE", app_name),
                ("TEST_NAMESPACE", test_namespace),
                ("COMPASS_APPLICATION_ID", app_id.as_str()),
            ],
        )
        .await?;

        info!(
            application = %app_name,
            scenario = %scenario,
            namespace = %mock_namespace,
            "Commerce mock deployed with Compass"
        );
        Ok(())
    }
}
