//! Director client for scenario, runtime and application records
//!
//! Provides trait-based abstractions over the registry so the registrar and
//! the fixture can be tested against mocks, while production code talks
//! GraphQL to the Compass Director.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::Error;

use crate::auth::{OAuthCredentials, TokenSource};
use crate::graphql::{self, ApplicationPage, FormationObjectType, GraphqlRequest, GraphqlResponse};

/// Applications requested per Director page
const APPLICATION_PAGE_SIZE: u32 = 200;

/// Registry operations needed to link a runtime to a scenario
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Check whether a scenario with this name exists
    async fn scenario_exists(&self, scenario: &str) -> Result<bool, Error>;

    /// Create a scenario. Returns [`Error::Conflict`] if it already exists.
    async fn add_scenario(&self, scenario: &str) -> Result<(), Error>;

    /// Check whether the runtime is already part of the scenario
    async fn is_runtime_assigned(&self, runtime_id: &str, scenario: &str) -> Result<bool, Error>;

    /// Add the runtime to the scenario. Returns [`Error::Conflict`] if already assigned.
    async fn assign_runtime(&self, runtime_id: &str, scenario: &str) -> Result<(), Error>;
}

/// Registry operations for the mock application record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    /// Look up an application ID by name
    async fn application_id(&self, name: &str) -> Result<Option<String>, Error>;

    /// Register an application and return its ID
    async fn register_application(&self, name: &str) -> Result<String, Error>;

    /// Check whether the application is already part of the scenario
    async fn is_application_assigned(&self, app_id: &str, scenario: &str)
        -> Result<bool, Error>;

    /// Add the application to the scenario
    async fn assign_application(&self, app_id: &str, scenario: &str) -> Result<(), Error>;
}

/// Connection settings for the Director
#[derive(Clone, Debug)]
pub struct DirectorConfig {
    /// GraphQL endpoint (e.g., `https://compass-gateway-auth-oauth.example.com/director/graphql`)
    pub url: String,
    /// Tenant ID sent with every request
    pub tenant: String,
    /// OAuth client credentials
    pub credentials: OAuthCredentials,
    /// Per-request timeout
    pub timeout: Duration,
}

/// GraphQL-over-HTTP Director client
pub struct DirectorClient {
    http: reqwest::Client,
    config: DirectorConfig,
    tokens: TokenSource,
}

impl DirectorClient {
    /// Create a Director client
    pub fn new(config: DirectorConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build director HTTP client: {}", e)))?;
        let tokens = TokenSource::new(http.clone(), config.credentials.clone());
        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    async fn execute(
        &self,
        operation: &str,
        resource: &str,
        query: &str,
        variables: Value,
    ) -> Result<Value, Error> {
        let token = self.tokens.token().await?;
        debug!(operation = %operation, resource = %resource, "Director request");

        let resp: GraphqlResponse = self
            .http
            .post(&self.config.url)
            .bearer_auth(token)
            .header("Tenant", &self.config.tenant)
            .json(&GraphqlRequest { query, variables })
            .send()
            .await
            .map_err(|e| Error::network(operation, e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(operation, e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::network(operation, e.to_string()))?;

        resp.into_result(operation, resource)
    }

    async fn object_scenarios(
        &self,
        operation: &str,
        query: &str,
        id: &str,
    ) -> Result<Vec<String>, Error> {
        let object = self
            .execute(operation, id, query, json!({ "id": id }))
            .await?;
        if object.is_null() {
            return Err(Error::config(format!(
                "object {} is not registered in the director",
                id
            )));
        }
        Ok(graphql::scenarios_from_labels(&object))
    }

    async fn assign_formation(
        &self,
        operation: &str,
        object_id: &str,
        object_type: FormationObjectType,
        scenario: &str,
    ) -> Result<(), Error> {
        self.execute(
            operation,
            &format!("{} in scenario {}", object_id, scenario),
            graphql::ASSIGN_FORMATION,
            json!({ "id": object_id, "type": object_type.as_str(), "name": scenario }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for DirectorClient {
    async fn scenario_exists(&self, scenario: &str) -> Result<bool, Error> {
        let formation = self
            .execute(
                "scenario_exists",
                scenario,
                graphql::FORMATION_BY_NAME,
                json!({ "name": scenario }),
            )
            .await?;
        Ok(!formation.is_null())
    }

    async fn add_scenario(&self, scenario: &str) -> Result<(), Error> {
        self.execute(
            "add_scenario",
            &format!("scenario {}", scenario),
            graphql::CREATE_FORMATION,
            json!({ "name": scenario }),
        )
        .await?;
        Ok(())
    }

    async fn is_runtime_assigned(&self, runtime_id: &str, scenario: &str) -> Result<bool, Error> {
        let scenarios = self
            .object_scenarios("is_runtime_assigned", graphql::RUNTIME_LABELS, runtime_id)
            .await?;
        Ok(scenarios.iter().any(|s| s == scenario))
    }

    async fn assign_runtime(&self, runtime_id: &str, scenario: &str) -> Result<(), Error> {
        self.assign_formation(
            "assign_runtime",
            runtime_id,
            FormationObjectType::Runtime,
            scenario,
        )
        .await
    }
}

#[async_trait]
impl ApplicationRegistry for DirectorClient {
    async fn application_id(&self, name: &str) -> Result<Option<String>, Error> {
        find_application(name, |after| async move {
            let page = self
                .execute(
                    "application_id",
                    name,
                    graphql::APPLICATIONS,
                    json!({ "first": APPLICATION_PAGE_SIZE, "after": after }),
                )
                .await?;
            graphql::applications_from_page(page)
        })
        .await
    }

    async fn register_application(&self, name: &str) -> Result<String, Error> {
        let app = self
            .execute(
                "register_application",
                &format!("application {}", name),
                graphql::REGISTER_APPLICATION,
                json!({ "in": { "name": name, "providerName": "eventing-tests" } }),
            )
            .await?;
        app.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::serialization("registerApplication returned no id"))
    }

    async fn is_application_assigned(
        &self,
        app_id: &str,
        scenario: &str,
    ) -> Result<bool, Error> {
        let scenarios = self
            .object_scenarios(
                "is_application_assigned",
                graphql::APPLICATION_LABELS,
                app_id,
            )
            .await?;
        Ok(scenarios.iter().any(|s| s == scenario))
    }

    async fn assign_application(&self, app_id: &str, scenario: &str) -> Result<(), Error> {
        self.assign_formation(
            "assign_application",
            app_id,
            FormationObjectType::Application,
            scenario,
        )
        .await
    }
}

/// Walk application pages until `name` is found or the cursor runs out.
///
/// Stops early if the Director hands back a cursor it already returned.
async fn find_application<F, Fut>(name: &str, mut fetch: F) -> Result<Option<String>, Error>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ApplicationPage, Error>>,
{
    let mut after: Option<String> = None;
    loop {
        let page = fetch(after.clone()).await?;
        if let Some(app) = page.applications.into_iter().find(|app| app.name == name) {
            return Ok(Some(app.id));
        }
        match page.next_cursor {
            Some(next) if after.as_deref() != Some(next.as_str()) => after = Some(next),
            _ => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::ApplicationRef;
    use parking_lot::Mutex;

    fn page(names: &[&str], next: Option<&str>) -> ApplicationPage {
        ApplicationPage {
            applications: names
                .iter()
                .map(|name| ApplicationRef {
                    id: format!("id-{name}"),
                    name: name.to_string(),
                })
                .collect(),
            next_cursor: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn application_on_a_later_page_is_found() {
        let cursors = Mutex::new(Vec::new());
        let id = find_application("commerce", |after| {
            cursors.lock().push(after.clone());
            async move {
                Ok(match after.as_deref() {
                    None => page(&["billing", "orders"], Some("c-2")),
                    Some("c-2") => page(&["inventory"], Some("c-3")),
                    _ => page(&["commerce"], None),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(id.as_deref(), Some("id-commerce"));
        assert_eq!(
            *cursors.lock(),
            vec![None, Some("c-2".to_string()), Some("c-3".to_string())]
        );
    }

    #[tokio::test]
    async fn missing_application_stops_at_the_last_page() {
        let calls = Mutex::new(0u32);
        let id = find_application("commerce", |after| {
            *calls.lock() += 1;
            async move {
                Ok(match after {
                    None => page(&["billing"], Some("c-2")),
                    Some(_) => page(&["orders"], None),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(id, None);
        assert_eq!(*calls.lock(), 2);
    }

    #[tokio::test]
    async fn repeated_cursor_ends_the_scan() {
        let calls = Mutex::new(0u32);
        let id = find_application("commerce", |_| {
            *calls.lock() += 1;
            async { Ok(page(&["billing"], Some("c-2"))) }
        })
        .await
        .unwrap();

        assert_eq!(id, None);
        assert_eq!(*calls.lock(), 2);
    }

    #[tokio::test]
    async fn page_error_is_returned() {
        let err = find_application("commerce", |_| async {
            Err(Error::network("application_id", "502 Bad Gateway"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TransientNetwork { .. }));
    }
}
