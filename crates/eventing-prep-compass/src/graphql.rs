//! GraphQL documents and response decoding for the Compass Director
//!
//! Every operation is sent as a parameterized document with variables so
//! scenario and application names never need escaping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use eventing_prep_common::Error;

/// Label key under which the Director lists an object's scenarios
pub const SCENARIOS_LABEL: &str = "scenarios";

/// Fetch a formation (scenario) by name; `null` when absent
pub const FORMATION_BY_NAME: &str =
    "query ($name: String!) { result: formationByName(name: $name) { id name } }";

/// Create a formation (scenario)
pub const CREATE_FORMATION: &str =
    "mutation ($name: String!) { result: createFormation(formation: { name: $name }) { id name } }";

/// Read a runtime's labels
pub const RUNTIME_LABELS: &str = "query ($id: ID!) { result: runtime(id: $id) { id labels } }";

/// Read an application's labels
pub const APPLICATION_LABELS: &str =
    "query ($id: ID!) { result: application(id: $id) { id labels } }";

/// List one page of applications, starting after the `$after` cursor
pub const APPLICATIONS: &str = "query ($first: Int!, $after: PageCursor) { result: applications(first: $first, after: $after) { data { id name } pageInfo { endCursor hasNextPage } } }";

/// Register an application
pub const REGISTER_APPLICATION: &str =
    "mutation ($in: ApplicationRegisterInput!) { result: registerApplication(in: $in) { id name } }";

/// Assign an object (runtime or application) to a formation
pub const ASSIGN_FORMATION: &str = "mutation ($id: String!, $type: FormationObjectType!, $name: String!) { result: assignFormation(objectID: $id, objectType: $type, formation: { name: $name }) { id name } }";

/// Object kinds that can join a formation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormationObjectType {
    /// A provisioned runtime (cluster)
    Runtime,
    /// A registered application
    Application,
}

impl FormationObjectType {
    /// GraphQL enum literal
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "RUNTIME",
            Self::Application => "APPLICATION",
        }
    }
}

/// A GraphQL request body
#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a> {
    /// The document
    pub query: &'a str,
    /// Bound variables
    pub variables: Value,
}

/// A GraphQL response envelope
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    /// Payload; every document aliases its root field as `result`
    #[serde(default)]
    pub data: Option<Value>,
    /// Errors reported by the server
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

/// A single GraphQL error
#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    /// Human readable message
    pub message: String,
}

/// Application entry returned by [`APPLICATIONS`]
#[derive(Debug, Deserialize, PartialEq)]
pub struct ApplicationRef {
    /// Director ID
    pub id: String,
    /// Application name
    pub name: String,
}

/// One page of [`APPLICATIONS`]
#[derive(Debug, Default, PartialEq)]
pub struct ApplicationPage {
    /// Applications on this page
    pub applications: Vec<ApplicationRef>,
    /// Cursor of the following page, `None` on the last page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

/// Director messages meaning the create target already exists
fn is_conflict_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not unique") || lower.contains("already exist")
}

impl GraphqlResponse {
    /// Unwrap the aliased `result` field.
    ///
    /// Errors mentioning uniqueness map to [`Error::Conflict`] so that
    /// create-if-absent callers can treat them as success.
    pub fn into_result(self, operation: &str, resource: &str) -> Result<Value, Error> {
        if !self.errors.is_empty() {
            let message = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if self.errors.iter().any(|e| is_conflict_message(&e.message)) {
                return Err(Error::conflict(resource));
            }
            return Err(Error::network(operation, message));
        }
        Ok(self
            .data
            .and_then(|mut d| d.get_mut("result").map(Value::take))
            .unwrap_or(Value::Null))
    }
}

/// Extract the scenario names from an object's `labels` field
pub fn scenarios_from_labels(object: &Value) -> Vec<String> {
    object
        .get("labels")
        .and_then(|l| l.get(SCENARIOS_LABEL))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decode one page returned by [`APPLICATIONS`]
pub fn applications_from_page(mut page: Value) -> Result<ApplicationPage, Error> {
    let applications = match page.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Vec::new(),
        Some(data) => serde_json::from_value(data)?,
    };
    let info: PageInfo = match page.get_mut("pageInfo").map(Value::take) {
        Some(Value::Null) | None => PageInfo::default(),
        Some(info) => serde_json::from_value(info)?,
    };
    let next_cursor = info
        .end_cursor
        .filter(|cursor| info.has_next_page && !cursor.is_empty());
    Ok(ApplicationPage {
        applications,
        next_cursor,
    })
}
