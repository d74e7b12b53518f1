//! JetStream baseline capture
//!
//! Reads stream metadata from the NATS monitoring endpoint (`/jsz`) through
//! the exposed APIRule host. The snapshot is stored in a ConfigMap so the
//! test suite can verify the stream was not recreated during the run.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use eventing_prep_common::retry::{retry_with_backoff, RetryConfig};
use eventing_prep_common::Error;

/// ConfigMap key for the stream name
pub const CM_STREAM_NAME: &str = "streamName";
/// ConfigMap key for the stream creation timestamp
pub const CM_STREAM_CREATION_TIME: &str = "streamCreationTime";
/// ConfigMap key for the full snapshot as JSON
pub const CM_STREAM_INFO: &str = "streamInfo";

/// Attempts for the monitoring endpoint before giving up
const JSZ_ATTEMPTS: u32 = 5;

/// Snapshot of one JetStream stream
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream name
    pub name: String,
    /// Creation timestamp as reported by NATS
    pub created: String,
    /// Subjects bound to the stream
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Storage type (file or memory)
    #[serde(default)]
    pub storage: Option<String>,
    /// Retention policy
    #[serde(default)]
    pub retention: Option<String>,
    /// Messages currently stored
    #[serde(default)]
    pub messages: u64,
    /// Consumers attached to the stream
    #[serde(default)]
    pub consumer_count: u64,
}

impl StreamInfo {
    /// ConfigMap data persisting this snapshot
    pub fn to_config_map_data(&self) -> Result<BTreeMap<String, String>, Error> {
        Ok(BTreeMap::from([
            (CM_STREAM_NAME.to_string(), self.name.clone()),
            (CM_STREAM_CREATION_TIME.to_string(), self.created.clone()),
            (CM_STREAM_INFO.to_string(), serde_json::to_string(self)?),
        ]))
    }
}

/// Broker introspection used by the baseline step
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerIntrospector: Send + Sync {
    /// Snapshot the configured stream, `None` if the stream does not exist
    async fn stream_snapshot(&self, host: &str) -> Result<Option<StreamInfo>, Error>;
}

// =============================================================================
// /jsz response shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct Jsz {
    #[serde(default)]
    account_details: Vec<JszAccount>,
}

#[derive(Debug, Deserialize)]
struct JszAccount {
    #[serde(default)]
    stream_detail: Vec<JszStream>,
}

#[derive(Debug, Deserialize)]
struct JszStream {
    name: String,
    #[serde(default)]
    created: String,
    #[serde(default)]
    config: Option<JszStreamConfig>,
    #[serde(default)]
    state: Option<JszStreamState>,
}

#[derive(Debug, Deserialize)]
struct JszStreamConfig {
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    retention: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JszStreamState {
    #[serde(default)]
    messages: u64,
    #[serde(default)]
    consumer_count: u64,
}

/// Find `stream` in a `/jsz?accounts=true&streams=true&config=true` response
pub fn find_stream(body: &serde_json::Value, stream: &str) -> Result<Option<StreamInfo>, Error> {
    let jsz: Jsz = serde_json::from_value(body.clone())?;
    Ok(jsz
        .account_details
        .into_iter()
        .flat_map(|a| a.stream_detail)
        .find(|s| s.name == stream)
        .map(|s| {
            let config = s.config.unwrap_or(JszStreamConfig {
                subjects: Vec::new(),
                storage: None,
                retention: None,
            });
            let (messages, consumer_count) = s
                .state
                .map(|st| (st.messages, st.consumer_count))
                .unwrap_or_default();
            StreamInfo {
                name: s.name,
                created: s.created,
                subjects: config.subjects,
                storage: config.storage,
                retention: config.retention,
                messages,
                consumer_count,
            }
        }))
}

/// [`BrokerIntrospector`] reading the NATS monitoring endpoint over HTTPS
pub struct JetStreamMonitor {
    http: reqwest::Client,
    stream: String,
    retry: RetryConfig,
}

impl JetStreamMonitor {
    /// Create a monitor for the named stream.
    ///
    /// Certificate verification is disabled: test clusters serve the APIRule
    /// host with self-signed certificates.
    pub fn new(stream: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            stream: stream.into(),
            retry: RetryConfig::fixed(JSZ_ATTEMPTS, Duration::from_secs(1)),
        })
    }
}

#[async_trait]
impl BrokerIntrospector for JetStreamMonitor {
    async fn stream_snapshot(&self, host: &str) -> Result<Option<StreamInfo>, Error> {
        let url = format!("https://{}/jsz?accounts=true&streams=true&config=true", host);
        let (http, url) = (&self.http, url.as_str());
        let body: serde_json::Value = retry_with_backoff(&self.retry, "jsz", || async move {
            let resp = http.get(url).send().await?.error_for_status()?;
            Ok::<_, Error>(resp.json().await?)
        })
        .await?;

        let snapshot = find_stream(&body, &self.stream)?;
        debug!(stream = %self.stream, found = snapshot.is_some(), "Read JetStream stream info");
        Ok(snapshot)
    }
}
