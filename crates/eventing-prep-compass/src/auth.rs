//! OAuth client-credentials token source for the Director

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use eventing_prep_common::Error;

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Scopes required for formation, runtime and application management
pub const DIRECTOR_SCOPES: &str = "runtime:read runtime:write application:read application:write formation:read formation:write label_definition:read label_definition:write";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Client credentials used to obtain Director tokens
#[derive(Clone, Debug)]
pub struct OAuthCredentials {
    /// Token endpoint URL
    pub token_url: String,
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

/// Caches one bearer token and refreshes it on expiry
pub struct TokenSource {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    cached: Mutex<Option<(String, Instant)>>,
}

impl TokenSource {
    /// Create a token source over a shared HTTP client
    pub fn new(http: reqwest::Client, credentials: OAuthCredentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, fetching a new one when needed
    pub async fn token(&self) -> Result<String, Error> {
        if let Some((token, expires_at)) = self.cached.lock().as_ref() {
            if Instant::now() + EXPIRY_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        debug!(token_url = %self.credentials.token_url, "Fetching director token");
        let resp = self
            .http
            .post(&self.credentials.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", DIRECTOR_SCOPES),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<TokenResponse>()
            .await?;

        let lifetime = Duration::from_secs(resp.expires_in.unwrap_or(3600));
        *self.cached.lock() = Some((resp.access_token.clone(), Instant::now() + lifetime));
        Ok(resp.access_token)
    }
}
