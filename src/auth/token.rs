// Token acquisition.
// Exchanges a credential for an ARM access token at the identity provider.

use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{CheckError, Result};

use super::credential::Credential;

const IMDS_API_VERSION: &str = "2018-02-01";

/// Bearer token for the resource manager.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Token endpoint response, shared by AAD v1 and IMDS.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // Seconds since the epoch; sent as a string by both endpoints, numeric by some proxies.
    #[serde(default)]
    expires_on: Option<Value>,
}

/// Identity provider error body.
#[derive(Debug, Deserialize)]
struct TokenError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Acquires ARM tokens for one credential.
pub struct Authorizer {
    http: Client,
    credential: Credential,
    authority: String,
    resource: String,
}

impl Authorizer {
    pub fn new(http: Client, credential: Credential, config: &Config) -> Self {
        Self {
            http,
            credential,
            authority: config.active_directory_endpoint.trim_end_matches('/').to_string(),
            resource: config.management_resource(),
        }
    }

    /// Build an authorizer for whatever credential the environment provides.
    pub fn from_environment(http: Client, config: &Config) -> Self {
        Self::new(http, Credential::from_env(), config)
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Fetch a fresh token.
    pub async fn token(&self) -> Result<AccessToken> {
        debug!("requesting token via {}", self.credential.kind());

        let response = match &self.credential {
            Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!("{}/{}/oauth2/token", self.authority, tenant_id);
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("resource", self.resource.as_str()),
                ];
                self.http.post(&url).form(&form).send().await?
            }
            Credential::ManagedIdentity {
                endpoint,
                client_id,
            } => {
                let mut params = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(client_id) = client_id {
                    params.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(endpoint)
                    .header("Metadata", "true")
                    .query(&params)
                    .send()
                    .await?
            }
        };

        parse_token_response(response).await
    }
}

async fn parse_token_response(response: Response) -> Result<AccessToken> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<TokenError>(&body) {
            Ok(TokenError {
                error: Some(error),
                error_description,
            }) => format!("{}: {}", error, error_description.unwrap_or_default()),
            _ => body,
        };
        return Err(CheckError::Auth(format!("HTTP {}: {}", status.as_u16(), detail)));
    }

    let parsed: TokenResponse = response.json().await?;
    Ok(AccessToken {
        token: parsed.access_token,
        expires_on: parsed.expires_on.as_ref().and_then(epoch_seconds),
    })
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0)
}
