// Storage cache management client.
// Issues ARM requests for Microsoft.StorageCache/caches and polls long-running operations.

use std::time::Duration;

use reqwest::{
    Client, Method, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::debug;

use crate::auth::AccessToken;
use crate::config::Config;
use crate::error::{CheckError, Result};

use super::operation::{Operation, OperationKind, OperationStatus, PollingMethod};
use super::types::{AsyncOperationStatus, Cache, CloudError, ProvisioningState};

pub const API_VERSION: &str = "2019-11-01";

/// HTTP client shared by the authorizer and the caches client.
pub fn http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("hpc-cache-check/", env!("CARGO_PKG_VERSION"))),
    );

    Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(CheckError::Http)
}

/// Client for the caches resource of one subscription.
pub struct CachesClient {
    http: Client,
    endpoint: String,
    subscription_id: String,
    authorization: Option<HeaderValue>,
    poll_interval: Duration,
}

impl CachesClient {
    /// Create a client; `token` is `None` when authorization failed.
    pub fn new(http: Client, config: &Config, token: Option<&AccessToken>) -> Result<Self> {
        let authorization = token
            .map(|t| HeaderValue::from_str(&t.bearer()))
            .transpose()
            .map_err(|e| CheckError::Auth(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.resource_manager_endpoint.trim_end_matches('/').to_string(),
            subscription_id: config.subscription_id.clone(),
            authorization,
            poll_interval: config.poll_interval,
        })
    }

    /// Whether requests carry a bearer token.
    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    /// URL of a cache resource.
    pub fn cache_url(&self, resource_group: &str, cache_name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.StorageCache/caches/{}",
            self.endpoint, self.subscription_id, resource_group, cache_name
        )
    }

    /// Create or update a cache. Returns the completion handle.
    pub async fn create_or_update(
        &self,
        resource_group: &str,
        cache_name: &str,
        cache: &Cache,
    ) -> Result<Operation> {
        let url = self.cache_url(resource_group, cache_name);
        let response = self
            .resource_request(Method::PUT, &url)
            .json(cache)
            .send()
            .await?;
        let response = check_response(response).await?;

        Operation::start(OperationKind::Put, url, response).await
    }

    /// Get a cache.
    pub async fn get(&self, resource_group: &str, cache_name: &str) -> Result<Cache> {
        let url = self.cache_url(resource_group, cache_name);
        let response = self.resource_request(Method::GET, &url).send().await?;
        let response = check_response(response).await?;
        let cache: Cache = response.json().await?;
        Ok(cache)
    }

    /// Delete a cache. Returns the completion handle.
    pub async fn delete(&self, resource_group: &str, cache_name: &str) -> Result<Operation> {
        let url = self.cache_url(resource_group, cache_name);
        let response = self.resource_request(Method::DELETE, &url).send().await?;
        let response = check_response(response).await?;

        Operation::start(OperationKind::Delete, url, response).await
    }

    /// Poll `operation` until it reaches a terminal state.
    ///
    /// Succeeds only when the operation succeeded. The delay between polls
    /// is the last `Retry-After`, else the configured poll interval.
    pub async fn wait_for_completion(&self, operation: &Operation) -> Result<Operation> {
        let mut state = operation.clone();

        while !state.is_done() {
            let delay = state.retry_after.unwrap_or(self.poll_interval);
            tokio::time::sleep(delay).await;
            self.poll(&mut state).await?;
            debug!(
                "{:?} {} -> {:?}",
                state.method, state.resource_url, state.status
            );
        }

        state.result()?;
        Ok(state)
    }

    /// Poll once and update `state`.
    async fn poll(&self, state: &mut Operation) -> Result<()> {
        match state.polling_method {
            PollingMethod::AsyncOperation => {
                let response = self.request(Method::GET, &state.polling_url).send().await?;
                let response = check_response(response).await?;
                state.update_from_headers(response.headers());
                let body: AsyncOperationStatus = response.json().await?;
                state.update_from_async_status(body);
            }
            PollingMethod::Location => {
                let response = self.request(Method::GET, &state.polling_url).send().await?;
                let response = check_response(response).await?;
                state.update_from_headers(response.headers());
                if response.status() != StatusCode::ACCEPTED {
                    state.set_status(OperationStatus::Succeeded, None);
                }
            }
            PollingMethod::Resource => {
                let response = self
                    .resource_request(Method::GET, &state.resource_url)
                    .send()
                    .await?;
                if state.method == OperationKind::Delete
                    && response.status() == StatusCode::NOT_FOUND
                {
                    state.set_status(OperationStatus::Succeeded, None);
                    return Ok(());
                }
                let response = check_response(response).await?;
                state.update_from_headers(response.headers());
                let cache: Cache = response.json().await?;
                match state.method {
                    OperationKind::Put => {
                        let status = cache
                            .provisioning_state()
                            .map(OperationStatus::from)
                            .unwrap_or(OperationStatus::Succeeded);
                        state.set_status(status, None);
                    }
                    // Still visible after a delete: only Failed or Cancelled end it.
                    OperationKind::Delete => {
                        if let Some(provisioning) = cache.provisioning_state().filter(|p| {
                            p.is_terminal() && *p != ProvisioningState::Succeeded
                        }) {
                            state.set_status(OperationStatus::from(provisioning), None);
                        }
                    }
                }
            }
            PollingMethod::None => {}
        }
        Ok(())
    }

    /// Request against a resource URL; adds the API version.
    fn resource_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request(method, url).query(&[("api-version", API_VERSION)])
    }

    /// Request with the bearer token, if any. Polling URLs carry their own query.
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.authorization {
            Some(value) => builder.header(AUTHORIZATION, value.clone()),
            None => builder,
        }
    }
}

/// Check response status and convert ARM errors.
async fn check_response(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
            Ok(response)
        }
        StatusCode::UNAUTHORIZED => Err(CheckError::Unauthorized),
        StatusCode::NOT_FOUND => {
            let url = response.url().to_string();
            Err(CheckError::NotFound(url))
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<CloudError>(&body) {
                Ok(cloud) => (cloud.error.code, cloud.error.message),
                Err(_) => (String::new(), body),
            };
            Err(CheckError::Api {
                status: status.as_u16(),
                code,
                message,
            })
        }
    }
}
