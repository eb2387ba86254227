// Long-running operation handles.
// Tracks how to poll an ARM PUT or DELETE and what the last poll observed.

use std::time::Duration;

use reqwest::{Response, StatusCode, header::HeaderMap};
use serde::Serialize;

use crate::error::{CheckError, Result};

use super::types::{AsyncOperationStatus, Cache, ErrorDetail, ProvisioningState};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
const LOCATION: &str = "location";
const RETRY_AFTER: &str = "retry-after";

/// Method that started the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Put,
    Delete,
}

/// Where completion is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollingMethod {
    /// `Azure-AsyncOperation` status resource.
    AsyncOperation,
    /// `Location` URL; 202 while running.
    Location,
    /// The resource itself, by provisioning state.
    Resource,
    /// Completed synchronously; nothing to poll.
    None,
}

/// Last observed state of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    /// Map a status string from an async-operation body.
    pub fn from_service(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl From<ProvisioningState> for OperationStatus {
    fn from(state: ProvisioningState) -> Self {
        match state {
            ProvisioningState::Succeeded => Self::Succeeded,
            ProvisioningState::Failed => Self::Failed,
            ProvisioningState::Cancelled => Self::Canceled,
            _ => Self::InProgress,
        }
    }
}

/// Completion handle for a PUT or DELETE on a cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub method: OperationKind,
    pub resource_url: String,
    pub polling_method: PollingMethod,
    pub polling_url: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl Operation {
    /// Build the handle from the response that started the operation.
    pub async fn start(kind: OperationKind, resource_url: String, response: Response) -> Result<Self> {
        let headers = response.headers().clone();
        let status_code = response.status();

        let mut operation = Self {
            method: kind,
            polling_url: resource_url.clone(),
            resource_url,
            polling_method: PollingMethod::Resource,
            status: OperationStatus::InProgress,
            error: None,
            retry_after: retry_after(&headers),
        };

        if let Some(url) = header_str(&headers, AZURE_ASYNC_OPERATION) {
            operation.polling_method = PollingMethod::AsyncOperation;
            operation.polling_url = url;
            return Ok(operation);
        }
        if let Some(url) = header_str(&headers, LOCATION) {
            operation.polling_method = PollingMethod::Location;
            operation.polling_url = url;
            return Ok(operation);
        }

        match kind {
            OperationKind::Put => {
                let body = response.text().await?;
                let cache: Cache = if body.trim().is_empty() {
                    Cache::default()
                } else {
                    serde_json::from_str(&body)?
                };
                // No provisioning state in a 200/201 body means the PUT is complete.
                let status = cache
                    .provisioning_state()
                    .map(OperationStatus::from)
                    .unwrap_or(OperationStatus::Succeeded);
                operation.set_status(status, None);
            }
            OperationKind::Delete => {
                if status_code != StatusCode::ACCEPTED {
                    operation.set_status(OperationStatus::Succeeded, None);
                }
            }
        }

        Ok(operation)
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a poll result; terminal states clear the polling method.
    pub(crate) fn set_status(&mut self, status: OperationStatus, error: Option<ErrorDetail>) {
        self.status = status;
        self.error = error;
        if status.is_terminal() {
            self.polling_method = PollingMethod::None;
        }
    }

    /// Apply headers from a poll response.
    pub(crate) fn update_from_headers(&mut self, headers: &HeaderMap) {
        self.retry_after = retry_after(headers);
        if self.polling_method == PollingMethod::Location {
            if let Some(url) = header_str(headers, LOCATION) {
                self.polling_url = url;
            }
        }
    }

    /// Apply an async-operation status body.
    pub(crate) fn update_from_async_status(&mut self, body: AsyncOperationStatus) {
        self.set_status(OperationStatus::from_service(&body.status), body.error);
    }

    /// Ok once succeeded, the terminal error once failed or canceled.
    pub fn result(&self) -> Result<()> {
        match self.status {
            OperationStatus::Succeeded => Ok(()),
            OperationStatus::InProgress => Err(CheckError::Other(format!(
                "{:?} {} is still in progress",
                self.method, self.resource_url
            ))),
            status => {
                let detail = self.error.clone().unwrap_or_default();
                Err(CheckError::OperationFailed {
                    status: format!("{:?}", status),
                    code: detail.code,
                    message: detail.message,
                })
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse `Retry-After` given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
