use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::protocol::{PullImageRequest, RunContainerRequest};
use tracing::{debug, warn};

use crate::error::ProvisioningError;

const PULL_PATH: &str = "/api/docker/pull";
const RUN_PATH: &str = "/api/docker/run";

/// Local collaborator that pulls images and launches sandboxed instances.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    async fn acquire_image(&self, image_ref: &str) -> Result<(), ProvisioningError>;
    async fn launch_instance(
        &self,
        image_ref: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<(), ProvisioningError>;
}

/// HTTP client for the backend's `/api/docker/*` endpoints.
///
/// Each call is one POST bounded by `timeout`; failures are never retried here.
pub struct HttpProvisioningClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpProvisioningClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn post<T>(&self, path: &str, body: &T) -> Result<(), ProvisioningError>
    where
        T: Serialize + Sync,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "provisioning: sending backend request");
        let request = self.http.post(&url).json(body).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => return Err(ProvisioningError::Timeout),
            Ok(Err(err)) if err.is_timeout() => return Err(ProvisioningError::Timeout),
            Ok(Err(err)) => {
                return Err(ProvisioningError::BackendFailure(format!(
                    "backend request to {url} failed: {err}"
                )))
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match tokio::time::timeout(self.timeout, response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                warn!(%url, error = %err, "provisioning: failed to read error body");
                String::new()
            }
            Err(_) => return Err(ProvisioningError::Timeout),
        };
        let message = body.trim();
        Err(ProvisioningError::BackendFailure(if message.is_empty() {
            format!("backend returned {status}")
        } else {
            message.to_string()
        }))
    }
}

#[async_trait]
impl ProvisioningBackend for HttpProvisioningClient {
    async fn acquire_image(&self, image_ref: &str) -> Result<(), ProvisioningError> {
        self.post(
            PULL_PATH,
            &PullImageRequest {
                image_name: image_ref.to_string(),
            },
        )
        .await
    }

    async fn launch_instance(
        &self,
        image_ref: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<(), ProvisioningError> {
        self.post(
            RUN_PATH,
            &RunContainerRequest {
                image_name: image_ref.to_string(),
                host_port,
                container_port,
            },
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/provisioning_tests.rs"]
mod tests;
