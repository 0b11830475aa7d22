//! PyGrid model-centric client
//!
//! Speaks the coordinator's model-centric HTTP API: authenticate, request a
//! cycle, download the model and report the diff. One [`PyGridJob`] maps to
//! one model name/version and resolves each cycle request to a [`CycleEvent`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ClientConfig, CycleEvent, FederatedJob, ModelReport, PerceptronPlan};
use crate::error::ArtificienError;

/// HTTP client for a PyGrid node
#[derive(Clone)]
pub struct PyGridClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    auth_token: String,
}

impl std::fmt::Debug for PyGridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PyGridClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl PyGridClient {
    pub fn new(
        base_url: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> Result<Self, ArtificienError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| ArtificienError::ConfigError(format!("invalid coordinator url: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ArtificienError::ConfigError(format!(
                "unsupported coordinator scheme: {}",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            auth_token: auth_token.to_string(),
        })
    }

    /// Job for one model name and version
    pub fn job(&self, model_name: &str, model_version: &str) -> PyGridJob {
        PyGridJob {
            client: self.clone(),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/model-centric/{path}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ArtificienError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.endpoint(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArtificienError::ConnectionFailure(format!(
                "{path} returned {status}"
            )));
        }
        Ok(response.json::<T>().await?)
    }

    /// Authenticate and obtain a worker id
    pub async fn authenticate(
        &self,
        model_name: &str,
        model_version: &str,
    ) -> Result<String, ArtificienError> {
        let request = AuthenticateRequest {
            auth_token: &self.auth_token,
            model_name,
            model_version,
        };
        let response: AuthenticateResponse = self.post_json("authenticate", &request).await?;
        match response.worker_id {
            Some(worker_id) if response.status == "success" => Ok(worker_id),
            _ => Err(ArtificienError::ConnectionFailure(format!(
                "authentication failed: {}",
                response.error.unwrap_or(response.status)
            ))),
        }
    }

    /// Ask to join the current training cycle
    pub async fn cycle_request(
        &self,
        worker_id: &str,
        model_name: &str,
        model_version: &str,
    ) -> Result<CycleResponse, ArtificienError> {
        let request = CycleRequest {
            worker_id,
            model: model_name,
            version: model_version,
            ping: 0.0,
            download: 0.0,
            upload: 0.0,
        };
        self.post_json("cycle-request", &request).await
    }

    /// Download the model parameters for an accepted cycle
    pub async fn get_model(
        &self,
        worker_id: &str,
        request_key: &str,
        model_id: u64,
    ) -> Result<Vec<f64>, ArtificienError> {
        let model_id = model_id.to_string();
        let response = self
            .http
            .get(self.endpoint("get-model"))
            .query(&[
                ("worker_id", worker_id),
                ("request_key", request_key),
                ("model_id", model_id.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArtificienError::ConnectionFailure(format!(
                "get-model returned {status}"
            )));
        }
        let model: ModelParams = response.json().await?;
        Ok(model.params)
    }

    /// Report a diff for an accepted cycle
    pub async fn report(
        &self,
        worker_id: &str,
        request_key: &str,
        diff: &[u8],
    ) -> Result<(), ArtificienError> {
        let request = ReportRequest {
            worker_id,
            request_key,
            diff: BASE64.encode(diff),
        };
        let response: StatusResponse = self.post_json("report", &request).await?;
        if response.status == "success" {
            Ok(())
        } else {
            Err(ArtificienError::ConnectionFailure(format!(
                "report failed: {}",
                response.error.unwrap_or(response.status)
            )))
        }
    }
}

/// Federated job against a PyGrid node
#[derive(Debug, Clone)]
pub struct PyGridJob {
    client: PyGridClient,
    model_name: String,
    model_version: String,
}

impl PyGridJob {
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn negotiate(&self) -> Result<CycleEvent, ArtificienError> {
        let worker_id = self
            .client
            .authenticate(&self.model_name, &self.model_version)
            .await?;
        debug!(model = %self.model_name, version = %self.model_version, "authenticated with coordinator");

        match self
            .client
            .cycle_request(&worker_id, &self.model_name, &self.model_version)
            .await?
        {
            CycleResponse::Rejected { timeout } => Ok(CycleEvent::Rejected {
                retry_after: retry_after(timeout),
            }),
            CycleResponse::Accepted {
                request_key,
                model_id,
                client_config,
            } => {
                let params = self
                    .client
                    .get_model(&worker_id, &request_key, model_id)
                    .await?;
                info!(model_id, params = params.len(), "cycle accepted");

                Ok(CycleEvent::Ready {
                    plan: Box::new(PerceptronPlan::new(params)),
                    config: client_config,
                    report: Box::new(PyGridReport {
                        client: self.client.clone(),
                        worker_id,
                        request_key,
                    }),
                })
            }
        }
    }
}

#[async_trait]
impl FederatedJob for PyGridJob {
    async fn request_cycle(&mut self) -> CycleEvent {
        match self.negotiate().await {
            Ok(event) => event,
            Err(e) => CycleEvent::Error(e),
        }
    }
}

/// Reports the diff for one accepted cycle
struct PyGridReport {
    client: PyGridClient,
    worker_id: String,
    request_key: String,
}

#[async_trait]
impl ModelReport for PyGridReport {
    async fn report(&mut self, diff: Vec<u8>) -> Result<(), ArtificienError> {
        self.client
            .report(&self.worker_id, &self.request_key, &diff)
            .await?;
        info!(bytes = diff.len(), "reported model diff");
        Ok(())
    }
}

/// Suggested delay from a rejection. Negative or unrepresentable timeouts are dropped.
fn retry_after(timeout: Option<f64>) -> Option<Duration> {
    timeout.and_then(|t| Duration::try_from_secs_f64(t).ok())
}

// Wire structures

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    auth_token: &'a str,
    model_name: &'a str,
    model_version: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthenticateResponse {
    #[serde(default)]
    status: String,
    worker_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CycleRequest<'a> {
    worker_id: &'a str,
    model: &'a str,
    version: &'a str,
    ping: f64,
    download: f64,
    upload: f64,
}

/// Coordinator answer to a cycle request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CycleResponse {
    Accepted {
        request_key: String,
        model_id: u64,
        client_config: ClientConfig,
    },
    Rejected {
        /// Seconds until the next cycle
        #[serde(default)]
        timeout: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct ModelParams {
    params: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct ReportRequest<'a> {
    worker_id: &'a str,
    request_key: &'a str,
    diff: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
    error: Option<String>,
}
