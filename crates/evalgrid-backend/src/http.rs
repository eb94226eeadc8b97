//! HTTP client for the managed job service.
//!
//! Routes:
//!
//! ```text
//! POST /api/v1/workspaces/{ws}/jobs   body: CloudJobSpec  -> {"job_id": ".."}
//! POST /api/v1/jobs/{id}/start
//! GET  /api/v1/jobs/{id}                                   -> {"status": ".."}
//! POST /api/v1/jobs/{id}/stop
//! ```
//!
//! One HTTP/1 connection per request; every request is bounded by the
//! client's timeout.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tracing::debug;

use crate::adapter::BackendFuture;
use crate::cloud::{CloudApi, CloudJobSpec};
use crate::error::CloudApiError;

#[derive(Debug, Clone)]
pub struct HttpCloudApi {
    /// `host:port` of the service.
    address: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: String,
}

impl HttpCloudApi {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Send `Authorization: Bearer {token}` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes), CloudApiError> {
        let uri = format!("http://{}{path}", self.address);

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| CloudApiError::Unavailable(format!("connect {}: {e}", self.address)))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| CloudApiError::Unavailable(format!("handshake: {e}")))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "job service connection closed with error");
                }
            });

            let mut builder = http::Request::builder()
                .method(method.clone())
                .uri(&uri)
                .header("host", &self.address)
                .header("user-agent", "evalgrid/0.1")
                .header("content-type", "application/json");
            if let Some(token) = &self.token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let req = builder
                .body(Full::new(body))
                .map_err(|e| CloudApiError::Protocol(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| CloudApiError::Unavailable(format!("{method} {uri}: {e}")))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| CloudApiError::Unavailable(format!("read response: {e}")))?
                .to_bytes();

            debug!(%method, %uri, %status, "job service request");
            Ok::<_, CloudApiError>((status, bytes))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                CloudApiError::Unavailable(format!("{uri} timed out after {:?}", self.timeout))
            })?
    }

    /// Send a request and classify the response status.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        job_id: &str,
    ) -> Result<Bytes, CloudApiError> {
        let (status, body) = self.send(method, path, body).await?;
        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(CloudApiError::NotFound(job_id.to_string())),
            s if s.is_server_error() => Err(CloudApiError::Unavailable(format!(
                "{s}: {}",
                String::from_utf8_lossy(&body)
            ))),
            s => Err(CloudApiError::Rejected {
                status: s.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

fn decode<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, CloudApiError> {
    serde_json::from_slice(body).map_err(|e| CloudApiError::Protocol(e.to_string()))
}

impl CloudApi for HttpCloudApi {
    fn create_job<'a>(
        &'a self,
        spec: &'a CloudJobSpec,
    ) -> BackendFuture<'a, Result<String, CloudApiError>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(spec)
                .map_err(|e| CloudApiError::Protocol(format!("encode job spec: {e}")))?;
            let path = format!("/api/v1/workspaces/{}/jobs", spec.workspace_id);
            let body = self
                .call(Method::POST, &path, Bytes::from(payload), &spec.name)
                .await?;
            let created: CreateJobResponse = decode(&body)?;
            Ok(created.job_id)
        })
    }

    fn start_job<'a>(&'a self, job_id: &'a str) -> BackendFuture<'a, Result<(), CloudApiError>> {
        Box::pin(async move {
            let path = format!("/api/v1/jobs/{job_id}/start");
            self.call(Method::POST, &path, Bytes::new(), job_id).await?;
            Ok(())
        })
    }

    fn job_status<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BackendFuture<'a, Result<String, CloudApiError>> {
        Box::pin(async move {
            let path = format!("/api/v1/jobs/{job_id}");
            let body = self.call(Method::GET, &path, Bytes::new(), job_id).await?;
            let status: JobStatusResponse = decode(&body)?;
            Ok(status.status)
        })
    }

    fn stop_job<'a>(&'a self, job_id: &'a str) -> BackendFuture<'a, Result<(), CloudApiError>> {
        Box::pin(async move {
            let path = format!("/api/v1/jobs/{job_id}/stop");
            self.call(Method::POST, &path, Bytes::new(), job_id).await?;
            Ok(())
        })
    }
}
