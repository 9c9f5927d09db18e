use http::{header::CONTENT_TYPE, Method, Uri};
use opentelemetry_http::{Bytes, HttpClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::protocol::{
    GetSamplingRulesRequest, GetSamplingRulesResponse, GetSamplingTargetsRequest,
    GetSamplingTargetsResponse,
};

/// Errors from configuring or talking to the sampling API.
///
/// Refresh failures are logged by the poller and retried on its next tick;
/// they never reach sampling callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum XraySamplerError {
    /// The configured endpoint is not a valid URI.
    #[error("invalid sampling endpoint: {0}")]
    Endpoint(#[from] http::uri::InvalidUri),
    /// The request could not be constructed.
    #[error("failed to build sampling request: {0}")]
    Request(#[from] http::Error),
    /// The endpoint could not be reached, or the call timed out.
    #[error("failed to reach sampling endpoint: {0}")]
    Transport(#[source] opentelemetry_http::HttpError),
    /// The endpoint answered with a non-success status.
    #[error("sampling endpoint returned status {0}")]
    Status(http::StatusCode),
    /// The request body could not be encoded or the response decoded.
    #[error("failed to decode sampling payload: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Stateless JSON-over-HTTP client for the two sampling operations.
#[derive(Debug)]
pub(crate) struct XraySamplerClient<C> {
    client: C,
    rules_endpoint: Uri,
    targets_endpoint: Uri,
}

impl<C: HttpClient> XraySamplerClient<C> {
    pub(crate) fn new(client: C, endpoint: &str) -> Result<Self, XraySamplerError> {
        let base = endpoint.trim_end_matches('/');
        Ok(XraySamplerClient {
            client,
            rules_endpoint: format!("{base}/GetSamplingRules").parse()?,
            // The missing "Get" may look wrong but is correct.
            targets_endpoint: format!("{base}/SamplingTargets").parse()?,
        })
    }

    pub(crate) async fn get_sampling_rules(
        &self,
        request: &GetSamplingRulesRequest,
    ) -> Result<GetSamplingRulesResponse, XraySamplerError> {
        self.post(&self.rules_endpoint, request).await
    }

    pub(crate) async fn get_sampling_targets(
        &self,
        request: &GetSamplingTargetsRequest,
    ) -> Result<GetSamplingTargetsResponse, XraySamplerError> {
        self.post(&self.targets_endpoint, request).await
    }

    async fn post<T, R>(&self, endpoint: &Uri, payload: &T) -> Result<R, XraySamplerError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)?;
        let request = http::Request::builder()
            .method(Method::POST)
            .uri(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))?;

        let response = self
            .client
            .send_bytes(request)
            .await
            .map_err(XraySamplerError::Transport)?;

        if !response.status().is_success() {
            return Err(XraySamplerError::Status(response.status()));
        }

        Ok(serde_json::from_slice(response.body())?)
    }
}
