// SPDX-License-Identifier: Apache-2.0
//! The outbound request pipeline.
//!
//! A fixed-order chain of tagged stages applied sequentially: error
//! observation → tenant header injection → transport. Only the transport
//! stage performs I/O; the others inspect or annotate the request. The
//! chain order is the same for every request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bramble_graphql::{Document, GraphqlRequest, GraphqlResponse};
use serde_json::Value;
use tracing::warn;

use crate::error::NetworkError;
use crate::tenant::TenantContext;

/// Header carrying the tenant slug on every request.
pub const ORG_SLUG_HEADER: &str = "X-Org-Slug";

/// Future returned by a transport implementation.
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<GraphqlResponse, NetworkError>> + Send>>;

/// The seam between the pipeline and real I/O.
///
/// Production uses [`HttpTransport`]; tests swap in scripted transports that
/// never open a socket.
pub trait Transport: Send + Sync {
    /// Performs one request round-trip.
    fn send(
        &self,
        endpoint: &str,
        request: &GraphqlRequest,
        headers: &[(String, String)],
    ) -> TransportFuture;
}

/// One pipeline stage.
pub enum Stage {
    /// Observes the outcome for diagnostics; never alters it.
    ErrorObserve,
    /// Attaches `X-Org-Slug`, read from ambient context at send time.
    OrgSlug(TenantContext),
    /// Serializes the document and performs the network call.
    Transport(Arc<dyn Transport>),
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorObserve => f.write_str("ErrorObserve"),
            Self::OrgSlug(_) => f.write_str("OrgSlug"),
            Self::Transport(_) => f.write_str("Transport"),
        }
    }
}

/// Composes the outbound stages and performs the call.
pub struct RequestPipeline {
    endpoint: String,
    stages: Vec<Stage>,
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("endpoint", &self.endpoint)
            .field("stages", &self.stages)
            .finish()
    }
}

impl RequestPipeline {
    /// Builds the standard chain: error observation, tenant header,
    /// transport.
    #[must_use]
    pub fn new(endpoint: String, tenant: TenantContext, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            stages: vec![
                Stage::ErrorObserve,
                Stage::OrgSlug(tenant),
                Stage::Transport(transport),
            ],
        }
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs `document` with `variables` through every stage in order.
    pub async fn execute(
        &self,
        document: &Document,
        variables: Value,
    ) -> Result<GraphqlResponse, NetworkError> {
        let request = GraphqlRequest::new(document.to_string(), variables);
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut observe = false;
        let mut outcome: Option<Result<GraphqlResponse, NetworkError>> = None;
        for stage in &self.stages {
            match stage {
                Stage::ErrorObserve => observe = true,
                Stage::OrgSlug(tenant) => {
                    headers.push((ORG_SLUG_HEADER.to_string(), tenant.slug()));
                }
                Stage::Transport(transport) => {
                    outcome = Some(transport.send(&self.endpoint, &request, &headers).await);
                }
            }
        }
        let Some(outcome) = outcome else {
            return Err(NetworkError::NoTransport);
        };
        if observe {
            match &outcome {
                Err(error) => warn!(operation = document.name, error = %error, "network error"),
                Ok(response) => {
                    for error in &response.errors {
                        warn!(operation = document.name, message = %error.message, "graphql error");
                    }
                }
            }
        }
        outcome
    }
}

/// HTTP POST transport over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        endpoint: &str,
        request: &GraphqlRequest,
        headers: &[(String, String)],
    ) -> TransportFuture {
        let client = self.client.clone();
        let endpoint = endpoint.to_string();
        let request = request.clone();
        let headers = headers.to_vec();
        Box::pin(async move {
            let mut builder = client.post(&endpoint).json(&request);
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }
            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NetworkError::Status(status.as_u16()));
            }
            let parsed: GraphqlResponse = response.json().await?;
            Ok(parsed)
        })
    }
}
