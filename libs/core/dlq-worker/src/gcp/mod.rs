//! REST adapters for Google Cloud Pub/Sub v1 and Cloud Monitoring v3.
//!
//! - [`GcpGateway`]: [`crate::MetricsGateway`] over subscription listing and
//!   MQL time-series queries.
//! - [`GcpSubscription`]: [`crate::MessageSource`] over pull, acknowledge and
//!   modifyAckDeadline.

mod auth;
mod gateway;
mod subscription;

pub use auth::AccessTokenProvider;
pub use gateway::{filter_dlq_subscriptions, undelivered_messages_query, GcpGateway};
pub use subscription::GcpSubscription;

use crate::error::GatewayError;
use core_config::gcp::GcpConfig;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Authenticated HTTP client shared by the Pub/Sub and Monitoring adapters.
#[derive(Clone)]
pub struct GcpClient {
    http: Client,
    auth: Arc<AccessTokenProvider>,
    pubsub_url: String,
    monitoring_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GcpClient {
    pub fn from_config(config: &GcpConfig) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        let auth = AccessTokenProvider::from_config(config, http.clone())?;
        Ok(Self::new(
            http,
            Arc::new(auth),
            &config.pubsub_url,
            &config.monitoring_url,
        ))
    }

    pub fn new(
        http: Client,
        auth: Arc<AccessTokenProvider>,
        pubsub_url: &str,
        monitoring_url: &str,
    ) -> Self {
        Self {
            http,
            auth,
            pubsub_url: pubsub_url.trim_end_matches('/').to_string(),
            monitoring_url: monitoring_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn pubsub_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.pubsub_url, path)
    }

    pub(crate) fn monitoring_url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.monitoring_url, path)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        trace!(url = %url, "GET");
        let request = self.authorize(self.http.get(url).query(query)).await?;
        Self::send(request).await
    }

    pub(crate) async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        trace!(url = %url, "POST");
        let request = self.authorize(self.http.post(url).json(body)).await?;
        Self::send(request).await
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, GatewayError> {
        Ok(match self.auth.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::parse(e.to_string()))
    }
}

/// Maps a non-success response to an error, preferring the API's own message.
fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::auth(message),
        _ => GatewayError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
