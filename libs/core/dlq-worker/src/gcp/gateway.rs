use super::GcpClient;
use crate::error::GatewayError;
use crate::gateway::{MetricsGateway, SubscriptionId, DLQ_SUBSCRIPTION_MARKER};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct ListSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<SubscriptionResource>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResource {
    name: String,
}

#[derive(Debug, Serialize)]
struct QueryTimeSeriesRequest<'a> {
    query: &'a str,
    #[serde(rename = "pageToken", skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryTimeSeriesResponse {
    #[serde(rename = "timeSeriesData", default)]
    time_series_data: Vec<TimeSeriesData>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesData {
    #[serde(rename = "pointData", default)]
    point_data: Vec<PointData>,
}

#[derive(Debug, Deserialize)]
struct PointData {
    #[serde(default)]
    values: Vec<TypedValue>,
}

#[derive(Debug, Deserialize)]
struct TypedValue {
    #[serde(rename = "doubleValue")]
    double_value: Option<f64>,
    /// Monitoring encodes int64 values as JSON strings
    #[serde(rename = "int64Value")]
    int64_value: Option<String>,
}

impl TypedValue {
    fn as_f64(&self) -> Option<f64> {
        self.double_value
            .or_else(|| self.int64_value.as_deref().and_then(|v| v.parse().ok()))
    }
}

/// [`MetricsGateway`] backed by the Pub/Sub and Cloud Monitoring REST APIs.
#[derive(Clone)]
pub struct GcpGateway {
    client: GcpClient,
}

impl GcpGateway {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GcpClient {
        &self.client
    }

    async fn query_time_series(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<TimeSeriesData>, GatewayError> {
        let url = self
            .client
            .monitoring_url(&format!("projects/{project_id}/timeSeries:query"));

        let mut series = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = QueryTimeSeriesRequest {
                query,
                page_token: page_token.as_deref(),
            };
            let page: QueryTimeSeriesResponse = self.client.post_json(&url, &request).await?;
            series.extend(page.time_series_data);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(series)
    }
}

#[async_trait]
impl MetricsGateway for GcpGateway {
    #[instrument(skip(self))]
    async fn list_dlq_subscriptions(
        &self,
        project_id: &str,
    ) -> Result<Vec<SubscriptionId>, GatewayError> {
        let url = self
            .client
            .pubsub_url(&format!("projects/{project_id}/subscriptions"));

        let mut names = Vec::new();
        let mut page_token = String::new();
        loop {
            let mut query = vec![("pageSize", "1000")];
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.as_str()));
            }
            let page: ListSubscriptionsResponse = self.client.get_json(&url, &query).await?;
            names.extend(page.subscriptions.into_iter().map(|s| s.name));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = token,
                None => break,
            }
        }

        let dlq = filter_dlq_subscriptions(names.iter().map(String::as_str));
        debug!(total = names.len(), dlq = dlq.len(), "Listed subscriptions");
        Ok(dlq)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn mean_undelivered_messages(
        &self,
        project_id: &str,
        subscription_id: &SubscriptionId,
    ) -> Result<f64, GatewayError> {
        let query = undelivered_messages_query(subscription_id);
        let series = self.query_time_series(project_id, &query).await?;
        let mean = latest_mean(&series);
        debug!(series = series.len(), mean, "Queried undelivered messages");
        Ok(mean)
    }
}

/// Keep DLQ subscriptions, reduced to their last path segment, in input order.
pub fn filter_dlq_subscriptions<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<SubscriptionId> {
    names
        .into_iter()
        .filter(|name| name.contains(DLQ_SUBSCRIPTION_MARKER))
        .map(SubscriptionId::from_resource_name)
        .collect()
}

/// MQL for the per-minute mean of undelivered messages over the last 5 minutes.
pub fn undelivered_messages_query(subscription_id: &SubscriptionId) -> String {
    let subscription_id = mql_string_literal(subscription_id.as_ref());
    format!(
        "fetch pubsub_subscription \
         | metric 'pubsub.googleapis.com/subscription/num_undelivered_messages' \
         | filter (resource.subscription_id == '{subscription_id}') \
         | group_by 1m, [value_num_undelivered_messages_mean: mean(value.num_undelivered_messages)] \
         | within 5m"
    )
}

/// Escapes `\` and `'` for use inside a single-quoted MQL string.
fn mql_string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// First value of the newest point of the last series that has one; `0.0`
/// when nothing was returned.
fn latest_mean(series: &[TimeSeriesData]) -> f64 {
    series
        .iter()
        .rev()
        .find_map(|s| {
            s.point_data
                .first()
                .and_then(|p| p.values.first())
                .and_then(TypedValue::as_f64)
        })
        .unwrap_or(0.0)
}
