//! HTTP handlers for the gateway endpoints

use crate::api::error::{ApiError, Result};
use crate::domain::topic::Topic;
use crate::usecase::publisher::Publisher;
use crate::usecase::subscriber::SubscriptionStatus;
use crate::usecase::topic_admin::TopicAdmin;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
    pub admin: TopicAdmin,
    pub subscriptions: Vec<SubscriptionStatus>,
}

impl AppState {
    pub fn new(publisher: Publisher, admin: TopicAdmin) -> Self {
        Self {
            publisher,
            admin,
            subscriptions: Vec::new(),
        }
    }

    /// Background subscriptions reported by `/health`.
    pub fn with_subscriptions(mut self, subscriptions: Vec<SubscriptionStatus>) -> Self {
        self.subscriptions = subscriptions;
        self
    }
}

/// Body of `POST /messages`; the same fields are accepted as query
/// parameters when the body is empty.
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    pub topic: Option<String>,
    pub payload: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResponse {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Publish one message
pub async fn publish_message(
    State(state): State<AppState>,
    Query(params): Query<PublishRequest>,
    body: Bytes,
) -> Result<Json<PublishResponse>> {
    let request = if body.is_empty() {
        params
    } else {
        serde_json::from_slice::<PublishRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let topic = request
        .topic
        .or_else(|| state.publisher.default_topic().map(str::to_string))
        .ok_or_else(|| ApiError::Validation("topic is required".to_string()))?;
    let payload = request
        .payload
        .ok_or_else(|| ApiError::BadRequest("payload is required".to_string()))?;

    let result = state.publisher.send(&topic, payload, request.key).await?;

    match (result.partition, result.offset) {
        (Some(partition), Some(offset)) if result.success => {
            tracing::info!(topic = %result.topic, partition, offset, "published via http");
            Ok(Json(PublishResponse {
                topic: result.topic,
                partition,
                offset,
            }))
        }
        _ => Err(ApiError::Publish(
            result
                .error
                .unwrap_or_else(|| "broker returned no position".to_string()),
        )),
    }
}

/// List topics known to the broker
pub async fn list_topics(State(state): State<AppState>) -> Result<Json<Vec<Topic>>> {
    Ok(Json(state.admin.list_topics().await?))
}

/// Create a topic
pub async fn create_topic(
    State(state): State<AppState>,
    Json(topic): Json<Topic>,
) -> Result<(StatusCode, Json<Topic>)> {
    let created = state.admin.create_topic(topic).await?;
    tracing::info!(topic = %created.name, partitions = created.partitions, "topic created via http");
    Ok((StatusCode::CREATED, Json(created)))
}

/// Broker reachability and subscription liveness
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backend = state.admin.backend().to_string();

    let failed: Vec<String> = state
        .subscriptions
        .iter()
        .filter_map(|s| {
            s.failure().map(|why| {
                format!("subscription on '{}' (group {}) stopped: {}", s.topic(), s.group(), why)
            })
        })
        .collect();
    if !failed.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                backend,
                detail: Some(failed.join("; ")),
            }),
        );
    }

    match state.admin.check_connection().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                backend,
                detail: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                backend,
                detail: Some(e.to_string()),
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_request_fields_are_optional() {
        let request: PublishRequest = serde_json::from_str("{}").unwrap();
        assert!(request.topic.is_none());
        assert!(request.payload.is_none());
        assert!(request.key.is_none());
    }
}
