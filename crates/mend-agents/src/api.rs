//! HTTP surface over the lifecycle orchestrator.
//!
//! Handlers are thin: they translate requests into orchestrator calls and
//! lifecycle errors into status codes. Pipeline execution always happens
//! in a background task; the API returns as soon as the incident record
//! reflects the accepted request.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use lifecycle::{project, LifecycleError, NewIncident, Orchestrator};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LifecycleError::ExecutionActive(_)
            | LifecycleError::NotStartable { .. }
            | LifecycleError::InvalidRetry { .. }
            | LifecycleError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            LifecycleError::IllegalTransition(_) | LifecycleError::Misconfigured(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/incidents", get(list_incidents).post(create_incident))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/status", get(get_status))
        .route("/incidents/{id}/retry", post(retry_incident))
        .route("/incidents/{id}/cancel", post(cancel_incident))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_incident(
    State(state): State<SharedState>,
    Json(req): Json<NewIncident>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    let incident = state.orchestrator.create(req).await?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let id = incident.id;
    tokio::spawn(async move {
        if let Err(err) = orchestrator.start(id).await {
            tracing::error!(incident_id = %id, error = %err, "pipeline execution failed to start");
        }
    });

    Ok((StatusCode::CREATED, Json(incident)))
}

async fn list_incidents(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let incidents = state.orchestrator.store().list().await?;
    Ok(Json(incidents))
}

async fn get_incident(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state.orchestrator.store().get(id).await?;
    Ok(Json(incident))
}

async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state.orchestrator.store().get(id).await?;
    Ok(Json(project(&incident)))
}

async fn retry_incident(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate eligibility synchronously so the caller gets a 404/409
    // instead of a silent background failure.
    let incident = state.orchestrator.store().get(id).await?;
    if incident.status != lifecycle::IncidentState::Failed {
        return Err(LifecycleError::InvalidRetry {
            id,
            state: incident.status,
        }
        .into());
    }
    if state.orchestrator.is_running(id) {
        return Err(LifecycleError::ExecutionActive(id).into());
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(err) = orchestrator.retry(id).await {
            tracing::error!(incident_id = %id, error = %err, "manual retry failed to start");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"incident_id": id, "status": "retry_accepted"})),
    ))
}

async fn cancel_incident(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // 404 before 409: a cancel of an unknown incident is not a conflict.
    state.orchestrator.store().get(id).await?;
    if !state.orchestrator.cancel(id) {
        return Err(ApiError::Conflict(format!(
            "incident {id} has no active execution to cancel"
        )));
    }
    Ok(Json(
        serde_json::json!({"incident_id": id, "status": "cancel_requested"}),
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::agents::default_stages;
    use lifecycle::{MemoryStore, PipelineConfig};

    fn test_app() -> Router {
        let config = PipelineConfig {
            confidence_threshold: 0.7,
            max_attempts: 3,
            max_semantic_retries: 1,
            sanitizer_max_secrets: 100,
            stage_timeout: Duration::from_secs(5),
            dry_run: false,
        };
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::new()),
            default_stages(&config),
            config,
        )
        .unwrap();
        let state = Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
        });
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_request(title: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/incidents")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "title": title,
                    "logs": "ERROR charge failed with status 500\nERROR gateway retry exhausted\nAttributeError: 'NoneType' object has no attribute 'total'\n  File \"src/checkout.py\", line 12, in charge",
                    "metadata": {
                        "repository": {"url": "https://github.com/acme/checkout"}
                    }
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_incident_returns_201_with_record() {
        let app = test_app();
        let response = app.oneshot(create_request("checkout is down")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let incident: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(incident["title"], "checkout is down");
        assert_eq!(incident["status"], "pending");
        assert!(incident["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_create_incident_rejects_blank_title() {
        let app = test_app();
        let response = app.oneshot(create_request("  ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_incidents() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(create_request("first"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/incidents")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let incidents: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0]["title"], "first");
    }

    #[tokio::test]
    async fn test_get_incident_not_found() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/incidents/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_projection_shape() {
        let app = test_app();
        let response = app.clone().oneshot(create_request("projected")).await.unwrap();
        let incident: serde_json::Value = body_json(response.into_body()).await;
        let id = incident["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/incidents/{id}/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(status["incident_id"].as_str(), Some(id.as_str()));
        assert!(status["timeline"].is_array());
        assert!(status["patches_generated"].is_u64());
    }

    #[tokio::test]
    async fn test_retry_requires_failed_state() {
        let app = test_app();
        let response = app.clone().oneshot(create_request("not failed")).await.unwrap();
        let incident: serde_json::Value = body_json(response.into_body()).await;
        let id = incident["id"].as_str().unwrap().to_string();

        // Wait for the spawned pipeline to finish; the happy path ends in
        // pr_created, which is not retryable.
        let mut settled = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/incidents/{id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let record: serde_json::Value = body_json(response.into_body()).await;
            if record["status"] == "pr_created" {
                settled = true;
                break;
            }
        }
        assert!(settled, "pipeline did not complete in time");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/incidents/{id}/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_retry_unknown_incident_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/incidents/{}/retry", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_with_no_active_execution_is_409() {
        let app = test_app();
        let response = app.clone().oneshot(create_request("cancel target")).await.unwrap();
        let incident: serde_json::Value = body_json(response.into_body()).await;
        let id = incident["id"].as_str().unwrap().to_string();

        // Let the background pipeline run to completion first.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/incidents/{id}/cancel"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_unknown_incident_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/incidents/{}/cancel", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
