//! HTTP orchestration API

use crate::error::SchedulerError;
use crate::pool::{JobStatus, Scheduler};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use stockade_core::JobId;
use stockade_core::isolation::IsolationSupport;
use stockade_core::protocol::{
    CancelResponse, HealthResponse, LanguageInfo, PendingResponse, PendingState, SubmitRequest,
    SubmitResponse,
};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub isolation: IsolationSupport,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(job_status).delete(cancel_job))
        .route("/languages", get(list_languages))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), SchedulerError> {
    let Json(req) = body.map_err(|e| SchedulerError::InvalidSubmission(e.body_text()))?;
    let job = state.scheduler.prepare(req)?;
    let job_id = state.scheduler.submit(job)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, SchedulerError> {
    let job_id = parse_id(&id)?;
    let pending = |status| {
        (StatusCode::ACCEPTED, Json(PendingResponse { job_id, status })).into_response()
    };

    match state.scheduler.status(job_id) {
        None => Err(SchedulerError::NotFound),
        Some(JobStatus::Queued) => Ok(pending(PendingState::Queued)),
        Some(JobStatus::Running) => Ok(pending(PendingState::Running)),
        Some(JobStatus::Completed(verdict)) => Ok((StatusCode::OK, Json(verdict)).into_response()),
    }
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, SchedulerError> {
    let job_id = parse_id(&id)?;
    let outcome = state.scheduler.cancel(job_id)?;
    Ok(Json(CancelResponse { job_id, outcome }))
}

async fn list_languages(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    Json(state.scheduler.languages().iter().map(LanguageInfo::from).collect())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.scheduler.pool_status();
    Json(HealthResponse {
        status: if pool.accepting { "ok" } else { "draining" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool,
        isolation: state.isolation,
    })
}

/// Malformed ids can never name a job
fn parse_id(id: &str) -> Result<JobId, SchedulerError> {
    id.parse().map_err(|_| SchedulerError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use stockade_core::{Executor, Job, LanguageConfig, Verdict, VerdictStatus};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Echoes the source as stdout, or waits for cancellation on `sleep`
    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        async fn execute(&self, job: &Job, cancel: CancellationToken) -> Verdict {
            if job.source == b"sleep" {
                cancel.cancelled().await;
                return Verdict::cancelled(job.id);
            }
            Verdict {
                stdout: String::from_utf8_lossy(&job.source).into_owned(),
                ..Verdict::bare(job.id, VerdictStatus::Success)
            }
        }
    }

    fn app(workers: usize, queue_capacity: usize) -> (Router, Arc<Scheduler>) {
        let config = DaemonConfig {
            workers,
            queue_capacity,
            languages: vec![LanguageConfig::new("sh", "main.sh", ["/bin/sh", "main.sh"])],
            ..DaemonConfig::default()
        };
        let scheduler = Arc::new(Scheduler::start(&config, Arc::new(Echo), None));
        let state = AppState {
            scheduler: Arc::clone(&scheduler),
            isolation: IsolationSupport::default(),
        };
        (router(state), scheduler)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn submission(source: &str) -> serde_json::Value {
        serde_json::json!({"language": "sh", "source": source})
    }

    #[tokio::test]
    async fn submit_then_fetch_verdict() {
        let (app, scheduler) = app(1, 4);

        let (status, body) = call(&app, Method::POST, "/jobs", Some(submission("echo hi"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id: JobId = serde_json::from_value(body["job_id"].clone()).unwrap();

        scheduler.wait_for(job_id).await.unwrap();
        let (status, body) = call(&app, Method::GET, &format!("/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["stdout"], "echo hi");

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn pending_job_reports_state_and_can_be_cancelled() {
        let (app, scheduler) = app(1, 4);

        let (_, body) = call(&app, Method::POST, "/jobs", Some(submission("sleep"))).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::GET, &format!("/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["status"] == "queued" || body["status"] == "running");

        let (status, body) = call(&app, Method::DELETE, &format!("/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["outcome"] == "dequeued" || body["outcome"] == "signalled");

        scheduler.wait_for(job_id.parse().unwrap()).await.unwrap();
        let (_, body) = call(&app, Method::GET, &format!("/jobs/{job_id}"), None).await;
        assert_eq!(body["status"], "cancelled");

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn rejected_submissions() {
        let (app, scheduler) = app(1, 0);

        let (status, body) = call(
            &app,
            Method::POST,
            "/jobs",
            Some(serde_json::json!({"language": "cobol", "source": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cobol"));

        let (status, _) = call(&app, Method::POST, "/jobs", Some(serde_json::json!({"source": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::POST, "/jobs", Some(submission(""))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::POST, "/jobs", Some(submission("sleep"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, body) = call(&app, Method::POST, "/jobs", Some(submission("sleep"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "queue is full");

        scheduler.shutdown(Duration::ZERO).await;
        let (status, _) = call(&app, Method::POST, "/jobs", Some(submission("echo"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_found() {
        let (app, scheduler) = app(1, 1);

        let (status, _) = call(&app, Method::GET, &format!("/jobs/{}", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::GET, "/jobs/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::DELETE, &format!("/jobs/{}", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        scheduler.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn languages_and_health() {
        let (app, scheduler) = app(2, 3);

        let (status, body) = call(&app, Method::GET, "/languages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "sh");
        assert_eq!(body[0]["compiled"], false);
        assert!(body[0]["default_limits"]["wall_clock_ms"].is_u64());

        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pool"]["workers"], 2);
        assert_eq!(body["pool"]["accepting"], true);
        assert_eq!(body["isolation"]["namespaces"], false);

        scheduler.shutdown(Duration::ZERO).await;
        let (_, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(body["status"], "draining");
    }
}
