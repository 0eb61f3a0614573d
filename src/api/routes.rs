use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::artifact::{ArtifactError, ArtifactService};
use crate::middleware::request_logging;
use crate::models::{parse_utc, PipelineRun, PipelineSummary};
use crate::query::{PageRequest, RunFilter};
use crate::storage::{Repository, RunPage, StorageError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub artifacts: ArtifactService,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/get_pipeline_info", get(get_pipeline_info))
        .route("/pipelines", get(list_pipelines).post(create_pipeline))
        .route("/pipelines/:date_code/archive", get(get_archive))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Pipeline Info API with multi-pipeline support",
        "version": VERSION,
        "backend": state.repo.backend_name(),
        "features": ["multi-pipeline", "filtering", "pagination", "statistics", "archives"],
    }))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        backend: state.repo.backend_name().to_string(),
        version: VERSION.to_string(),
    })
}

/// Filtered, paginated run records
async fn get_pipeline_info(
    State(state): State<AppState>,
    query: Result<Query<PipelineInfoQuery>, QueryRejection>,
) -> Result<Json<RunPage>, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let (filter, page) = params.into_request()?;

    let repo = state.repo.clone();
    let page = tokio::task::spawn_blocking(move || repo.query_runs(filter, page)).await??;
    Ok(Json(page))
}

/// Per-pipeline statistics
async fn list_pipelines(
    State(state): State<AppState>,
) -> Result<Json<PipelineListResponse>, ApiError> {
    let repo = state.repo.clone();
    let pipelines = tokio::task::spawn_blocking(move || repo.summarize()).await??;
    Ok(Json(PipelineListResponse { pipelines }))
}

/// Store one run record
async fn create_pipeline(
    State(state): State<AppState>,
    body: Result<Json<PipelineRun>, JsonRejection>,
) -> Result<(StatusCode, Json<PipelineRun>), ApiError> {
    let Json(run) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let repo = state.repo.clone();
    let stored = tokio::task::spawn_blocking(move || repo.insert(run)).await??;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Stream the archived artifact of a run
async fn get_archive(
    State(state): State<AppState>,
    Path(date_code): Path<String>,
) -> Result<Response, ApiError> {
    let repo = state.repo.clone();
    let run = tokio::task::spawn_blocking(move || repo.get_by_date_code(&date_code)).await??;

    let opened = state.artifacts.open(run.as_ref()).await?;
    let headers = [
        (header::CONTENT_TYPE, opened.meta.content_type.to_string()),
        (header::CONTENT_LENGTH, opened.meta.size.to_string()),
        (header::CONTENT_DISPOSITION, opened.meta.content_disposition()),
    ];
    Ok((headers, Body::from_stream(opened.stream)).into_response())
}

// ===== Request/Response Types =====

#[derive(Debug, Default, Deserialize)]
pub struct PipelineInfoQuery {
    /// Runs starting at or after this instant.
    pub start_utc: Option<String>,
    /// Runs ending at or before this instant.
    pub end_utc: Option<String>,
    pub min_rowcount: Option<i64>,
    pub max_rowcount: Option<i64>,
    pub pipeline_name: Option<String>,
    pub script_name: Option<String>,
    /// batch, streaming, ml
    pub pipeline_type: Option<String>,
    /// prod, dev, test
    pub environment: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Return every match, ignoring limit and offset.
    #[serde(default)]
    pub all_data: bool,
}

impl PipelineInfoQuery {
    fn into_request(self) -> Result<(RunFilter, PageRequest), ApiError> {
        let filter = RunFilter {
            start_utc_min: parse_bound("start_utc", self.start_utc)?,
            end_utc_max: parse_bound("end_utc", self.end_utc)?,
            rowcount_min: self.min_rowcount,
            rowcount_max: self.max_rowcount,
            pipeline_name: self.pipeline_name,
            script_name: self.script_name,
            pipeline_type: self.pipeline_type,
            environment: self.environment,
        };
        let page = PageRequest {
            limit: self.limit,
            offset: self.offset,
            all_data: self.all_data,
        };
        Ok((filter, page))
    }
}

fn parse_bound(
    name: &str,
    raw: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, ApiError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_utc(value)
            .map(Some)
            .map_err(|e| ApiError::Validation(format!("{}: {}", name, e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    backend: String,
    version: String,
}

#[derive(Serialize)]
struct PipelineListResponse {
    pipelines: Vec<PipelineSummary>,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Invalid(e) => ApiError::Validation(e.to_string()),
            StorageError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(_) => ApiError::NotFound("Archive not found".to_string()),
            ArtifactError::Forbidden(_) => {
                ApiError::Forbidden("Archive path is not allowed".to_string())
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("blocking storage task failed"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::run_at;
    use crate::query::DEFAULT_MAX_LIMIT;
    use crate::storage::{JsonlStore, PipelineStore, StorageConfig};
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app_with_runs(dir: &TempDir, runs: &[PipelineRun]) -> Router {
        let path = dir.path().join("runs.jsonl");
        let store = JsonlStore::new(&path);
        for run in runs {
            store.insert(run).unwrap();
        }
        let state = AppState {
            repo: Repository::new(Arc::new(store), DEFAULT_MAX_LIMIT),
            artifacts: ArtifactService::default(),
        };
        create_router(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn sample_runs() -> Vec<PipelineRun> {
        (0..5)
            .map(|i| {
                let mut run = run_at(&format!("2025080{}_050701", i), i * 10);
                run.rowcount = 100 * (i + 1);
                if i % 2 == 1 {
                    run.pipeline_name = Some("inventory_sync".to_string());
                    run.environment = Some("dev".to_string());
                }
                run
            })
            .collect()
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get(app_with_runs(&dir, &[]), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "jsonl");
    }

    #[tokio::test]
    async fn test_query_returns_page_and_total() {
        let dir = TempDir::new().unwrap();
        let app = app_with_runs(&dir, &sample_runs());

        let (status, body) = get(app, "/get_pipeline_info?limit=2&offset=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 5);
        assert_eq!(body["count"], 2);
        // Newest first: run 4, then 3, 2, ...
        assert_eq!(body["results"][0]["date_code"], "20250803_050701");
        assert_eq!(body["results"][1]["date_code"], "20250802_050701");
        assert_eq!(body["pipelines"], json!(["inventory_sync", "sales_etl"]));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let dir = TempDir::new().unwrap();
        let app = app_with_runs(&dir, &sample_runs());

        let (_, body) = get(
            app.clone(),
            "/get_pipeline_info?environment=dev&min_rowcount=300",
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["results"][0]["rowcount"], 400);

        let (_, body) = get(
            app.clone(),
            "/get_pipeline_info?start_utc=2025-08-08T12:20:00Z&pipeline_name=",
        )
        .await;
        assert_eq!(body["total"], 3);

        let (_, body) = get(app, "/get_pipeline_info?all_data=true&limit=1").await;
        assert_eq!(body["count"], 5);
    }

    #[tokio::test]
    async fn test_query_validation_is_422() {
        let dir = TempDir::new().unwrap();
        let app = app_with_runs(&dir, &sample_runs());

        for uri in [
            "/get_pipeline_info?limit=10001",
            "/get_pipeline_info?limit=0",
            "/get_pipeline_info?offset=-1",
            "/get_pipeline_info?limit=abc",
            "/get_pipeline_info?start_utc=yesterday",
            "/get_pipeline_info?min_rowcount=10&max_rowcount=5",
        ] {
            let (status, body) = get(app.clone(), uri).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
            assert!(body["error"].is_string(), "{}", uri);
        }

        let (status, _) = get(app, "/get_pipeline_info?limit=10000").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_store_is_404() {
        let dir = TempDir::new().unwrap();
        let state = AppState {
            repo: Repository::open(
                StorageConfig::Jsonl {
                    path: dir.path().join("absent.jsonl"),
                },
                DEFAULT_MAX_LIMIT,
            )
            .unwrap(),
            artifacts: ArtifactService::default(),
        };
        let (status, body) = get(create_router(state), "/get_pipeline_info").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Data file not found");
    }

    #[tokio::test]
    async fn test_post_then_query() {
        let dir = TempDir::new().unwrap();
        let app = app_with_runs(&dir, &[]);
        let run = run_at("20250808_050701", 0);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&run).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let (_, body) = get(app, "/get_pipeline_info").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["results"][0]["date_code"], "20250808_050701");
    }

    #[tokio::test]
    async fn test_post_invalid_record_is_422() {
        let dir = TempDir::new().unwrap();
        let app = app_with_runs(&dir, &[]);
        let mut bad = serde_json::to_value(run_at("x", 0)).unwrap();
        bad["rowcount"] = json!(-3);

        for payload in [bad.to_string(), "{\"date_code\": ".to_string()] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/pipelines")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(payload))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[tokio::test]
    async fn test_summary_endpoint() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get(app_with_runs(&dir, &sample_runs()), "/pipelines").await;
        assert_eq!(status, StatusCode::OK);
        let pipelines = body["pipelines"].as_array().unwrap();
        assert_eq!(pipelines.len(), 2);
        // sales_etl's latest run (+40m) is newer than inventory_sync's (+30m)
        assert_eq!(pipelines[0]["pipeline_name"], "sales_etl");
        assert_eq!(pipelines[0]["total_runs"], 3);
        assert_eq!(pipelines[1]["total_runs"], 2);
    }

    #[tokio::test]
    async fn test_archive_statuses() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("output.data.tmp.gz");
        std::fs::write(&archive, b"gzipped-bytes").unwrap();

        let mut with_archive = run_at("has_archive", 0);
        with_archive.archived_file = Some(archive.to_string_lossy().into_owned());
        let mut relative = run_at("relative", 1);
        relative.archived_file = Some("archive/out.gz".to_string());
        let app = app_with_runs(&dir, &[with_archive, relative, run_at("no_archive", 2)]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/pipelines/has_archive/archive")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/gzip");
        assert_eq!(headers[header::CONTENT_LENGTH], "13");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"output.data.gz\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"gzipped-bytes");

        let (status, _) = get(app.clone(), "/pipelines/no_archive/archive").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(app.clone(), "/pipelines/unknown/archive").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(app, "/pipelines/relative/archive").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: ApiError = StorageError::Decode("bad row".to_string()).into();
        assert!(matches!(err, ApiError::Internal(_)));
        let err: ApiError = StorageError::NotFound("x".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
