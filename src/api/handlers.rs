use super::error::{ApiError, ApiResult};
use super::message::{
    HealthResponse, ReportResponse, StartRequest, StatusResponse, StopRequest,
    TransactionsQuery, UploadResponse,
};
use super::AppState;
use crate::metrics::jtl::Transaction;
use crate::metrics::MetricsSnapshot;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::path::Path as FsPath;
use uuid::Uuid;

const UPLOAD_FIELD: &str = "file";

/// POST /upload - multipart form with a `file` part holding the plan
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await?;

        let info = state.upload(&file_name, &content).await?;
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                session_id: info.id,
                plan: info.plan,
                status: info.status,
            }),
        ));
    }

    Err(ApiError::ValidationError(format!(
        "missing '{}' part in upload",
        UPLOAD_FIELD
    )))
}

/// POST /start
pub async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(request) = payload?;
    let mode = request.run_mode()?;
    let info = state.start(request.session_id, mode).await?;
    Ok(Json(info.into()))
}

/// POST /stop
pub async fn stop(
    State(state): State<AppState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(request) = payload?;
    let info = state.stop(request.session_id).await?;
    Ok(Json(info.into()))
}

/// GET /status/:id
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let info = state.status(parse_id(&id)?).await?;
    Ok(Json(info.into()))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<StatusResponse>> {
    Json(state.list().await.into_iter().map(Into::into).collect())
}

/// GET /history/:id
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MetricsSnapshot>>> {
    Ok(Json(state.history(parse_id(&id)?).await?))
}

/// GET /transactions/:id?label=&exact=&limit=&recent=
pub async fn transactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let Query(query) = query?;
    let query = query.into_query(state.transactions_limit());
    Ok(Json(state.transactions(parse_id(&id)?, query).await?))
}

/// GET /results/:id/jtl
pub async fn download_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let path = state.results_file(id).await?;
    attachment(&path, "text/csv", &format!("{}.jtl", id)).await
}

/// GET /results/:id/summary
pub async fn download_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let path = state.summary_csv(id).await?;
    attachment(&path, "text/csv", &format!("{}-summary.csv", id)).await
}

/// POST /results/:id/report/generate
pub async fn generate_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ReportResponse>)> {
    let id = parse_id(&id)?;
    let report_status = state.generate_report(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReportResponse {
            session_id: id,
            report_status,
        }),
    ))
}

/// GET /results/:id/report.zip
pub async fn download_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let path = state.report_archive(id).await?;
    attachment(&path, "application/zip", &format!("{}-report.zip", id)).await
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.store().len().await,
        timestamp: chrono::Utc::now(),
    })
}

/// Unknown and malformed ids are both "no such session"
fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Session '{}' not found", raw)))
}

async fn attachment(path: &FsPath, content_type: &str, download_name: &str) -> ApiResult<Response> {
    let body = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound(format!("{} not found", download_name)),
        _ => ApiError::InternalError(e.to_string()),
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        body,
    )
        .into_response())
}
