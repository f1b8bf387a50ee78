use crate::db::SharedLedger;
use crate::error::{ImportError, MergeError, NormalizeError};
use crate::models::{ImportDecision, MergeStrategy, RawTable, StandardLineItem};
use crate::service::{BatchExecutor, BatchRequest, ImportPipeline, MergeService};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 共享状态: 账本 + 导入编排 + 合并服务
#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
    pub pipeline: Arc<ImportPipeline>,
    pub merge: Arc<MergeService>,
}

impl AppState {
    pub fn new(ledger: SharedLedger, pipeline: ImportPipeline) -> Self {
        Self {
            merge: Arc::new(MergeService::new(ledger.clone())),
            pipeline: Arc::new(pipeline),
            ledger,
        }
    }
}

/// 失败响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorResponse {
        success: false,
        message,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        let status = match &self {
            ImportError::InvalidRequest(_) | ImportError::Normalize(_) => StatusCode::BAD_REQUEST,
            ImportError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, format!("Error: {}", self))
    }
}

impl IntoResponse for MergeError {
    fn into_response(self) -> Response {
        let status = match &self {
            MergeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MergeError::NotFound { .. } => StatusCode::NOT_FOUND,
            MergeError::VerificationFailed { .. } | MergeError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, format!("Error: {}", self))
    }
}

/// 预览请求: CSV 文本或 表头 + 行数组
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub csv: Option<String>,
    pub headers: Option<Vec<String>>,
    pub rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub global_strategy: MergeStrategy,
}

impl PreviewRequest {
    fn into_table(self) -> Result<RawTable, ImportError> {
        match (self.csv, self.headers, self.rows) {
            (Some(csv), _, _) => Ok(RawTable::from_csv(&csv)?),
            (None, Some(headers), Some(rows)) => Ok(RawTable::from_rows(headers, rows)),
            (None, Some(_), None) => Err(NormalizeError::Empty.into()),
            _ => Err(ImportError::InvalidRequest("expected `csv` or `headers` + `rows`".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunImportRequest {
    pub canonical_rows: Vec<StandardLineItem>,
    #[serde(default)]
    pub decisions: Option<Vec<ImportDecision>>,
    #[serde(default)]
    pub global_strategy: MergeStrategy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePreviewRequest {
    pub source_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub source_id: i64,
    pub target_id: i64,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 导入预览 (不写账本)
pub async fn preview_import(State(state): State<AppState>, Json(req): Json<PreviewRequest>) -> Response {
    let strategy = req.global_strategy;
    let table = match req.into_table() {
        Ok(table) => table,
        Err(e) => return e.into_response(),
    };
    match state.pipeline.preview(&table, strategy).await {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 执行单个批次, 供外部编排方逐批调用
pub async fn execute_batch(State(state): State<AppState>, Json(req): Json<BatchRequest>) -> Response {
    let executor = BatchExecutor::new(state.ledger.clone());
    match executor.execute_request(&req).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 顺序执行全部批次并返回汇总报告
pub async fn run_import(State(state): State<AppState>, Json(req): Json<RunImportRequest>) -> Response {
    match state
        .pipeline
        .run(&req.canonical_rows, req.decisions.as_deref(), req.global_strategy)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn vendor_merge_preview(
    State(state): State<AppState>,
    Json(req): Json<MergePreviewRequest>,
) -> Response {
    match state.merge.vendor_merge_preview(req.source_id).await {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn merge_vendors(State(state): State<AppState>, Json(req): Json<MergeRequest>) -> Response {
    match state.merge.merge_vendors(req.source_id, req.target_id).await {
        Ok(result) if result.success => (StatusCode::OK, Json(result)).into_response(),
        Ok(result) => (StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn service_merge_preview(
    State(state): State<AppState>,
    Json(req): Json<MergePreviewRequest>,
) -> Response {
    match state.merge.service_merge_preview(req.source_id).await {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn merge_services(State(state): State<AppState>, Json(req): Json<MergeRequest>) -> Response {
    match state.merge.merge_services(req.source_id, req.target_id).await {
        Ok(result) if result.success => (StatusCode::OK, Json(result)).into_response(),
        Ok(result) => (StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/import/preview", post(preview_import))
        .route("/api/import/batch", post(execute_batch))
        .route("/api/import/run", post(run_import))
        .route("/api/merge/vendors/preview", post(vendor_merge_preview))
        .route("/api/merge/vendors", post(merge_vendors))
        .route("/api/merge/services/preview", post(service_merge_preview))
        .route("/api/merge/services", post(merge_services))
        .with_state(state)
}
