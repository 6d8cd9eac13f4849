use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    analysis::{self, ReasoningService},
    error::AnalysisError,
    fingerprint,
    ledger::{Durability, HistoryLedger, HISTORY_CAPACITY},
    media::{MediaFile, MediaKind, UnknownMediaKind},
    verdict::{AnalysisVerdict, HistoryEntry},
    workbench::{Selection, SelectionReceipt, SlotView, Ticket, Workbench, WorkbenchError},
};

/// 上传时携带原始文件名的请求头
pub const FILE_NAME_HEADER: &str = "x-file-name";

// ==========================================
// 1. 定义应用状态 (Shared State)
// ==========================================
// 所有的 HTTP 请求都会共享这个状态。
// 账本的“读-改-写”必须串行，所以放在 Mutex 里；锁从不跨越推理服务调用持有。
// 需要同时持有两把锁时，顺序固定为先工作台、后账本。
pub struct AppState {
    pub service: Arc<dyn ReasoningService>,
    pub ledger: Arc<Mutex<HistoryLedger>>,
    pub workbench: Arc<Mutex<Workbench>>,
}

impl AppState {
    pub fn new(service: Arc<dyn ReasoningService>, ledger: HistoryLedger) -> Self {
        Self {
            service,
            ledger: Arc::new(Mutex::new(ledger)),
            workbench: Arc::new(Mutex::new(Workbench::new())),
        }
    }
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

// 响应：一次成功且仍然有效的分析
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub entry: HistoryEntry,
    pub methodology_points: Vec<String>,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// 请求：清空历史，必须显式确认
#[derive(Deserialize)]
pub struct ClearParams {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: bool,
    pub persisted: bool,
}

// 统一的错误响应：{"error": "...", "detail": "..."}
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.detail {
            Some(detail) => json!({ "error": self.message, "detail": detail }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        match &e {
            // 输入问题可以告诉用户原因
            AnalysisError::Input { reason } => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: e.user_message().to_string(),
                detail: Some(reason.clone()),
            },
            // 服务问题只给通用提示，细节已在 analysis 里记日志
            AnalysisError::Service { .. } => Self::new(StatusCode::BAD_GATEWAY, e.user_message()),
        }
    }
}

impl From<UnknownMediaKind> for ApiError {
    fn from(e: UnknownMediaKind) -> Self {
        Self::new(StatusCode::NOT_FOUND, e.to_string())
    }
}

impl From<WorkbenchError> for ApiError {
    fn from(e: WorkbenchError) -> Self {
        let status = match e {
            WorkbenchError::NoSelection { .. } => StatusCode::BAD_REQUEST,
            WorkbenchError::Busy { .. } => StatusCode::CONFLICT,
            WorkbenchError::Stale => StatusCode::GONE,
        };
        Self::new(status, e.to_string())
    }
}

fn durability_fields(durability: Durability) -> (bool, Option<String>) {
    match durability {
        Durability::Persisted => (true, None),
        Durability::MemoryOnly { reason } => (
            false,
            Some(format!("history kept in memory only: {}", reason)),
        ),
    }
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workbench/{kind}", get(get_slot))
        .route("/workbench/{kind}/file", put(select_file).delete(discard_file))
        .route("/workbench/{kind}/analyze", post(run_analysis))
        .route("/history", get(list_history).delete(clear_history))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// 路径段按字符串取出再自己解析，未知类别也返回 JSON 错误体
fn parse_kind(raw: &str) -> Result<MediaKind, ApiError> {
    Ok(raw.parse::<MediaKind>()?)
}

async fn get_slot(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<SlotView>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.workbench.lock().await.view(kind)))
}

/// 接口：选择文件 (原始字节作为请求体，Content-Type 即声明的 MIME)
async fn select_file(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SelectionReceipt>, ApiError> {
    let kind = parse_kind(&kind)?;
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string();

    let file = MediaFile::new(file_name, mime_type, body.to_vec());

    // 校验 + 整文件 SHA-256 (CPU 密集型操作，移至 spawn_blocking，且不持有工作台的锁)
    let selection = tokio::task::spawn_blocking(move || Selection::prepare(kind, file))
        .await
        .map_err(|e| AnalysisError::input(format!("fingerprint task failed: {}", e)))??;

    let receipt = state.workbench.lock().await.select(selection);
    Ok(Json(receipt))
}

async fn discard_file(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    state.workbench.lock().await.discard(kind);
    Ok(StatusCode::NO_CONTENT)
}

/// 接口：对当前选择发起法证分析，成功后写入历史账本
async fn run_analysis(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let kind = parse_kind(&kind)?;

    // 1. 领取凭证 (锁只在这一小段内持有)
    let (ticket, selection) = state.workbench.lock().await.begin(kind)?;
    let file = selection.file();

    // 2. 调用推理服务，期间不持有任何锁；日志用选择回执里已经算好的指纹
    let span = info_span!(
        "analysis",
        file = %fingerprint::short_id(&selection.receipt().sha256)
    );
    let outcome = analysis::analyze(state.service.as_ref(), Arc::clone(&file), kind)
        .instrument(span)
        .await;

    // 3. 核对凭证并写入账本：两步在同一段临界区内完成，
    //    丢弃选择要么发生在核对之前 (结果作废)，要么发生在入账之后
    let mut workbench = state.workbench.lock().await;
    let verdict = match outcome {
        Ok(verdict) => verdict,
        Err(e) => {
            workbench.finish(ticket, None)?;
            return Err(e.into());
        }
    };
    let mut ledger = state.ledger.lock().await;
    let (entry, durability) =
        commit_verdict(&mut workbench, &mut ledger, ticket, &file.file_name, verdict)?;
    drop(ledger);
    drop(workbench);

    let (persisted, warning) = durability_fields(durability);
    info!(id = %entry.id, label = %entry.result.label, persisted, "🗂️ 已写入历史账本");

    Ok(Json(AnalyzeResponse {
        methodology_points: entry.result.methodology_points(),
        entry,
        persisted,
        warning,
    }))
}

// 选择已经变了就静默丢弃结果，否则生成历史记录并入账
fn commit_verdict(
    workbench: &mut Workbench,
    ledger: &mut HistoryLedger,
    ticket: Ticket,
    file_name: &str,
    verdict: AnalysisVerdict,
) -> Result<(HistoryEntry, Durability), WorkbenchError> {
    workbench.finish(ticket, Some(verdict.clone()))?;
    let entry = HistoryEntry::new(ticket.kind, file_name, verdict);
    let durability = ledger.record(entry.clone());
    Ok((entry, durability))
}

async fn list_history(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryEntry>> {
    Json(state.ledger.lock().await.entries().to_vec())
}

/// 接口：清空历史 (不可撤销，需要 `?confirm=true`)
async fn clear_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClearParams>,
) -> Result<Json<ClearResponse>, ApiError> {
    if !params.confirm {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!(
                "Clear all forensic history? Repeat with confirm=true to remove up to {} entries.",
                HISTORY_CAPACITY
            ),
        ));
    }

    let durability = state.ledger.lock().await.clear();
    if !durability.is_persisted() {
        warn!(?durability, "历史快照未能删除");
    }

    Ok(Json(ClearResponse {
        cleared: true,
        persisted: durability.is_persisted(),
    }))
}
