// 该文件是 Tumorscope 项目的一部分。
// src/server.rs - HTTP 接口
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Tumorscope Contributors

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, State, rejection::BytesRejection},
  http::{HeaderMap, StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

use crate::{
  detection::DetectionResult,
  error::{DetectError, DetectErrorKind, InferenceError},
  ingest::ImagePayload,
  model::ModelHandle,
  pipeline::DetectionPipeline,
};

/// 所有请求共享的服务状态
pub struct AppState {
  pub handle: ModelHandle,
  pub pipeline: DetectionPipeline,
  pub temp_dir: PathBuf,
  pub timeout: Option<Duration>,
  pub started_at: DateTime<Utc>,
}

impl AppState {
  pub fn new(handle: ModelHandle, pipeline: DetectionPipeline, temp_dir: PathBuf) -> Self {
    Self {
      handle,
      pipeline,
      temp_dir,
      timeout: None,
      started_at: Utc::now(),
    }
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
  Router::new()
    .route("/api/detect", post(detect))
    .route("/api/health", get(health))
    .layer(DefaultBodyLimit::max(max_body_bytes))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
  BadRequest(String),
  Rejected(StatusCode, String),
  Detect(DetectError),
  Timeout(Duration),
}

impl From<DetectError> for ApiError {
  fn from(err: DetectError) -> Self {
    ApiError::Detect(err)
  }
}

/// 错误类型到 HTTP 状态码的映射
pub fn status_for(kind: DetectErrorKind) -> StatusCode {
  match kind {
    DetectErrorKind::Decode | DetectErrorKind::Format => StatusCode::BAD_REQUEST,
    DetectErrorKind::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    DetectErrorKind::ModelLoad | DetectErrorKind::Storage | DetectErrorKind::Inference => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
      ApiError::Rejected(status, message) => (status, message),
      ApiError::Detect(err) => (status_for(err.kind()), err.to_string()),
      ApiError::Timeout(limit) => (
        StatusCode::GATEWAY_TIMEOUT,
        format!("detection timed out after {:?}", limit),
      ),
    };

    if status.is_server_error() {
      error!("请求失败 ({}): {}", status, message);
    } else {
      warn!("请求无效 ({}): {}", status, message);
    }

    (status, Json(json!({ "error": message }))).into_response()
  }
}

#[derive(Deserialize)]
struct DetectRequest {
  image: Option<String>,
}

const NO_IMAGE: &str = "No image data provided";

/// JSON 请求体读取 `image` 字段，其他类型的请求体视为原始图像字节
fn parse_payload(headers: &HeaderMap, body: Bytes) -> Result<ImagePayload, ApiError> {
  let is_json = headers
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.starts_with("application/json"));

  if is_json {
    let request: DetectRequest = serde_json::from_slice(&body)
      .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
    match request.image {
      Some(image) if !image.trim().is_empty() => Ok(ImagePayload::Encoded(image)),
      _ => Err(ApiError::BadRequest(NO_IMAGE.to_string())),
    }
  } else if body.is_empty() {
    Err(ApiError::BadRequest(NO_IMAGE.to_string()))
  } else {
    Ok(ImagePayload::Bytes(body.to_vec()))
  }
}

async fn detect(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  body: Result<Bytes, BytesRejection>,
) -> Result<Json<DetectionResult>, ApiError> {
  let body = body.map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?;
  let payload = parse_payload(&headers, body)?;
  debug!("收到检测请求");

  // 解码、写盘和推理都是阻塞操作；超时后任务仍会跑完并清理临时文件
  let worker = Arc::clone(&state);
  let task = tokio::task::spawn_blocking(move || {
    worker
      .pipeline
      .run(payload, &worker.handle, &worker.temp_dir)
  });

  let joined = match state.timeout {
    Some(limit) => tokio::time::timeout(limit, task)
      .await
      .map_err(|_| ApiError::Timeout(limit))?,
    None => task.await,
  };

  let result = joined
    .map_err(|e| DetectError::from(InferenceError::Aborted(e.to_string())))??;

  Ok(Json(result))
}

#[derive(Serialize)]
struct HealthResponse {
  status: &'static str,
  model_loaded: bool,
  model_path: String,
  started_at: String,
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
  let loaded = state.handle.is_available();
  let status = if loaded {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };

  (
    status,
    Json(HealthResponse {
      status: if loaded { "ok" } else { "unavailable" },
      model_loaded: loaded,
      model_path: state.handle.path().display().to_string(),
      started_at: state.started_at.to_rfc3339(),
    }),
  )
}
