// 该文件是 Tumorscope 项目的一部分。
// src/error.rs - 错误类型
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

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{ingest::IngestError, model::ModelError};

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("model I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to fetch default model: {0}")]
  Fetch(String),
  #[error("invalid model artifact {}: {reason}", .path.display())]
  Invalid { path: PathBuf, reason: String },
}

impl ModelLoadError {
  pub fn io(path: &Path, source: std::io::Error) -> Self {
    ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    }
  }

  pub fn invalid(path: &Path, reason: impl ToString) -> Self {
    ModelLoadError::Invalid {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("detection model is not loaded")]
  ModelUnavailable,
  #[error("inference failed: {0}")]
  Backend(#[from] ModelError),
  #[error("inference task aborted: {0}")]
  Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectErrorKind {
  ModelLoad,
  Decode,
  Format,
  Storage,
  ModelUnavailable,
  Inference,
}

/// 单次检测请求可能出现的全部错误
#[derive(Error, Debug)]
pub enum DetectError {
  #[error(transparent)]
  ModelLoad(#[from] ModelLoadError),
  #[error(transparent)]
  Ingest(#[from] IngestError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
}

impl DetectError {
  pub fn kind(&self) -> DetectErrorKind {
    match self {
      DetectError::ModelLoad(_) => DetectErrorKind::ModelLoad,
      DetectError::Ingest(IngestError::Decode(_)) => DetectErrorKind::Decode,
      DetectError::Ingest(IngestError::Format(_)) => DetectErrorKind::Format,
      DetectError::Ingest(IngestError::Storage { .. }) => DetectErrorKind::Storage,
      DetectError::Inference(InferenceError::ModelUnavailable) => DetectErrorKind::ModelUnavailable,
      DetectError::Inference(_) => DetectErrorKind::Inference,
    }
  }
}
