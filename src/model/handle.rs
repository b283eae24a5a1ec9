// 该文件是 Tumorscope 项目的一部分。
// src/model/handle.rs - 模型句柄与默认模型获取
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

use std::{
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
  config::DetectorConfig,
  error::ModelLoadError,
  model::{DynModel, YoloBuilder},
};

/// 默认预训练模型的来源
pub trait ArtifactSource {
  fn describe(&self) -> String;
  fn fetch(&self) -> Result<Vec<u8>, ModelLoadError>;
}

/// 不允许下载，模型文件必须预先放好
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnly;

impl ArtifactSource for LocalOnly {
  fn describe(&self) -> String {
    "local only".to_string()
  }

  fn fetch(&self) -> Result<Vec<u8>, ModelLoadError> {
    Err(ModelLoadError::Fetch(
      "model file is missing and downloading is disabled".to_string(),
    ))
  }
}

#[cfg(feature = "download")]
pub use self::http::HttpArtifact;

#[cfg(feature = "download")]
mod http {
  use std::time::Duration;

  use tracing::info;
  use url::Url;

  use super::ArtifactSource;
  use crate::error::ModelLoadError;

  const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
  const MAX_MODEL_SIZE: u64 = 1024 * 1024 * 1024;
  const MIN_MODEL_SIZE: usize = 1024;

  /// 通过 HTTPS 下载的模型文件
  #[derive(Debug, Clone)]
  pub struct HttpArtifact {
    url: Url,
  }

  impl HttpArtifact {
    pub fn new(url: Url) -> Result<Self, ModelLoadError> {
      if url.scheme() != "https" {
        return Err(ModelLoadError::Fetch(format!(
          "only https model URLs are allowed, got '{}'",
          url.scheme()
        )));
      }
      Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
      &self.url
    }
  }

  impl ArtifactSource for HttpArtifact {
    fn describe(&self) -> String {
      self.url().to_string()
    }

    fn fetch(&self) -> Result<Vec<u8>, ModelLoadError> {
      info!("下载默认模型: {}", self.url);

      let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| ModelLoadError::Fetch(e.to_string()))?;

      let response = client
        .get(self.url.clone())
        .send()
        .map_err(|e| ModelLoadError::Fetch(e.to_string()))?;

      if !response.status().is_success() {
        return Err(ModelLoadError::Fetch(format!(
          "HTTP {} from {}",
          response.status(),
          self.url
        )));
      }

      if let Some(len) = response.content_length()
        && len > MAX_MODEL_SIZE
      {
        return Err(ModelLoadError::Fetch(format!(
          "model too large: {} bytes (max {})",
          len, MAX_MODEL_SIZE
        )));
      }

      let bytes = response
        .bytes()
        .map_err(|e| ModelLoadError::Fetch(e.to_string()))?;

      if bytes.len() < MIN_MODEL_SIZE {
        return Err(ModelLoadError::Fetch(format!(
          "downloaded file too small ({} bytes), likely corrupted",
          bytes.len()
        )));
      }

      info!("下载完成: {:.2} MB", bytes.len() as f64 / (1024.0 * 1024.0));
      Ok(bytes.to_vec())
    }
  }
}

/// 进程内共享的已加载模型。
///
/// 加载成功后不再修改；加载失败时用 [`ModelHandle::unavailable`] 显式表示，
/// 由调用方决定直接退出还是降级运行。
#[derive(Clone)]
pub struct ModelHandle {
  path: PathBuf,
  model: Option<Arc<DynModel>>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("path", &self.path)
      .field("loaded", &self.model.is_some())
      .finish()
  }
}

impl ModelHandle {
  /// 用 ONNX Runtime 后端加载 `path`，文件不存在时先从 `source` 获取默认模型
  pub fn acquire(
    path: impl Into<PathBuf>,
    source: &dyn ArtifactSource,
    config: &DetectorConfig,
  ) -> Result<Self, ModelLoadError> {
    Self::acquire_with(path, source, |path| {
      let model = YoloBuilder::new(path).config(config.clone()).build()?;
      Ok(Arc::new(model) as Arc<DynModel>)
    })
  }

  pub fn acquire_with<F>(
    path: impl Into<PathBuf>,
    source: &dyn ArtifactSource,
    load: F,
  ) -> Result<Self, ModelLoadError>
  where
    F: FnOnce(&Path) -> Result<Arc<DynModel>, ModelLoadError>,
  {
    let path = path.into();

    if path.exists() {
      info!("加载本地模型: {}", path.display());
    } else {
      warn!(
        "模型文件不存在: {}，使用默认模型 ({})",
        path.display(),
        source.describe()
      );
      persist_artifact(&path, source)?;
    }

    let model = load(&path)?;
    info!("模型加载完成");

    Ok(Self {
      path,
      model: Some(model),
    })
  }

  pub fn from_model(path: impl Into<PathBuf>, model: Arc<DynModel>) -> Self {
    Self {
      path: path.into(),
      model: Some(model),
    }
  }

  pub fn unavailable(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      model: None,
    }
  }

  pub fn is_available(&self) -> bool {
    self.model.is_some()
  }

  pub fn model(&self) -> Option<&Arc<DynModel>> {
    self.model.as_ref()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 先写入同目录下的临时文件再改名，中途失败不会留下残缺的模型
fn persist_artifact(path: &Path, source: &dyn ArtifactSource) -> Result<(), ModelLoadError> {
  let bytes = source.fetch()?;

  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent).map_err(|e| ModelLoadError::io(parent, e))?;
  }

  let partial = path.with_extension("part");
  fs::write(&partial, &bytes).map_err(|e| ModelLoadError::io(&partial, e))?;

  if let Err(e) = fs::rename(&partial, path) {
    let _ = fs::remove_file(&partial);
    return Err(ModelLoadError::io(path, e));
  }

  debug!("默认模型已保存: {} ({} 字节)", path.display(), bytes.len());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectResult, Model, ModelError};
  use std::cell::Cell;

  struct NullModel;

  impl Model for NullModel {
    type Input = Path;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &Path) -> Result<DetectResult, ModelError> {
      Ok(DetectResult::default())
    }
  }

  struct FixedSource {
    bytes: Vec<u8>,
    calls: Cell<usize>,
  }

  impl FixedSource {
    fn new(bytes: &[u8]) -> Self {
      Self {
        bytes: bytes.to_vec(),
        calls: Cell::new(0),
      }
    }
  }

  impl ArtifactSource for FixedSource {
    fn describe(&self) -> String {
      "fixed".to_string()
    }

    fn fetch(&self) -> Result<Vec<u8>, ModelLoadError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.bytes.clone())
    }
  }

  fn null_loader(_path: &Path) -> Result<Arc<DynModel>, ModelLoadError> {
    Ok(Arc::new(NullModel))
  }

  #[test]
  fn test_missing_artifact_is_fetched_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("nested").join("model.onnx");
    let source = FixedSource::new(b"artifact-bytes");

    let mut loaded_from = None;
    let handle = ModelHandle::acquire_with(&path, &source, |p| {
      loaded_from = Some(p.to_path_buf());
      null_loader(p)
    })
    .unwrap();

    assert!(handle.is_available());
    assert_eq!(source.calls.get(), 1);
    assert_eq!(fs::read(&path).unwrap(), b"artifact-bytes");
    assert_eq!(loaded_from.as_deref(), Some(path.as_path()));
    assert!(!path.with_extension("part").exists());
  }

  #[test]
  fn test_existing_artifact_skips_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    fs::write(&path, b"cached").unwrap();
    let source = FixedSource::new(b"fresh");

    let handle = ModelHandle::acquire_with(&path, &source, null_loader).unwrap();

    assert!(handle.is_available());
    assert_eq!(source.calls.get(), 0);
    assert_eq!(fs::read(&path).unwrap(), b"cached");
  }

  #[test]
  fn test_failed_fetch_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("model.onnx");

    let err = ModelHandle::acquire_with(&path, &LocalOnly, null_loader).unwrap_err();

    assert!(matches!(err, ModelLoadError::Fetch(_)));
    assert!(!path.exists());
    assert!(!dir.path().join("models").exists());
  }

  #[test]
  fn test_loader_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    fs::write(&path, b"garbage").unwrap();

    let err = ModelHandle::acquire_with(&path, &LocalOnly, |p| {
      Err(ModelLoadError::invalid(p, "not an ONNX graph"))
    })
    .unwrap_err();

    assert!(matches!(err, ModelLoadError::Invalid { .. }));
  }

  #[test]
  fn test_unavailable_handle() {
    let handle = ModelHandle::unavailable("models/brain_tumor.onnx");
    assert!(!handle.is_available());
    assert!(handle.model().is_none());
    assert_eq!(handle.path(), Path::new("models/brain_tumor.onnx"));
  }

  #[cfg(feature = "download")]
  #[test]
  fn test_http_artifact_requires_https() {
    let url = url::Url::parse("http://example.com/model.onnx").unwrap();
    assert!(HttpArtifact::new(url).is_err());

    let url = url::Url::parse("https://example.com/model.onnx").unwrap();
    let artifact = HttpArtifact::new(url.clone()).unwrap();
    assert_eq!(artifact.url(), &url);
    assert_eq!(artifact.describe(), "https://example.com/model.onnx");
  }
}
