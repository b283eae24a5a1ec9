// 该文件是 Tumorscope 项目的一部分。
// src/pipeline.rs - 检测流程
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

use std::{path::Path, time::Instant};

use tracing::{debug, info, warn};

use crate::{
  detection::{DetectionBox, DetectionResult},
  error::{DetectError, InferenceError},
  ingest::{ImagePayload, ingest},
  model::{DetectResult, ModelHandle},
};

/// 推理并把原始检测框整理为 [`DetectionResult`]。
///
/// 只保留类别索引等于 `positive_class` 的检测框，不做重试。
#[derive(Debug, Clone, Copy)]
pub struct DetectionPipeline {
  positive_class: u32,
}

impl DetectionPipeline {
  pub fn new(positive_class: u32) -> Self {
    Self { positive_class }
  }

  pub fn positive_class(&self) -> u32 {
    self.positive_class
  }

  pub fn infer(&self, image: &Path, handle: &ModelHandle) -> Result<DetectionResult, InferenceError> {
    let Some(model) = handle.model() else {
      warn!("模型未加载，拒绝推理: {}", handle.path().display());
      return Err(InferenceError::ModelUnavailable);
    };

    let now = Instant::now();
    let raw = model.infer(image)?;
    info!("推理完成，耗时: {:.2?}, 原始检测框: {}", now.elapsed(), raw.items.len());

    Ok(self.normalize(&raw))
  }

  pub fn normalize(&self, raw: &DetectResult) -> DetectionResult {
    let detections = raw
      .items
      .iter()
      .filter(|item| item.class_id == self.positive_class)
      .filter(|item| {
        let [x1, y1, x2, y2] = item.bbox;
        let valid = (0.0..=1.0).contains(&item.score) && x1 < x2 && y1 < y2;
        if !valid {
          debug!("丢弃无效检测框: {:?}", item);
        }
        valid
      })
      .map(DetectionBox::from)
      .collect();

    DetectionResult::new(detections)
  }

  /// 完整的一次检测：解码落盘、推理、整理结果。
  ///
  /// 临时图像只存在于本函数作用域内，无论成功或出错都会在返回前删除。
  pub fn run(
    &self,
    payload: ImagePayload,
    handle: &ModelHandle,
    temp_dir: &Path,
  ) -> Result<DetectionResult, DetectError> {
    if !handle.is_available() {
      return Err(InferenceError::ModelUnavailable.into());
    }

    let image = ingest(payload, temp_dir)?;
    let result = self.infer(image.path(), handle)?;

    debug!(
      "阳性: {}, 检测框: {}, 置信度: {:.4}",
      result.has_positive(),
      result.detections().len(),
      result.confidence()
    );
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::DetectErrorKind,
    model::{DetectItem, DynModel, Model, ModelError},
  };
  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
  use std::{
    io::Cursor,
    path::PathBuf,
    sync::{Arc, Mutex},
  };

  struct ScriptedModel {
    items: Vec<DetectItem>,
    fail: bool,
    seen: Mutex<Vec<PathBuf>>,
  }

  impl ScriptedModel {
    fn new(items: Vec<DetectItem>) -> Self {
      Self {
        items,
        fail: false,
        seen: Mutex::new(Vec::new()),
      }
    }

    fn failing() -> Self {
      Self {
        fail: true,
        ..Self::new(Vec::new())
      }
    }
  }

  impl Model for ScriptedModel {
    type Input = Path;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, input: &Path) -> Result<DetectResult, ModelError> {
      assert!(input.exists(), "模型应当能读到临时图像");
      self.seen.lock().unwrap().push(input.to_path_buf());
      if self.fail {
        return Err(ModelError::Output("scripted failure".to_string()));
      }
      Ok(DetectResult {
        items: self.items.clone().into_boxed_slice(),
      })
    }
  }

  fn item(class_id: u32, score: f32) -> DetectItem {
    DetectItem {
      class_id,
      label: if class_id == 1 { "positive" } else { "negative" }.to_string(),
      score,
      bbox: [10.0, 20.0, 30.0, 40.0],
    }
  }

  fn png_bytes() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])))
      .write_to(&mut buf, ImageFormat::Png)
      .unwrap();
    buf.into_inner()
  }

  fn handle_for(model: Arc<ScriptedModel>) -> ModelHandle {
    ModelHandle::from_model("test.onnx", model as Arc<DynModel>)
  }

  #[test]
  fn test_keeps_only_positive_class() {
    let pipeline = DetectionPipeline::new(1);
    let raw = DetectResult {
      items: vec![item(0, 0.5), item(1, 0.25), item(1, 0.75)].into_boxed_slice(),
    };

    let result = pipeline.normalize(&raw);
    assert!(result.has_positive());
    assert_eq!(result.detections().len(), 2);
    assert_eq!(result.detections()[0].confidence(), 0.25);
    assert_eq!(result.detections()[1].confidence(), 0.75);
    assert_eq!(result.confidence(), 0.75);
  }

  #[test]
  fn test_no_predictions() {
    let pipeline = DetectionPipeline::new(1);
    let result = pipeline.normalize(&DetectResult::default());
    assert!(!result.has_positive());
    assert!(result.detections().is_empty());
    assert_eq!(result.confidence(), 0.0);
  }

  #[test]
  fn test_label_is_not_used_for_matching() {
    let pipeline = DetectionPipeline::new(1);
    let mut mislabeled = item(0, 0.5);
    mislabeled.label = "positive".to_string();
    let raw = DetectResult {
      items: vec![mislabeled].into_boxed_slice(),
    };
    assert!(!pipeline.normalize(&raw).has_positive());
  }

  #[test]
  fn test_invalid_boxes_are_dropped() {
    let pipeline = DetectionPipeline::new(1);
    let mut inverted = item(1, 0.5);
    inverted.bbox = [30.0, 20.0, 10.0, 40.0];
    let mut overconfident = item(1, 1.5);
    overconfident.bbox = [0.0, 0.0, 1.0, 1.0];
    let raw = DetectResult {
      items: vec![inverted, overconfident, item(1, 0.5)].into_boxed_slice(),
    };

    let result = pipeline.normalize(&raw);
    assert_eq!(result.detections().len(), 1);
    for det in result.detections() {
      let [x1, y1, x2, y2] = det.bbox();
      assert!((0.0..=1.0).contains(&det.confidence()));
      assert!(x1 < x2 && y1 < y2);
    }
  }

  #[test]
  fn test_unavailable_model_is_explicit() {
    let pipeline = DetectionPipeline::new(1);
    let handle = ModelHandle::unavailable("missing.onnx");
    let err = pipeline.infer(Path::new("whatever.jpg"), &handle).unwrap_err();
    assert!(matches!(err, InferenceError::ModelUnavailable));
  }

  #[test]
  fn test_run_removes_transient_image_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![item(1, 0.5)]));
    let handle = handle_for(Arc::clone(&model));

    let result = DetectionPipeline::new(1)
      .run(ImagePayload::Bytes(png_bytes()), &handle, dir.path())
      .unwrap();

    assert!(result.has_positive());
    let seen = model.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].exists());
  }

  #[test]
  fn test_run_removes_transient_image_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::failing());
    let handle = handle_for(Arc::clone(&model));

    let err = DetectionPipeline::new(1)
      .run(ImagePayload::Bytes(png_bytes()), &handle, dir.path())
      .unwrap_err();

    assert_eq!(err.kind(), DetectErrorKind::Inference);
    let seen = model.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].exists());
  }

  #[test]
  fn test_run_without_model_does_not_touch_disk() {
    let dir = tempfile::tempdir().unwrap();
    let handle = ModelHandle::unavailable("missing.onnx");

    let err = DetectionPipeline::new(1)
      .run(ImagePayload::Bytes(png_bytes()), &handle, dir.path())
      .unwrap_err();

    assert_eq!(err.kind(), DetectErrorKind::ModelUnavailable);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
  }
}
