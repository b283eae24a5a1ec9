// 该文件是 Tumorscope 项目的一部分。
// src/detection.rs - 检测结果
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

use serde::{Serialize, Serializer, ser::SerializeStruct};

use crate::model::DetectItem;

/// 单个阳性检测框，构造后不可修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionBox {
  confidence: f32,
  #[serde(skip)]
  class_id: u32,
  #[serde(rename = "class")]
  label: String,
  bbox: [f32; 4],
}

impl DetectionBox {
  pub fn new(confidence: f32, class_id: u32, label: impl Into<String>, bbox: [f32; 4]) -> Self {
    Self {
      confidence,
      class_id,
      label: label.into(),
      bbox,
    }
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn class_id(&self) -> u32 {
    self.class_id
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// `[x1, y1, x2, y2]`，原图像素坐标
  pub fn bbox(&self) -> [f32; 4] {
    self.bbox
  }
}

impl From<&DetectItem> for DetectionBox {
  fn from(item: &DetectItem) -> Self {
    DetectionBox::new(item.score, item.class_id, item.label.as_str(), item.bbox)
  }
}

/// 单张图像的检测结论。
///
/// 只保存检测框列表，`has_positive` 和 `confidence` 均由列表推导。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
  detections: Vec<DetectionBox>,
}

impl DetectionResult {
  pub fn new(detections: Vec<DetectionBox>) -> Self {
    Self { detections }
  }

  pub fn has_positive(&self) -> bool {
    !self.detections.is_empty()
  }

  /// 最高置信度，无检测时为 0
  pub fn confidence(&self) -> f32 {
    self
      .detections
      .iter()
      .map(DetectionBox::confidence)
      .fold(0.0, f32::max)
  }

  pub fn detections(&self) -> &[DetectionBox] {
    &self.detections
  }
}

impl Serialize for DetectionResult {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("DetectionResult", 3)?;
    state.serialize_field("has_positive", &self.has_positive())?;
    state.serialize_field("detections", &self.detections)?;
    state.serialize_field("confidence", &self.confidence())?;
    state.end()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_empty_result() {
    let result = DetectionResult::default();
    assert!(!result.has_positive());
    assert_eq!(result.confidence(), 0.0);
    assert_eq!(
      serde_json::to_value(&result).unwrap(),
      json!({ "has_positive": false, "detections": [], "confidence": 0.0 })
    );
  }

  #[test]
  fn test_confidence_is_max_of_detections() {
    let result = DetectionResult::new(vec![
      DetectionBox::new(0.5, 1, "positive", [1.0, 2.0, 3.0, 4.0]),
      DetectionBox::new(0.75, 1, "positive", [5.0, 6.0, 7.0, 8.0]),
      DetectionBox::new(0.25, 1, "positive", [9.0, 10.0, 11.0, 12.0]),
    ]);
    assert!(result.has_positive());
    assert_eq!(result.confidence(), 0.75);
    assert_eq!(result.detections().len(), 3);
  }

  #[test]
  fn test_serialized_shape() {
    let result = DetectionResult::new(vec![DetectionBox::new(
      0.5,
      1,
      "positive",
      [10.0, 20.0, 30.5, 40.25],
    )]);
    assert_eq!(
      serde_json::to_value(&result).unwrap(),
      json!({
        "has_positive": true,
        "detections": [
          { "confidence": 0.5, "class": "positive", "bbox": [10.0, 20.0, 30.5, 40.25] }
        ],
        "confidence": 0.5
      })
    );
  }

  #[test]
  fn test_from_detect_item() {
    let item = DetectItem {
      class_id: 1,
      label: "positive".to_string(),
      score: 0.5,
      bbox: [0.0, 0.0, 1.0, 1.0],
    };
    let det = DetectionBox::from(&item);
    assert_eq!(det.class_id(), 1);
    assert_eq!(det.label(), "positive");
    assert_eq!(det.confidence(), 0.5);
    assert_eq!(det.bbox(), [0.0, 0.0, 1.0, 1.0]);
  }
}
