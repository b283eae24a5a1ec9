// 该文件是 Tumorscope 项目的一部分。
// src/config.rs - 检测器配置
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

/// 默认模型存储路径
pub const DEFAULT_MODEL_PATH: &str = "models/brain_tumor.onnx";

/// 默认预训练模型下载地址
pub const DEFAULT_MODEL_URL: &str =
  "https://github.com/ultralytics/assets/releases/download/v8.2.0/yolov8n.onnx";

/// 阳性类别索引。
///
/// 对应训练数据集 `brain-tumor.yaml` 中的 `{0: negative, 1: positive}`，
/// 更换模型时必须同步修改，不能依赖类别名称判断。
pub const DEFAULT_POSITIVE_CLASS: u32 = 1;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INPUT_SIZE: u32 = 640;

const MAX_INPUT_SIZE: u32 = 4096;

/// 检测器配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 阳性类别索引
  pub positive_class: u32,
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence_threshold: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub iou_threshold: f32,
  /// 模型输入边长（正方形）
  pub input_size: u32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      positive_class: DEFAULT_POSITIVE_CLASS,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
    }
  }
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), String> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(format!(
        "confidence threshold must be within [0, 1], got {}",
        self.confidence_threshold
      ));
    }

    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(format!(
        "IoU threshold must be within [0, 1], got {}",
        self.iou_threshold
      ));
    }

    if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
      return Err(format!(
        "input size must be within 1..={}, got {}",
        MAX_INPUT_SIZE, self.input_size
      ));
    }

    Ok(())
  }
}
