// 该文件是 Tumorscope 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use thiserror::Error;

pub trait Model {
  type Input: ?Sized;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型输出的单个原始检测框
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("failed to read input image: {0}")]
  Image(#[from] image::ImageError),
  #[error("ONNX Runtime error: {0}")]
  Runtime(String),
  #[error("unexpected model output: {0}")]
  Output(String),
  #[error("model session lock poisoned")]
  Poisoned,
}

/// 以图像文件路径为输入的检测模型
pub type DynModel = dyn Model<Input = Path, Output = DetectResult, Error = ModelError> + Send + Sync;

mod handle;
mod yolo;

#[cfg(feature = "download")]
pub use self::handle::HttpArtifact;
pub use self::handle::{ArtifactSource, LocalOnly, ModelHandle};
pub use self::yolo::{Yolo, YoloBuilder};
