// 该文件是 Tumorscope 项目的一部分。
// src/output.rs - 输出定义
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

#[cfg(feature = "annotate")]
pub mod draw;

#[cfg(feature = "annotate")]
pub use self::annotate::{AnnotateError, save_annotated};

#[cfg(feature = "annotate")]
mod annotate {
  use std::path::Path;

  use thiserror::Error;
  use tracing::info;

  use super::draw::draw_detections;
  use crate::detection::DetectionResult;

  #[derive(Error, Debug)]
  pub enum AnnotateError {
    #[error("I/O 错误: {0}")]
    IoError(#[from] std::io::Error),
    #[error("图像错误: {0}")]
    ImageError(#[from] image::ImageError),
  }

  /// 读取原图、绘制检测框并保存到 `output`
  pub fn save_annotated(
    source: &Path,
    result: &DetectionResult,
    output: &Path,
  ) -> Result<(), AnnotateError> {
    let mut image = image::open(source)?.to_rgb8();
    draw_detections(&mut image, result);

    if let Some(parent) = output.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(output)?;
    info!("保存标注图像到文件: {}", output.display());

    Ok(())
  }
}
