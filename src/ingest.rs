// 该文件是 Tumorscope 项目的一部分。
// src/ingest.rs - 图像输入解码与临时落盘
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
  fs::{self, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ColorType, DynamicImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const TRANSIENT_PREFIX: &str = "tumorscope-";
const JPEG_QUALITY: u8 = 95;

/// 请求中携带的图像数据
#[derive(Debug, Clone)]
pub enum ImagePayload {
  /// 原始图像字节
  Bytes(Vec<u8>),
  /// Base64 文本，可带 `data:image/png;base64,` 之类的前缀
  Encoded(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
  #[error("invalid base64 image data: {0}")]
  Decode(#[from] base64::DecodeError),
  #[error("unsupported or corrupt image: {0}")]
  Format(#[from] image::ImageError),
  #[error("failed to store transient image {}: {reason}", .path.display())]
  Storage { path: PathBuf, reason: String },
}

impl IngestError {
  fn storage(path: &Path, reason: impl ToString) -> Self {
    IngestError::Storage {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

/// 把请求数据还原成原始图像字节
pub fn decode_payload(payload: ImagePayload) -> Result<Vec<u8>, IngestError> {
  match payload {
    ImagePayload::Bytes(bytes) => Ok(bytes),
    ImagePayload::Encoded(text) => {
      let encoded = match text.split_once(',') {
        Some((_scheme, rest)) => rest,
        None => text.as_str(),
      };
      // 按 MIME 规则折行的 base64 中间带换行，解码前去掉所有 ASCII 空白
      let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
      Ok(STANDARD.decode(compact)?)
    }
  }
}

/// 推理后端只接受 RGB 与灰度图，其余模式（调色板、带透明通道、16 位等）统一转为 RGB
pub fn normalize_color(image: DynamicImage) -> DynamicImage {
  match image {
    DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image,
    other => {
      debug!("转换图像颜色模式: {:?} -> Rgb8", other.color());
      DynamicImage::ImageRgb8(other.to_rgb8())
    }
  }
}

/// 解码、校验并把图像写入 `temp_dir` 下的唯一临时文件
pub fn ingest(payload: ImagePayload, temp_dir: &Path) -> Result<TransientImage, IngestError> {
  let bytes = decode_payload(payload)?;
  debug!("图像数据大小: {} 字节", bytes.len());

  let image = image::load_from_memory(&bytes)?;
  let image = normalize_color(image);

  TransientImage::persist(&image, temp_dir)
}

/// 请求期间存在的临时图像文件，drop 时删除
#[derive(Debug)]
pub struct TransientImage {
  path: PathBuf,
  width: u32,
  height: u32,
  color: ColorType,
}

impl TransientImage {
  fn persist(image: &DynamicImage, temp_dir: &Path) -> Result<Self, IngestError> {
    let path = temp_dir.join(format!("{}{}.jpg", TRANSIENT_PREFIX, Uuid::new_v4()));

    let file = OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)
      .map_err(|e| IngestError::storage(&path, e))?;

    // 文件已创建，此后任何失败都由 drop 清理
    let transient = TransientImage {
      path,
      width: image.width(),
      height: image.height(),
      color: image.color(),
    };

    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    image
      .write_with_encoder(encoder)
      .map_err(|e| IngestError::storage(&transient.path, e))?;
    writer
      .flush()
      .map_err(|e| IngestError::storage(&transient.path, e))?;

    debug!(
      "临时图像已写入: {} ({}x{} {:?})",
      transient.path.display(),
      transient.width,
      transient.height,
      transient.color
    );

    Ok(transient)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn color(&self) -> ColorType {
    self.color
  }
}

impl AsRef<Path> for TransientImage {
  fn as_ref(&self) -> &Path {
    &self.path
  }
}

impl Drop for TransientImage {
  fn drop(&mut self) {
    match fs::remove_file(&self.path) {
      Ok(()) => debug!("临时图像已删除: {}", self.path.display()),
      Err(e) => warn!("删除临时图像失败 {}: {}", self.path.display(), e),
    }
  }
}
