// 该文件是 Tumorscope 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser};
use url::Url;

use crate::config::{
  DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD, DEFAULT_MODEL_PATH,
  DEFAULT_MODEL_URL, DEFAULT_POSITIVE_CLASS, DetectorConfig,
};

const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// 模型与检测参数，服务与命令行工具共用
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// ONNX 模型文件路径，不存在时自动下载默认模型
  #[arg(long, env = "TUMORSCOPE_MODEL", default_value = DEFAULT_MODEL_PATH, value_name = "FILE")]
  pub model: PathBuf,

  /// 默认模型下载地址（仅支持 https）
  #[arg(long, env = "TUMORSCOPE_MODEL_URL", default_value = DEFAULT_MODEL_URL, value_name = "URL")]
  pub model_url: Url,

  /// 阳性类别索引，必须与所部署模型的类别表一致
  #[arg(long, env = "TUMORSCOPE_POSITIVE_CLASS", default_value_t = DEFAULT_POSITIVE_CLASS, value_name = "INDEX")]
  pub positive_class: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 模型输入边长
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE, value_name = "PIXELS")]
  pub input_size: u32,
}

impl ModelArgs {
  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      positive_class: self.positive_class,
      confidence_threshold: self.confidence,
      iou_threshold: self.nms_threshold,
      input_size: self.input_size,
    }
  }
}

/// Tumorscope 检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
  /// 监听地址
  #[arg(long, env = "TUMORSCOPE_BIND", default_value = "127.0.0.1:5000", value_name = "ADDR")]
  pub bind: SocketAddr,

  #[command(flatten)]
  pub model: ModelArgs,

  /// 临时图像目录，默认使用系统临时目录
  #[arg(long, env = "TUMORSCOPE_TEMP_DIR", value_name = "DIR")]
  pub temp_dir: Option<PathBuf>,

  /// 单次检测超时（秒），不设置则不限制
  #[arg(long, value_name = "SECONDS")]
  pub inference_timeout_secs: Option<u64>,

  /// 请求体大小上限（字节）
  #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, value_name = "BYTES")]
  pub max_body_bytes: usize,

  /// 模型加载失败时直接退出，而不是以不健康状态继续运行
  #[arg(long)]
  pub require_model: bool,
}

impl ServerArgs {
  pub fn inference_timeout(&self) -> Option<Duration> {
    self.inference_timeout_secs.map(Duration::from_secs)
  }

  pub fn temp_dir(&self) -> PathBuf {
    self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
  }
}
