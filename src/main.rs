// 该文件是 Tumorscope 项目的一部分。
// src/main.rs - 检测服务主程序
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

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tumorscope::{
  args::{ModelArgs, ServerArgs},
  model::{ArtifactSource, ModelHandle},
  pipeline::DetectionPipeline,
  server::{self, AppState},
};

#[cfg(feature = "download")]
fn artifact_source(args: &ModelArgs) -> Result<Box<dyn ArtifactSource + Send>> {
  Ok(Box::new(tumorscope::model::HttpArtifact::new(args.model_url.clone())?))
}

#[cfg(not(feature = "download"))]
fn artifact_source(_args: &ModelArgs) -> Result<Box<dyn ArtifactSource + Send>> {
  Ok(Box::new(tumorscope::model::LocalOnly))
}

async fn load_model(args: &ModelArgs) -> Result<ModelHandle> {
  let source = artifact_source(args)?;
  let path = args.model.clone();
  let config = args.detector_config();

  let handle = tokio::task::spawn_blocking(move || {
    ModelHandle::acquire(path, &*source, &config)
  })
  .await
  .context("模型加载任务异常退出")??;

  Ok(handle)
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("监听中断信号失败: {}", e);
    return;
  }
  info!("收到中断信号，准备退出...");
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = ServerArgs::parse();
  let config = args.model.detector_config();
  config.validate().map_err(anyhow::Error::msg)?;

  info!("Tumorscope 检测服务");
  info!("模型文件路径: {}", args.model.model.display());
  info!("阳性类别索引: {}", config.positive_class);
  info!("置信度阈值: {}", config.confidence_threshold);
  info!("NMS 阈值: {}", config.iou_threshold);

  let handle = match load_model(&args.model).await {
    Ok(handle) => handle,
    Err(e) if args.require_model => {
      return Err(e.context("模型加载失败"));
    }
    Err(e) => {
      error!("模型加载失败: {:#}", e);
      warn!("服务以不健康状态启动，检测接口将返回 503");
      ModelHandle::unavailable(args.model.model.clone())
    }
  };

  let temp_dir = args.temp_dir();
  std::fs::create_dir_all(&temp_dir)
    .with_context(|| format!("无法创建临时目录: {}", temp_dir.display()))?;
  info!("临时图像目录: {}", temp_dir.display());

  let state = AppState::new(handle, DetectionPipeline::new(config.positive_class), temp_dir)
    .with_timeout(args.inference_timeout());
  let app = server::router(Arc::new(state), args.max_body_bytes);

  let listener = tokio::net::TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("无法监听地址: {}", args.bind))?;
  info!("服务已启动: http://{}", args.bind);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP 服务异常退出")?;

  info!("服务已停止");
  Ok(())
}
