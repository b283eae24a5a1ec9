// 该文件是 Tumorscope 项目的一部分。
// src/bin/detect.rs - 单张图像检测命令行工具
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

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tumorscope::{
  args::ModelArgs,
  detection::DetectionResult,
  ingest::ImagePayload,
  model::ModelHandle,
  pipeline::DetectionPipeline,
};

/// 对单张图像做肿瘤检测，结果以 JSON 输出到标准输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[command(flatten)]
  model: ModelArgs,

  /// 保存标注了检测框的图像
  #[cfg(feature = "annotate")]
  #[arg(long, value_name = "OUTPUT")]
  annotate: Option<PathBuf>,

  /// 输入图像路径
  #[arg(value_name = "IMAGE")]
  image: PathBuf,
}

fn run(args: &Args) -> Result<DetectionResult> {
  let config = args.model.detector_config();
  config.validate().map_err(anyhow::Error::msg)?;

  #[cfg(feature = "download")]
  let source = tumorscope::model::HttpArtifact::new(args.model.model_url.clone())?;
  #[cfg(not(feature = "download"))]
  let source = tumorscope::model::LocalOnly;

  let handle = ModelHandle::acquire(&args.model.model, &source, &config)?;

  let bytes = std::fs::read(&args.image)
    .with_context(|| format!("无法读取图像: {}", args.image.display()))?;

  let now = std::time::Instant::now();
  let result = DetectionPipeline::new(config.positive_class).run(
    ImagePayload::Bytes(bytes),
    &handle,
    &std::env::temp_dir(),
  )?;
  info!("检测完成，耗时: {:.2?}", now.elapsed());

  annotate(args, &result)?;

  Ok(result)
}

#[cfg(feature = "annotate")]
fn annotate(args: &Args, result: &DetectionResult) -> Result<()> {
  if let Some(output) = &args.annotate {
    tumorscope::output::save_annotated(&args.image, result, output)?;
  }
  Ok(())
}

#[cfg(not(feature = "annotate"))]
fn annotate(_args: &Args, _result: &DetectionResult) -> Result<()> {
  Ok(())
}

fn main() -> ExitCode {
  // 标准输出只留给 JSON 结果
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match run(&args) {
    Ok(result) => match serde_json::to_string(&result) {
      Ok(text) => {
        println!("{}", text);
        ExitCode::SUCCESS
      }
      Err(e) => {
        println!("{}", json!({ "error": e.to_string() }));
        ExitCode::FAILURE
      }
    },
    Err(e) => {
      println!("{}", json!({ "error": format!("{:#}", e) }));
      ExitCode::FAILURE
    }
  }
}
