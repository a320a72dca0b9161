// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_sink::{
  FromUrl,
  config::PipelineConfig,
  gateway::{RetryingGateway, TritonHttpGatewayBuilder},
  input::SingleFileInput,
  model::LabelSet,
  output::{Annotator, LogRecordSink},
  task::{FrameProcessor, OneShotTask, Task},
};
use tracing::info;

/// 对单张图像推理一次并保存标注结果，不删除输入文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端地址
  #[arg(long, value_name = "URL", default_value = "http://localhost:8000")]
  pub backend: Url,
  /// 模型名称
  #[arg(long, value_name = "MODEL")]
  pub model_name: String,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub label_file: PathBuf,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出目录
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 置信度阈值
  #[arg(long, default_value = "0.6", value_name = "THRESHOLD")]
  pub probability_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推理后端: {}", args.backend);
  info!("输入图像: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let mut config = PipelineConfig {
    model_name: args.model_name,
    label_file: args.label_file,
    probability_threshold: args.probability_threshold,
    source_dir: args
      .input
      .parent()
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from(".")),
    output_dir: args.output,
    ..PipelineConfig::default()
  };
  config.backend.url = args.backend;
  config.cleanup.remove_processed = false;
  config.cleanup.remove_failed = false;
  // 单次调用不检查后端统计
  config.backend.stats_failure_threshold = 0;
  let config = Arc::new(config.resolve()?);

  let labels = Arc::new(LabelSet::from_file(&config.label_file)?);
  let gateway = TritonHttpGatewayBuilder::from_url(&config.backend.url)?.build()?;
  let gateway = RetryingGateway::new(gateway, config.backend.retry);
  let processor = FrameProcessor::new(config.clone(), labels, gateway, LogRecordSink)
    .with_annotator(Annotator::from_font_path(None)?);

  let summary = OneShotTask.run_task(SingleFileInput::new(&args.input), processor)?;
  info!("处理完成: {:?}", summary);

  Ok(())
}
