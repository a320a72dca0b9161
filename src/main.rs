// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanan_sink::{
  FromUrl,
  gateway::{RetryingGateway, TritonHttpGatewayBuilder},
  input::DirectoryInput,
  model::LabelSet,
  output::{Annotator, JsonLinesRecordSink, LogRecordSink},
  task::{ContinuousTask, FrameProcessor, PipelineTask, ShutdownSignal, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = Arc::new(args.load_config()?);

  info!("模型名称: {}", config.model_name);
  info!("输入目录: {}", config.source_dir.display());
  info!("输出目录: {}", config.output_dir.display());
  info!("摄像头: {} ({})", config.camera.name(), config.camera.id);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    config.probability_threshold, config.iou_threshold
  );

  let labels = Arc::new(LabelSet::from_file(&config.label_file)?);

  let backend = &config.backend;
  let gateway = TritonHttpGatewayBuilder::from_url(&backend.url)?
    .input_name(backend.input_name.as_str())
    .output_name(backend.output_name.as_str())
    .timeout(backend.timeout())
    .build()?;
  let gateway = RetryingGateway::new(gateway, backend.retry);

  let record_log = config
    .record_log
    .as_deref()
    .map(JsonLinesRecordSink::open)
    .transpose()?;
  let annotator = Annotator::from_font_path(config.font_path.as_deref())?;
  let processor = FrameProcessor::new(config.clone(), labels, gateway, (LogRecordSink, record_log))
    .with_annotator(annotator);

  std::fs::create_dir_all(&config.source_dir)
    .with_context(|| format!("无法创建输入目录 {}", config.source_dir.display()))?;
  let input = DirectoryInput::new(&config.source_dir);

  let shutdown = ShutdownSignal::new();
  shutdown.install_ctrlc().context("无法设置 Ctrl-C 处理函数")?;

  let summary = if config.inference_workers > 1 {
    PipelineTask::new(config.inference_workers, config.queue_capacity)
      .with_frame_number(args.frame_number)
      .with_poll_interval(config.poll_interval())
      .with_shutdown(shutdown)
      .run_task(input, processor)?
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_poll_interval(config.poll_interval())
      .with_shutdown(shutdown)
      .run_task(input, processor)?
  };

  info!(
    "共处理 {} 帧, 标注 {} 帧, 无目标 {} 帧, 失败 {} 帧",
    summary.processed, summary.annotated, summary.skipped, summary.failed
  );
  Ok(())
}
