// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/output/record.rs - 推理记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use serde::Serialize;
use tracing::info;

use super::OutputError;
use crate::config::PipelineConfig;
use crate::model::{DetectionRecord, DetectionResult};

/// 检测到目标时对外发出的推理记录，字段名与下游消费者约定一致
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRecord {
  pub model_name: String,
  /// 推理耗时（毫秒）
  pub inferencing_time: f64,
  pub object_detected: String,
  pub camera_id: String,
  pub camera_name: String,
  pub annotated_image_name: String,
  pub annotated_image_path: String,
  pub created: String,
  pub detected_objects: Vec<DetectionRecord>,
}

impl InferenceRecord {
  pub fn new(
    config: &PipelineConfig,
    result: &DetectionResult,
    latency: Duration,
    annotated_image_path: &Path,
    created: DateTime<Local>,
  ) -> Self {
    let annotated_image_name = annotated_image_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();

    Self {
      model_name: config.model_name.clone(),
      inferencing_time: latency.as_secs_f64() * 1000.0,
      object_detected: "True".to_string(),
      camera_id: config.camera.id.clone(),
      camera_name: config.camera.name(),
      annotated_image_name,
      annotated_image_path: annotated_image_path.display().to_string(),
      created: iso_timestamp(&created),
      detected_objects: result
        .detections()
        .iter()
        .map(|d| d.to_record(config.bbox_format))
        .collect(),
    }
  }
}

// 微秒为 0 时省略小数部分
fn iso_timestamp(created: &DateTime<Local>) -> String {
  if created.nanosecond() / 1_000 == 0 {
    created.format("%Y-%m-%dT%H:%M:%S").to_string()
  } else {
    created.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
  }
}

/// 推理记录的去向
pub trait RecordSink {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError>;
}

/// 以 JSON 形式打印到标准输出并记录日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecordSink;

impl RecordSink for LogRecordSink {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    let message = serde_json::to_string(record)?;
    info!(
      "检测到 {} 个目标, 标注图像: {}",
      record.detected_objects.len(),
      record.annotated_image_path
    );
    println!("{}", message);
    Ok(())
  }
}

/// 追加写入 JSON Lines 文件
#[derive(Debug)]
pub struct JsonLinesRecordSink {
  file: Mutex<File>,
}

impl JsonLinesRecordSink {
  pub fn open(path: &Path) -> Result<Self, OutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    info!("推理记录同时写入: {}", path.display());
    Ok(Self {
      file: Mutex::new(file),
    })
  }
}

impl RecordSink for JsonLinesRecordSink {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
  }
}

impl<S: RecordSink> RecordSink for Option<S> {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    match self {
      Some(sink) => sink.emit(record),
      None => Ok(()),
    }
  }
}

impl<A: RecordSink, B: RecordSink> RecordSink for (A, B) {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    self.0.emit(record)?;
    self.1.emit(record)
  }
}

impl<S: RecordSink + ?Sized> RecordSink for std::sync::Arc<S> {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    (**self).emit(record)
  }
}
