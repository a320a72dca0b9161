// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

mod annotate;
mod record;
mod save_image_file;

pub use self::annotate::{Annotator, caption};
pub use self::record::{InferenceRecord, JsonLinesRecordSink, LogRecordSink, RecordSink};
pub use self::save_image_file::AnnotatedImageWriter;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法加载字体 {path}: {reason}")]
  FontError { path: String, reason: String },
  #[error("推理记录序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}
