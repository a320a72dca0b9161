// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use super::OutputError;
use crate::config::CameraConfig;

const JPEG_QUALITY: u8 = 100;

/// 以 `{location}-{position}-{时间戳}-annotated.jpg` 命名写入输出目录
#[derive(Debug, Clone)]
pub struct AnnotatedImageWriter {
  directory: PathBuf,
  location: String,
  position: String,
}

impl AnnotatedImageWriter {
  pub fn new(directory: impl Into<PathBuf>, camera: &CameraConfig) -> Self {
    Self {
      directory: directory.into(),
      location: camera.location.clone(),
      position: camera.position.clone(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 时间戳为 年-日-月-时-分-秒-微秒，下游按此顺序解析
  pub fn file_name(&self, now: &DateTime<Local>) -> String {
    format!(
      "{}-{}-{}-annotated.jpg",
      self.location,
      self.position,
      now.format("%Y%d%m%H%M%S%6f")
    )
  }

  pub fn write(&self, image: &RgbImage, now: &DateTime<Local>) -> Result<PathBuf, OutputError> {
    std::fs::create_dir_all(&self.directory)?;
    let path = self.directory.join(self.file_name(now));

    let mut writer = BufWriter::new(File::create(&path)?);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(image)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    debug!("保存标注图像到文件: {}", path.display());
    Ok(path)
  }
}
