// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/frame/letterbox.rs - 等比缩放加边（letterbox）及其逆映射
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

use image::{RgbImage, imageops};
use tracing::debug;

use super::InvalidFrameError;

/// letterbox 变换记录，用于检测框在填充帧与原始帧之间的坐标换算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadGeometry {
  pub top: u32,
  pub bottom: u32,
  pub left: u32,
  pub right: u32,
  /// 实际应用的横向缩放系数 resized_width / original_width
  pub scale_x: f64,
  /// 实际应用的纵向缩放系数 resized_height / original_height
  pub scale_y: f64,
  pub original_width: u32,
  pub original_height: u32,
  pub resized_width: u32,
  pub resized_height: u32,
}

impl PadGeometry {
  /// 填充帧坐标 -> 原始帧坐标
  pub fn to_original(&self, x: f64, y: f64) -> (f64, f64) {
    (
      (x - self.left as f64) / self.scale_x,
      (y - self.top as f64) / self.scale_y,
    )
  }

  /// 原始帧坐标 -> 填充帧坐标
  pub fn to_padded(&self, x: f64, y: f64) -> (f64, f64) {
    (
      x * self.scale_x + self.left as f64,
      y * self.scale_y + self.top as f64,
    )
  }

  /// 将 [x_min, y_min, x_max, y_max] 形式的框映射回原始帧
  pub fn box_to_original(&self, bbox: [f64; 4]) -> [f64; 4] {
    let (x1, y1) = self.to_original(bbox[0], bbox[1]);
    let (x2, y2) = self.to_original(bbox[2], bbox[3]);
    [x1, y1, x2, y2]
  }

  pub fn is_padded(&self) -> bool {
    self.top + self.bottom + self.left + self.right > 0
  }
}

/// 将帧等比缩放到 `dimension`×`dimension`，短边两侧用黑色对称填充。
///
/// 较长边缩放到 `dimension`，较短边按 `round(dimension / aspect)` 计算，
/// 舍入方式为四舍六入五成双；填充量为奇数时上/左取下整，下/右取上整。
/// 任一边大于目标尺寸时使用区域平均缩小，否则使用三次插值放大。
pub fn letterbox(
  image: &RgbImage,
  dimension: u32,
) -> Result<(RgbImage, PadGeometry), InvalidFrameError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(InvalidFrameError::ZeroArea { width, height });
  }

  let target = dimension as f64;
  let aspect = width as f64 / height as f64;

  let (resized_width, resized_height) = if aspect > 1.0 {
    let h = ((target / aspect).round_ties_even() as u32).clamp(1, dimension);
    (dimension, h)
  } else if aspect < 1.0 {
    let w = ((target * aspect).round_ties_even() as u32).clamp(1, dimension);
    (w, dimension)
  } else {
    (dimension, dimension)
  };

  let pad_vertical = dimension - resized_height;
  let pad_horizontal = dimension - resized_width;
  let (top, bottom) = (pad_vertical / 2, pad_vertical - pad_vertical / 2);
  let (left, right) = (pad_horizontal / 2, pad_horizontal - pad_horizontal / 2);

  let scaled = if (resized_width, resized_height) == (width, height) {
    image.clone()
  } else if width > dimension || height > dimension {
    imageops::thumbnail(image, resized_width, resized_height)
  } else {
    imageops::resize(
      image,
      resized_width,
      resized_height,
      imageops::FilterType::CatmullRom,
    )
  };

  let mut canvas = RgbImage::new(dimension, dimension);
  imageops::replace(&mut canvas, &scaled, left as i64, top as i64);

  let geometry = PadGeometry {
    top,
    bottom,
    left,
    right,
    scale_x: resized_width as f64 / width as f64,
    scale_y: resized_height as f64 / height as f64,
    original_width: width,
    original_height: height,
    resized_width,
    resized_height,
  };
  debug!(
    "letterbox: {}x{} -> {}x{}, 填充 上{} 下{} 左{} 右{}",
    width, height, resized_width, resized_height, top, bottom, left, right
  );

  Ok((canvas, geometry))
}
