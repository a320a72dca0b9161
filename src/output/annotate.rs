// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/output/annotate.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::OutputError;
use crate::model::{Detection, DetectionResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 12.0;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

// 未指定字体时依次尝试
const FALLBACK_FONTS: [&str; 3] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

/// 在填充帧上绘制检测框与标签，没有可用字体时只绘制检测框
pub struct Annotator {
  font: Option<FontVec>,
  font_size: f32,
  box_color: [u8; 3],
  label_color: [u8; 3],
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Annotator {
  pub fn new(font: Option<FontVec>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      label_color: LABEL_COLOR,
    }
  }

  /// 显式指定的字体加载失败视为错误；未指定时回退到系统字体
  pub fn from_font_path(path: Option<&Path>) -> Result<Self, OutputError> {
    if let Some(path) = path {
      let font = load_font(path)?;
      info!("标签字体: {}", path.display());
      return Ok(Self::new(Some(font)));
    }

    for candidate in FALLBACK_FONTS.iter().map(Path::new) {
      if let Ok(font) = load_font(candidate) {
        info!("标签字体: {}", candidate.display());
        return Ok(Self::new(Some(font)));
      }
    }

    warn!("未找到可用字体，标注图像将不包含标签文字");
    Ok(Self::new(None))
  }

  pub fn annotate(&self, image: &mut RgbImage, result: &DetectionResult) {
    for detection in result.detections() {
      self.draw_detection(image, detection);
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let bbox = detection.bbox();
    let (width, height) = image.dimensions();
    // 先裁剪到画面外一像素以内，再向零截断到整数像素坐标
    let (x1, x2) = ordered(clip(bbox.x_min, width), clip(bbox.x_max, width));
    let (y1, y2) = ordered(clip(bbox.y_min, height), clip(bbox.y_max, height));
    if x2 < 0 || y2 < 0 || x1 >= width as i32 || y1 >= height as i32 {
      return;
    }

    // 右下角像素包含在边框内
    let rect = Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
    draw_hollow_rect_mut(image, rect, Rgb(self.box_color));

    let Some(font) = self.font.as_ref() else {
      return;
    };

    // 文字基线位于边框左上角
    let label = caption(detection);
    let scale = PxScale::from(self.font_size);
    let (_, text_height) = text_size(scale, font, &label);
    draw_text_mut(
      image,
      Rgb(self.label_color),
      x1,
      y1 - text_height as i32,
      scale,
      font,
      &label,
    );
  }
}

fn load_font(path: &Path) -> Result<FontVec, OutputError> {
  let font_error = |reason: String| OutputError::FontError {
    path: path.display().to_string(),
    reason,
  };
  let data = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
  FontVec::try_from_vec(data).map_err(|e| font_error(e.to_string()))
}

fn clip(value: f64, limit: u32) -> i32 {
  if value.is_nan() {
    return 0;
  }
  value.clamp(-1.0, limit as f64) as i32
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
  if a <= b { (a, b) } else { (b, a) }
}

/// 标签文字 `{label}@{probability}%`
pub fn caption(detection: &Detection) -> String {
  format!(
    "{}@{}%",
    detection.label_name(),
    format_probability(detection.probability())
  )
}

// 保留两位小数，整数值仍带一位小数，如 87.0
fn format_probability(probability: f64) -> String {
  let rounded = (probability * 100.0).round() / 100.0;
  let text = rounded.to_string();
  if text.contains('.') || !rounded.is_finite() {
    text
  } else {
    format!("{}.0", text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, LabelSet};

  fn detection(label: &str, confidence: f64, bbox: [f64; 4]) -> Detection {
    let labels = LabelSet::new(vec![label.to_string()]).unwrap();
    let bbox = BoundingBox {
      x_min: bbox[0],
      y_min: bbox[1],
      x_max: bbox[2],
      y_max: bbox[3],
    };
    Detection::new(0, &labels, confidence, bbox).unwrap()
  }

  #[test]
  fn probability_renders_like_a_float() {
    assert_eq!(format_probability(87.0), "87.0");
    assert_eq!(format_probability(87.5), "87.5");
    assert_eq!(format_probability(87.456), "87.46");
    assert_eq!(format_probability(100.0), "100.0");
    assert_eq!(format_probability(62.5000001), "62.5");
  }

  #[test]
  fn caption_joins_label_and_percentage() {
    let d = detection("cup", 0.875, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(caption(&d), "cup@87.5%");
  }

  #[test]
  fn box_outline_is_green_and_one_pixel() {
    let mut image = RgbImage::new(64, 64);
    let result = DetectionResult::new(vec![detection("cup", 0.9, [10.7, 12.2, 40.9, 30.0])]);
    Annotator::new(None).annotate(&mut image, &result);

    let green = Rgb([0, 255, 0]);
    assert_eq!(*image.get_pixel(10, 12), green);
    assert_eq!(*image.get_pixel(40, 30), green);
    assert_eq!(*image.get_pixel(25, 12), green);
    assert_eq!(*image.get_pixel(10, 20), green);
    // 内部与外部不受影响
    assert_eq!(*image.get_pixel(11, 13), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(25, 20), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(41, 31), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_beyond_the_frame_are_clipped() {
    let mut image = RgbImage::new(32, 32);
    let result = DetectionResult::new(vec![
      detection("cup", 0.9, [-5.0, -5.0, 100.0, 100.0]),
      detection("cup", 0.9, [20.0, 20.0, 20.0, 20.0]),
      detection("cup", 0.9, [24.0, 24.0, 40.0, 40.0]),
    ]);
    Annotator::new(None).annotate(&mut image, &result);
    assert_eq!(*image.get_pixel(24, 24), Rgb([0, 255, 0]));
    assert_eq!(*image.get_pixel(31, 24), Rgb([0, 255, 0]));
    assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
  }

  #[test]
  fn huge_boxes_are_clamped_to_the_frame() {
    let mut image = RgbImage::new(32, 32);
    let result = DetectionResult::new(vec![
      detection("cup", 0.9, [-3e9, 0.0, 3e9, 10.0]),
      detection("cup", 0.9, [-1e12, -1e12, -5e11, -5e11]),
      detection("cup", 0.9, [4e9, 4e9, 5e9, 5e9]),
    ]);
    Annotator::new(None).annotate(&mut image, &result);
    // 左右边在画面外，上下边横跨整幅画面
    assert_eq!(*image.get_pixel(0, 0), Rgb([0, 255, 0]));
    assert_eq!(*image.get_pixel(31, 10), Rgb([0, 255, 0]));
    assert_eq!(*image.get_pixel(16, 5), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(16, 20), Rgb([0, 0, 0]));
  }

  #[test]
  fn missing_explicit_font_is_an_error() {
    let result = Annotator::from_font_path(Some(Path::new("/nonexistent/font.ttf")));
    assert!(matches!(result, Err(OutputError::FontError { .. })));
  }
}
