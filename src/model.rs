// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/model.rs - 检测结果定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod decode;
mod labels;
pub use self::decode::{
  DEFAULT_MAX_DETECTIONS, DetectionDecoder, MAX_NMS_CANDIDATES, RawDetectionTensor, TensorLayout, iou,
};
pub use self::labels::{LabelError, LabelSet};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("未知类别 {label_id}，标签集合只有 {label_count} 个类别")]
  UnknownLabel { label_id: i64, label_count: usize },
  #[error("检测张量格式错误: {0}")]
  MalformedTensor(String),
}

/// 输出记录中 bbox 的 width/height 字段含义
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BboxFormat {
  /// width/height 存放右下角坐标 (x_max, y_max)，与既有下游消费者一致
  #[default]
  Corners,
  /// width/height 存放真实宽高
  Extent,
}

/// 填充帧像素坐标下的检测框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x_min: f64,
  pub y_min: f64,
  pub x_max: f64,
  pub y_max: f64,
}

impl BoundingBox {
  pub fn width(&self) -> f64 {
    self.x_max - self.x_min
  }

  pub fn height(&self) -> f64 {
    self.y_max - self.y_min
  }

  pub fn to_array(&self) -> [f64; 4] {
    [self.x_min, self.y_min, self.x_max, self.y_max]
  }

  pub fn to_record(&self, format: BboxFormat) -> BboxRecord {
    let (width, height) = match format {
      BboxFormat::Corners => (self.x_max, self.y_max),
      BboxFormat::Extent => (self.width(), self.height()),
    };
    BboxRecord {
      left: self.x_min,
      top: self.y_min,
      width,
      height,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BboxRecord {
  pub left: f64,
  pub top: f64,
  pub width: f64,
  pub height: f64,
}

/// 一个确认的检测目标
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  label_id: usize,
  label_name: String,
  probability: f64,
  bbox: BoundingBox,
}

impl Detection {
  /// 构造时校验类别编号，越界即返回 [`DecodeError::UnknownLabel`]。
  /// `confidence` 取值 [0, 1]，保存为百分比。
  pub fn new(
    label_id: i64,
    labels: &LabelSet,
    confidence: f64,
    bbox: BoundingBox,
  ) -> Result<Self, DecodeError> {
    let label_name = usize::try_from(label_id)
      .ok()
      .and_then(|id| labels.get(id))
      .ok_or(DecodeError::UnknownLabel {
        label_id,
        label_count: labels.len(),
      })?;

    Ok(Self {
      label_id: label_id as usize,
      label_name: label_name.to_string(),
      probability: confidence * 100.0,
      bbox,
    })
  }

  pub fn label_id(&self) -> usize {
    self.label_id
  }

  pub fn label_name(&self) -> &str {
    &self.label_name
  }

  /// 百分比置信度 [0, 100]
  pub fn probability(&self) -> f64 {
    self.probability
  }

  pub fn bbox(&self) -> &BoundingBox {
    &self.bbox
  }

  pub fn to_record(&self, format: BboxFormat) -> DetectionRecord {
    DetectionRecord {
      probability: self.probability,
      label_id: self.label_id,
      label_name: self.label_name.clone(),
      bbox: self.bbox.to_record(format),
    }
  }
}

/// 检测目标的对外 JSON 形状
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
  pub probability: f64,
  pub label_id: usize,
  pub label_name: String,
  pub bbox: BboxRecord,
}

/// 单帧检测结果，顺序为 NMS 保留顺序
#[derive(Debug, Clone)]
pub struct DetectionResult {
  created: DateTime<Utc>,
  detections: Box<[Detection]>,
}

impl DetectionResult {
  pub fn new(detections: Vec<Detection>) -> Self {
    Self {
      created: Utc::now(),
      detections: detections.into_boxed_slice(),
    }
  }

  pub fn created(&self) -> DateTime<Utc> {
    self.created
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels() -> LabelSet {
    LabelSet::new(vec!["cup".into(), "plate".into(), "fork".into()]).unwrap()
  }

  fn sample_box() -> BoundingBox {
    BoundingBox {
      x_min: 10.0,
      y_min: 20.0,
      x_max: 110.0,
      y_max: 70.0,
    }
  }

  #[test]
  fn detection_rejects_out_of_range_label() {
    let err = Detection::new(5, &labels(), 0.9, sample_box()).unwrap_err();
    assert!(matches!(
      err,
      DecodeError::UnknownLabel {
        label_id: 5,
        label_count: 3
      }
    ));
    assert!(Detection::new(-1, &labels(), 0.9, sample_box()).is_err());
  }

  #[test]
  fn detection_stores_percentage() {
    let detection = Detection::new(1, &labels(), 0.875, sample_box()).unwrap();
    assert_eq!(detection.label_name(), "plate");
    assert_eq!(detection.probability(), 87.5);
  }

  #[test]
  fn corners_format_keeps_second_corner_in_width_height() {
    let record = sample_box().to_record(BboxFormat::Corners);
    assert_eq!((record.left, record.top, record.width, record.height), (10.0, 20.0, 110.0, 70.0));

    let record = sample_box().to_record(BboxFormat::Extent);
    assert_eq!((record.left, record.top, record.width, record.height), (10.0, 20.0, 100.0, 50.0));
  }

  #[test]
  fn record_uses_camel_case_keys() {
    let detection = Detection::new(2, &labels(), 0.5, sample_box()).unwrap();
    let value = serde_json::to_value(detection.to_record(BboxFormat::Corners)).unwrap();
    assert_eq!(value["labelId"], 2);
    assert_eq!(value["labelName"], "fork");
    assert_eq!(value["probability"], 50.0);
    assert_eq!(value["bbox"]["width"], 110.0);
  }
}
