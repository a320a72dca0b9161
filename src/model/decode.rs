// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/model/decode.rs - 检测张量后处理（置信度过滤、NMS、结果构造）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::Deserialize;
use tracing::debug;

use super::{BoundingBox, DecodeError, Detection, DetectionResult, LabelSet};

/// 进入 NMS 的候选框上限（按置信度从高到低截取）
pub const MAX_NMS_CANDIDATES: usize = 30_000;
/// 每帧保留的检测数上限默认值
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

const MIN_ROW_WIDTH: usize = 6;
const DECIMAL_SCALE: f64 = 1e8;

/// 检测张量每行的排布方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  /// [cx, cy, w, h, objectness, class_0, class_1, ...]
  #[default]
  Yolo,
  /// [x_min, y_min, x_max, y_max, confidence, class_id, ...]
  Fused,
}

/// 推理后端返回的原始检测张量，形状为 [N, K] 或 [B, N, K]，行优先
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionTensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl RawDetectionTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, DecodeError> {
    let expected: usize = shape.iter().product();
    if !(2..=3).contains(&shape.len()) {
      return Err(DecodeError::MalformedTensor(format!(
        "期望二维或三维张量, 实际形状 {:?}",
        shape
      )));
    }
    if expected != data.len() {
      return Err(DecodeError::MalformedTensor(format!(
        "形状 {:?} 需要 {} 个元素, 实际 {} 个",
        shape,
        expected,
        data.len()
      )));
    }
    if shape.len() == 3 && shape[0] == 0 {
      return Err(DecodeError::MalformedTensor(format!(
        "批大小为 0, 形状 {:?}",
        shape
      )));
    }
    let row_width = shape[shape.len() - 1];
    if row_width < MIN_ROW_WIDTH {
      return Err(DecodeError::MalformedTensor(format!(
        "每行至少 {} 个元素, 实际 {}",
        MIN_ROW_WIDTH, row_width
      )));
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn row_width(&self) -> usize {
    self.shape[self.shape.len() - 1]
  }

  /// 第一张图像的候选行
  pub fn first_image_rows(&self) -> std::slice::ChunksExact<'_, f32> {
    let rows = if self.shape.len() == 3 {
      if self.shape[0] > 1 {
        debug!("批大小为 {}, 仅解码第一张图像", self.shape[0]);
      }
      self.shape[1]
    } else {
      self.shape[0]
    };
    let width = self.row_width();
    let end = (rows * width).min(self.data.len());
    self.data[..end].chunks_exact(width)
  }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
  bbox: [f32; 4],
  confidence: f32,
  class_id: i64,
}

/// 检测解码器：置信度过滤 + 按类别 NMS + 结果构造
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  probability_threshold: f32,
  iou_threshold: f32,
  max_detections: usize,
  layout: TensorLayout,
}

impl DetectionDecoder {
  pub fn new(probability_threshold: f32, iou_threshold: f32, layout: TensorLayout) -> Self {
    Self {
      probability_threshold,
      iou_threshold,
      max_detections: DEFAULT_MAX_DETECTIONS,
      layout,
    }
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn decode(
    &self,
    raw: &RawDetectionTensor,
    labels: &LabelSet,
  ) -> Result<DetectionResult, DecodeError> {
    let candidates = self.filter_candidates(raw);
    let total = candidates.len();
    let kept = non_max_suppression(candidates, self.iou_threshold, self.max_detections);
    debug!("候选框 {} 个, NMS 后保留 {} 个", total, kept.len());

    let detections = kept
      .into_iter()
      .map(|c| {
        let bbox = BoundingBox {
          x_min: round_decimal(c.bbox[0]),
          y_min: round_decimal(c.bbox[1]),
          x_max: round_decimal(c.bbox[2]),
          y_max: round_decimal(c.bbox[3]),
        };
        Detection::new(c.class_id, labels, round_decimal(c.confidence), bbox)
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(DetectionResult::new(detections))
  }

  fn filter_candidates(&self, raw: &RawDetectionTensor) -> Vec<Candidate> {
    let threshold = self.probability_threshold;
    raw
      .first_image_rows()
      .filter_map(|row| match self.layout {
        TensorLayout::Yolo => {
          let objectness = row[4];
          if !(objectness >= threshold) {
            return None;
          }
          let (class_idx, class_score) = row[5..]
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });
          let confidence = objectness * class_score;
          if !(confidence >= threshold) {
            return None;
          }
          let (cx, cy, w, h) = (row[0], row[1], row[2] / 2.0, row[3] / 2.0);
          Some(Candidate {
            bbox: [cx - w, cy - h, cx + w, cy + h],
            confidence,
            class_id: class_idx as i64,
          })
        }
        TensorLayout::Fused => {
          let confidence = row[4];
          if !(confidence >= threshold) {
            return None;
          }
          // 非法类别编号保留为 -1，若最终被保留则在构造时报错
          let class_id = if row[5].is_finite() { row[5] as i64 } else { -1 };
          Some(Candidate {
            bbox: [row[0], row[1], row[2], row[3]],
            confidence,
            class_id,
          })
        }
      })
      .collect()
  }
}

/// 置信度从高到低（稳定排序）逐个保留；与已保留的同类框 IoU 严格大于阈值者被抑制
fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
  candidates.truncate(MAX_NMS_CANDIDATES);

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept.iter().any(|k| {
      k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 两个 [x_min, y_min, x_max, y_max] 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);

  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let intersection = inter_w * inter_h;
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

fn round_decimal(value: f32) -> f64 {
  (value as f64 * DECIMAL_SCALE).round() / DECIMAL_SCALE
}
