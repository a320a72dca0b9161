// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/task/processor.rs - 单帧处理状态机
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::frame::{InvalidFrameError, NormalizedTensor, PadGeometry, letterbox, read_frame};
use crate::gateway::{GatewayError, InferenceGateway, StatsBreaker, StatsMismatchError};
use crate::model::{DecodeError, DetectionDecoder, DetectionResult, LabelSet, RawDetectionTensor};
use crate::output::{AnnotatedImageWriter, Annotator, InferenceRecord, OutputError, RecordSink};

#[derive(Error, Debug)]
pub enum FrameError {
  #[error(transparent)]
  InvalidFrame(#[from] InvalidFrameError),
  #[error(transparent)]
  Gateway(#[from] GatewayError),
  #[error(transparent)]
  Decode(#[from] DecodeError),
  #[error(transparent)]
  StatsMismatch(#[from] StatsMismatchError),
  #[error("标注结果输出失败: {0}")]
  Output(#[from] OutputError),
}

impl FrameError {
  /// 致命错误终止进程且保留源文件，其余错误只影响当前帧
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      FrameError::Decode(DecodeError::UnknownLabel { .. })
        | FrameError::StatsMismatch(_)
        | FrameError::Output(_)
    )
  }
}

/// 单帧在流水线中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
  Idle,
  Loaded,
  Preprocessed,
  Inferred,
  Decoded,
  Annotated,
  Skipped,
  Cleaned,
  Failed,
}

pub struct LoadedFrame {
  pub source: PathBuf,
  pub image: RgbImage,
}

pub struct PreprocessedFrame {
  pub source: PathBuf,
  pub letterboxed: RgbImage,
  pub geometry: PadGeometry,
  pub tensor: NormalizedTensor,
}

pub struct InferredFrame {
  pub source: PathBuf,
  pub letterboxed: RgbImage,
  pub geometry: PadGeometry,
  pub raw: RawDetectionTensor,
  pub latency: Duration,
}

pub struct DecodedFrame {
  pub source: PathBuf,
  pub letterboxed: RgbImage,
  pub geometry: PadGeometry,
  pub result: DetectionResult,
  pub latency: Duration,
}

#[derive(Debug)]
pub enum FrameOutcome {
  Annotated {
    image_path: PathBuf,
    record: InferenceRecord,
  },
  Skipped,
  Failed {
    /// 失败发生前所处的状态
    at: FrameState,
    error: FrameError,
  },
}

impl FrameOutcome {
  pub fn is_fatal(&self) -> bool {
    matches!(self, FrameOutcome::Failed { error, .. } if error.is_fatal())
  }
}

/// 从某一状态出发的转换失败
#[derive(Debug)]
pub struct StageFailure {
  pub source: PathBuf,
  pub at: FrameState,
  pub error: FrameError,
}

impl StageFailure {
  fn new(source: &Path, at: FrameState, error: impl Into<FrameError>) -> Self {
    Self {
      source: source.to_path_buf(),
      at,
      error: error.into(),
    }
  }

  pub fn into_parts(self) -> (PathBuf, FrameOutcome) {
    (
      self.source,
      FrameOutcome::Failed {
        at: self.at,
        error: self.error,
      },
    )
  }
}

/// 一帧处理结束后的报告
#[derive(Debug)]
pub struct FrameReport {
  pub source: PathBuf,
  pub outcome: FrameOutcome,
  /// 源文件是否已被删除
  pub removed: bool,
}

/// 单帧处理器，配置与标签集合在构造后只读，可在线程间共享
pub struct FrameProcessor<G, S> {
  config: Arc<PipelineConfig>,
  labels: Arc<LabelSet>,
  gateway: G,
  sink: S,
  decoder: DetectionDecoder,
  breaker: StatsBreaker,
  annotator: Annotator,
  writer: AnnotatedImageWriter,
}

impl<G: InferenceGateway, S: RecordSink> FrameProcessor<G, S> {
  pub fn new(config: Arc<PipelineConfig>, labels: Arc<LabelSet>, gateway: G, sink: S) -> Self {
    let decoder = DetectionDecoder::new(
      config.probability_threshold,
      config.iou_threshold,
      config.tensor_layout,
    )
    .with_max_detections(config.max_detections);
    let breaker = StatsBreaker::new(config.backend.stats_failure_threshold);
    let writer = AnnotatedImageWriter::new(config.output_dir.clone(), &config.camera);

    Self {
      config,
      labels,
      gateway,
      sink,
      decoder,
      breaker,
      annotator: Annotator::default(),
      writer,
    }
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  /// Idle -> Loaded
  pub fn load(&self, source: &Path) -> Result<LoadedFrame, FrameError> {
    let image = read_frame(source)?;
    Ok(LoadedFrame {
      source: source.to_path_buf(),
      image,
    })
  }

  /// Loaded -> Preprocessed
  pub fn preprocess(&self, frame: LoadedFrame) -> Result<PreprocessedFrame, FrameError> {
    let (letterboxed, geometry) = letterbox(&frame.image, self.config.target_dimension)?;
    let tensor = NormalizedTensor::from_letterboxed(&letterboxed, self.config.channel_order);
    Ok(PreprocessedFrame {
      source: frame.source,
      letterboxed,
      geometry,
      tensor,
    })
  }

  /// Preprocessed -> Inferred，推理后经熔断器检查后端统计
  pub fn infer(&self, frame: PreprocessedFrame) -> Result<InferredFrame, FrameError> {
    let model_name = &self.config.model_name;
    let now = Instant::now();
    let raw = self.gateway.infer(model_name, &frame.tensor)?;
    let latency = now.elapsed();
    debug!("推理完成，耗时: {:.2?}", latency);

    self.breaker.check(&self.gateway, model_name)?;

    Ok(InferredFrame {
      source: frame.source,
      letterboxed: frame.letterboxed,
      geometry: frame.geometry,
      raw,
      latency,
    })
  }

  /// Inferred -> Decoded
  pub fn decode(&self, frame: InferredFrame) -> Result<DecodedFrame, FrameError> {
    let result = self.decoder.decode(&frame.raw, &self.labels)?;
    Ok(DecodedFrame {
      source: frame.source,
      letterboxed: frame.letterboxed,
      geometry: frame.geometry,
      result,
      latency: frame.latency,
    })
  }

  /// Decoded -> Annotated | Skipped
  pub fn render(&self, frame: DecodedFrame) -> Result<FrameOutcome, FrameError> {
    if frame.result.is_empty() {
      return Ok(FrameOutcome::Skipped);
    }

    let mut image = frame.letterboxed;
    self.annotator.annotate(&mut image, &frame.result);

    let now = Local::now();
    let image_path = self.writer.write(&image, &now)?;
    let record = InferenceRecord::new(&self.config, &frame.result, frame.latency, &image_path, now);
    self.sink.emit(&record)?;

    Ok(FrameOutcome::Annotated { image_path, record })
  }

  /// 加载并预处理，对应流水线的第一阶段
  pub fn prepare(&self, source: &Path) -> Result<PreprocessedFrame, StageFailure> {
    let loaded = self
      .load(source)
      .map_err(|e| StageFailure::new(source, FrameState::Idle, e))?;
    self
      .preprocess(loaded)
      .map_err(|e| StageFailure::new(source, FrameState::Loaded, e))
  }

  pub fn run_inference(&self, frame: PreprocessedFrame) -> Result<InferredFrame, StageFailure> {
    let source = frame.source.clone();
    self
      .infer(frame)
      .map_err(|e| StageFailure::new(&source, FrameState::Preprocessed, e))
  }

  /// 解码并输出标注结果
  pub fn complete(&self, frame: InferredFrame) -> Result<(PathBuf, FrameOutcome), StageFailure> {
    let source = frame.source.clone();
    let decoded = self
      .decode(frame)
      .map_err(|e| StageFailure::new(&source, FrameState::Inferred, e))?;
    let outcome = self
      .render(decoded)
      .map_err(|e| StageFailure::new(&source, FrameState::Decoded, e))?;
    Ok((source, outcome))
  }

  /// 按清理策略删除源文件，致命错误时保留
  pub fn cleanup(&self, source: &Path, outcome: &FrameOutcome) -> bool {
    let policy = self.config.cleanup;
    let remove = match outcome {
      FrameOutcome::Annotated { .. } | FrameOutcome::Skipped => policy.remove_processed,
      FrameOutcome::Failed { error, .. } => !error.is_fatal() && policy.remove_failed,
    };
    if !remove {
      return false;
    }

    match std::fs::remove_file(source) {
      Ok(()) => {
        debug!("{}: {:?}", source.display(), FrameState::Cleaned);
        true
      }
      Err(e) => {
        warn!("无法删除源文件 {}: {}", source.display(), e);
        false
      }
    }
  }

  pub fn finish(&self, source: PathBuf, outcome: FrameOutcome) -> FrameReport {
    match &outcome {
      FrameOutcome::Annotated { image_path, record } => info!(
        "{}: 检测到 {} 个目标, 已保存 {}",
        source.display(),
        record.detected_objects.len(),
        image_path.display()
      ),
      FrameOutcome::Skipped => debug!("{}: 未检测到目标", source.display()),
      FrameOutcome::Failed { at, error } => {
        warn!("{}: 在 {:?} 状态处理失败: {}", source.display(), at, error)
      }
    }

    let removed = self.cleanup(&source, &outcome);
    FrameReport {
      source,
      outcome,
      removed,
    }
  }

  /// 顺序执行单帧的全部状态转换
  pub fn process(&self, source: &Path) -> FrameReport {
    let (source, outcome) = self
      .prepare(source)
      .and_then(|frame| self.run_inference(frame))
      .and_then(|frame| self.complete(frame))
      .unwrap_or_else(StageFailure::into_parts);
    self.finish(source, outcome)
  }
}
