// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::frame::ChannelOrder;
use crate::gateway::RetryPolicy;
use crate::model::{BboxFormat, DEFAULT_MAX_DETECTIONS, TensorLayout};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
  #[error("未配置 {0}，且未指定 username 用于推导默认目录")]
  MissingPath(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
  pub id: String,
  pub location: String,
  pub position: String,
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      id: "image_file".to_string(),
      location: "table_top".to_string(),
      position: "side".to_string(),
    }
  }
}

impl CameraConfig {
  pub fn name(&self) -> String {
    format!("{}-{}", self.location, self.position)
  }
}

/// 源文件清理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
  /// 处理成功（含无检测结果）后删除源文件
  pub remove_processed: bool,
  /// 可恢复失败（图像损坏、后端重试耗尽）后删除源文件
  pub remove_failed: bool,
}

impl Default for CleanupPolicy {
  fn default() -> Self {
    Self {
      remove_processed: true,
      remove_failed: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub url: Url,
  pub input_name: String,
  pub output_name: String,
  /// 单次请求超时，未设置则不超时
  pub timeout_ms: Option<u64>,
  pub retry: RetryPolicy,
  /// 统计检查连续失败多少次后致命退出，0 表示不检查
  pub stats_failure_threshold: u32,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: Url::parse("http://localhost:8000").expect("默认后端地址合法"),
      input_name: "input".to_string(),
      output_name: "output".to_string(),
      timeout_ms: None,
      retry: RetryPolicy::default(),
      stats_failure_threshold: 3,
    }
  }
}

impl BackendConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }
}

/// 进程生命周期内只读的流水线配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// 用于推导 `/home/{username}/demo/...` 默认目录
  pub username: Option<String>,
  pub camera: CameraConfig,
  pub model_name: String,
  pub label_file: PathBuf,
  pub target_dimension: u32,
  pub probability_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  pub tensor_layout: TensorLayout,
  pub channel_order: ChannelOrder,
  pub bbox_format: BboxFormat,
  pub source_dir: PathBuf,
  pub output_dir: PathBuf,
  pub poll_interval_ms: u64,
  pub cleanup: CleanupPolicy,
  pub backend: BackendConfig,
  /// 大于 1 时使用分阶段并发流水线
  pub inference_workers: usize,
  pub queue_capacity: usize,
  pub font_path: Option<PathBuf>,
  /// 推理记录额外追加写入的 JSON Lines 文件
  pub record_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      username: None,
      camera: CameraConfig::default(),
      model_name: "gtc_onnx".to_string(),
      label_file: PathBuf::new(),
      target_dimension: 640,
      probability_threshold: 0.6,
      iou_threshold: 0.4,
      max_detections: DEFAULT_MAX_DETECTIONS,
      tensor_layout: TensorLayout::default(),
      channel_order: ChannelOrder::default(),
      bbox_format: BboxFormat::default(),
      source_dir: PathBuf::new(),
      output_dir: PathBuf::new(),
      poll_interval_ms: 2_000,
      cleanup: CleanupPolicy::default(),
      backend: BackendConfig::default(),
      inference_workers: 1,
      queue_capacity: 4,
      font_path: None,
      record_log: None,
    }
  }
}

impl PipelineConfig {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(content)?)
  }

  pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// 补全由 username 推导的目录并校验取值范围
  pub fn resolve(mut self) -> Result<Self, ConfigError> {
    // 允许以模型文件路径指定模型名
    if let Some(name) = Path::new(&self.model_name).file_name() {
      self.model_name = name.to_string_lossy().into_owned();
    }

    if let Some(user) = self.username.as_deref() {
      let demo = PathBuf::from("/home").join(user).join("demo");
      if self.source_dir.as_os_str().is_empty() {
        self.source_dir = demo.join("image_sink");
      }
      if self.output_dir.as_os_str().is_empty() {
        self.output_dir = demo.join("images_annotated");
      }
      if self.label_file.as_os_str().is_empty() {
        self.label_file = demo.join("model-repo").join(&self.model_name).join("labels.txt");
      }
    }

    if self.source_dir.as_os_str().is_empty() {
      return Err(ConfigError::MissingPath("source_dir"));
    }
    if self.output_dir.as_os_str().is_empty() {
      return Err(ConfigError::MissingPath("output_dir"));
    }
    if self.label_file.as_os_str().is_empty() {
      return Err(ConfigError::MissingPath("label_file"));
    }

    self.validate()?;
    debug!("流水线配置: {:?}", self);
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.model_name.is_empty() {
      return Err(ConfigError::Invalid("model_name 不能为空".to_string()));
    }
    if self.target_dimension == 0 {
      return Err(ConfigError::Invalid("target_dimension 必须大于 0".to_string()));
    }
    for (name, value) in [
      ("probability_threshold", self.probability_threshold),
      ("iou_threshold", self.iou_threshold),
    ] {
      if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::Invalid(format!(
          "{} 必须位于 (0, 1], 实际为 {}",
          name, value
        )));
      }
    }
    if self.max_detections == 0 {
      return Err(ConfigError::Invalid("max_detections 必须大于 0".to_string()));
    }
    if self.inference_workers == 0 || self.queue_capacity == 0 {
      return Err(ConfigError::Invalid(
        "inference_workers 与 queue_capacity 必须大于 0".to_string(),
      ));
    }
    Ok(())
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }
}
