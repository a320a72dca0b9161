// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use shanan_sink::config::{ConfigError, PipelineConfig};
use shanan_sink::frame::ChannelOrder;
use shanan_sink::model::{BboxFormat, TensorLayout};

/// Shanan Sink 参数配置，命令行参数覆盖配置文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件路径
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 用于推导 /home/{username}/demo 下的默认目录
  #[arg(long, value_name = "NAME")]
  pub username: Option<String>,

  #[arg(long, value_name = "ID")]
  pub camera_id: Option<String>,
  #[arg(long, value_name = "LOCATION")]
  pub camera_location: Option<String>,
  #[arg(long, value_name = "POSITION")]
  pub camera_position: Option<String>,

  /// 模型名称（也可以是模型目录路径，仅取最后一级）
  #[arg(long, value_name = "MODEL")]
  pub model_name: Option<String>,
  /// 标签文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub label_file: Option<PathBuf>,

  /// 模型输入边长
  #[arg(long, value_name = "PIXELS")]
  pub target_dimension: Option<u32>,
  /// 置信度阈值 (0.0 - 1.0]
  #[arg(long, value_name = "THRESHOLD")]
  pub probability_threshold: Option<f32>,
  /// NMS IOU 阈值 (0.0 - 1.0]
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,
  #[arg(long, value_enum)]
  pub tensor_layout: Option<TensorLayout>,
  #[arg(long, value_enum)]
  pub channel_order: Option<ChannelOrder>,
  #[arg(long, value_enum)]
  pub bbox_format: Option<BboxFormat>,

  /// 待处理图像目录
  #[arg(long, value_name = "DIR")]
  pub source_dir: Option<PathBuf>,
  /// 标注图像输出目录
  #[arg(long, value_name = "DIR")]
  pub output_dir: Option<PathBuf>,

  /// 推理后端地址，如 http://localhost:8000
  #[arg(long, value_name = "URL")]
  pub backend: Option<Url>,
  /// 推理请求超时（毫秒）
  #[arg(long, value_name = "MILLIS")]
  pub timeout_ms: Option<u64>,

  /// 推理线程数，大于 1 时使用分阶段流水线
  #[arg(long, value_name = "COUNT")]
  pub workers: Option<usize>,

  /// 处理成功后保留源文件
  #[arg(long)]
  pub keep_processed: bool,
  /// 处理失败后保留源文件
  #[arg(long)]
  pub keep_failed: bool,

  /// 推理记录额外写入的 JSON Lines 文件
  #[arg(long, value_name = "FILE")]
  pub record_log: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match self.config.as_deref() {
      Some(path) => PipelineConfig::from_toml_file(path)?,
      None => PipelineConfig::default(),
    };
    self.apply(&mut config);
    config.resolve()
  }

  fn apply(&self, config: &mut PipelineConfig) {
    fn set<T: Clone>(target: &mut T, value: &Option<T>) {
      if let Some(value) = value {
        *target = value.clone();
      }
    }

    if self.username.is_some() {
      config.username = self.username.clone();
    }
    set(&mut config.camera.id, &self.camera_id);
    set(&mut config.camera.location, &self.camera_location);
    set(&mut config.camera.position, &self.camera_position);
    set(&mut config.model_name, &self.model_name);
    set(&mut config.label_file, &self.label_file);
    set(&mut config.target_dimension, &self.target_dimension);
    set(&mut config.probability_threshold, &self.probability_threshold);
    set(&mut config.iou_threshold, &self.iou_threshold);
    set(&mut config.tensor_layout, &self.tensor_layout);
    set(&mut config.channel_order, &self.channel_order);
    set(&mut config.bbox_format, &self.bbox_format);
    set(&mut config.source_dir, &self.source_dir);
    set(&mut config.output_dir, &self.output_dir);
    set(&mut config.backend.url, &self.backend);
    set(&mut config.inference_workers, &self.workers);
    if self.timeout_ms.is_some() {
      config.backend.timeout_ms = self.timeout_ms;
    }
    if self.record_log.is_some() {
      config.record_log = self.record_log.clone();
    }
    if self.font.is_some() {
      config.font_path = self.font.clone();
    }
    if self.keep_processed {
      config.cleanup.remove_processed = false;
    }
    if self.keep_failed {
      config.cleanup.remove_failed = false;
    }
  }
}
