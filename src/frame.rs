// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/frame.rs - 帧与 NCHW 归一化张量定义
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

use std::path::Path;

use image::{ImageReader, RgbImage};
use serde::Deserialize;
use thiserror::Error;

mod letterbox;
pub use self::letterbox::{PadGeometry, letterbox};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum InvalidFrameError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像尺寸为零: {width}x{height}")]
  ZeroArea { width: u32, height: u32 },
}

/// 读取图像文件为 RGB 帧
pub fn read_frame(path: &Path) -> Result<RgbImage, InvalidFrameError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  Ok(image.to_rgb8())
}

/// 送入模型的通道顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  #[default]
  Rgb,
  /// 与 OpenCV 解码结果一致的 BGR 顺序
  Bgr,
}

/// 归一化后的 NCHW 张量，形状为 [1, 3, D, D]，取值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct NormalizedTensor {
  dimension: usize,
  data: Box<[f32]>,
}

impl NormalizedTensor {
  pub fn from_letterboxed(image: &RgbImage, order: ChannelOrder) -> Self {
    let (width, height) = image.dimensions();
    debug_assert_eq!(width, height, "letterbox 输出必须为正方形");

    let dimension = width as usize;
    let plane_size = dimension * dimension;
    let mut data = vec![0f32; RGB_CHANNELS * plane_size];

    let planes: [usize; RGB_CHANNELS] = match order {
      ChannelOrder::Rgb => [0, 1, 2],
      ChannelOrder::Bgr => [2, 1, 0],
    };

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * dimension + x as usize;
      for (c, &plane) in planes.iter().enumerate() {
        data[plane * plane_size + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      dimension,
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.dimension, self.dimension]
  }

  pub fn dimension(&self) -> usize {
    self.dimension
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}
