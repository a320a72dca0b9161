// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/gateway.rs - 远程推理网关
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

use thiserror::Error;

use crate::frame::NormalizedTensor;
use crate::model::RawDetectionTensor;

mod retry;
pub use self::retry::{RetryPolicy, RetryingGateway, StatsBreaker, StatsMismatchError};

#[cfg(feature = "triton_http")]
mod triton_http;
#[cfg(feature = "triton_http")]
pub use self::triton_http::{TritonHttpGateway, TritonHttpGatewayBuilder};

#[derive(Error, Debug)]
pub enum GatewayError {
  #[error("推理后端不可用: {0}")]
  BackendUnavailable(String),
  #[error("推理后端协议错误: {0}")]
  BackendProtocol(String),
  #[error("推理后端地址无效: {0}")]
  InvalidEndpoint(String),
}

impl GatewayError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, GatewayError::BackendUnavailable(_))
  }
}

/// 后端返回的推理统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceStats {
  /// `model_stats` 中的模型条目数
  pub model_entries: usize,
  pub raw: serde_json::Value,
}

pub trait InferenceGateway {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError>;

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError>;
}

impl<G: InferenceGateway + ?Sized> InferenceGateway for Box<G> {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    (**self).infer(model_name, tensor)
  }

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError> {
    (**self).get_stats(model_name)
  }
}

impl<G: InferenceGateway + ?Sized> InferenceGateway for std::sync::Arc<G> {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    (**self).infer(model_name, tensor)
  }

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError> {
    (**self).get_stats(model_name)
  }
}
