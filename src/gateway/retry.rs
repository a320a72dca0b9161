// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/gateway/retry.rs - 推理调用重试与统计检查熔断
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

use std::sync::atomic::{AtomicU32, Ordering};
use std::{thread, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{GatewayError, InferenceGateway, InferenceStats};
use crate::frame::NormalizedTensor;
use crate::model::RawDetectionTensor;

/// 指数退避重试策略，仅对 [`GatewayError::BackendUnavailable`] 生效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// 总尝试次数（含首次）
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 500,
      max_backoff_ms: 8_000,
    }
  }
}

impl RetryPolicy {
  /// 第 `attempt` 次失败后的等待时间（从 1 开始计）
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    let millis = self
      .initial_backoff_ms
      .saturating_mul(factor)
      .min(self.max_backoff_ms);
    Duration::from_millis(millis)
  }

  pub fn run<T>(
    &self,
    what: &str,
    mut op: impl FnMut() -> Result<T, GatewayError>,
  ) -> Result<T, GatewayError> {
    let attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match op() {
        Ok(value) => return Ok(value),
        Err(e) if e.is_retryable() && attempt < attempts => {
          let wait = self.backoff(attempt);
          warn!(
            "{} 失败 (第 {}/{} 次): {}, {:.2?} 后重试",
            what, attempt, attempts, e, wait
          );
          thread::sleep(wait);
          attempt += 1;
        }
        Err(e) => {
          error!("{} 失败 (第 {}/{} 次): {}", what, attempt, attempts, e);
          return Err(e);
        }
      }
    }
  }
}

/// 带重试的推理网关包装
pub struct RetryingGateway<G> {
  inner: G,
  policy: RetryPolicy,
}

impl<G> RetryingGateway<G> {
  pub fn new(inner: G, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }

  pub fn inner(&self) -> &G {
    &self.inner
  }
}

impl<G: InferenceGateway> InferenceGateway for RetryingGateway<G> {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    self
      .policy
      .run("推理请求", || self.inner.infer(model_name, tensor))
  }

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError> {
    self
      .policy
      .run("统计信息请求", || self.inner.get_stats(model_name))
  }
}

#[derive(Error, Debug)]
#[error("推理统计检查连续失败 {failures} 次: {reason}")]
pub struct StatsMismatchError {
  pub failures: u32,
  pub reason: String,
}

/// 统计检查熔断器。
///
/// 每次推理后查询一次后端统计，获取失败或模型条目数不为 1 记为一次失败，
/// 成功则清零；连续失败达到 `threshold` 次时返回 [`StatsMismatchError`]。
/// `threshold` 为 1 时第一次不匹配即致命，为 0 时不做检查。
#[derive(Debug)]
pub struct StatsBreaker {
  threshold: u32,
  failures: AtomicU32,
}

impl StatsBreaker {
  pub fn new(threshold: u32) -> Self {
    Self {
      threshold,
      failures: AtomicU32::new(0),
    }
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.failures.load(Ordering::Acquire)
  }

  pub fn check<G: InferenceGateway + ?Sized>(
    &self,
    gateway: &G,
    model_name: &str,
  ) -> Result<(), StatsMismatchError> {
    if self.threshold == 0 {
      return Ok(());
    }

    let reason = match gateway.get_stats(model_name) {
      Ok(stats) if stats.model_entries == 1 => {
        debug!("推理统计: {}", stats.raw);
        self.failures.store(0, Ordering::Release);
        return Ok(());
      }
      Ok(stats) => format!("期望 1 个模型统计条目, 实际 {} 个", stats.model_entries),
      Err(e) => e.to_string(),
    };

    let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
    if failures >= self.threshold {
      error!("推理统计检查失败, 熔断: {}", reason);
      return Err(StatsMismatchError { failures, reason });
    }
    warn!(
      "推理统计检查失败 ({}/{}): {}",
      failures, self.threshold, reason
    );
    Ok(())
  }
}
