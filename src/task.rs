// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/task.rs - 任务循环
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

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{thread, time::Duration};

use tracing::{error, info, warn};

use crate::gateway::InferenceGateway;
use crate::input::FrameSource;
use crate::output::RecordSink;

mod pipeline;
mod processor;

pub use self::pipeline::PipelineTask;
pub use self::processor::{
  DecodedFrame, FrameError, FrameOutcome, FrameProcessor, FrameReport, FrameState, InferredFrame,
  LoadedFrame, PreprocessedFrame, StageFailure,
};

const FORCE_EXIT_GRACE: Duration = Duration::from_secs(30);
const SHUTDOWN_POLL_SLICE: Duration = Duration::from_millis(100);

pub trait Task<I, G, S>: Sized {
  type Error;
  fn run_task(self, input: I, processor: FrameProcessor<G, S>) -> Result<TaskSummary, Self::Error>;
}

/// 跨线程共享的退出信号
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn request(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_requested(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }

  /// 等待至多 `timeout`，期间收到退出信号则提前返回 true
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
      if self.is_requested() {
        return true;
      }
      let now = std::time::Instant::now();
      if now >= deadline {
        return false;
      }
      thread::sleep(SHUTDOWN_POLL_SLICE.min(deadline - now));
    }
  }

  /// Ctrl-C 触发退出信号，30 秒后仍未退出则强制结束进程
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let signal = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      signal.request();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_GRACE);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

/// 任务结束时的计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub processed: usize,
  pub annotated: usize,
  pub skipped: usize,
  pub failed: usize,
  pub removed: usize,
}

impl TaskSummary {
  fn record(&mut self, report: &FrameReport) {
    self.processed += 1;
    match report.outcome {
      FrameOutcome::Annotated { .. } => self.annotated += 1,
      FrameOutcome::Skipped => self.skipped += 1,
      FrameOutcome::Failed { .. } => self.failed += 1,
    }
    if report.removed {
      self.removed += 1;
    }
  }
}

/// 正在处理以及处理完成但仍留在目录中的文件
#[derive(Debug, Default)]
struct FileLedger {
  in_flight: HashSet<PathBuf>,
  retained: HashSet<PathBuf>,
}

impl FileLedger {
  /// 同一路径同时至多一个任务，已处理且未删除的文件不再处理
  fn admit(&mut self, path: &Path) -> bool {
    if self.in_flight.contains(path) || self.retained.contains(path) {
      return false;
    }
    self.in_flight.insert(path.to_path_buf());
    true
  }

  fn settle(&mut self, report: &FrameReport) {
    self.in_flight.remove(&report.source);
    if !report.removed {
      self.retained.insert(report.source.clone());
    }
  }

  /// 已从目录消失的文件可以再次出现
  fn prune(&mut self, visible: &[PathBuf]) {
    if self.retained.is_empty() {
      return;
    }
    let visible: HashSet<&PathBuf> = visible.iter().collect();
    self.retained.retain(|p| visible.contains(p));
  }

  fn in_flight(&self) -> usize {
    self.in_flight.len()
  }
}

#[derive(Debug, Default)]
struct Progress {
  ledger: FileLedger,
  summary: TaskSummary,
  fatal: Option<FrameError>,
}

impl Progress {
  fn settle(&mut self, report: FrameReport) {
    self.summary.record(&report);
    self.ledger.settle(&report);
    if let FrameOutcome::Failed { error, .. } = report.outcome
      && error.is_fatal()
    {
      error!("{}: 致命错误: {}", report.source.display(), error);
      if self.fatal.is_none() {
        self.fatal = Some(error);
      }
    }
  }

  fn finish(self) -> anyhow::Result<TaskSummary> {
    match self.fatal {
      Some(error) => Err(error.into()),
      None => {
        info!("任务完成: {:?}", self.summary);
        Ok(self.summary)
      }
    }
  }
}

fn poll_or_warn<I: FrameSource>(input: &mut I) -> Vec<PathBuf> {
  input.poll().unwrap_or_else(|e| {
    warn!("扫描输入失败: {}", e);
    Vec::new()
  })
}

/// 只处理一个文件
pub struct OneShotTask;

impl<I: FrameSource, G: InferenceGateway, S: RecordSink> Task<I, G, S> for OneShotTask {
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, processor: FrameProcessor<G, S>) -> anyhow::Result<TaskSummary> {
    info!("开始任务...");
    let source = input
      .poll()?
      .into_iter()
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;

    let mut progress = Progress::default();
    progress.settle(processor.process(&source));
    progress.finish()
  }
}

/// 单线程顺序轮询，扫描不到新文件时休眠 `poll_interval`
#[derive(Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  poll_interval: Duration,
  shutdown: ShutdownSignal,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      poll_interval: Duration::from_secs(2),
      shutdown: ShutdownSignal::new(),
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
    self.shutdown = shutdown;
    self
  }
}

impl<I: FrameSource, G: InferenceGateway, S: RecordSink> Task<I, G, S> for ContinuousTask {
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, processor: FrameProcessor<G, S>) -> anyhow::Result<TaskSummary> {
    info!("开始任务...");
    let mut progress = Progress::default();

    'scan: while !self.shutdown.is_requested() {
      let files = poll_or_warn(&mut input);
      progress.ledger.prune(&files);

      let mut handled = 0;
      for file in files {
        if self.shutdown.is_requested() {
          warn!("中断信号接收，退出任务循环");
          break 'scan;
        }
        if !progress.ledger.admit(&file) {
          continue;
        }

        info!("处理第 {} 帧图像: {}", progress.summary.processed + 1, file.display());
        progress.settle(processor.process(&file));
        handled += 1;

        if progress.fatal.is_some() {
          break 'scan;
        }
        if self
          .frame_number
          .map(|n| progress.summary.processed >= n)
          .unwrap_or(false)
        {
          info!("达到指定帧数 {}, 退出任务循环", progress.summary.processed);
          break 'scan;
        }
      }

      if handled == 0 {
        self.shutdown.wait_timeout(self.poll_interval);
      }
    }

    progress.finish()
  }
}
