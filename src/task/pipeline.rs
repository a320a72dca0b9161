// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/task/pipeline.rs - 分阶段并发流水线
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

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{RecvTimeoutError, bounded, unbounded};
use tracing::{debug, info, warn};

use super::{
  FrameProcessor, Progress, ShutdownSignal, StageFailure, Task, TaskSummary, poll_or_warn,
};
use crate::gateway::InferenceGateway;
use crate::input::FrameSource;
use crate::output::RecordSink;

/// 加载预处理 -> 推理线程池 -> 解码标注清理，各阶段以有界队列相连。
///
/// 扫描线程维护在途集合，同一路径同时至多一个任务；
/// 源文件只在最后一个阶段结果确定后删除。
#[derive(Debug)]
pub struct PipelineTask {
  workers: usize,
  capacity: usize,
  frame_number: Option<usize>,
  poll_interval: Duration,
  shutdown: ShutdownSignal,
}

impl PipelineTask {
  pub fn new(workers: usize, capacity: usize) -> Self {
    Self {
      workers: workers.max(1),
      capacity: capacity.max(1),
      frame_number: None,
      poll_interval: Duration::from_secs(2),
      shutdown: ShutdownSignal::new(),
    }
  }

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

  fn limit_reached(&self, admitted: usize) -> bool {
    self.frame_number.map(|n| admitted >= n).unwrap_or(false)
  }
}

impl<I, G, S> Task<I, G, S> for PipelineTask
where
  I: FrameSource,
  G: InferenceGateway + Sync,
  S: RecordSink + Sync,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, processor: FrameProcessor<G, S>) -> anyhow::Result<TaskSummary> {
    info!("开始流水线任务, 推理线程 {} 个, 队列容量 {}", self.workers, self.capacity);

    let processor = &processor;
    // 出现致命错误后各阶段不再处理新任务
    let halt = ShutdownSignal::new();
    let mut progress = Progress::default();

    thread::scope(|scope| {
      let (scan_tx, scan_rx) = bounded::<PathBuf>(self.capacity);
      let (prepared_tx, prepared_rx) = bounded(self.capacity);
      let (inferred_tx, inferred_rx) = bounded(self.capacity);
      let (done_tx, done_rx) = unbounded();

      let loader_halt = halt.clone();
      scope.spawn(move || {
        for source in scan_rx {
          if loader_halt.is_requested() {
            break;
          }
          if prepared_tx.send(processor.prepare(&source)).is_err() {
            break;
          }
        }
      });

      for worker in 0..self.workers {
        let (rx, tx, halt) = (prepared_rx.clone(), inferred_tx.clone(), halt.clone());
        scope.spawn(move || {
          for prepared in rx {
            if halt.is_requested() {
              break;
            }
            let inferred = prepared.and_then(|frame| processor.run_inference(frame));
            if tx.send(inferred).is_err() {
              break;
            }
          }
          debug!("推理线程 {} 退出", worker);
        });
      }
      drop(prepared_rx);
      drop(inferred_tx);

      scope.spawn(move || {
        for inferred in inferred_rx {
          let (source, outcome) = inferred
            .and_then(|frame| processor.complete(frame))
            .unwrap_or_else(StageFailure::into_parts);
          if done_tx.send(processor.finish(source, outcome)).is_err() {
            break;
          }
        }
      });

      let mut admitted = 0;
      'scan: loop {
        while let Ok(report) = done_rx.try_recv() {
          progress.settle(report);
        }
        if progress.fatal.is_some() {
          halt.request();
          break;
        }
        if self.shutdown.is_requested() {
          warn!("中断信号接收，等待 {} 个在途任务完成", progress.ledger.in_flight());
          break;
        }
        if self.limit_reached(admitted) {
          info!("达到指定帧数 {}, 停止扫描", admitted);
          break;
        }

        let files = poll_or_warn(&mut input);
        progress.ledger.prune(&files);

        let mut enqueued = 0;
        for file in files {
          if self.limit_reached(admitted) || self.shutdown.is_requested() {
            break;
          }
          if !progress.ledger.admit(&file) {
            continue;
          }
          if scan_tx.send(file).is_err() {
            break 'scan;
          }
          enqueued += 1;
          admitted += 1;
        }

        if enqueued == 0 {
          match done_rx.recv_timeout(self.poll_interval) {
            Ok(report) => progress.settle(report),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
          }
        }
      }

      drop(scan_tx);
      for report in done_rx {
        progress.settle(report);
        if progress.fatal.is_some() {
          halt.request();
        }
      }
    });

    progress.finish()
  }
}
