// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// tests/pipeline.rs - 端到端流水线测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};
use shanan_sink::config::PipelineConfig;
use shanan_sink::frame::NormalizedTensor;
use shanan_sink::gateway::{GatewayError, InferenceGateway, InferenceStats};
use shanan_sink::input::{DirectoryInput, SingleFileInput};
use shanan_sink::model::{LabelSet, RawDetectionTensor, TensorLayout};
use shanan_sink::output::{InferenceRecord, OutputError, RecordSink};
use shanan_sink::task::{
  ContinuousTask, FrameProcessor, OneShotTask, PipelineTask, ShutdownSignal, Task,
};

struct FakeGateway {
  rows: Vec<[f32; 6]>,
  calls: AtomicUsize,
}

impl FakeGateway {
  fn new(rows: Vec<[f32; 6]>) -> Self {
    Self {
      rows,
      calls: AtomicUsize::new(0),
    }
  }
}

impl InferenceGateway for FakeGateway {
  fn infer(
    &self,
    _model_name: &str,
    _tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let data = self.rows.iter().flatten().copied().collect();
    RawDetectionTensor::new(vec![1, self.rows.len(), 6], data)
      .map_err(|e| GatewayError::BackendProtocol(e.to_string()))
  }

  fn get_stats(&self, _model_name: &str) -> Result<InferenceStats, GatewayError> {
    Ok(InferenceStats {
      model_entries: 1,
      raw: serde_json::json!({ "model_stats": [{}] }),
    })
  }
}

/// 按顺序先返回预设的错误，之后与 `FakeGateway` 相同
struct FlakyGateway {
  inner: FakeGateway,
  failures: Mutex<VecDeque<GatewayError>>,
}

impl FlakyGateway {
  fn new(rows: Vec<[f32; 6]>, failures: Vec<GatewayError>) -> Self {
    Self {
      inner: FakeGateway::new(rows),
      failures: Mutex::new(failures.into()),
    }
  }
}

impl InferenceGateway for FlakyGateway {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    if let Some(error) = self.failures.lock().unwrap().pop_front() {
      self.inner.calls.fetch_add(1, Ordering::SeqCst);
      return Err(error);
    }
    self.inner.infer(model_name, tensor)
  }

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError> {
    self.inner.get_stats(model_name)
  }
}

#[derive(Default)]
struct CollectSink(Mutex<Vec<InferenceRecord>>);

impl RecordSink for CollectSink {
  fn emit(&self, record: &InferenceRecord) -> Result<(), OutputError> {
    self.0.lock().unwrap().push(record.clone());
    Ok(())
  }
}

impl CollectSink {
  fn records(&self) -> Vec<InferenceRecord> {
    self.0.lock().unwrap().clone()
  }
}

const CONFIDENT: [f32; 6] = [8.0, 16.0, 40.0, 48.0, 0.875, 0.0];
const FAINT: [f32; 6] = [8.0, 16.0, 40.0, 48.0, 0.25, 0.0];

struct Workspace {
  _root: tempfile::TempDir,
  config: PipelineConfig,
}

impl Workspace {
  fn new() -> Self {
    let root = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
      target_dimension: 64,
      tensor_layout: TensorLayout::Fused,
      source_dir: root.path().join("image_sink"),
      output_dir: root.path().join("images_annotated"),
      label_file: root.path().join("labels.txt"),
      poll_interval_ms: 10,
      ..PipelineConfig::default()
    };
    std::fs::create_dir_all(&config.source_dir).unwrap();
    Self {
      _root: root,
      config,
    }
  }

  fn add_image(&self, name: &str) -> PathBuf {
    let path = self.config.source_dir.join(name);
    RgbImage::from_fn(96, 64, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 90]))
      .save(&path)
      .unwrap();
    path
  }

  fn annotated_files(&self) -> Vec<PathBuf> {
    match std::fs::read_dir(&self.config.output_dir) {
      Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
      Err(_) => Vec::new(),
    }
  }

  fn processor<G: InferenceGateway>(
    &self,
    gateway: G,
    sink: Arc<CollectSink>,
  ) -> FrameProcessor<G, Arc<CollectSink>> {
    let labels = LabelSet::parse("widget\ngadget\n").unwrap();
    FrameProcessor::new(Arc::new(self.config.clone()), Arc::new(labels), gateway, sink)
  }
}

#[test]
fn frame_without_detections_is_removed_and_nothing_written() {
  let ws = Workspace::new();
  let source = ws.add_image("empty.png");
  let sink = Arc::new(CollectSink::default());

  let summary = ContinuousTask::default()
    .with_frame_number(Some(1))
    .with_poll_interval(ws.config.poll_interval())
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(Arc::new(FakeGateway::new(vec![FAINT])), sink.clone()),
    )
    .unwrap();

  assert_eq!(summary.skipped, 1);
  assert!(!source.exists());
  assert!(ws.annotated_files().is_empty());
  assert!(sink.records().is_empty());
}

#[test]
fn confident_detection_produces_one_image_and_one_record() {
  let ws = Workspace::new();
  let source = ws.add_image("frame.jpg");
  let sink = Arc::new(CollectSink::default());

  let summary = ContinuousTask::default()
    .with_frame_number(Some(1))
    .with_poll_interval(ws.config.poll_interval())
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(Arc::new(FakeGateway::new(vec![CONFIDENT])), sink.clone()),
    )
    .unwrap();
  assert_eq!(summary.annotated, 1);
  assert!(!source.exists());

  let files = ws.annotated_files();
  assert_eq!(files.len(), 1);
  let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
  assert!(name.starts_with("table_top-side-"), "{name}");
  assert!(name.ends_with("-annotated.jpg"), "{name}");

  let records = sink.records();
  assert_eq!(records.len(), 1);
  let record = serde_json::to_value(&records[0]).unwrap();
  assert_eq!(record["object_detected"], "True");
  assert_eq!(record["annotated_image_name"], name.as_str());
  let objects = record["detected_objects"].as_array().unwrap();
  assert_eq!(objects.len(), 1);
  assert_eq!(objects[0]["labelName"], "widget");
  assert_eq!(objects[0]["probability"], 87.5);
  assert_eq!(objects[0]["bbox"]["left"], 8.0);
  assert_eq!(objects[0]["bbox"]["width"], 40.0);

  let annotated = image::open(&files[0]).unwrap();
  assert_eq!((annotated.width(), annotated.height()), (64, 64));
}

#[test]
fn corrupt_file_cleanup_follows_policy() {
  for remove_failed in [true, false] {
    let mut ws = Workspace::new();
    ws.config.cleanup.remove_failed = remove_failed;
    let source = ws.config.source_dir.join("broken.png");
    std::fs::write(&source, b"\x89PNG truncated").unwrap();
    let gateway = Arc::new(FakeGateway::new(vec![CONFIDENT]));

    let summary = OneShotTask
      .run_task(
        SingleFileInput::new(&source),
        ws.processor(gateway.clone(), Arc::new(CollectSink::default())),
      )
      .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(source.exists(), !remove_failed);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
  }
}

#[test]
fn unknown_label_stops_the_loop_and_keeps_the_file() {
  let ws = Workspace::new();
  let source = ws.add_image("frame.png");
  let gateway = Arc::new(FakeGateway::new(vec![[8.0, 16.0, 40.0, 48.0, 0.9, 9.0]]));

  let result = ContinuousTask::default()
    .with_poll_interval(ws.config.poll_interval())
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(gateway, Arc::new(CollectSink::default())),
    );

  assert!(result.is_err());
  assert!(source.exists());
  assert!(ws.annotated_files().is_empty());
}

#[test]
fn backend_failure_fails_only_that_frame() {
  let failures = [
    GatewayError::BackendUnavailable("connection refused".into()),
    GatewayError::BackendProtocol("HTTP 400".into()),
  ];
  for (failure, remove_failed) in failures.into_iter().zip([true, false]) {
    let mut ws = Workspace::new();
    ws.config.cleanup.remove_failed = remove_failed;
    let first = ws.add_image("a.png");
    let second = ws.add_image("b.png");
    let gateway = Arc::new(FlakyGateway::new(vec![CONFIDENT], vec![failure]));
    let sink = Arc::new(CollectSink::default());

    let summary = ContinuousTask::default()
      .with_frame_number(Some(2))
      .with_poll_interval(ws.config.poll_interval())
      .run_task(
        DirectoryInput::new(&ws.config.source_dir),
        ws.processor(gateway.clone(), sink.clone()),
      )
      .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.annotated, 1);
    assert_eq!(first.exists(), !remove_failed);
    assert!(!second.exists());
    assert_eq!(gateway.inner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(ws.annotated_files().len(), 1);
  }
}

#[test]
fn staged_pipeline_halts_on_fatal_error_and_keeps_files() {
  let ws = Workspace::new();
  let sources: Vec<_> = (0..8).map(|i| ws.add_image(&format!("frame_{i}.png"))).collect();
  let gateway = Arc::new(FakeGateway::new(vec![[8.0, 16.0, 40.0, 48.0, 0.9, 9.0]]));
  let sink = Arc::new(CollectSink::default());

  let result = PipelineTask::new(2, 1)
    .with_poll_interval(ws.config.poll_interval())
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(gateway.clone(), sink.clone()),
    );

  assert!(result.is_err());
  assert!(sources.iter().all(|s| s.exists()));
  assert!(ws.annotated_files().is_empty());
  assert!(sink.records().is_empty());
  assert!(gateway.calls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn staged_pipeline_processes_every_file_once() {
  let ws = Workspace::new();
  let sources: Vec<_> = (0..6).map(|i| ws.add_image(&format!("frame_{i}.png"))).collect();
  let gateway = Arc::new(FakeGateway::new(vec![CONFIDENT]));
  let sink = Arc::new(CollectSink::default());

  let summary = PipelineTask::new(3, 2)
    .with_frame_number(Some(sources.len()))
    .with_poll_interval(ws.config.poll_interval())
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(gateway.clone(), sink.clone()),
    )
    .unwrap();

  assert_eq!(summary.processed, sources.len());
  assert_eq!(summary.annotated, sources.len());
  assert_eq!(gateway.calls.load(Ordering::SeqCst), sources.len());
  assert_eq!(sink.records().len(), sources.len());
  assert!(sources.iter().all(|s| !s.exists()));
}

#[test]
fn kept_files_are_not_processed_again() {
  let mut ws = Workspace::new();
  ws.config.cleanup.remove_processed = false;
  let source = ws.add_image("frame.png");
  let gateway = Arc::new(FakeGateway::new(vec![FAINT]));

  let shutdown = ShutdownSignal::new();
  let remote = shutdown.clone();
  let stopper = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(300));
    remote.request();
  });

  let summary = ContinuousTask::default()
    .with_poll_interval(ws.config.poll_interval())
    .with_shutdown(shutdown)
    .run_task(
      DirectoryInput::new(&ws.config.source_dir),
      ws.processor(gateway.clone(), Arc::new(CollectSink::default())),
    )
    .unwrap();
  stopper.join().unwrap();

  assert_eq!(summary.processed, 1);
  assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
  assert!(source.exists());
}

#[test]
fn same_input_yields_same_detections() {
  let mut ws = Workspace::new();
  ws.config.cleanup.remove_processed = false;
  let source = ws.add_image("frame.png");
  let sink = Arc::new(CollectSink::default());

  for _ in 0..2 {
    OneShotTask
      .run_task(
        SingleFileInput::new(&source),
        ws.processor(Arc::new(FakeGateway::new(vec![CONFIDENT])), sink.clone()),
      )
      .unwrap();
  }

  let records = sink.records();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].detected_objects, records[1].detected_objects);
  assert_eq!(records[0].camera_name, records[1].camera_name);
}
