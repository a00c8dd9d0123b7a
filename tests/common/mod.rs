// 该文件是 Dockline （码头计数） 项目的一部分。
// tests/common/mod.rs - 测试用的假组件
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

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dockline::{
  Session, SessionConfig, SessionController, SessionStatus,
  frame::RgbFrame,
  input::Capture,
  model::{Detection, DetectionLog, Detector},
  output::{Overlay, Render},
  record::SegmentRecorder,
  session::SessionPipeline,
  task::CancelToken,
};
use thiserror::Error;

pub const FRAME_WIDTH: u32 = 64;
/// 计数线在 y=300
pub const FRAME_HEIGHT: u32 = 400;

/// 一个 carton 从中心 y=250 移动到 y=310，越过计数线
pub const CROSSING_LOG: &str = r#"[{"bbox": [100, 150, 200, 350], "label": "carton", "score": 0.9}]
[{"bbox": [100, 210, 200, 410], "label": "carton", "score": 0.9}]
"#;

#[derive(Error, Debug)]
#[error("fake failure: {0}")]
pub struct FakeError(pub String);

pub struct FakeCapture {
  remaining: Option<usize>,
  frame_delay: Duration,
  fail_open: bool,
}

impl Capture for FakeCapture {
  type Error = FakeError;

  fn open(&mut self) -> Result<(), Self::Error> {
    if self.fail_open {
      return Err(FakeError("connection refused".to_string()));
    }
    Ok(())
  }

  fn read(&mut self) -> Result<Option<RgbFrame>, Self::Error> {
    match self.remaining.as_mut() {
      Some(0) => return Ok(None),
      Some(n) => *n -= 1,
      None => {}
    }
    std::thread::sleep(self.frame_delay);
    Ok(Some(RgbFrame::blank(FRAME_WIDTH, FRAME_HEIGHT)))
  }

  fn release(&mut self) {}

  fn address(&self) -> &str {
    "fake://camera"
  }
}

#[derive(Clone, Default)]
pub struct MemoryOutput {
  pub overlays: Arc<Mutex<Vec<Overlay>>>,
}

impl Render<RgbFrame, Overlay> for MemoryOutput {
  type Error = FakeError;

  fn render_result(&self, _frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    self.overlays.lock().unwrap().push(result.clone());
    Ok(())
  }

  fn location(&self) -> Option<String> {
    Some("mem://overlays".to_string())
  }
}

/// 在指定的调用序号上推理失败，其余调用交给检测记录
pub struct FlakyDetector {
  inner: DetectionLog,
  failing_calls: Vec<usize>,
  calls: AtomicUsize,
  failures: Arc<AtomicUsize>,
}

impl Detector for FlakyDetector {
  type Error = FakeError;

  fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, Self::Error> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    if self.failing_calls.contains(&call) {
      self.failures.fetch_add(1, Ordering::SeqCst);
      return Err(FakeError(format!("inference failed on call {}", call)));
    }
    self.inner.detect(frame).map_err(|e| FakeError(e.to_string()))
  }

  fn abort(&self) {
    self.inner.abort();
  }
}

#[derive(Clone, Copy)]
pub enum RecorderMode {
  /// 每段在取消前完成并返回一个路径
  Segments,
  /// 忽略取消信号，卡住给定时长
  Stuck(Duration),
}

pub struct FakeRecorder {
  mode: RecorderMode,
  produced: Arc<AtomicUsize>,
}

impl SegmentRecorder for FakeRecorder {
  type Error = FakeError;

  fn record_segment(
    &mut self,
    camera_id: &str,
    _address: &str,
    duration: Duration,
    cancel: &CancelToken,
  ) -> Result<Option<PathBuf>, Self::Error> {
    match self.mode {
      RecorderMode::Segments => {
        if cancel.wait_timeout(duration) {
          return Ok(None);
        }
      }
      RecorderMode::Stuck(block) => std::thread::sleep(block),
    }
    let n = self.produced.fetch_add(1, Ordering::SeqCst);
    Ok(Some(PathBuf::from(format!("/segments/cam_{}_{}.mp4", camera_id, n))))
  }
}

pub struct FakePipeline {
  pub frames: Option<usize>,
  pub frame_delay: Duration,
  pub fail_open: bool,
  pub detections: String,
  pub failing_calls: Vec<usize>,
  pub detector_failures: Arc<AtomicUsize>,
  pub recorder: RecorderMode,
  pub output: MemoryOutput,
  pub outputs_built: Arc<AtomicUsize>,
  pub produced: Arc<AtomicUsize>,
}

impl Default for FakePipeline {
  fn default() -> Self {
    Self {
      frames: None,
      frame_delay: Duration::from_millis(2),
      fail_open: false,
      detections: CROSSING_LOG.to_string(),
      failing_calls: Vec::new(),
      detector_failures: Arc::new(AtomicUsize::new(0)),
      recorder: RecorderMode::Segments,
      output: MemoryOutput::default(),
      outputs_built: Arc::new(AtomicUsize::new(0)),
      produced: Arc::new(AtomicUsize::new(0)),
    }
  }
}

impl SessionPipeline for FakePipeline {
  type Capture = FakeCapture;
  type Detector = FlakyDetector;
  type Output = MemoryOutput;
  type Recorder = FakeRecorder;
  type Error = FakeError;

  fn capture(&self, _camera_id: &str, _address: &str) -> Result<Self::Capture, Self::Error> {
    Ok(FakeCapture {
      remaining: self.frames,
      frame_delay: self.frame_delay,
      fail_open: self.fail_open,
    })
  }

  fn detector(&self) -> Result<Arc<Self::Detector>, Self::Error> {
    let inner = DetectionLog::parse(&self.detections).map_err(|e| FakeError(e.to_string()))?;
    Ok(Arc::new(FlakyDetector {
      inner,
      failing_calls: self.failing_calls.clone(),
      calls: AtomicUsize::new(0),
      failures: self.detector_failures.clone(),
    }))
  }

  fn output(&self, _camera_id: &str) -> Result<Self::Output, Self::Error> {
    self.outputs_built.fetch_add(1, Ordering::SeqCst);
    Ok(self.output.clone())
  }

  fn recorder(&self, _camera_id: &str) -> Result<Self::Recorder, Self::Error> {
    Ok(FakeRecorder {
      mode: self.recorder,
      produced: self.produced.clone(),
    })
  }
}

pub fn test_config() -> SessionConfig {
  SessionConfig::default()
    .with_frame_skip(1)
    .with_reconnect_backoff(Duration::from_millis(5))
    .with_segment_duration(Duration::from_millis(10))
    .with_join_timeout(Duration::from_secs(5))
}

pub fn wait_until<P: SessionPipeline>(
  controller: &SessionController<P>,
  condition: impl Fn(&Session) -> bool,
) -> Session {
  let deadline = Instant::now() + Duration::from_secs(5);
  loop {
    let session = controller.status();
    if condition(&session) || Instant::now() > deadline {
      return session;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
}

pub fn wait_finished<P: SessionPipeline>(controller: &SessionController<P>) -> Session {
  wait_until(controller, |s| s.status != SessionStatus::Running)
}
