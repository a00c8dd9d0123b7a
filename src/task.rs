// 该文件是 Dockline （码头计数） 项目的一部分。
// src/task.rs - 采集与推理循环
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

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{
  filter::DetectionFilter,
  frame::RgbFrame,
  input::{Capture, FrameSource, ReadOutcome},
  model::Detector,
  output::{Overlay, Render},
  record::SegmentRecorder,
  session::{Session, SessionStatus},
  tracker::{CrossingLine, Tracker},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 协作式取消信号
///
/// 循环只在迭代边界检查；阻塞在单次读取或推理里的调用要等返回后才能看到。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    let (lock, cvar) = &*self.inner;
    *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
    cvar.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 最多等待 `timeout`，期间被取消则提前返回 `true`
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let (lock, cvar) = &*self.inner;
    let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    let (guard, _) = cvar
      .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
      .unwrap_or_else(|e| e.into_inner());
    *guard
  }
}

/// 会话共享状态的写入句柄
///
/// 只有代数一致时才写入，被放弃的旧循环不会改动新会话。
#[derive(Clone)]
pub struct SessionHandle {
  session: Arc<Mutex<Session>>,
  generation: u64,
}

impl SessionHandle {
  pub(crate) fn new(session: Arc<Mutex<Session>>, generation: u64) -> Self {
    Self {
      session,
      generation,
    }
  }

  pub fn update(&self, f: impl FnOnce(&mut Session)) -> bool {
    let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
    if session.generation != self.generation {
      return false;
    }
    f(&mut session);
    true
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
  Exhausted,
  Cancelled,
}

/// 推理循环：读帧、检测、过滤、跟踪计数、输出叠加帧
pub struct InferenceTask {
  camera_id: String,
  filter: DetectionFilter,
  tracker: Tracker,
  line_fraction: f32,
  frame_skip: u32,
  session: SessionHandle,
  cancel: CancelToken,
}

impl InferenceTask {
  pub fn new(
    camera_id: impl Into<String>,
    config: &crate::SessionConfig,
    session: SessionHandle,
    cancel: CancelToken,
  ) -> Self {
    Self {
      camera_id: camera_id.into(),
      filter: DetectionFilter::new(config.filter.clone()),
      tracker: Tracker::new(config.tracker.clone()),
      line_fraction: config.line_fraction,
      frame_skip: config.frame_skip.max(1),
      session,
      cancel,
    }
  }

  fn detect<D: Detector>(&self, model: &D, frame: &RgbFrame, frame_index: u64) -> Vec<crate::model::Detection> {
    let now = Instant::now();
    match model.detect(frame) {
      Ok(raw) => {
        let raw_len = raw.len();
        let kept = self.filter.apply(raw);
        debug!(
          "[{}] 第 {} 帧推理耗时 {:.2?}，检测 {} 个，保留 {} 个",
          self.camera_id,
          frame_index,
          now.elapsed(),
          raw_len,
          kept.len()
        );
        kept
      }
      Err(e) => {
        warn!("[{}] 第 {} 帧推理失败，按无检测处理: {}", self.camera_id, frame_index, e);
        Vec::new()
      }
    }
  }
}

impl<C, D, O> Task<FrameSource<C>, Arc<D>, O> for InferenceTask
where
  C: Capture,
  D: Detector,
  O: Render<RgbFrame, Overlay>,
  O::Error: std::fmt::Display,
{
  type Output = LoopEnd;
  type Error = std::convert::Infallible;

  fn run_task(mut self, mut input: FrameSource<C>, model: Arc<D>, output: O) -> Result<LoopEnd, Self::Error> {
    info!("[{}] 推理循环开始", self.camera_id);
    let mut line: Option<CrossingLine> = None;
    let mut frame_index: u64 = 0;

    let end = loop {
      let frame = match input.read(&self.cancel) {
        ReadOutcome::Frame(frame) => frame,
        ReadOutcome::Exhausted => break LoopEnd::Exhausted,
        ReadOutcome::Cancelled => break LoopEnd::Cancelled,
      };

      let line = *line.get_or_insert_with(|| {
        let line = CrossingLine::at_fraction(frame.height(), self.line_fraction);
        info!(
          "[{}] 帧尺寸 {}x{}，计数线 y={}",
          self.camera_id,
          frame.width(),
          frame.height(),
          line.y()
        );
        line
      });

      // 跳过的帧不产生检测，跟踪器只做老化
      let detections = if frame_index % self.frame_skip as u64 == 0 {
        self.detect(model.as_ref(), &frame, frame_index)
      } else {
        Vec::new()
      };

      let count = self.tracker.update(&detections, line);
      let overlay = Overlay::from_tracker(&self.tracker, line);
      if let Err(e) = output.render_result(&frame, &overlay) {
        warn!("[{}] 第 {} 帧输出失败: {}", self.camera_id, frame_index, e);
      }

      self.session.update(|session| session.count = count);
      frame_index += 1;
    };

    input.release();
    let count = self.tracker.count();
    self.session.update(|session| {
      session.count = count;
      if end == LoopEnd::Exhausted && session.status == SessionStatus::Running {
        session.status = SessionStatus::Completed;
        session.message = Some("输入源已读完".to_string());
      }
    });
    if end == LoopEnd::Exhausted {
      // 让录制循环也退出
      self.cancel.cancel();
    }

    info!(
      "[{}] 推理循环结束 ({:?})，共 {} 帧，计数 {}",
      self.camera_id, end, frame_index, count
    );
    Ok(end)
  }
}

/// 录制循环：按固定时长分段保存原始视频
pub struct CaptureTask<R> {
  camera_id: String,
  address: String,
  recorder: R,
  segment_duration: Duration,
  session: SessionHandle,
  cancel: CancelToken,
}

impl<R: SegmentRecorder> CaptureTask<R> {
  pub fn new(
    camera_id: impl Into<String>,
    address: impl Into<String>,
    recorder: R,
    segment_duration: Duration,
    session: SessionHandle,
    cancel: CancelToken,
  ) -> Self {
    Self {
      camera_id: camera_id.into(),
      address: address.into(),
      recorder,
      segment_duration,
      session,
      cancel,
    }
  }

  pub fn run(mut self) -> usize {
    info!("[{}] 录制循环开始", self.camera_id);
    let mut segments = 0;
    while !self.cancel.is_cancelled() {
      match self.recorder.record_segment(
        &self.camera_id,
        &self.address,
        self.segment_duration,
        &self.cancel,
      ) {
        Ok(Some(path)) => {
          info!("[{}] 分段录制完成: {}", self.camera_id, path.display());
          segments += 1;
          self.session.update(|session| session.recorded_paths.push(path));
        }
        Ok(None) => {}
        Err(e) => {
          error!("[{}] 录制失败，停止录制循环: {}", self.camera_id, e);
          break;
        }
      }
    }
    info!("[{}] 录制循环结束，共 {} 段", self.camera_id, segments);
    segments
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wait_timeout_elapses_without_cancel() {
    let token = CancelToken::new();
    assert!(!token.wait_timeout(Duration::from_millis(5)));
    assert!(!token.is_cancelled());
  }

  #[test]
  fn cancel_wakes_waiters() {
    let token = CancelToken::new();
    let waiter = token.clone();
    let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(3600)));
    std::thread::sleep(Duration::from_millis(10));
    token.cancel();
    assert!(handle.join().unwrap());
  }

  #[test]
  fn stale_handle_does_not_write() {
    let session = Arc::new(Mutex::new(Session {
      generation: 2,
      ..Default::default()
    }));
    let stale = SessionHandle::new(session.clone(), 1);
    let current = SessionHandle::new(session.clone(), 2);
    assert!(!stale.update(|s| s.count = 99));
    assert!(current.update(|s| s.count = 3));
    assert_eq!(session.lock().unwrap().count, 3);
  }
}
