// 该文件是 Dockline （码头计数） 项目的一部分。
// src/session.rs - 计数会话状态机
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

//! 一次会话对应一个摄像头从 `start` 到 `stop` 的计数过程。
//!
//! 状态：`Idle → Running → {Completed, Stopped, Error}`。同一时间只有一个会话在运行，
//! 采集（录制）与推理两个循环在各自线程中执行，通过同一把锁保护的 [`Session`] 回写进度。

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  SessionConfig,
  frame::RgbFrame,
  input::{Capture, FrameSource},
  model::Detector,
  output::{Overlay, Render},
  record::SegmentRecorder,
  task::{CancelToken, CaptureTask, InferenceTask, LoopEnd, SessionHandle, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
  #[default]
  Idle,
  Running,
  Completed,
  Stopped,
  Error,
}

impl SessionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      SessionStatus::Idle => "idle",
      SessionStatus::Running => "running",
      SessionStatus::Completed => "completed",
      SessionStatus::Stopped => "stopped",
      SessionStatus::Error => "error",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error
    )
  }
}

impl std::fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 会话记录，`status()` 和 `stop()` 返回它的快照
#[derive(Debug, Clone, Default)]
pub struct Session {
  /// 每次 `start` 和收尾都会递增，旧循环凭旧代数写不进来
  pub generation: u64,
  pub status: SessionStatus,
  pub count: u64,
  pub camera_id: Option<String>,
  pub visit_id: Option<String>,
  /// 叠加输出的位置
  pub output_ref: Option<String>,
  pub recorded_paths: Vec<PathBuf>,
  pub message: Option<String>,
}

impl Session {
  pub fn to_json(&self) -> Value {
    json!({
      "status": self.status.as_str(),
      "object_count": self.count,
      "camera_id": self.camera_id,
      "visit_id": self.visit_id,
      "output_path": self.output_ref,
      "recorded_paths": self
        .recorded_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>(),
      "message": self.message,
    })
  }
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("摄像头 {0} 的会话正在运行")]
  Conflict(String),
  #[error("无法打开输入源 {address}: {reason}")]
  SourceOpen { address: String, reason: String },
  #[error("会话初始化失败: {0}")]
  Setup(String),
  #[error("无法启动处理线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 为每个新会话构造采集、检测、输出和录制组件
pub trait SessionPipeline: Send + Sync + 'static {
  type Capture: Capture + 'static;
  type Detector: Detector + 'static;
  type Output: Render<RgbFrame, Overlay, Error: std::fmt::Display> + Send + 'static;
  type Recorder: SegmentRecorder + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  fn capture(&self, camera_id: &str, address: &str) -> Result<Self::Capture, Self::Error>;
  fn detector(&self) -> Result<Arc<Self::Detector>, Self::Error>;
  fn output(&self, camera_id: &str) -> Result<Self::Output, Self::Error>;
  fn recorder(&self, camera_id: &str) -> Result<Self::Recorder, Self::Error>;
}

/// 线程退出时（包括 panic 展开）发出完成信号
struct DoneSignal(Sender<()>);

impl Drop for DoneSignal {
  fn drop(&mut self) {
    let _ = self.0.send(());
  }
}

struct Workers<D> {
  generation: u64,
  cancel: CancelToken,
  detector: Arc<D>,
  done: Receiver<()>,
  spawned: usize,
  inference: Option<JoinHandle<Result<LoopEnd, std::convert::Infallible>>>,
  capture: Option<JoinHandle<usize>>,
}

pub struct SessionController<P: SessionPipeline> {
  pipeline: P,
  config: SessionConfig,
  session: Arc<Mutex<Session>>,
  workers: Mutex<Option<Workers<P::Detector>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<P: SessionPipeline> SessionController<P> {
  pub fn new(pipeline: P, config: SessionConfig) -> Self {
    Self {
      pipeline,
      config,
      session: Arc::new(Mutex::new(Session::default())),
      workers: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn status(&self) -> Session {
    lock(&self.session).clone()
  }

  pub fn is_running(&self) -> bool {
    lock(&self.session).status == SessionStatus::Running
  }

  /// 启动新会话
  ///
  /// 有会话运行时返回 [`SessionError::Conflict`]，不改动任何状态。
  /// 输入源在这里同步打开，打不开则会话直接进入 `Error`。
  pub fn start(
    &self,
    camera_id: &str,
    visit_id: Option<&str>,
    address: &str,
  ) -> Result<Session, SessionError> {
    let mut workers = lock(&self.workers);
    if self.is_running() {
      warn!("[{}] 已有会话在运行，拒绝启动", camera_id);
      return Err(SessionError::Conflict(camera_id.to_string()));
    }

    // 上一个会话可能因输入读完而自行结束，这里回收它的线程
    if let Some(previous) = workers.take() {
      self.finish(previous);
    }

    let setup = |e: P::Error| {
      let err = SessionError::Setup(e.to_string());
      self.fail(camera_id, visit_id, &err);
      err
    };
    let capture = self.pipeline.capture(camera_id, address).map_err(setup)?;
    let detector = self.pipeline.detector().map_err(setup)?;

    let mut source = FrameSource::new(capture, self.config.reconnect_backoff);
    if let Err(e) = source.open() {
      let err = SessionError::SourceOpen {
        address: address.to_string(),
        reason: e.to_string(),
      };
      self.fail(camera_id, visit_id, &err);
      return Err(err);
    }

    // 输出可能在磁盘上建目录，输入源打开之后才创建
    let (output, recorder) = match self
      .pipeline
      .output(camera_id)
      .and_then(|output| Ok((output, self.pipeline.recorder(camera_id)?)))
    {
      Ok(parts) => parts,
      Err(e) => {
        source.release();
        return Err(setup(e));
      }
    };

    let generation = {
      let mut session = lock(&self.session);
      let generation = session.generation + 1;
      *session = Session {
        generation,
        status: SessionStatus::Running,
        camera_id: Some(camera_id.to_string()),
        visit_id: visit_id.map(String::from),
        output_ref: output.location(),
        ..Default::default()
      };
      generation
    };

    let cancel = CancelToken::new();
    let handle = SessionHandle::new(self.session.clone(), generation);
    let (done_tx, done) = mpsc::channel();
    let mut active = Workers {
      generation,
      cancel: cancel.clone(),
      detector: detector.clone(),
      done,
      spawned: 0,
      inference: None,
      capture: None,
    };

    let inference = InferenceTask::new(camera_id, &self.config, handle.clone(), cancel.clone());
    let signal = DoneSignal(done_tx.clone());
    let spawned = thread::Builder::new()
      .name(format!("infer-{}", camera_id))
      .spawn(move || {
        let _signal = signal;
        inference.run_task(source, detector, output)
      });
    match spawned {
      Ok(thread) => {
        active.inference = Some(thread);
        active.spawned += 1;
      }
      Err(e) => return Err(self.abort_start(active, camera_id, visit_id, e)),
    }

    let capture = CaptureTask::new(
      camera_id,
      address,
      recorder,
      self.config.segment_duration,
      handle,
      cancel,
    );
    let signal = DoneSignal(done_tx);
    let spawned = thread::Builder::new()
      .name(format!("capture-{}", camera_id))
      .spawn(move || {
        let _signal = signal;
        capture.run()
      });
    match spawned {
      Ok(thread) => {
        active.capture = Some(thread);
        active.spawned += 1;
      }
      Err(e) => return Err(self.abort_start(active, camera_id, visit_id, e)),
    }

    info!(
      "[{}] 会话已启动 (visit: {})，输入 {}",
      camera_id,
      visit_id.unwrap_or("-"),
      address
    );
    *workers = Some(active);
    Ok(self.status())
  }

  fn abort_start(
    &self,
    active: Workers<P::Detector>,
    camera_id: &str,
    visit_id: Option<&str>,
    e: std::io::Error,
  ) -> SessionError {
    active.cancel.cancel();
    let err = SessionError::Spawn(e);
    self.fail(camera_id, visit_id, &err);
    err
  }

  fn fail(&self, camera_id: &str, visit_id: Option<&str>, err: &SessionError) {
    error!("[{}] 会话启动失败: {}", camera_id, err);
    let mut session = lock(&self.session);
    let generation = session.generation + 1;
    *session = Session {
      generation,
      status: SessionStatus::Error,
      camera_id: Some(camera_id.to_string()),
      visit_id: visit_id.map(String::from),
      message: Some(err.to_string()),
      ..Default::default()
    };
  }

  /// 停止当前会话并返回最终记录
  ///
  /// 没有活动线程时直接返回当前记录，重复调用结果不变。
  pub fn stop(&self) -> Session {
    let mut workers = lock(&self.workers);
    match workers.take() {
      Some(active) => self.finish(active),
      None => self.status(),
    }
  }

  fn finish(&self, mut active: Workers<P::Detector>) -> Session {
    active.cancel.cancel();
    active.detector.abort();

    let timeout = self.config.join_timeout;
    let deadline = Instant::now() + timeout;
    let mut finished = 0;
    while finished < active.spawned {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match active.done.recv_timeout(remaining) {
        Ok(()) => finished += 1,
        Err(_) => break,
      }
    }

    let abandoned = active.spawned - finished;
    let mut panicked = false;
    if abandoned == 0 {
      if let Some(thread) = active.inference.take() {
        panicked |= thread.join().is_err();
      }
      if let Some(thread) = active.capture.take() {
        panicked |= thread.join().is_err();
      }
    } else {
      warn!(
        "{} 个处理循环在 {:?} 内没有退出，放弃等待",
        abandoned, timeout
      );
    }

    let mut session = lock(&self.session);
    if session.generation == active.generation {
      if panicked {
        error!("处理循环异常退出");
        session.status = SessionStatus::Error;
        session.message = Some("处理循环异常退出".to_string());
      } else if session.status == SessionStatus::Running {
        session.status = SessionStatus::Completed;
        session.message = Some(if abandoned == 0 {
          "会话已停止".to_string()
        } else {
          format!("会话已停止，{} 个处理循环未能在超时内退出", abandoned)
        });
      }
      // 冻结记录，被放弃的循环之后写不进来
      session.generation += 1;
    }
    info!(
      "[{}] 会话结束: {}，计数 {}",
      session.camera_id.as_deref().unwrap_or("-"),
      session.status,
      session.count
    );
    session.clone()
  }
}

impl<P: SessionPipeline> Drop for SessionController<P> {
  fn drop(&mut self) {
    let workers = self.workers.get_mut().unwrap_or_else(|e| e.into_inner());
    if let Some(active) = workers.as_ref() {
      active.cancel.cancel();
      active.detector.abort();
    }
  }
}
