// 该文件是 Dockline （码头计数） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use dockline::{
  FromUrl, SessionController,
  control::{ControlPlane, StartRequest, StopRequest},
  input::{InputError, InputWrapper},
  model::{DetectionLog, ModelError},
  output::{OutputError, OutputWrapper},
  record::{RecordError, RecorderWrapper},
  session::SessionPipeline,
  store::{JsonLedger, JsonStreamTable, JsonlVisitLog},
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const FORCE_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
enum PipelineError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Output(#[from] OutputError),
  #[error(transparent)]
  Record(#[from] RecordError),
}

/// 所有组件都由 URL 构造
struct UrlPipeline {
  model: Url,
  output: Url,
  segments: Option<PathBuf>,
}

impl SessionPipeline for UrlPipeline {
  type Capture = InputWrapper;
  type Detector = DetectionLog;
  type Output = OutputWrapper;
  type Recorder = RecorderWrapper;
  type Error = PipelineError;

  fn capture(&self, _camera_id: &str, address: &str) -> Result<Self::Capture, Self::Error> {
    Ok(InputWrapper::from_address(address)?)
  }

  fn detector(&self) -> Result<Arc<Self::Detector>, Self::Error> {
    Ok(Arc::new(DetectionLog::from_url(&self.model)?))
  }

  fn output(&self, camera_id: &str) -> Result<Self::Output, Self::Error> {
    Ok(OutputWrapper::for_camera(&self.output, camera_id)?)
  }

  fn recorder(&self, _camera_id: &str) -> Result<Self::Recorder, Self::Error> {
    Ok(RecorderWrapper::for_directory(self.segments.as_deref())?)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let config = args.session_config();
  let join_timeout = config.join_timeout;

  info!("摄像头: {}", args.camera);
  info!("检测器: {}", args.model);
  info!("输出路径: {}", args.output);

  let mut table = match &args.cameras {
    Some(path) => JsonStreamTable::load(path)?,
    None => JsonStreamTable::default(),
  };
  if let Some(stream) = &args.stream {
    table.insert(args.camera.clone(), stream.clone());
  }

  let pipeline = UrlPipeline {
    model: args.model.clone(),
    output: args.output.clone(),
    segments: args.segments.clone(),
  };
  let plane = ControlPlane::new(
    SessionController::new(pipeline, config),
    Box::new(table),
    Box::new(JsonlVisitLog::new(&args.visit_log)),
    Box::new(JsonLedger::new(&args.ledger)),
  );

  let started = plane.start(&StartRequest {
    trigger: 1,
    camera_id: Some(args.camera.clone()),
    visit_id: Some(args.visit.clone()),
  });
  if started.status() != "started" {
    println!("{}", serde_json::to_string_pretty(&started.body)?);
    bail!("会话启动失败 ({})", started.code);
  }

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(move || {
      thread::sleep(join_timeout + FORCE_EXIT_GRACE);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  loop {
    match rx.recv_timeout(POLL_INTERVAL) {
      Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
      Err(RecvTimeoutError::Timeout) => {
        if !plane.controller().is_running() {
          info!("会话已自行结束");
          break;
        }
      }
    }
  }

  let result = plane.stop(&StopRequest {
    visit_id: Some(args.visit.clone()),
  });
  println!("{}", serde_json::to_string_pretty(&result.body)?);
  Ok(())
}
