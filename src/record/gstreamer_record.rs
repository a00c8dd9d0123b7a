// 该文件是 Dockline （码头计数） 项目的一部分。
// src/record/gstreamer_record.rs - GStreamer 分段录制
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

//! RTSP H.264 流不重新编码，直接封装成 MP4 分段。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use gstreamer::{self as gst, prelude::*};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  record::{SegmentRecorder, segment_file_name},
  task::CancelToken,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const EOS_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum GStreamerRecordError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

pub struct GStreamerSegmentRecorder {
  directory: PathBuf,
}

impl GStreamerSegmentRecorder {
  pub fn new(directory: impl AsRef<Path>) -> Result<Self, GStreamerRecordError> {
    gst::init()?;
    let directory = directory.as_ref().to_path_buf();
    std::fs::create_dir_all(&directory)?;
    Ok(Self { directory })
  }

  fn pipeline_description(address: &str, location: &Path) -> String {
    format!(
      "rtspsrc location={} protocols=tcp ! rtph264depay ! h264parse ! mp4mux ! filesink location={}",
      address,
      location.display()
    )
  }

  fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      gst::MessageView::Eos(..) => Some("stream ended".to_string()),
      _ => None,
    }
  }

  fn finish(pipeline: &gst::Pipeline) {
    // 发送 EOS 让 mp4mux 写完文件尾
    let _ = pipeline.send_event(gst::event::Eos::new());
    if let Some(bus) = pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }
    if let Err(e) = pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop recording pipeline: {}", e);
    }
  }
}

impl SegmentRecorder for GStreamerSegmentRecorder {
  type Error = GStreamerRecordError;

  fn record_segment(
    &mut self,
    camera_id: &str,
    address: &str,
    duration: Duration,
    cancel: &CancelToken,
  ) -> Result<Option<PathBuf>, Self::Error> {
    let location = self.directory.join(segment_file_name(camera_id, Local::now()));
    let description = Self::pipeline_description(address, &location);
    info!("[{}] 开始录制: {}", camera_id, location.display());

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerRecordError::PipelineError("Failed to create pipeline".to_string()))?;
    pipeline.set_state(gst::State::Playing)?;

    let started = Instant::now();
    let mut failure = None;
    while started.elapsed() < duration {
      if cancel.wait_timeout(POLL_INTERVAL) {
        break;
      }
      if let Some(reason) = Self::bus_error(&pipeline) {
        failure = Some(reason);
        break;
      }
    }
    Self::finish(&pipeline);

    if let Some(reason) = &failure {
      warn!("[{}] 录制提前结束: {}", camera_id, reason);
    }
    if location.exists() {
      return Ok(Some(location));
    }
    if cancel.is_cancelled() {
      return Ok(None);
    }
    Err(GStreamerRecordError::PipelineError(failure.unwrap_or_else(|| {
      format!("no segment written to {}", location.display())
    })))
  }
}
