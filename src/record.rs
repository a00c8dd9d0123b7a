// 该文件是 Dockline （码头计数） 项目的一部分。
// src/record.rs - 原始视频分段录制
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
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::task::CancelToken;

#[cfg(feature = "gstreamer_record")]
mod gstreamer_record;
#[cfg(feature = "gstreamer_record")]
pub use self::gstreamer_record::{GStreamerRecordError, GStreamerSegmentRecorder};

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制失败: {0}")]
  Failed(String),
  #[cfg(feature = "gstreamer_record")]
  #[error("GStreamer 录制错误: {0}")]
  GStreamerRecordError(#[from] GStreamerRecordError),
}

/// 分段录制器
///
/// 每次调用录制一段最长 `duration` 的视频，被取消时应尽快收尾。
/// 返回 `Ok(None)` 表示这次没有产生文件。
pub trait SegmentRecorder: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn record_segment(
    &mut self,
    camera_id: &str,
    address: &str,
    duration: Duration,
    cancel: &CancelToken,
  ) -> Result<Option<PathBuf>, Self::Error>;
}

/// `cam_<camera>_<YYYY-mm-dd_HH-MM-SS>.mp4`
pub fn segment_file_name(camera_id: &str, at: DateTime<Local>) -> String {
  format!("cam_{}_{}.mp4", camera_id, at.format("%Y-%m-%d_%H-%M-%S"))
}

/// 不录制，只等待取消
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleRecorder;

impl SegmentRecorder for IdleRecorder {
  type Error = RecordError;

  fn record_segment(
    &mut self,
    _camera_id: &str,
    _address: &str,
    duration: Duration,
    cancel: &CancelToken,
  ) -> Result<Option<PathBuf>, Self::Error> {
    cancel.wait_timeout(duration);
    Ok(None)
  }
}

/// 按配置选择录制后端
pub enum RecorderWrapper {
  Idle(IdleRecorder),
  #[cfg(feature = "gstreamer_record")]
  GStreamer(GStreamerSegmentRecorder),
}

impl RecorderWrapper {
  /// 给出分段目录时录制到该目录，否则不录制
  pub fn for_directory(directory: Option<&std::path::Path>) -> Result<Self, RecordError> {
    match directory {
      #[cfg(feature = "gstreamer_record")]
      Some(directory) => Ok(RecorderWrapper::GStreamer(GStreamerSegmentRecorder::new(
        directory,
      )?)),
      #[cfg(not(feature = "gstreamer_record"))]
      Some(directory) => Err(RecordError::Failed(format!(
        "未启用 gstreamer_record 特性，无法录制到 {}",
        directory.display()
      ))),
      None => Ok(RecorderWrapper::Idle(IdleRecorder)),
    }
  }
}

impl SegmentRecorder for RecorderWrapper {
  type Error = RecordError;

  fn record_segment(
    &mut self,
    camera_id: &str,
    address: &str,
    duration: Duration,
    cancel: &CancelToken,
  ) -> Result<Option<PathBuf>, Self::Error> {
    match self {
      RecorderWrapper::Idle(recorder) => recorder.record_segment(camera_id, address, duration, cancel),
      #[cfg(feature = "gstreamer_record")]
      RecorderWrapper::GStreamer(recorder) => recorder
        .record_segment(camera_id, address, duration, cancel)
        .map_err(RecordError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn segment_name_matches_archive_layout() {
    let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
    assert_eq!(segment_file_name("117", at), "cam_117_2026-03-04_05-06-07.mp4");
  }

  #[test]
  fn idle_recorder_returns_on_cancel() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = IdleRecorder
      .record_segment("1", "rtsp://x", Duration::from_secs(3600), &cancel)
      .unwrap();
    assert!(result.is_none());
  }

  #[test]
  fn no_directory_means_idle_recorder() {
    assert!(matches!(
      RecorderWrapper::for_directory(None),
      Ok(RecorderWrapper::Idle(_))
    ));
  }
}
