// 该文件是 Dockline （码头计数） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::FromUrl;
use crate::FromUrlWithScheme;
use crate::frame::RgbFrame;
use crate::model::BBox;
use crate::tracker::{CrossingLine, Tracker};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 输出产物的位置，写入会话记录
  fn location(&self) -> Option<String> {
    None
  }
}

/// 叠加到输出帧上的跟踪状态
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOverlay {
  pub id: u64,
  pub bbox: BBox,
  pub label: String,
  pub score: f32,
  pub counted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub line_y: f32,
  pub count: u64,
  pub tracks: Vec<TrackOverlay>,
}

impl Overlay {
  pub fn from_tracker(tracker: &Tracker, line: CrossingLine) -> Self {
    Self {
      line_y: line.y(),
      count: tracker.count(),
      tracks: tracker
        .tracks()
        .map(|track| TrackOverlay {
          id: track.id(),
          bbox: *track.bbox(),
          label: track.label().to_string(),
          score: track.score(),
          counted: track.counted(),
        })
        .collect(),
    }
  }
}

#[cfg(feature = "directory_record")]
pub mod draw;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 丢弃所有帧
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl FromUrlWithScheme for NullOutput {
  const SCHEME: &'static str = "null";
}

impl FromUrl for NullOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(NullOutput)
  }
}

impl<F, O> Render<F, O> for NullOutput {
  type Error = std::convert::Infallible;

  fn render_result(&self, _frame: &F, _result: &O) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Null(NullOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl OutputWrapper {
  /// 为某个摄像头的新会话打开输出
  pub fn for_camera(url: &Url, camera_id: &str) -> Result<Self, OutputError> {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("camera", camera_id);
    Self::from_url(&url)
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      NullOutput::SCHEME => Ok(OutputWrapper::Null(NullOutput::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<RgbFrame, Overlay> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Null(_) => Ok(()),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }

  fn location(&self) -> Option<String> {
    match self {
      OutputWrapper::Null(_) => None,
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        <DirectoryRecordOutput as Render<RgbFrame, Overlay>>::location(output)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Detection;

  #[test]
  fn overlay_mirrors_tracker_state() {
    let line = CrossingLine::new(300.0);
    let mut tracker = Tracker::default();
    tracker.update(
      &[Detection::new(BBox::new(0.0, 50.0, 100.0, 450.0), "carton", 0.9)],
      line,
    );
    tracker.update(
      &[Detection::new(BBox::new(0.0, 110.0, 100.0, 510.0), "carton", 0.8)],
      line,
    );

    let overlay = Overlay::from_tracker(&tracker, line);
    assert_eq!(overlay.line_y, 300.0);
    assert_eq!(overlay.count, 1);
    assert_eq!(overlay.tracks.len(), 1);
    assert!(overlay.tracks[0].counted);
    assert_eq!(overlay.tracks[0].score, 0.8);
  }

  #[test]
  fn null_scheme_selects_null_output() {
    let url = Url::parse("null://").unwrap();
    let output = OutputWrapper::for_camera(&url, "7").unwrap();
    assert!(matches!(output, OutputWrapper::Null(_)));
    assert_eq!(output.location(), None);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://host/x").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
