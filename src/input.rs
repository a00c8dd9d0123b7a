// 该文件是 Dockline （码头计数） 项目的一部分。
// src/input.rs - 帧输入与断线重连
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

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::{FromUrl, frame::RgbFrame, task::CancelToken};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageSequenceCapture, ImageSequenceError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerCapture, GStreamerInputError};

/// 解码后端，构造时探测一次，之后重连沿用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeBackend {
  Hardware,
  Software,
}

impl std::fmt::Display for DecodeBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DecodeBackend::Hardware => write!(f, "hardware"),
      DecodeBackend::Software => write!(f, "software"),
    }
  }
}

/// 底层采集句柄
///
/// `read` 返回 `Ok(None)` 表示源已读完（文件结束），`Err` 表示可重试的故障。
pub trait Capture: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn open(&mut self) -> Result<(), Self::Error>;
  fn read(&mut self) -> Result<Option<RgbFrame>, Self::Error>;
  fn release(&mut self);

  fn decode_backend(&self) -> DecodeBackend {
    DecodeBackend::Software
  }

  fn address(&self) -> &str;
}

#[derive(Debug)]
pub enum ReadOutcome {
  Frame(RgbFrame),
  /// 源已读完，不会再有新帧
  Exhausted,
  /// 读取过程中观察到取消信号
  Cancelled,
}

/// 带断线重连的帧源
///
/// 读取失败时释放句柄、等待固定退避时间、用同样的地址和解码后端重新打开，
/// 无限重试，直到取消信号出现。
pub struct FrameSource<C: Capture> {
  capture: C,
  backend: DecodeBackend,
  backoff: Duration,
  opened: bool,
  failures: u32,
  frames_read: u64,
}

impl<C: Capture> FrameSource<C> {
  pub fn new(capture: C, backoff: Duration) -> Self {
    let backend = capture.decode_backend();
    Self {
      capture,
      backend,
      backoff,
      opened: false,
      failures: 0,
      frames_read: 0,
    }
  }

  /// 首次打开，失败由调用方决定如何处理（不在这里重试）
  pub fn open(&mut self) -> Result<(), C::Error> {
    self.capture.open()?;
    self.opened = true;
    info!(
      "输入源已打开: {} (解码: {})",
      self.capture.address(),
      self.backend
    );
    Ok(())
  }

  pub fn read(&mut self, cancel: &CancelToken) -> ReadOutcome {
    loop {
      if cancel.is_cancelled() {
        return ReadOutcome::Cancelled;
      }

      if !self.opened {
        match self.capture.open() {
          Ok(()) => {
            self.opened = true;
            info!("已重新连接 {}", self.capture.address());
          }
          Err(e) => {
            self.failures += 1;
            warn!(
              "重新打开 {} 失败 (连续第 {} 次): {}，{:?} 后重试",
              self.capture.address(),
              self.failures,
              e,
              self.backoff
            );
            if cancel.wait_timeout(self.backoff) {
              return ReadOutcome::Cancelled;
            }
            continue;
          }
        }
      }

      match self.capture.read() {
        Ok(Some(frame)) => {
          if self.failures > 0 {
            info!("输入源恢复，此前连续失败 {} 次", self.failures);
          }
          self.failures = 0;
          self.frames_read += 1;
          return ReadOutcome::Frame(frame);
        }
        Ok(None) => {
          info!(
            "输入源 {} 已读完，共 {} 帧",
            self.capture.address(),
            self.frames_read
          );
          return ReadOutcome::Exhausted;
        }
        Err(e) => {
          self.failures += 1;
          warn!(
            "读取 {} 失败 (连续第 {} 次): {}，{:?} 后重连",
            self.capture.address(),
            self.failures,
            e,
            self.backoff
          );
          self.release();
          if cancel.wait_timeout(self.backoff) {
            return ReadOutcome::Cancelled;
          }
        }
      }
    }
  }

  pub fn release(&mut self) {
    if self.opened {
      self.capture.release();
      self.opened = false;
    }
  }

  pub fn is_open(&self) -> bool {
    self.opened
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.failures
  }

  pub fn backend(&self) -> DecodeBackend {
    self.backend
  }

  pub fn frames_read(&self) -> u64 {
    self.frames_read
  }

  pub fn capture(&self) -> &C {
    &self.capture
  }
}

impl<C: Capture> Drop for FrameSource<C> {
  fn drop(&mut self) {
    self.release();
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image sequence input error: {0}")]
  ImageSequenceError(#[from] ImageSequenceError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("Invalid stream address: {0}")]
  InvalidAddress(#[from] url::ParseError),
}

/// 按 URL 方案选择采集后端
pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCapture),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceCapture),
}

impl InputWrapper {
  /// 解析数据库或配置里保存的流地址
  pub fn from_address(address: &str) -> Result<Self, InputError> {
    let url = url::Url::parse(address)?;
    Self::from_url(&url)
  }
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      if GStreamerCapture::accepts(url) {
        let capture = GStreamerCapture::from_url(url)?;
        return Ok(InputWrapper::GStreamer(capture));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceCapture::SCHEME {
        let capture = ImageSequenceCapture::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(capture));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Capture for InputWrapper {
  type Error = InputError;

  fn open(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(capture) => capture.open().map_err(InputError::from),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(capture) => capture.open().map_err(InputError::from),
    }
  }

  fn read(&mut self) -> Result<Option<RgbFrame>, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(capture) => capture.read().map_err(InputError::from),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(capture) => capture.read().map_err(InputError::from),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(capture) => capture.release(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(capture) => capture.release(),
    }
  }

  fn decode_backend(&self) -> DecodeBackend {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(capture) => capture.decode_backend(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(capture) => capture.decode_backend(),
    }
  }

  fn address(&self) -> &str {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(capture) => capture.address(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(capture) => capture.address(),
    }
  }
}
