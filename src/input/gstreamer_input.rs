// 该文件是 Dockline （码头计数） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持三种地址：
//! - `rtsp://...` 摄像头 RTSP 流，TCP 传输、零延迟、只保留最新一帧
//! - `file:///path/to/video.mp4` 本地视频文件，读到 EOS 视为输入结束
//! - `gst:///?pipeline=<管道描述>` 自定义管道，描述需要百分号编码，末尾自动接 RGB appsink
//!
//! H.264 解码优先使用 `nvh264dec`，注册表里没有时退回 `avdec_h264`。
//! 探测只在构造时做一次，之后的断线重连沿用同一个解码器。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-plugins-bad gstreamer1.0-libav
//! ```

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::RgbFrame,
  input::{Capture, DecodeBackend},
};

const HARDWARE_DECODER: &str = "nvh264dec";
const SOFTWARE_DECODER: &str = "avdec_h264";
const PULL_TIMEOUT_SECS: u64 = 5;
const PIPELINE_QUERY: &str = "pipeline";

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Missing `pipeline` query in {0}")]
  MissingPipeline(String),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Capture is not open")]
  NotOpen,
  #[error("No frame within {0} seconds")]
  Timeout(u64),
}

pub enum GStreamerInputBuilderItem {
  RtspSource(String),
  FileSource(String),
  Custom(String),
  H264Decode(DecodeBackend),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::RtspSource(location) => format!(
        "rtspsrc location={} latency=0 protocols=tcp drop-on-latency=true ! rtph264depay ! h264parse",
        location
      ),
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::Custom(description) => description.clone(),
      GStreamerInputBuilderItem::H264Decode(backend) => match backend {
        DecodeBackend::Hardware => HARDWARE_DECODER.to_string(),
        DecodeBackend::Software => SOFTWARE_DECODER.to_string(),
      },
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

impl DecodeBackend {
  /// 检查注册表中是否有硬件 H.264 解码器
  pub fn probe() -> Self {
    if gst::ElementFactory::find(HARDWARE_DECODER).is_some() {
      DecodeBackend::Hardware
    } else {
      DecodeBackend::Software
    }
  }
}

/// 基于 GStreamer 的采集句柄
///
/// 管道描述在构造时确定；`open` 创建并启动管道，`release` 停止并丢弃。
pub struct GStreamerCapture {
  address: String,
  description: String,
  backend: DecodeBackend,
  /// 文件源读到 EOS 是正常结束，网络流的 EOS 按故障处理
  finite: bool,
  pipeline: Option<(gst::Pipeline, gst_app::AppSink)>,
}

impl GStreamerCapture {
  pub fn accepts(url: &Url) -> bool {
    matches!(url.scheme(), "rtsp" | "file" | "gst")
  }

  fn build(address: String, items: Vec<GStreamerInputBuilderItem>, backend: DecodeBackend, finite: bool) -> Self {
    let basic_pipeline = items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let description = format!(
      "{} ! appsink name=sink drop=true sync=false max-buffers=1",
      basic_pipeline
    );
    info!("GStreamer pipeline description: {}", description);
    Self {
      address,
      description,
      backend,
      finite,
      pipeline: None,
    }
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  /// 从 `?pipeline=` 取出解码后的自定义管道描述
  fn custom_pipeline(url: &Url) -> Result<String, GStreamerInputError> {
    url
      .query_pairs()
      .find(|(key, _)| key == PIPELINE_QUERY)
      .map(|(_, value)| value.trim().to_string())
      .filter(|description| !description.is_empty())
      .ok_or_else(|| GStreamerInputError::MissingPipeline(url.to_string()))
  }

  fn check_bus(pipeline: &gst::Pipeline) -> Result<bool, GStreamerInputError> {
    let Some(bus) = pipeline.bus() else {
      return Ok(false);
    };
    while let Some(message) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      match message.view() {
        gst::MessageView::Error(err) => {
          return Err(GStreamerInputError::PipelineError(err.error().to_string()));
        }
        gst::MessageView::Eos(..) => return Ok(true),
        _ => {}
      }
    }
    Ok(false)
  }
}

impl FromUrl for GStreamerCapture {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::accepts(url) {
      return Err(GStreamerInputError::SchemeMismatch);
    }
    gst::init()?;

    let target = GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    };
    let capture = match url.scheme() {
      "rtsp" => {
        let backend = DecodeBackend::probe();
        let items = vec![
          GStreamerInputBuilderItem::RtspSource(url.to_string()),
          GStreamerInputBuilderItem::H264Decode(backend),
          target,
        ];
        Self::build(url.to_string(), items, backend, false)
      }
      "file" => {
        let items = vec![GStreamerInputBuilderItem::FileSource(url.path().to_string()), target];
        Self::build(url.to_string(), items, DecodeBackend::Software, true)
      }
      _ => {
        let description = Self::custom_pipeline(url)?;
        let items = vec![GStreamerInputBuilderItem::Custom(description), target];
        Self::build(url.to_string(), items, DecodeBackend::Software, true)
      }
    };
    Ok(capture)
  }
}

impl Capture for GStreamerCapture {
  type Error = GStreamerInputError;

  fn open(&mut self) -> Result<(), Self::Error> {
    self.release();

    let pipeline = gst::parse::launch(&self.description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }
    self.pipeline = Some((pipeline, appsink));
    Ok(())
  }

  fn read(&mut self) -> Result<Option<RgbFrame>, Self::Error> {
    let (pipeline, appsink) = self.pipeline.as_ref().ok_or(GStreamerInputError::NotOpen)?;

    match appsink.try_pull_sample(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS)) {
      Some(sample) => convert_sample(sample).map(Some),
      None => {
        let eos = appsink.is_eos() || Self::check_bus(pipeline)?;
        if eos && self.finite {
          return Ok(None);
        }
        if eos {
          return Err(GStreamerInputError::PipelineError("stream ended".to_string()));
        }
        Err(GStreamerInputError::Timeout(PULL_TIMEOUT_SECS))
      }
    }
  }

  fn release(&mut self) {
    if let Some((pipeline, _)) = self.pipeline.take()
      && let Err(e) = pipeline.set_state(gst::State::Null)
    {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }

  fn decode_backend(&self) -> DecodeBackend {
    self.backend
  }

  fn address(&self) -> &str {
    &self.address
  }
}

impl Drop for GStreamerCapture {
  fn drop(&mut self) {
    self.release();
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = width * 3;
  let expected_size = stride * height.saturating_sub(1) + row;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 每行末尾可能有对齐填充
  let mut packed = Vec::with_capacity(row * height);
  for h in 0..height {
    packed.extend_from_slice(&data[h * stride..h * stride + row]);
  }

  RgbFrame::from_raw(width as u32, height as u32, packed).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}
