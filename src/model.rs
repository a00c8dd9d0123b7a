// 该文件是 Dockline （码头计数） 项目的一部分。
// src/model.rs - 检测结果与检测器
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

use crate::frame::RgbFrame;

/// 像素坐标下的边框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  #[inline]
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  #[inline]
  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  #[inline]
  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  #[inline]
  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 垂直中心，用于过线判断
  #[inline]
  pub fn center_y(&self) -> f32 {
    (self.y1 + self.y2) / 2.0
  }

  /// 交并比，并集面积为 0 时返回 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = self.area() + other.area() - inter_area;

    if union_area > 0.0 {
      inter_area / union_area
    } else {
      0.0
    }
  }
}

/// 单帧的一个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub label: String,
  pub score: f32,
}

impl Detection {
  pub fn new(bbox: BBox, label: impl Into<String>, score: f32) -> Self {
    Self {
      bbox,
      label: label.into(),
      score,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("检测已被中止")]
  Aborted,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测记录第 {line} 行格式错误: {reason}")]
  Malformed { line: usize, reason: String },
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 检测器
///
/// 推理线程和会话控制器共享同一个检测器，所以只需要 `&self`。
pub trait Detector: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, Self::Error>;

  /// 请求中止正在进行的推理，默认不支持
  fn abort(&self) {}
}

impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
  type Error = D::Error;

  fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, Self::Error> {
    (**self).detect(frame)
  }

  fn abort(&self) {
    (**self).abort()
  }
}

mod detection_log;
pub use self::detection_log::DetectionLog;
