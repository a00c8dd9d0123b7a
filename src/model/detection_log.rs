// 该文件是 Dockline （码头计数） 项目的一部分。
// src/model/detection_log.rs - 检测记录回放
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

//! # 检测记录回放
//!
//! 从 JSON Lines 文件回放预先记录的检测结果，每一行对应一次推理：
//!
//! ```text
//! [{"bbox": [0, 0, 100, 100], "label": "carton", "score": 0.9}]
//! []
//! ```
//!
//! 记录用完之后返回空结果。URL 格式为 `detlog:///path/to/detections.jsonl`。

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{BBox, Detection, Detector, ModelError},
};

pub struct DetectionLog {
  frames: Mutex<VecDeque<Vec<Detection>>>,
  aborted: AtomicBool,
}

impl DetectionLog {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let log = Self::parse(&text)?;
    info!("载入检测记录 {}，共 {} 帧", path.display(), log.len());
    Ok(log)
  }

  pub fn parse(text: &str) -> Result<Self, ModelError> {
    let mut frames = VecDeque::new();
    for (index, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      frames.push_back(parse_line(index + 1, line)?);
    }
    Ok(Self {
      frames: Mutex::new(frames),
      aborted: AtomicBool::new(false),
    })
  }

  /// 剩余帧数
  pub fn len(&self) -> usize {
    self
      .frames
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 记录文件中的一条检测
#[derive(Debug, Deserialize)]
struct DetectionRecord {
  bbox: [f32; 4],
  label: String,
  score: f32,
}

impl From<DetectionRecord> for Detection {
  fn from(record: DetectionRecord) -> Self {
    let [x1, y1, x2, y2] = record.bbox;
    Detection::new(BBox::new(x1, y1, x2, y2), record.label, record.score)
  }
}

fn parse_line(line: usize, text: &str) -> Result<Vec<Detection>, ModelError> {
  let records: Vec<DetectionRecord> =
    serde_json::from_str(text).map_err(|e| ModelError::Malformed {
      line,
      reason: e.to_string(),
    })?;
  Ok(records.into_iter().map(Detection::from).collect())
}

impl FromUrlWithScheme for DetectionLog {
  const SCHEME: &'static str = "detlog";
}

impl FromUrl for DetectionLog {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl Detector for DetectionLog {
  type Error = ModelError;

  fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, Self::Error> {
    if self.aborted.load(Ordering::Acquire) {
      return Err(ModelError::Aborted);
    }
    let next = self
      .frames
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .pop_front();
    if next.is_none() {
      debug!("检测记录已用完");
    }
    Ok(next.unwrap_or_default())
  }

  fn abort(&self) {
    self.aborted.store(true, Ordering::Release);
  }
}
