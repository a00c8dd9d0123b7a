// 该文件是 Dockline （码头计数） 项目的一部分。
// src/tracker.rs - 贪心 IoU 跟踪与过线计数
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

//! # 跟踪与计数
//!
//! 每帧把检测结果按输入顺序逐个贪心地匹配到上一帧 IoU 最高的未占用轨迹，
//! 不做全局最优分配（没有匈牙利/交换步骤），歧义情况下的绑定结果取决于
//! 检测的输入顺序。
//!
//! 轨迹的垂直中心从计数线上方（严格小于）移动到线上或线下时计数一次，
//! 每条轨迹终生最多计数一次，轨迹 ID 单调递增且不复用。

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::model::{BBox, Detection};

pub const DEFAULT_MATCH_IOU_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_MISSED: u32 = 5;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
  /// IoU 必须严格大于该值才算匹配
  pub match_iou_threshold: f32,
  /// 连续丢失达到该帧数后移除轨迹
  pub max_missed: u32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      match_iou_threshold: DEFAULT_MATCH_IOU_THRESHOLD,
      max_missed: DEFAULT_MAX_MISSED,
    }
  }
}

/// 水平计数线，会话内固定不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossingLine {
  y: f32,
}

impl CrossingLine {
  pub fn new(y: f32) -> Self {
    Self { y }
  }

  /// 按帧高的比例放置计数线（向下取整到像素）
  pub fn at_fraction(frame_height: u32, fraction: f32) -> Self {
    Self {
      y: (frame_height as f32 * fraction).floor(),
    }
  }

  pub fn y(&self) -> f32 {
    self.y
  }

  /// 从线上方移动到线上或线下
  pub fn is_downward_crossing(&self, previous_y: f32, current_y: f32) -> bool {
    previous_y < self.y && current_y >= self.y
  }
}

#[derive(Debug, Clone)]
pub struct Track {
  id: u64,
  bbox: BBox,
  label: String,
  score: f32,
  last_y: f32,
  missed: u32,
  counted: bool,
}

impl Track {
  fn from_detection(id: u64, detection: &Detection) -> Self {
    Self {
      id,
      bbox: detection.bbox,
      label: detection.label.clone(),
      score: detection.score,
      last_y: detection.bbox.center_y(),
      missed: 0,
      counted: false,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn bbox(&self) -> &BBox {
    &self.bbox
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn score(&self) -> f32 {
    self.score
  }

  /// 最近一次观测到的垂直中心
  pub fn last_y(&self) -> f32 {
    self.last_y
  }

  pub fn missed(&self) -> u32 {
    self.missed
  }

  pub fn counted(&self) -> bool {
    self.counted
  }
}

/// 单调递增的过线计数器
#[derive(Debug, Default, Clone)]
pub struct CrossingCounter {
  count: u64,
}

impl CrossingCounter {
  pub fn count(&self) -> u64 {
    self.count
  }

  /// 用新中心检查轨迹是否过线，`track.last_y` 此时仍是上一次的位置
  ///
  /// 计数时设置轨迹的已计数标记，返回是否产生了新的计数。
  pub fn observe(&mut self, track: &mut Track, current_y: f32, line: CrossingLine) -> bool {
    if track.counted || !line.is_downward_crossing(track.last_y, current_y) {
      return false;
    }
    track.counted = true;
    self.count += 1;
    true
  }
}

/// 贪心 IoU 跟踪器，同时维护过线计数
#[derive(Debug, Default)]
pub struct Tracker {
  config: TrackerConfig,
  tracks: BTreeMap<u64, Track>,
  next_id: u64,
  counter: CrossingCounter,
}

impl Tracker {
  pub fn new(config: TrackerConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }

  pub fn count(&self) -> u64 {
    self.counter.count()
  }

  pub fn tracks(&self) -> impl Iterator<Item = &Track> {
    self.tracks.values()
  }

  pub fn track(&self, id: u64) -> Option<&Track> {
    self.tracks.get(&id)
  }

  pub fn len(&self) -> usize {
    self.tracks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tracks.is_empty()
  }

  /// 用本帧检测更新轨迹并返回最新计数
  ///
  /// 空检测列表只会让已有轨迹老化。
  pub fn update(&mut self, detections: &[Detection], line: CrossingLine) -> u64 {
    let mut previous = std::mem::take(&mut self.tracks);
    let mut used: HashSet<u64> = HashSet::with_capacity(detections.len());

    for detection in detections {
      let mut best: Option<(u64, f32)> = None;
      for (id, track) in previous.iter() {
        if used.contains(id) {
          continue;
        }
        let iou = detection.bbox.iou(&track.bbox);
        if iou > self.config.match_iou_threshold && best.is_none_or(|(_, b)| iou > b) {
          best = Some((*id, iou));
        }
      }

      let current_y = detection.bbox.center_y();
      match best.and_then(|(id, _)| previous.remove(&id)) {
        Some(mut track) => {
          used.insert(track.id);
          if self.counter.observe(&mut track, current_y, line) {
            info!(
              "轨迹 {} ({}) 越过计数线 y={}，当前计数 {}",
              track.id,
              detection.label,
              line.y(),
              self.counter.count()
            );
          }
          track.bbox = detection.bbox;
          track.label = detection.label.clone();
          track.score = detection.score;
          track.last_y = current_y;
          track.missed = 0;
          self.tracks.insert(track.id, track);
        }
        None => {
          let id = self.next_id;
          self.next_id += 1;
          debug!("新建轨迹 {} ({})", id, detection.label);
          self.tracks.insert(id, Track::from_detection(id, detection));
        }
      }
    }

    for (id, mut track) in previous {
      track.missed += 1;
      if track.missed < self.config.max_missed {
        self.tracks.insert(id, track);
      } else {
        debug!("轨迹 {} 连续丢失 {} 帧，移除", id, track.missed);
      }
    }

    self.counter.count()
  }
}
