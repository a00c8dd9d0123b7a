// 该文件是 Dockline （码头计数） 项目的一部分。
// src/config.rs - 会话参数
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

use crate::filter::FilterConfig;
use crate::tracker::TrackerConfig;

pub const DEFAULT_LINE_FRACTION: f32 = 0.75;
pub const DEFAULT_FRAME_SKIP: u32 = 2;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(120);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 一次计数会话的全部参数
#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub filter: FilterConfig,
  pub tracker: TrackerConfig,
  /// 计数线位置，占帧高的比例
  pub line_fraction: f32,
  /// 每 N 帧做一次完整检测
  pub frame_skip: u32,
  /// 断线重连前的等待时间
  pub reconnect_backoff: Duration,
  /// 原始视频分段时长
  pub segment_duration: Duration,
  /// `stop` 等待两个循环退出的上限
  pub join_timeout: Duration,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      filter: FilterConfig::default(),
      tracker: TrackerConfig::default(),
      line_fraction: DEFAULT_LINE_FRACTION,
      frame_skip: DEFAULT_FRAME_SKIP,
      reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
      segment_duration: DEFAULT_SEGMENT_DURATION,
      join_timeout: DEFAULT_JOIN_TIMEOUT,
    }
  }
}

impl SessionConfig {
  pub fn with_frame_skip(mut self, frame_skip: u32) -> Self {
    self.frame_skip = frame_skip.max(1);
    self
  }

  pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
    self.reconnect_backoff = backoff;
    self
  }

  pub fn with_segment_duration(mut self, duration: Duration) -> Self {
    self.segment_duration = duration;
    self
  }

  pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
    self.join_timeout = timeout;
    self
  }
}
