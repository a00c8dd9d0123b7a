// 该文件是 Dockline （码头计数） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use dockline::SessionConfig;

/// Dockline 装卸口过线计数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头 ID
  #[arg(long, value_name = "CAMERA")]
  pub camera: String,

  /// 外部 visit ID，会话结果按它保存
  #[arg(long, value_name = "VISIT")]
  pub visit: String,

  /// 摄像头地址表（JSON 对象：摄像头 ID → 流地址）
  #[arg(long, value_name = "FILE")]
  pub cameras: Option<PathBuf>,

  /// 直接指定流地址，覆盖地址表
  /// 支持格式:
  /// - rtsp://host/stream
  /// - file:///path/to/video.mp4
  /// - image:///path/to/frames
  #[arg(long, value_name = "SOURCE")]
  pub stream: Option<String>,

  /// 检测器，目前支持检测回放 detlog:///path/to/detections.jsonl
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 叠加帧输出（null:// 或 folder:///path/to/outputs）
  #[arg(long, default_value = "null://", value_name = "OUTPUT")]
  pub output: Url,

  /// 原始视频分段目录，不指定则不录制
  #[arg(long, value_name = "DIR")]
  pub segments: Option<PathBuf>,

  /// 会话结果日志
  #[arg(long, default_value = "visits.jsonl", value_name = "FILE")]
  pub visit_log: PathBuf,

  /// 已处理分段账本
  #[arg(long, default_value = "processed.json", value_name = "FILE")]
  pub ledger: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.6", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 计数线位置，占帧高的比例
  #[arg(long, default_value = "0.75", value_name = "FRACTION")]
  pub line_fraction: f32,

  /// 每 N 帧做一次检测
  #[arg(long, default_value = "2", value_name = "N")]
  pub frame_skip: u32,

  /// 断线重连等待（毫秒）
  #[arg(long, default_value = "1000", value_name = "MILLIS")]
  pub reconnect_ms: u64,

  /// 原始视频分段时长（秒）
  #[arg(long, default_value = "120", value_name = "SECONDS")]
  pub segment_secs: u64,

  /// 停止时等待处理循环退出的上限（秒）
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub join_timeout_secs: u64,
}

impl Args {
  pub fn session_config(&self) -> SessionConfig {
    let mut config = SessionConfig::default()
      .with_frame_skip(self.frame_skip)
      .with_reconnect_backoff(Duration::from_millis(self.reconnect_ms))
      .with_segment_duration(Duration::from_secs(self.segment_secs))
      .with_join_timeout(Duration::from_secs(self.join_timeout_secs));
    config.filter.confidence_threshold = self.confidence;
    config.filter.nms_iou_threshold = self.nms_threshold;
    config.line_fraction = self.line_fraction;
    config
  }
}
