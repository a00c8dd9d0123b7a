// 该文件是 Dockline （码头计数） 项目的一部分。
// src/filter.rs - 检测过滤与非极大值抑制
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

use crate::model::Detection;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_ALLOWED_LABELS: [&str; 3] = ["jerrycan_bundle", "carton", "carton_brown"];

#[derive(Debug, Clone)]
pub struct FilterConfig {
  /// 置信度必须严格大于该值
  pub confidence_threshold: f32,
  /// 同类别 IoU 达到该值即被抑制
  pub nms_iou_threshold: f32,
  /// 允许的类别（小写，比较时忽略大小写）
  pub allowed_labels: Vec<String>,
}

impl Default for FilterConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_iou_threshold: DEFAULT_NMS_IOU_THRESHOLD,
      allowed_labels: DEFAULT_ALLOWED_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

/// 单帧检测过滤器：类别白名单、置信度阈值、按类别 NMS
#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
  config: FilterConfig,
}

impl DetectionFilter {
  pub fn new(config: FilterConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &FilterConfig {
    &self.config
  }

  pub fn allows(&self, detection: &Detection) -> bool {
    detection.score > self.config.confidence_threshold
      && self
        .config
        .allowed_labels
        .iter()
        .any(|label| label.eq_ignore_ascii_case(&detection.label))
  }

  pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
    let kept = detections.into_iter().filter(|d| self.allows(d)).collect();
    nms(kept, self.config.nms_iou_threshold)
  }
}

/// 按类别的非极大值抑制
///
/// 按置信度降序（稳定排序）依次保留最高者，并丢弃与其同类别且
/// IoU 不小于 `iou_threshold` 的其余检测。不同类别之间互不抑制。
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    let suppressed = kept
      .iter()
      .any(|best| best.label == candidate.label && best.bbox.iou(&candidate.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn det(x1: f32, y1: f32, x2: f32, y2: f32, label: &str, score: f32) -> Detection {
    Detection::new(BBox::new(x1, y1, x2, y2), label, score)
  }

  #[test]
  fn overlapping_same_label_keeps_highest() {
    let dets = vec![
      det(0.0, 0.0, 100.0, 100.0, "carton", 0.9),
      det(5.0, 5.0, 100.0, 100.0, "carton", 0.8),
    ];
    let kept = nms(dets, 0.5);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn different_labels_never_suppress() {
    let dets = vec![
      det(0.0, 0.0, 100.0, 100.0, "carton", 0.9),
      det(0.0, 0.0, 100.0, 100.0, "carton_brown", 0.8),
    ];
    assert_eq!(nms(dets, 0.5).len(), 2);
  }

  #[test]
  fn ordering_is_by_confidence_and_stable() {
    let dets = vec![
      det(0.0, 0.0, 10.0, 10.0, "carton", 0.7),
      det(100.0, 0.0, 110.0, 10.0, "carton", 0.9),
      det(200.0, 0.0, 210.0, 10.0, "carton", 0.7),
    ];
    let kept = nms(dets, 0.5);
    let xs: Vec<f32> = kept.iter().map(|d| d.bbox.x1).collect();
    assert_eq!(xs, vec![100.0, 0.0, 200.0]);
  }

  #[test]
  fn suppression_only_against_kept_detections() {
    // b 被 a 抑制，c 只与 b 重叠，所以保留
    let dets = vec![
      det(0.0, 0.0, 100.0, 100.0, "carton", 0.9),
      det(30.0, 0.0, 130.0, 100.0, "carton", 0.8),
      det(80.0, 0.0, 180.0, 100.0, "carton", 0.7),
    ];
    let kept = nms(dets, 0.5);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn filter_drops_low_confidence_and_unknown_labels() {
    let filter = DetectionFilter::default();
    let dets = vec![
      det(0.0, 0.0, 10.0, 10.0, "carton", 0.6),
      det(0.0, 0.0, 10.0, 10.0, "person", 0.99),
      det(50.0, 50.0, 60.0, 60.0, "Jerrycan_Bundle", 0.61),
    ];
    let kept = filter.apply(dets);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].label, "Jerrycan_Bundle");
  }

  #[test]
  fn no_same_label_pair_survives_above_threshold() {
    // 简单的线性同余序列生成可复现的随机框
    let mut seed = 0x2545_f491u32;
    let mut next = move || {
      seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
      (seed >> 8) as f32 / (1u32 << 24) as f32
    };
    let labels = ["carton", "carton_brown", "jerrycan_bundle"];

    for _ in 0..50 {
      let dets: Vec<Detection> = (0..20)
        .map(|i| {
          let x = next() * 200.0;
          let y = next() * 200.0;
          let w = 20.0 + next() * 60.0;
          let h = 20.0 + next() * 60.0;
          det(x, y, x + w, y + h, labels[i % 3], 0.61 + next() * 0.39)
        })
        .collect();
      let kept = DetectionFilter::default().apply(dets);
      for (i, a) in kept.iter().enumerate() {
        for b in kept.iter().skip(i + 1) {
          if a.label == b.label {
            assert!(a.bbox.iou(&b.bbox) < 0.5);
          }
        }
      }
    }
  }
}
