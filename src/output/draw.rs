// 该文件是 Dockline （码头计数） 项目的一部分。
// src/output/draw.rs - 跟踪与计数结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::{
  frame::RgbFrame,
  output::{Overlay, TrackOverlay},
};

const LINE_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const JERRYCAN_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const DEFAULT_BOX_COLOR: [u8; 3] = [0, 255, 255]; // 青色
const BOX_THICKNESS: i32 = 3;
const LINE_THICKNESS: i32 = 2;
const COUNT_BACKGROUND: [u8; 3] = [0, 0, 0];
// 计数用七段数码显示
const DIGIT_WIDTH: i32 = 12;
const DIGIT_HEIGHT: i32 = 22;
const DIGIT_STROKE: i32 = 3;
const DIGIT_GAP: i32 = 4;
const DIGIT_PADDING: i32 = 4;
const COUNT_ORIGIN: (i32, i32) = (20, 20);
/// 段位顺序 a b c d e f g
const DIGIT_SEGMENTS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

pub struct Draw {
  line_color: [u8; 3],
  box_thickness: i32,
  line_thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      line_color: LINE_COLOR,
      box_thickness: BOX_THICKNESS,
      line_thickness: LINE_THICKNESS,
    }
  }
}

impl Draw {
  pub fn draw_overlay(&self, image: &mut RgbImage, overlay: &Overlay) {
    self.draw_counting_line(image, overlay.line_y);
    for track in overlay.tracks.iter() {
      self.draw_track(image, track);
    }
    self.draw_count(image, overlay.count);
  }

  fn draw_counting_line(&self, image: &mut RgbImage, line_y: f32) {
    let w = image.width() as f32;
    for offset in 0..self.line_thickness {
      let y = line_y + offset as f32;
      draw_line_segment_mut(image, (0.0, y), (w - 1.0, y), Rgb(self.line_color));
    }
  }

  fn draw_track(&self, image: &mut RgbImage, track: &TrackOverlay) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (track.bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (track.bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (track.bbox.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (track.bbox.y2.ceil() as i32).clamp(0, h - 1);

    let color = Rgb(box_color(&track.label));
    // 向内收缩绘制来加粗边框
    for t in 0..self.box_thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  fn draw_count(&self, image: &mut RgbImage, count: u64) {
    let digits: Vec<usize> = count
      .to_string()
      .bytes()
      .map(|b| (b - b'0') as usize)
      .collect();
    let n = digits.len() as i32;
    let (x0, y0) = COUNT_ORIGIN;

    let width = n * DIGIT_WIDTH + (n - 1) * DIGIT_GAP + 2 * DIGIT_PADDING;
    let height = DIGIT_HEIGHT + 2 * DIGIT_PADDING;
    let background = Rect::at(x0 - DIGIT_PADDING, y0 - DIGIT_PADDING).of_size(width as u32, height as u32);
    draw_filled_rect_mut(image, background, Rgb(COUNT_BACKGROUND));

    for (i, digit) in digits.into_iter().enumerate() {
      let x = x0 + i as i32 * (DIGIT_WIDTH + DIGIT_GAP);
      draw_digit(image, x, y0, DIGIT_SEGMENTS[digit], Rgb(self.line_color));
    }
  }
}

fn draw_digit(image: &mut RgbImage, x: i32, y: i32, segments: u8, color: Rgb<u8>) {
  let (w, h, t) = (DIGIT_WIDTH, DIGIT_HEIGHT, DIGIT_STROKE);
  let half = h / 2;
  let rects = [
    (0, 0, w, t),                // a
    (w - t, 0, t, half),         // b
    (w - t, half, t, h - half),  // c
    (0, h - t, w, t),            // d
    (0, half, t, h - half),      // e
    (0, 0, t, half),             // f
    (0, half - t / 2, w, t),     // g
  ];
  for (bit, (dx, dy, rw, rh)) in rects.into_iter().enumerate() {
    if segments & (1 << bit) != 0 {
      let rect = Rect::at(x + dx, y + dy).of_size(rw as u32, rh as u32);
      draw_filled_rect_mut(image, rect, color);
    }
  }
}

fn box_color(label: &str) -> [u8; 3] {
  if label.eq_ignore_ascii_case("jerrycan_bundle") {
    JERRYCAN_COLOR
  } else {
    DEFAULT_BOX_COLOR
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for RgbFrame {
  fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_raw(self.width(), self.height(), self.as_bytes().to_vec())
      .unwrap_or_else(|| RgbImage::new(self.width(), self.height()))
  }
}

impl ToRgbImage for RgbImage {
  fn to_rgb_image(&self) -> RgbImage {
    self.clone()
  }
}

/// 把叠加状态写成文本，与图像同名
pub struct Record;

impl Record {
  pub fn record(&self, overlay: &Overlay, path: &std::path::Path) -> Result<(), std::io::Error> {
    let mut records = vec![format!("count, {}, line, {:.1}", overlay.count, overlay.line_y)];
    for track in overlay.tracks.iter() {
      records.push(format!(
        "{}, {}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}, {}",
        track.id,
        track.label,
        track.score,
        track.bbox.x1,
        track.bbox.y1,
        track.bbox.x2,
        track.bbox.y2,
        track.counted
      ));
    }
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn overlay() -> Overlay {
    Overlay {
      line_y: 30.0,
      count: 2,
      tracks: vec![TrackOverlay {
        id: 0,
        bbox: BBox::new(40.0, 40.0, 60.0, 60.0),
        label: "jerrycan_bundle".to_string(),
        score: 0.9,
        counted: false,
      }],
    }
  }

  #[test]
  fn draws_line_box_and_count() {
    let mut image = RgbImage::new(100, 80);
    Draw::default().draw_overlay(&mut image, &overlay());

    assert_eq!(image.get_pixel(50, 30), &Rgb(LINE_COLOR));
    assert_eq!(image.get_pixel(40, 50), &Rgb(JERRYCAN_COLOR));
    assert_eq!(image.get_pixel(50, 50), &Rgb([0, 0, 0]));
    // 数字 2：a 段亮，f 段不亮
    assert_eq!(image.get_pixel(26, 21), &Rgb(LINE_COLOR));
    assert_eq!(image.get_pixel(21, 25), &Rgb(COUNT_BACKGROUND));
  }

  #[test]
  fn large_counts_are_drawn_in_full() {
    let mut image = RgbImage::new(200, 80);
    let mut overlay = overlay();
    overlay.count = 1234;
    overlay.tracks.clear();
    Draw::default().draw_overlay(&mut image, &overlay);

    // 第四位数字 4：b 段亮，a 段不亮
    let x = COUNT_ORIGIN.0 + 3 * (DIGIT_WIDTH + DIGIT_GAP);
    let y = COUNT_ORIGIN.1;
    assert_eq!(
      image.get_pixel((x + DIGIT_WIDTH - 1) as u32, (y + 5) as u32),
      &Rgb(LINE_COLOR)
    );
    assert_eq!(
      image.get_pixel((x + DIGIT_WIDTH / 2) as u32, (y + 1) as u32),
      &Rgb(COUNT_BACKGROUND)
    );
  }

  #[test]
  fn boxes_outside_the_frame_are_clamped() {
    let mut image = RgbImage::new(20, 20);
    let mut overlay = overlay();
    overlay.line_y = 100.0;
    overlay.tracks[0].bbox = BBox::new(-50.0, -50.0, 500.0, 500.0);
    Draw::default().draw_overlay(&mut image, &overlay);
    assert_eq!(image.get_pixel(0, 10), &Rgb(JERRYCAN_COLOR));
  }

  #[test]
  fn frame_converts_to_image() {
    let mut frame = RgbFrame::blank(2, 1);
    frame.as_mut()[3] = 200;
    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(1, 0), &Rgb([200, 0, 0]));
  }
}
