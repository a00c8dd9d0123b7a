// 该文件是 Dockline （码头计数） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 把叠加后的帧逐张保存到会话目录
//!
//! URL 格式：`folder:///path/to/outputs?camera=117&record`，每个会话在根目录下建立
//! `cam_<camera>_<YYYYmmdd_HHMMSS>` 子目录，`record` 参数同时保存跟踪文本。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{
    Overlay, Render,
    draw::{Draw, Record, ToRgbImage},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: Option<Record>,
  frame_counter: AtomicU64,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let camera = uri
      .query_pairs()
      .find(|(k, _)| k == "camera")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| "0".to_string());
    let record = uri.query_pairs().any(|(k, _)| k == "record");

    Self::create(Path::new(uri.path()), &camera, record)
  }
}

impl DirectoryRecordOutput {
  pub fn create(root: &Path, camera_id: &str, record: bool) -> Result<Self, DirectoryRecordOutputError> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let directory = root.join(format!("cam_{}_{}", camera_id, timestamp));
    std::fs::create_dir_all(&directory)?;
    info!("叠加帧输出目录: {}", directory.display());

    Ok(DirectoryRecordOutput {
      directory,
      draw: Draw::default(),
      record: record.then_some(Record),
      frame_counter: AtomicU64::new(0),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&self) -> PathBuf {
    let id = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
    self.directory.join(format!("{:06}.png", id))
  }
}

impl Render<RgbFrame, Overlay> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    let path = self.frame_path();
    let mut image = frame.to_rgb_image();
    self.draw.draw_overlay(&mut image, result);
    image.save(&path)?;
    if let Some(record) = &self.record {
      record.record(result, &path)?;
    }
    Ok(())
  }

  fn location(&self) -> Option<String> {
    Some(self.directory.display().to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;
  use crate::output::TrackOverlay;

  #[test]
  fn writes_numbered_frames_into_session_directory() {
    let root = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!(
      "folder://{}?camera=117&record",
      root.path().display()
    ))
    .unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert!(
      output
        .directory()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("cam_117_")
    );

    let overlay = Overlay {
      line_y: 5.0,
      count: 1,
      tracks: vec![TrackOverlay {
        id: 3,
        bbox: BBox::new(1.0, 1.0, 6.0, 6.0),
        label: "carton".to_string(),
        score: 0.75,
        counted: true,
      }],
    };
    let frame = RgbFrame::blank(8, 8);
    output.render_result(&frame, &overlay).unwrap();
    output.render_result(&frame, &overlay).unwrap();

    assert!(output.directory().join("000001.png").exists());
    assert!(output.directory().join("000002.png").exists());
    let text = std::fs::read_to_string(output.directory().join("000002.txt")).unwrap();
    assert!(text.starts_with("count, 1"));
    assert!(text.contains("3, carton"));
    assert_eq!(
      output.location(),
      Some(output.directory().display().to_string())
    );
  }
}
