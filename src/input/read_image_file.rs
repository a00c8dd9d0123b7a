// 该文件是 Dockline （码头计数） 项目的一部分。
// src/input/read_image_file.rs - 图像序列输入
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

//! 把目录里的图片按文件名顺序当作一路视频读取，`image:///path/to/frames`。

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, input::Capture};

#[derive(Error, Debug)]
pub enum ImageSequenceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Image buffer does not match {width}x{height}")]
  BufferMismatch { width: u32, height: u32 },
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceCapture {
  directory: PathBuf,
  address: String,
  files: Vec<PathBuf>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageSequenceCapture {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageSequenceCapture {
  type Error = ImageSequenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceError::SchemaMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

impl ImageSequenceCapture {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    let directory = directory.as_ref().to_path_buf();
    let address = format!("{}://{}", Self::SCHEME, directory.display());
    Self {
      directory,
      address,
      files: Vec::new(),
      cursor: 0,
    }
  }

  fn list_frames(&self) -> Result<Vec<PathBuf>, ImageSequenceError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&self.directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
      if is_image {
        files.push(path);
      }
    }
    files.sort();
    Ok(files)
  }

  pub fn remaining(&self) -> usize {
    self.files.len().saturating_sub(self.cursor)
  }
}

impl Capture for ImageSequenceCapture {
  type Error = ImageSequenceError;

  /// 重新打开时保留读取位置，断线重连后从下一张继续
  fn open(&mut self) -> Result<(), Self::Error> {
    self.files = self.list_frames()?;
    debug!("{} 中共有 {} 张图片", self.directory.display(), self.files.len());
    Ok(())
  }

  fn read(&mut self) -> Result<Option<RgbFrame>, Self::Error> {
    let Some(path) = self.files.get(self.cursor).cloned() else {
      return Ok(None);
    };
    // 先前进，坏文件在重连后被跳过
    self.cursor += 1;

    let image = image::open(&path)?.to_rgb8();
    let (width, height) = image.dimensions();
    RgbFrame::from_raw(width, height, image.into_raw())
      .map(Some)
      .ok_or(ImageSequenceError::BufferMismatch { width, height })
  }

  fn release(&mut self) {}

  fn address(&self) -> &str {
    &self.address
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_frame(dir: &Path, name: &str, value: u8) {
    let image = RgbImage::from_pixel(4, 3, Rgb([value, 0, 0]));
    image.save(dir.join(name)).unwrap();
  }

  #[test]
  fn reads_frames_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frame(dir.path(), "0002.png", 20);
    write_frame(dir.path(), "0001.png", 10);
    std::fs::write(dir.path().join("readme.txt"), "skip").unwrap();

    let url = Url::parse(&format!("image://{}", dir.path().display())).unwrap();
    let mut capture = ImageSequenceCapture::from_url(&url).unwrap();
    capture.open().unwrap();
    assert_eq!(capture.remaining(), 2);

    let first = capture.read().unwrap().unwrap();
    assert_eq!((first.width(), first.height()), (4, 3));
    assert_eq!(first.as_bytes()[0], 10);
    let second = capture.read().unwrap().unwrap();
    assert_eq!(second.as_bytes()[0], 20);
    assert!(capture.read().unwrap().is_none());
  }

  #[test]
  fn corrupt_file_is_skipped_after_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("0001.png"), b"not a png").unwrap();
    write_frame(dir.path(), "0002.png", 7);

    let mut capture = ImageSequenceCapture::new(dir.path());
    capture.open().unwrap();
    assert!(capture.read().is_err());
    capture.release();
    capture.open().unwrap();
    assert_eq!(capture.read().unwrap().unwrap().as_bytes()[0], 7);
  }

  #[test]
  fn missing_directory_fails_to_open() {
    let mut capture = ImageSequenceCapture::new("/nonexistent/dockline/frames");
    assert!(matches!(capture.open(), Err(ImageSequenceError::IoError(_))));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      ImageSequenceCapture::from_url(&url),
      Err(ImageSequenceError::SchemaMismatch)
    ));
  }
}
