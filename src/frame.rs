// 该文件是 Dockline （码头计数） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

const RGB_CHANNELS: usize = 3;

/// 打包的 RGB（HWC）帧
///
/// 摄像头分辨率在运行时才能确定，所以宽高不是类型参数。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  /// 由打包 RGB 数据构造帧，长度不符时返回 `None`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != Self::byte_len(width, height) {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 全黑帧
  pub fn blank(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; Self::byte_len(width, height)].into_boxed_slice(),
    }
  }

  fn byte_len(width: u32, height: u32) -> usize {
    RGB_CHANNELS * width as usize * height as usize
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.data.into_vec()
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_raw_checks_length() {
    assert!(RgbFrame::from_raw(2, 2, vec![0; 12]).is_some());
    assert!(RgbFrame::from_raw(2, 2, vec![0; 11]).is_none());
  }

  #[test]
  fn blank_frame_has_rgb_layout() {
    let frame = RgbFrame::blank(4, 3);
    assert_eq!(frame.as_bytes().len(), 36);
    assert_eq!(frame.channels(), 3);
    assert_eq!((frame.width(), frame.height()), (4, 3));
  }
}
