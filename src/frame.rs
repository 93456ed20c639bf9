// 该文件是 Yingxi （影析） 项目的一部分。
// src/frame.rs - 帧、采样片段与音轨定义
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

use image::RgbImage;

/// 从视频中解码出的一帧 RGB 图像（HWC 布局，每通道 8 位）
#[derive(Debug, Clone)]
pub struct Frame {
  /// 在源视频中的帧序号
  pub index: u64,
  /// 呈现时间（毫秒），`index * 1000 / fps`
  pub timestamp_ms: f64,
  pub image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, fps: f64, image: RgbImage) -> Self {
    Self {
      index,
      timestamp_ms: index as f64 * 1000.0 / fps,
      image,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

/// 解码后的完整音轨，交错存储的 16 位小端 PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
  pub sample_rate: u32,
  pub channels: u32,
  pcm: Vec<u8>,
}

impl AudioTrack {
  pub fn new(sample_rate: u32, channels: u32, pcm: Vec<u8>) -> Self {
    Self {
      sample_rate,
      channels,
      pcm,
    }
  }

  /// ffmpeg 的原始 PCM 输入格式名
  pub const SAMPLE_FORMAT: &'static str = "s16le";

  pub fn as_bytes(&self) -> &[u8] {
    &self.pcm
  }

  pub fn is_empty(&self) -> bool {
    self.pcm.is_empty()
  }

  pub fn duration_ms(&self) -> f64 {
    let frame_bytes = 2 * self.channels.max(1) as usize;
    if self.sample_rate == 0 {
      return 0.0;
    }
    (self.pcm.len() / frame_bytes) as f64 * 1000.0 / self.sample_rate as f64
  }
}

/// 一次运行的采样结果
///
/// 由采样器创建一次，按所有权依次交给编排器和重组器。
#[derive(Debug, Clone)]
pub struct SampledClip {
  /// 源容器的原始帧率
  pub fps: f64,
  pub frames: Vec<Frame>,
  /// `None` 表示没有可用音轨
  pub audio: Option<AudioTrack>,
}

impl SampledClip {
  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn indices(&self) -> Vec<u64> {
    self.frames.iter().map(|f| f.index).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_timestamp_follows_fps() {
    let frame = Frame::new(15, 30.0, RgbImage::new(4, 2));
    assert_eq!(frame.timestamp_ms, 500.0);
    assert_eq!((frame.width(), frame.height()), (4, 2));
  }

  #[test]
  fn audio_duration_counts_interleaved_samples() {
    // 1 秒、双声道、8 kHz
    let track = AudioTrack::new(8000, 2, vec![0u8; 8000 * 2 * 2]);
    assert!((track.duration_ms() - 1000.0).abs() < f64::EPSILON);
    assert!(!track.is_empty());
  }
}
