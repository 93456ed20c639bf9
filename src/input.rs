// 该文件是 Yingxi （影析） 项目的一部分。
// src/input.rs - 视频输入与按时间窗采样
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{AudioTrack, Frame, SampledClip};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoSource};

/// 已打开的视频流
///
/// 迭代器按解码顺序逐帧产出 RGB 图像，流结束或读取失败时返回 `None`。
pub trait VideoSource: Iterator<Item = RgbImage> {
  /// 容器声明的原始帧率
  fn fps(&self) -> f64;

  /// 容器声明的总帧数，未知时为 `None`
  fn declared_frames(&self) -> Option<u64>;

  /// 解码完整音轨；没有音轨或解码失败时返回 `None`
  fn take_audio(&mut self) -> Option<AudioTrack>;
}

#[derive(Error, Debug)]
pub enum SampleError {
  /// 视频文件不存在、不可读或容器无法识别
  #[error("无法打开视频 {path}: {source}")]
  Open {
    path: PathBuf,
    source: std::io::Error,
  },
  /// 采样周期不是正有限数
  #[error("采样周期必须为正数: {0}")]
  InvalidPeriod(f64),
  /// 视频源报告的帧率无效
  #[error("视频帧率无效: {0}")]
  InvalidFrameRate(f64),
  /// GStreamer 解码失败
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 按时间窗采样
///
/// 第 `i` 帧的呈现时间 `t = i * 1000 / fps` 落在第 `floor(t / period)` 个窗口内，
/// 每个窗口只选中落入其中的第一帧。`period_ms` 为 `None` 时选中每一帧。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameSampler {
  period_ms: Option<f64>,
}

impl FrameSampler {
  pub fn new(period_ms: Option<f64>) -> Result<Self, SampleError> {
    if let Some(period) = period_ms
      && !(period.is_finite() && period > 0.0)
    {
      return Err(SampleError::InvalidPeriod(period));
    }
    Ok(Self { period_ms })
  }

  pub fn every_frame() -> Self {
    Self { period_ms: None }
  }

  pub fn is_selected(&self, index: u64, fps: f64) -> bool {
    let Some(period) = self.period_ms else {
      return true;
    };
    // 窗口序号对帧序号单调，相邻两帧序号不同即进入了新窗口
    let window = |i: u64| (i as f64 * 1000.0 / (fps * period)).floor();
    index == 0 || window(index) > window(index - 1)
  }

  /// 从已打开的视频源中抽取帧，并尝试取出音轨
  pub fn sample<S: VideoSource>(&self, mut source: S) -> Result<SampledClip, SampleError> {
    let fps = source.fps();
    if !(fps.is_finite() && fps > 0.0) {
      return Err(SampleError::InvalidFrameRate(fps));
    }
    let declared = source.declared_frames();

    match self.period_ms {
      Some(period) => info!("每 {} 毫秒抽取一帧 ({:.3} fps)", period, fps),
      None => info!("抽取全部帧 ({:.3} fps)", fps),
    }

    let mut frames = Vec::new();
    let mut index = 0u64;
    while declared.is_none_or(|n| index < n) {
      let Some(image) = source.next() else {
        if let Some(n) = declared {
          debug!("视频在第 {} 帧提前结束（声明 {} 帧）", index, n);
        }
        break;
      };
      if self.is_selected(index, fps) {
        frames.push(Frame::new(index, fps, image));
      }
      index += 1;
    }
    info!("共解码 {} 帧，选中 {} 帧", index, frames.len());

    let audio = source.take_audio();
    if audio.is_none() {
      warn!("没有可用的音轨");
    }

    Ok(SampledClip { fps, frames, audio })
  }

  /// 打开视频文件并采样
  #[cfg(feature = "gstreamer_input")]
  pub fn extract(&self, video_path: &Path) -> Result<SampledClip, SampleError> {
    let source = GStreamerVideoSource::open(video_path)?;
    self.sample(source)
  }
}

/// 在交给解码器之前确认文件可读
pub fn ensure_readable(path: &Path) -> Result<(), SampleError> {
  std::fs::File::open(path)
    .map(|_| ())
    .map_err(|source| SampleError::Open {
      path: path.to_path_buf(),
      source,
    })
}
