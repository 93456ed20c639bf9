// 该文件是 Yingxi （影析） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 用 `Discoverer` 读取容器的帧率、时长和音轨信息，再用两条独立管道
//! 分别解码视频帧和完整音轨：
//!
//! - 视频：`filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`
//! - 音频：`filesrc ! decodebin ! audioconvert ! audioresample ! audio/x-raw,format=S16LE ! appsink`
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use std::path::Path;
//! use yingxi::input::{FrameSampler, GStreamerVideoSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = GStreamerVideoSource::open(Path::new("clip.mp4"))?;
//! let clip = FrameSampler::new(Some(500.0))?.sample(source)?;
//! println!("{} 帧 @ {} fps", clip.len(), clip.fps);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_pbutils::{self as gst_pbutils, prelude::*};
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{SampleError, VideoSource, ensure_readable};
use crate::frame::AudioTrack;

const DISCOVER_TIMEOUT_SECS: u64 = 10;
const PULL_TIMEOUT_MS: u64 = 500;

// decodebin 的输出 pad 先过 caps 过滤，只连接对应类型的流
const VIDEO_PIPELINE: &str = "filesrc name=src ! decodebin ! video/x-raw ! queue ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4";
const AUDIO_PIPELINE: &str = "filesrc name=src ! decodebin ! audio/x-raw ! queue ! audioconvert ! \
   audioresample ! audio/x-raw,format=S16LE,layout=interleaved ! appsink name=sink sync=false";

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 元素操作失败
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 管道描述中缺少 filesrc
  #[error("管道中找不到 filesrc")]
  FileSrcNotFound,
  /// 管道描述中缺少 appsink
  #[error("管道中找不到 appsink")]
  AppSinkNotFound,
  /// 名为 sink 的元素不是 appsink
  #[error("sink 元素不是 appsink")]
  AppSinkConversionFailed,
  /// 容器中没有视频流
  #[error("容器中没有视频流")]
  NoVideoStream,
  /// 样本 caps 无法解析为视频信息
  #[error("无法从 caps 解析视频信息")]
  VideoInfoError,
  /// 解码输出不是 RGB
  #[error("不支持的像素格式")]
  UnsupportedFormat,
  /// 解码管道运行错误
  #[error("管道错误: {0}")]
  PipelineError(String),
  /// 缓冲区小于一帧所需字节数
  #[error("缓冲区大小不符: 需要 {expected} 字节，实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 管道状态切换失败
  #[error("管道状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 带 appsink 的解码管道，销毁时停止
struct DecodePipeline {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl DecodePipeline {
  fn launch(description: &str, path: &Path) -> Result<Self, GStreamerInputError> {
    debug!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建解码管道".to_string()))?;

    let filesrc = pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::FileSrcNotFound)?;
    filesrc.set_property("location", path.to_string_lossy().to_string());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self { pipeline, appsink })
  }

  /// 取下一个样本；流结束返回 `None`，管道报错返回错误
  fn pull_sample(&self) -> Result<Option<gst::Sample>, GStreamerInputError> {
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        return Ok(Some(sample));
      }
      if self.appsink.is_eos() {
        return Ok(None);
      }
      if let Some(bus) = self.pipeline.bus()
        && let Some(message) = bus.pop_filtered(&[gst::MessageType::Error])
        && let gst::MessageView::Error(err) = message.view()
      {
        return Err(GStreamerInputError::PipelineError(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        )));
      }
    }
  }
}

impl Drop for DecodePipeline {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止解码管道: {}", e);
    }
  }
}

/// GStreamer 视频文件输入
///
/// 迭代时按解码顺序产出 RGB 帧。
pub struct GStreamerVideoSource {
  path: PathBuf,
  fps: f64,
  declared_frames: Option<u64>,
  has_audio: bool,
  video: DecodePipeline,
}

impl GStreamerVideoSource {
  /// 打开视频文件；文件不可读或容器无法识别时返回 `SampleError::Open`
  pub fn open(path: &Path) -> Result<Self, SampleError> {
    ensure_readable(path)?;
    let open_error = |message: String| SampleError::Open {
      path: path.to_path_buf(),
      source: std::io::Error::new(std::io::ErrorKind::InvalidData, message),
    };

    gst::init().map_err(GStreamerInputError::from)?;

    let absolute = std::fs::canonicalize(path).map_err(|source| SampleError::Open {
      path: path.to_path_buf(),
      source,
    })?;
    let uri = gst::glib::filename_to_uri(&absolute, None).map_err(GStreamerInputError::from)?;

    let discoverer =
      gst_pbutils::Discoverer::new(gst::ClockTime::from_seconds(DISCOVER_TIMEOUT_SECS))
        .map_err(GStreamerInputError::from)?;
    let info = discoverer
      .discover_uri(&uri)
      .map_err(|e| open_error(e.to_string()))?;

    let video_info = info
      .video_streams()
      .into_iter()
      .next()
      .ok_or(GStreamerInputError::NoVideoStream)?;
    let rate = video_info.framerate();
    let fps = if rate.denom() == 0 {
      0.0
    } else {
      rate.numer() as f64 / rate.denom() as f64
    };
    let declared_frames = info
      .duration()
      .filter(|_| fps > 0.0)
      .map(|d| (d.nseconds() as f64 * fps / 1_000_000_000.0).round() as u64);
    let has_audio = !info.audio_streams().is_empty();

    info!(
      "视频已打开: {} {}x{} @ {:.3} fps, 声明帧数 {:?}, 音轨: {}",
      path.display(),
      video_info.width(),
      video_info.height(),
      fps,
      declared_frames,
      if has_audio { "有" } else { "无" }
    );

    let video = DecodePipeline::launch(VIDEO_PIPELINE, &absolute)?;

    Ok(Self {
      path: absolute,
      fps,
      declared_frames,
      has_audio,
      video,
    })
  }

  fn decode_audio(&self) -> Result<Option<AudioTrack>, GStreamerInputError> {
    let audio = DecodePipeline::launch(AUDIO_PIPELINE, &self.path)?;

    let mut pcm = Vec::new();
    let mut format = None;
    while let Some(sample) = audio.pull_sample()? {
      if format.is_none() {
        format = sample
          .caps()
          .and_then(|caps| caps.structure(0))
          .and_then(|s| Some((s.get::<i32>("rate").ok()?, s.get::<i32>("channels").ok()?)));
      }
      let buffer = sample
        .buffer()
        .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
      let map = buffer.map_readable().map_err(|e| {
        GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
      })?;
      pcm.extend_from_slice(map.as_slice());
    }

    match format {
      Some((rate, channels)) if !pcm.is_empty() => {
        let track = AudioTrack::new(rate as u32, channels as u32, pcm);
        info!(
          "音轨解码完成: {} Hz, {} 声道, {:.0} ms",
          track.sample_rate,
          track.channels,
          track.duration_ms()
        );
        Ok(Some(track))
      }
      _ => Ok(None),
    }
  }
}

impl VideoSource for GStreamerVideoSource {
  fn fps(&self) -> f64 {
    self.fps
  }

  fn declared_frames(&self) -> Option<u64> {
    self.declared_frames
  }

  fn take_audio(&mut self) -> Option<AudioTrack> {
    if !self.has_audio {
      return None;
    }
    self.has_audio = false;
    match self.decode_audio() {
      Ok(track) => track,
      Err(e) => {
        warn!("音轨解码失败，继续处理无声视频: {}", e);
        None
      }
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self
      .video
      .pull_sample()
      .map_err(|e| {
        error!("拉取样本失败: {}", e);
        e
      })
      .ok()??;
    convert_sample_to_rgb(sample)
      .map_err(|e| {
        error!("读取样本失败: {}", e);
        e
      })
      .ok()
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  // 行可能按 4 字节对齐填充
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // caps 已固定为 RGB
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }
  let mut pixels = vec![0u8; width * height * 3];
  for h in 0..height {
    let src = &data[h * stride..h * stride + width * 3];
    pixels[h * width * 3..(h + 1) * width * 3].copy_from_slice(src);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: width * height * 3,
    actual: data.len(),
  })
}
