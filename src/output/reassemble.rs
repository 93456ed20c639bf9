// 该文件是 Yingxi （影析） 项目的一部分。
// src/output/reassemble.rs - 将标注后的帧重新组装为视频（可选合成音轨）
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

//! 视频重组
//!
//! [`Reassembler::compile`] 按原始帧率把帧序列编码为 `detected_frames_<时间戳>.mp4`；
//! 若采样时取得了音轨，则先把音轨写入临时文件 `temp_audio_<时间戳>.pcm`，
//! 再与刚写好的视频合成为 `detected_frames_with_audio_<时间戳>.mp4`。
//!
//! 临时音频文件由 [`TransientFile`] 守卫持有，无论合成成功与否都会在返回前删除；
//! 编码或合成失败时，写了一半的输出文件同样会被删除。

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{frame::AudioTrack, output::output_timestamp};

#[derive(Error, Debug)]
pub enum ReassembleError {
  /// 目录或文件读写失败
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  /// PATH 中没有 ffmpeg
  #[error("找不到 ffmpeg 可执行文件: {0}")]
  FfmpegNotFound(String),
  /// ffmpeg 以非零状态退出
  #[error("ffmpeg 执行失败 ({status}): {stderr}")]
  FfmpegFailed { status: String, stderr: String },
  /// 帧尺寸与首帧不同
  #[error("第 {index} 帧尺寸 {actual:?} 与首帧 {expected:?} 不一致")]
  FrameSizeMismatch {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 编码过程中的其他错误
  #[error("视频编码错误: {0}")]
  EncodingError(String),
}

/// 把 RGB 帧序列按给定帧率编码为视频文件
pub trait VideoEncoder {
  fn encode(&self, frames: &[RgbImage], fps: f64, output: &Path) -> Result<(), ReassembleError>;
}

/// 把已编码的视频与原始 PCM 音频合成为一个文件
pub trait AudioMuxer {
  fn mux(
    &self,
    video: &Path,
    audio: &Path,
    track: &AudioTrack,
    fps: f64,
    output: &Path,
  ) -> Result<(), ReassembleError>;
}

/// 重组结果，两项都可能为空
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledVideo {
  pub video: Option<PathBuf>,
  pub video_with_audio: Option<PathBuf>,
}

pub struct Reassembler<E, M> {
  encoder: E,
  muxer: M,
}

impl<E: VideoEncoder, M: AudioMuxer> Reassembler<E, M> {
  pub fn new(encoder: E, muxer: M) -> Self {
    Self { encoder, muxer }
  }

  pub fn video_file_name(timestamp: &str) -> String {
    format!("detected_frames_{}.mp4", timestamp)
  }

  pub fn video_with_audio_file_name(timestamp: &str) -> String {
    format!("detected_frames_with_audio_{}.mp4", timestamp)
  }

  pub fn compile(
    &self,
    frames: &[RgbImage],
    fps: f64,
    audio: Option<&AudioTrack>,
    output_dir: Option<&Path>,
  ) -> Result<CompiledVideo, ReassembleError> {
    let Some(output_dir) = output_dir else {
      info!("未指定视频输出目录，跳过视频重组");
      return Ok(CompiledVideo::default());
    };
    let Some(first) = frames.first() else {
      warn!("没有可重组的帧，跳过视频输出");
      return Ok(CompiledVideo::default());
    };

    let expected = first.dimensions();
    if let Some((index, frame)) = frames
      .iter()
      .enumerate()
      .find(|(_, f)| f.dimensions() != expected)
    {
      return Err(ReassembleError::FrameSizeMismatch {
        index,
        expected,
        actual: frame.dimensions(),
      });
    }

    std::fs::create_dir_all(output_dir)?;
    let timestamp = output_timestamp();

    let video_path = output_dir.join(Self::video_file_name(&timestamp));
    info!(
      "开始编码视频: {} 帧 {}x{} @ {:.3} fps -> {}",
      frames.len(),
      expected.0,
      expected.1,
      fps,
      video_path.display()
    );
    let partial = TransientFile::new(video_path);
    if let Err(e) = self.encoder.encode(frames, fps, partial.path()) {
      error!("视频编码失败: {}", e);
      return Err(e);
    }
    let video = partial.keep();
    info!("视频已保存到文件: {}", video.display());

    let Some(track) = audio.filter(|t| !t.is_empty()) else {
      info!("没有音轨，只输出无声视频");
      return Ok(CompiledVideo {
        video: Some(video),
        video_with_audio: None,
      });
    };

    let temp_audio = TransientFile::new(output_dir.join(format!("temp_audio_{}.pcm", timestamp)));
    std::fs::write(temp_audio.path(), track.as_bytes())?;

    let muxed = TransientFile::new(output_dir.join(Self::video_with_audio_file_name(&timestamp)));
    info!(
      "合成音轨: {} Hz, {} 声道, {:.2} 秒 -> {}",
      track.sample_rate,
      track.channels,
      track.duration_ms() / 1000.0,
      muxed.path().display()
    );
    if let Err(e) = self
      .muxer
      .mux(&video, temp_audio.path(), track, fps, muxed.path())
    {
      error!("音视频合成失败: {}", e);
      return Err(e);
    }
    let video_with_audio = muxed.keep();
    info!("带音轨的视频已保存到文件: {}", video_with_audio.display());

    Ok(CompiledVideo {
      video: Some(video),
      video_with_audio: Some(video_with_audio),
    })
  }
}

/// 离开作用域时删除文件，除非调用了 [`TransientFile::keep`]
struct TransientFile {
  path: PathBuf,
  keep: bool,
}

impl TransientFile {
  fn new(path: PathBuf) -> Self {
    Self { path, keep: false }
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn keep(mut self) -> PathBuf {
    self.keep = true;
    std::mem::take(&mut self.path)
  }
}

impl Drop for TransientFile {
  fn drop(&mut self) {
    if self.keep || !self.path.exists() {
      return;
    }
    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!("清理临时文件 {} 失败: {}", self.path.display(), e);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;

  /// 把帧数写进文件的假编码器
  #[derive(Default)]
  struct CountingEncoder {
    fail: bool,
  }

  impl VideoEncoder for CountingEncoder {
    fn encode(&self, frames: &[RgbImage], _fps: f64, output: &Path) -> Result<(), ReassembleError> {
      std::fs::write(output, frames.len().to_string())?;
      if self.fail {
        return Err(ReassembleError::EncodingError("磁盘已满".to_string()));
      }
      Ok(())
    }
  }

  #[derive(Default)]
  struct RecordingMuxer {
    fail: bool,
    seen_audio: RefCell<Option<(PathBuf, usize)>>,
  }

  impl AudioMuxer for RecordingMuxer {
    fn mux(
      &self,
      _video: &Path,
      audio: &Path,
      _track: &AudioTrack,
      _fps: f64,
      output: &Path,
    ) -> Result<(), ReassembleError> {
      let len = std::fs::read(audio)?.len();
      *self.seen_audio.borrow_mut() = Some((audio.to_path_buf(), len));
      std::fs::write(output, b"partial")?;
      if self.fail {
        return Err(ReassembleError::FfmpegFailed {
          status: "exit status: 1".to_string(),
          stderr: "unknown encoder".to_string(),
        });
      }
      Ok(())
    }
  }

  fn frames(n: usize) -> Vec<RgbImage> {
    (0..n).map(|_| RgbImage::new(16, 8)).collect()
  }

  fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  #[test]
  fn no_output_dir_means_no_output() {
    let reassembler = Reassembler::new(CountingEncoder::default(), RecordingMuxer::default());
    let compiled = reassembler.compile(&frames(3), 30.0, None, None).unwrap();
    assert_eq!(compiled, CompiledVideo::default());
  }

  #[test]
  fn empty_frames_create_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("videos");
    let reassembler = Reassembler::new(CountingEncoder::default(), RecordingMuxer::default());
    let audio = AudioTrack::new(8000, 1, vec![0; 32]);
    let compiled = reassembler
      .compile(&[], 30.0, Some(&audio), Some(&out))
      .unwrap();
    assert_eq!(compiled, CompiledVideo::default());
    assert!(!out.exists());
  }

  #[test]
  fn without_audio_writes_exactly_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let reassembler = Reassembler::new(CountingEncoder::default(), RecordingMuxer::default());
    let compiled = reassembler
      .compile(&frames(4), 30.0, None, Some(dir.path()))
      .unwrap();

    let video = compiled.video.unwrap();
    assert!(compiled.video_with_audio.is_none());
    assert_eq!(std::fs::read_to_string(&video).unwrap(), "4");
    let names = entries(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("detected_frames_") && names[0].ends_with(".mp4"));
    assert!(reassembler.muxer.seen_audio.borrow().is_none());
  }

  #[test]
  fn with_audio_writes_both_and_removes_temp() {
    let dir = tempfile::tempdir().unwrap();
    let reassembler = Reassembler::new(CountingEncoder::default(), RecordingMuxer::default());
    let audio = AudioTrack::new(16000, 2, vec![1; 64]);
    let compiled = reassembler
      .compile(&frames(2), 25.0, Some(&audio), Some(dir.path()))
      .unwrap();

    assert!(compiled.video.unwrap().exists());
    let muxed = compiled.video_with_audio.unwrap();
    assert!(
      muxed
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("detected_frames_with_audio_")
    );

    let (temp, len) = reassembler.muxer.seen_audio.borrow().clone().unwrap();
    assert_eq!(len, 64);
    assert!(temp.to_string_lossy().ends_with(".pcm"));
    assert!(!temp.exists());
    assert_eq!(entries(dir.path()).len(), 2);
  }

  #[test]
  fn failed_mux_cleans_up_temp_and_partial() {
    let dir = tempfile::tempdir().unwrap();
    let muxer = RecordingMuxer {
      fail: true,
      ..Default::default()
    };
    let reassembler = Reassembler::new(CountingEncoder::default(), muxer);
    let audio = AudioTrack::new(16000, 1, vec![0; 32]);
    let err = reassembler
      .compile(&frames(2), 25.0, Some(&audio), Some(dir.path()))
      .unwrap_err();

    assert!(matches!(err, ReassembleError::FfmpegFailed { .. }));
    let (temp, _) = reassembler.muxer.seen_audio.borrow().clone().unwrap();
    assert!(!temp.exists());
    // 只剩已完成的无声视频
    let names = entries(dir.path());
    assert_eq!(names.len(), 1);
    assert!(!names[0].contains("with_audio"));
  }

  #[test]
  fn failed_encode_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let reassembler = Reassembler::new(CountingEncoder { fail: true }, RecordingMuxer::default());
    let err = reassembler
      .compile(&frames(2), 25.0, None, Some(dir.path()))
      .unwrap_err();
    assert!(matches!(err, ReassembleError::EncodingError(_)));
    assert!(entries(dir.path()).is_empty());
  }

  #[test]
  fn rejects_mismatched_frame_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("videos");
    let reassembler = Reassembler::new(CountingEncoder::default(), RecordingMuxer::default());
    let mut input = frames(3);
    input[2] = RgbImage::new(8, 8);
    let err = reassembler
      .compile(&input, 30.0, None, Some(&out))
      .unwrap_err();
    assert!(matches!(
      err,
      ReassembleError::FrameSizeMismatch {
        index: 2,
        expected: (16, 8),
        actual: (8, 8)
      }
    ));
    assert!(!out.exists());
  }
}
