// 该文件是 Yingxi （影析） 项目的一部分。
// src/output/ffmpeg.rs - 基于 ffmpeg 命令行的视频编码与音视频合成
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

//! 需要系统安装 ffmpeg 命令行工具。
//!
//! 视频使用 MPEG-4 Part 2 编码（`mp4v` 标签），帧通过标准输入以 rawvideo/rgb24
//! 传入，不在磁盘上留下中间帧文件；音频重新编码为 AAC。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  frame::AudioTrack,
  output::reassemble::{AudioMuxer, ReassembleError, Reassembler, VideoEncoder},
};

const FFMPEG_PROGRAM: &str = "ffmpeg";
const VIDEO_CODEC: &str = "mpeg4";
const VIDEO_TAG: &str = "mp4v";
const AUDIO_CODEC: &str = "aac";
// yuv420p 要求宽高为偶数
const EVEN_SIZE_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

/// ffmpeg 命令参数构造器
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
  inputs: Vec<(Vec<String>, String)>,
  output: PathBuf,
  output_args: Vec<String>,
  overwrite: bool,
  log_level: String,
}

impl FfmpegCommand {
  pub fn new(output: impl AsRef<Path>) -> Self {
    Self {
      inputs: Vec::new(),
      output: output.as_ref().to_path_buf(),
      output_args: Vec::new(),
      overwrite: true,
      log_level: "error".to_string(),
    }
  }

  /// 添加一个输入及其前置参数（位于对应的 `-i` 之前）
  pub fn input<I, S>(mut self, args: I, input: impl Into<String>) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .inputs
      .push((args.into_iter().map(Into::into).collect(), input.into()));
    self
  }

  pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
    self.output_args.push(arg.into());
    self
  }

  pub fn video_codec(self, codec: impl Into<String>) -> Self {
    self.output_arg("-c:v").output_arg(codec)
  }

  pub fn video_tag(self, tag: impl Into<String>) -> Self {
    self.output_arg("-vtag").output_arg(tag)
  }

  pub fn audio_codec(self, codec: impl Into<String>) -> Self {
    self.output_arg("-c:a").output_arg(codec)
  }

  pub fn frame_rate(self, fps: f64) -> Self {
    self.output_arg("-r").output_arg(fps.to_string())
  }

  pub fn log_level(mut self, level: impl Into<String>) -> Self {
    self.log_level = level.into();
    self
  }

  pub fn build_args(&self) -> Vec<String> {
    let mut args = Vec::new();
    if self.overwrite {
      args.push("-y".to_string());
    }
    args.push("-loglevel".to_string());
    args.push(self.log_level.clone());

    for (input_args, input) in &self.inputs {
      args.extend(input_args.iter().cloned());
      args.push("-i".to_string());
      args.push(input.clone());
    }

    args.extend(self.output_args.iter().cloned());
    args.push(self.output.to_string_lossy().to_string());
    args
  }

  fn command(&self, program: &Path) -> Command {
    let args = self.build_args();
    debug!("执行: {} {}", program.display(), args.join(" "));
    let mut command = Command::new(program);
    command.args(args);
    command
  }
}

fn locate_ffmpeg() -> Result<PathBuf, ReassembleError> {
  which::which(FFMPEG_PROGRAM).map_err(|e| ReassembleError::FfmpegNotFound(e.to_string()))
}

fn check_status(output: Output) -> Result<(), ReassembleError> {
  if output.status.success() {
    return Ok(());
  }
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
  warn!("ffmpeg 错误: {}", stderr);
  Err(ReassembleError::FfmpegFailed {
    status: output.status.to_string(),
    stderr,
  })
}

/// 通过标准输入把原始 RGB 帧交给 ffmpeg 编码
#[derive(Debug, Clone)]
pub struct FfmpegVideoEncoder {
  program: PathBuf,
}

impl FfmpegVideoEncoder {
  /// 在 `PATH` 中查找 ffmpeg
  pub fn locate() -> Result<Self, ReassembleError> {
    Ok(Self::with_program(locate_ffmpeg()?))
  }

  pub fn with_program(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }

  fn command(frame_size: (u32, u32), fps: f64, output: &Path) -> FfmpegCommand {
    let (width, height) = frame_size;
    FfmpegCommand::new(output)
      .input(
        [
          "-f".to_string(),
          "rawvideo".to_string(),
          "-pix_fmt".to_string(),
          "rgb24".to_string(),
          "-s".to_string(),
          format!("{}x{}", width, height),
          "-r".to_string(),
          fps.to_string(),
        ],
        "-",
      )
      .output_arg("-vf")
      .output_arg(EVEN_SIZE_FILTER)
      .video_codec(VIDEO_CODEC)
      .video_tag(VIDEO_TAG)
      .output_arg("-pix_fmt")
      .output_arg("yuv420p")
  }
}

impl VideoEncoder for FfmpegVideoEncoder {
  fn encode(&self, frames: &[RgbImage], fps: f64, output: &Path) -> Result<(), ReassembleError> {
    let Some(first) = frames.first() else {
      return Err(ReassembleError::EncodingError("没有可编码的帧".to_string()));
    };

    let mut child = Self::command(first.dimensions(), fps, output)
      .command(&self.program)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()?;

    let written = match child.stdin.take() {
      Some(mut stdin) => frames
        .iter()
        .try_for_each(|frame| stdin.write_all(frame.as_raw())),
      None => Err(std::io::Error::other("无法打开 ffmpeg 标准输入")),
    };
    // 先等待进程退出，ffmpeg 自身的错误比管道断开更有用
    let result = check_status(child.wait_with_output()?);
    result?;
    written?;
    Ok(())
  }
}

/// 把视频与原始 PCM 音频合成，音频重新编码为 AAC
#[derive(Debug, Clone)]
pub struct FfmpegAudioMuxer {
  program: PathBuf,
}

impl FfmpegAudioMuxer {
  pub fn locate() -> Result<Self, ReassembleError> {
    Ok(Self::with_program(locate_ffmpeg()?))
  }

  pub fn with_program(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }

  fn command(video: &Path, audio: &Path, track: &AudioTrack, fps: f64, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
      .input(Vec::<String>::new(), video.to_string_lossy())
      .input(
        [
          "-f".to_string(),
          AudioTrack::SAMPLE_FORMAT.to_string(),
          "-ar".to_string(),
          track.sample_rate.to_string(),
          "-ac".to_string(),
          track.channels.to_string(),
        ],
        audio.to_string_lossy(),
      )
      .output_arg("-map")
      .output_arg("0:v:0")
      .output_arg("-map")
      .output_arg("1:a:0")
      .video_codec(VIDEO_CODEC)
      .video_tag(VIDEO_TAG)
      .frame_rate(fps)
      .audio_codec(AUDIO_CODEC)
      .output_arg("-shortest")
  }
}

impl AudioMuxer for FfmpegAudioMuxer {
  fn mux(
    &self,
    video: &Path,
    audio: &Path,
    track: &AudioTrack,
    fps: f64,
    output: &Path,
  ) -> Result<(), ReassembleError> {
    let result = Self::command(video, audio, track, fps, output)
      .command(&self.program)
      .stdin(Stdio::null())
      .output()?;
    check_status(result)
  }
}

impl Reassembler<FfmpegVideoEncoder, FfmpegAudioMuxer> {
  /// 编码与合成都使用 `PATH` 中的 ffmpeg
  pub fn ffmpeg() -> Result<Self, ReassembleError> {
    let program = locate_ffmpeg()?;
    info!("使用 ffmpeg: {}", program.display());
    Ok(Self::new(
      FfmpegVideoEncoder::with_program(program.clone()),
      FfmpegAudioMuxer::with_program(program),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_encode_args() {
    let args = FfmpegVideoEncoder::command((64, 48), 29.97, Path::new("/tmp/out.mp4")).build_args();
    assert_eq!(
      args,
      [
        "-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s", "64x48", "-r",
        "29.97", "-i", "-", "-vf", EVEN_SIZE_FILTER, "-c:v", "mpeg4", "-vtag", "mp4v", "-pix_fmt",
        "yuv420p", "/tmp/out.mp4",
      ]
    );
  }

  #[test]
  fn builds_mux_args() {
    let track = AudioTrack::new(44100, 2, Vec::new());
    let args = FfmpegAudioMuxer::command(
      Path::new("v.mp4"),
      Path::new("a.pcm"),
      &track,
      30.0,
      Path::new("out.mp4"),
    )
    .log_level("warning")
    .build_args();

    let joined = args.join(" ");
    assert!(joined.starts_with("-y -loglevel warning -i v.mp4 -f s16le -ar 44100 -ac 2 -i a.pcm"));
    assert!(joined.contains("-r 30 -c:a aac -shortest"));
    assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
  }

  #[test]
  fn encodes_and_muxes_with_real_ffmpeg() {
    let Ok(encoder) = FfmpegVideoEncoder::locate() else {
      return;
    };
    let Ok(muxer) = FfmpegAudioMuxer::locate() else {
      return;
    };
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..10u8)
      .map(|i| RgbImage::from_pixel(32, 24, image::Rgb([i * 20, 0, 0])))
      .collect();
    let video = dir.path().join("out.mp4");
    encoder.encode(&frames, 10.0, &video).unwrap();
    assert!(std::fs::metadata(&video).unwrap().len() > 0);

    // 一秒静音
    let track = AudioTrack::new(8000, 1, vec![0; 16000]);
    let audio = dir.path().join("a.pcm");
    std::fs::write(&audio, track.as_bytes()).unwrap();
    let muxed = dir.path().join("muxed.mp4");
    muxer.mux(&video, &audio, &track, 10.0, &muxed).unwrap();
    assert!(std::fs::metadata(&muxed).unwrap().len() > 0);
  }

  #[test]
  fn odd_frame_size_is_padded_to_even() {
    let Ok(encoder) = FfmpegVideoEncoder::locate() else {
      return;
    };
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![RgbImage::new(33, 25); 5];
    let video = dir.path().join("odd.mp4");
    encoder.encode(&frames, 10.0, &video).unwrap();

    let Ok(ffprobe) = which::which("ffprobe") else {
      return;
    };
    let output = Command::new(ffprobe)
      .args(["-v", "error", "-select_streams", "v:0"])
      .args(["-show_entries", "stream=width,height", "-of", "csv=p=0"])
      .arg(&video)
      .output()
      .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "34,26");
  }

  #[test]
  fn reports_ffmpeg_failure() {
    let Ok(muxer) = FfmpegAudioMuxer::locate() else {
      return;
    };
    let dir = tempfile::tempdir().unwrap();
    let track = AudioTrack::new(8000, 1, vec![0; 16]);
    let err = muxer
      .mux(
        &dir.path().join("missing.mp4"),
        &dir.path().join("missing.pcm"),
        &track,
        30.0,
        &dir.path().join("out.mp4"),
      )
      .unwrap_err();
    assert!(matches!(err, ReassembleError::FfmpegFailed { .. }));
  }
}
