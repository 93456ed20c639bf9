// 该文件是 Yingxi （影析） 项目的一部分。
// src/output.rs - 输出：标注、逐帧保存、视频重组与预览
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
use thiserror::Error;

pub mod draw;
pub use self::draw::{AnnotateError, Annotator, PixelRect};

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod reassemble;
pub use self::reassemble::{AudioMuxer, CompiledVideo, ReassembleError, Reassembler, VideoEncoder};

mod ffmpeg;
pub use self::ffmpeg::{FfmpegAudioMuxer, FfmpegCommand, FfmpegVideoEncoder};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_preview;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_preview::GStreamerPreview;

/// 实时显示标注后的帧
pub trait Preview {
  fn show(&mut self, image: &RgbImage) -> Result<(), PreviewError>;
}

#[derive(Error, Debug)]
pub enum PreviewError {
  /// 预览管道创建或推送失败
  #[error("预览管道错误: {0}")]
  PipelineError(String),
  /// 窗口被关闭，管道不再接收帧
  #[error("预览窗口已关闭")]
  Closed,
}

#[derive(Error, Debug)]
pub enum OutputError {
  /// 逐帧图像保存失败
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  /// 视频重组失败
  #[error("视频重组错误: {0}")]
  ReassembleError(#[from] ReassembleError),
  /// 实时显示失败
  #[error("预览错误: {0}")]
  PreviewError(#[from] PreviewError),
}

/// 输出文件名中的本地时间戳
pub fn output_timestamp() -> String {
  chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
