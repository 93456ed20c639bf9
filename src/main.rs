// 该文件是 Yingxi （影析） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yingxi::{
  FromUrl,
  config::PipelineConfig,
  model::DetrBuilder,
  output::Reassembler,
  task::{DetectionTask, TaskError},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入视频: {}", args.video.display());
  info!("模型文件路径: {}", args.model);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::from_json_file(path).map_err(TaskError::init)?,
    None => PipelineConfig::default(),
  };
  if let Some(threshold) = args.confidence {
    config = config
      .with_confidence_threshold(threshold)
      .map_err(TaskError::init)?;
  }
  info!("置信度阈值: {}", config.confidence_threshold);

  let detector = DetrBuilder::from_url(&args.model)
    .and_then(|builder| builder.threshold(config.confidence_threshold).build())
    .map_err(TaskError::init)?;
  let reassembler = Reassembler::ffmpeg()?;
  let mut task = DetectionTask::new(detector, config, reassembler)?;

  if args.display {
    #[cfg(feature = "gstreamer_output")]
    {
      let preview = yingxi::output::GStreamerPreview::new()?;
      task = task.with_preview(Box::new(preview));
    }
    #[cfg(not(feature = "gstreamer_output"))]
    tracing::warn!("未启用 gstreamer_output 特性，无法显示");
  }

  let report = task.run(&args.video, &args.run_options())?;

  info!("采样帧数: {}", report.sampled_frames);
  info!("保留检测数: {}", report.detections);
  if let Some(video) = &report.video {
    info!("输出视频: {}", video.display());
  }
  if let Some(video) = &report.video_with_audio {
    info!("带音轨的输出视频: {}", video.display());
  }

  Ok(())
}
