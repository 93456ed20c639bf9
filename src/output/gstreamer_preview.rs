// 该文件是 Yingxi （影析） 项目的一部分。
// src/output/gstreamer_preview.rs - 使用 GStreamer 窗口实时显示标注后的帧
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

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use tracing::{info, warn};

use crate::output::{Preview, PreviewError};

// sync=false 时帧率只用于时间戳
const PREVIEW_FPS: f64 = 30.0;
const PREVIEW_PIPELINE: &str = "appsrc name=src is-live=true ! videoconvert ! autovideosink sync=false";

fn pipeline_error(msg: &str, e: impl std::fmt::Display) -> PreviewError {
  PreviewError::PipelineError(format!("{}: {}", msg, e))
}

/// 已启动的预览管道，尺寸变化时重建
struct Started {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  size: (u32, u32),
}

pub struct GStreamerPreview {
  started: Option<Started>,
  frame_count: u64,
}

impl GStreamerPreview {
  pub fn new() -> Result<Self, PreviewError> {
    gst::init().map_err(|e| pipeline_error("GStreamer 初始化失败", e))?;
    Ok(Self {
      started: None,
      frame_count: 0,
    })
  }

  fn start(&self, size: (u32, u32)) -> Result<Started, PreviewError> {
    let pipeline = gst::parse::launch(PREVIEW_PIPELINE)
      .map_err(|e| pipeline_error("无法创建预览管道", e))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| PreviewError::PipelineError("无法转换为 Pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| PreviewError::PipelineError("找不到 appsrc".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| PreviewError::PipelineError("无法转换为 appsrc".to_string()))?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", size.0 as i32)
      .field("height", size.1 as i32)
      .field("framerate", gst::Fraction::new(PREVIEW_FPS as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| pipeline_error("无法启动预览管道", e))?;
    info!("预览窗口已打开: {}x{}", size.0, size.1);

    Ok(Started {
      pipeline,
      appsrc,
      size,
    })
  }
}

impl Preview for GStreamerPreview {
  fn show(&mut self, image: &RgbImage) -> Result<(), PreviewError> {
    let size = image.dimensions();
    let started = match self.started.take() {
      Some(started) if started.size == size => started,
      Some(started) => {
        // 尺寸变化时重建管道
        let _ = started.appsrc.end_of_stream();
        let _ = started.pipeline.set_state(gst::State::Null);
        self.start(size)?
      }
      None => self.start(size)?,
    };

    let frame_ns = (1_000_000_000.0 / PREVIEW_FPS) as u64;
    let mut buffer = gst::Buffer::from_slice(image.as_raw().clone());
    if let Some(buffer_ref) = buffer.get_mut() {
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }
    self.frame_count += 1;

    let pushed = started.appsrc.push_buffer(buffer);
    self.started = Some(started);
    pushed.map_err(|e| match e {
      gst::FlowError::Flushing | gst::FlowError::Eos => PreviewError::Closed,
      other => pipeline_error("无法推送帧", other),
    })?;
    Ok(())
  }
}

impl Drop for GStreamerPreview {
  fn drop(&mut self) {
    if let Some(started) = self.started.take() {
      let _ = started.appsrc.end_of_stream();
      if let Err(e) = started.pipeline.set_state(gst::State::Null) {
        warn!("无法停止预览管道: {}", e);
      }
      info!("预览窗口已关闭，共显示 {} 帧", self.frame_count);
    }
  }
}
