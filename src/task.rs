// 该文件是 Yingxi （影析） 项目的一部分。
// src/task.rs - 流水线编排：采样、检测、过滤、标注、保存与重组
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

use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::PipelineConfig,
  filter::RestrictedClassSet,
  frame::SampledClip,
  input::SampleError,
  model::Detector,
  output::{
    AnnotateError, Annotator, AudioMuxer, OutputError, Preview, Reassembler, SaveImageFileOutput,
    VideoEncoder,
  },
};

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug)]
pub enum TaskError {
  /// 检测器或配置初始化失败
  #[error("初始化错误: {0}")]
  Init(BoxError),
  /// 视频无法打开或解码
  #[error("输入错误: {0}")]
  Input(#[from] SampleError),
  /// 单帧推理失败
  #[error("检测错误: {0}")]
  Detect(BoxError),
  /// 类别表与检测器不匹配
  #[error("标注错误: {0}")]
  Annotate(#[from] AnnotateError),
  /// 图像、视频或预览输出失败
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

impl TaskError {
  pub fn init(e: impl Into<BoxError>) -> Self {
    TaskError::Init(e.into())
  }
}

/// 一次运行的参数
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// 采样周期（毫秒），`None` 表示逐帧处理
  pub period_ms: Option<f64>,
  /// 处理过程中实时显示标注后的帧
  pub display: bool,
  /// 逐帧保存标注图像的目录
  pub image_dir: Option<PathBuf>,
  /// 输出视频的目录
  pub video_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
  pub sampled_frames: usize,
  /// 过滤后保留的检测数
  pub detections: usize,
  pub rectangles: usize,
  pub images: Vec<PathBuf>,
  pub video: Option<PathBuf>,
  pub video_with_audio: Option<PathBuf>,
}

pub struct DetectionTask<D, E, M> {
  detector: D,
  restricted: RestrictedClassSet,
  annotator: Annotator,
  reassembler: Reassembler<E, M>,
  preview: Option<Box<dyn Preview>>,
}

impl<D, E, M> DetectionTask<D, E, M>
where
  D: Detector,
  D::Error: StdError + Send + Sync + 'static,
  E: VideoEncoder,
  M: AudioMuxer,
{
  /// 受限类别必须全部出现在检测器的类别表中
  pub fn new(
    detector: D,
    config: PipelineConfig,
    reassembler: Reassembler<E, M>,
  ) -> Result<Self, TaskError> {
    if let Some(id) = config
      .restricted_classes
      .first_missing_from(detector.catalog())
    {
      return Err(TaskError::init(format!(
        "受限类别 {} 不在检测器类别表中",
        id
      )));
    }
    let annotator = Annotator::new(config.colors).map_err(TaskError::init)?;

    info!(
      "受限类别 {} 个，检测器类别 {} 个",
      config.restricted_classes.len(),
      detector.catalog().len()
    );

    Ok(Self {
      detector,
      restricted: config.restricted_classes,
      annotator,
      reassembler,
      preview: None,
    })
  }

  pub fn with_preview(mut self, preview: Box<dyn Preview>) -> Self {
    self.preview = Some(preview);
    self
  }

  /// 打开视频文件，采样后处理
  #[cfg(feature = "gstreamer_input")]
  pub fn run(
    &mut self,
    video_path: &std::path::Path,
    options: &RunOptions,
  ) -> Result<RunReport, TaskError> {
    // 先校验采样周期再打开文件
    let sampler = crate::input::FrameSampler::new(options.period_ms)?;
    info!("开始处理视频: {}", video_path.display());
    let clip = sampler.extract(video_path)?;
    self.run_clip(clip, options)
  }

  /// 处理已采样的片段，任何阶段失败都直接返回
  pub fn run_clip(
    &mut self,
    clip: SampledClip,
    options: &RunOptions,
  ) -> Result<RunReport, TaskError> {
    info!("开始任务，共 {} 帧", clip.len());
    let writer = options.image_dir.as_ref().map(SaveImageFileOutput::new);
    let display = options.display && self.preview.is_some();
    if options.display && !display {
      warn!("未配置预览输出，忽略显示请求");
    }

    let mut report = RunReport {
      sampled_frames: clip.len(),
      ..Default::default()
    };
    let mut annotated = Vec::with_capacity(clip.len());

    for (ordinal, frame) in clip.frames.into_iter().enumerate() {
      let index = frame.index;
      let timestamp_ms = frame.timestamp_ms;
      let mut image = frame.into_image();
      info!(
        "处理第 {} 帧图像 (源帧 {}, {:.0} ms)",
        ordinal, index, timestamp_ms
      );

      let now = std::time::Instant::now();
      let detections = self
        .detector
        .analyze(&image)
        .map_err(|e| TaskError::Detect(Box::new(e)))?;
      let total = detections.len();
      let detections = self.restricted.restrict(detections);
      info!(
        "推理完成，耗时: {:.2?}，检测到 {} 个目标，保留 {} 个",
        now.elapsed(),
        total,
        detections.len()
      );
      for d in &detections {
        debug!(
          "  - {} ({}): {:.2}% at ({:.3}, {:.3}, {:.3}x{:.3})",
          self.restricted.label(d.class_id).unwrap_or_default(),
          d.class_id,
          d.score * 100.0,
          d.bbox.x_center,
          d.bbox.y_center,
          d.bbox.width,
          d.bbox.height
        );
      }

      let drawn = self
        .annotator
        .draw(&mut image, &detections, self.detector.catalog())?;
      report.detections += detections.len();
      report.rectangles += drawn;

      if let Some(writer) = &writer {
        let path = writer
          .save_image(ordinal, &image)
          .map_err(OutputError::from)?;
        report.images.push(path);
      }
      if display && let Some(preview) = self.preview.as_mut() {
        preview.show(&image).map_err(OutputError::from)?;
      }

      annotated.push(image);
    }

    let compiled = self
      .reassembler
      .compile(
        &annotated,
        clip.fps,
        clip.audio.as_ref(),
        options.video_dir.as_deref(),
      )
      .map_err(OutputError::from)?;
    report.video = compiled.video;
    report.video_with_audio = compiled.video_with_audio;

    info!(
      "任务完成: {} 帧，{} 个检测，{} 个矩形，{} 张图像",
      report.sampled_frames,
      report.detections,
      report.rectangles,
      report.images.len()
    );
    match (&report.video, &report.video_with_audio) {
      (Some(video), Some(with_audio)) => info!(
        "输出视频: {}，带音轨: {}",
        video.display(),
        with_audio.display()
      ),
      (Some(video), None) => info!("输出视频: {}", video.display()),
      _ => info!("没有输出视频"),
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    frame::{AudioTrack, Frame},
    model::{ClassCatalog, Detection, NormalizedBox},
    output::{PreviewError, ReassembleError},
  };

  struct FixedDetector {
    catalog: ClassCatalog,
    detections: Vec<Detection>,
    fail_at: Option<usize>,
    calls: usize,
  }

  impl FixedDetector {
    fn new(detections: Vec<Detection>) -> Self {
      Self {
        catalog: crate::model::coco::coco_detr_catalog(),
        detections,
        fail_at: None,
        calls: 0,
      }
    }
  }

  impl Detector for FixedDetector {
    type Error = std::io::Error;

    fn catalog(&self) -> &ClassCatalog {
      &self.catalog
    }

    fn analyze(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      self.calls += 1;
      if self.fail_at == Some(self.calls) {
        return Err(std::io::Error::other("推理后端崩溃"));
      }
      Ok(self.detections.clone())
    }
  }

  struct FileEncoder;

  impl VideoEncoder for FileEncoder {
    fn encode(&self, frames: &[RgbImage], _fps: f64, output: &Path) -> Result<(), ReassembleError> {
      std::fs::write(output, frames.len().to_string())?;
      Ok(())
    }
  }

  struct FileMuxer;

  impl AudioMuxer for FileMuxer {
    fn mux(
      &self,
      _video: &Path,
      _audio: &Path,
      _track: &AudioTrack,
      _fps: f64,
      output: &Path,
    ) -> Result<(), ReassembleError> {
      std::fs::write(output, b"muxed")?;
      Ok(())
    }
  }

  struct CountingPreview(std::rc::Rc<std::cell::Cell<usize>>);

  impl Preview for CountingPreview {
    fn show(&mut self, _image: &RgbImage) -> Result<(), PreviewError> {
      self.0.set(self.0.get() + 1);
      Ok(())
    }
  }

  fn person() -> Detection {
    Detection {
      class_id: 1,
      score: 0.98,
      bbox: NormalizedBox::new(0.5, 0.5, 0.25, 0.25),
    }
  }

  fn clip(n: u64, audio: Option<AudioTrack>) -> SampledClip {
    SampledClip {
      fps: 30.0,
      frames: (0..n)
        .map(|i| Frame::new(i * 15, 30.0, RgbImage::new(64, 48)))
        .collect(),
      audio,
    }
  }

  fn task(detector: FixedDetector) -> DetectionTask<FixedDetector, FileEncoder, FileMuxer> {
    DetectionTask::new(
      detector,
      PipelineConfig::default(),
      Reassembler::new(FileEncoder, FileMuxer),
    )
    .unwrap()
  }

  #[test]
  fn rejects_catalog_missing_restricted_ids() {
    let mut detector = FixedDetector::new(Vec::new());
    detector.catalog = [(1, "person")].into_iter().collect();
    let result = DetectionTask::new(
      detector,
      PipelineConfig::default(),
      Reassembler::new(FileEncoder, FileMuxer),
    );
    assert!(matches!(result, Err(TaskError::Init(_))));
  }

  #[test]
  fn counts_and_persists_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
      image_dir: Some(dir.path().join("images")),
      video_dir: Some(dir.path().join("videos")),
      ..Default::default()
    };
    let audio = AudioTrack::new(8000, 1, vec![0; 64]);
    let report = task(FixedDetector::new(vec![person()]))
      .run_clip(clip(3, Some(audio)), &options)
      .unwrap();

    assert_eq!(report.sampled_frames, 3);
    assert_eq!(report.detections, 3);
    assert_eq!(report.rectangles, 3);
    assert_eq!(report.images.len(), 3);
    assert!(report.images[2].to_string_lossy().contains("detected_frame_2_"));

    let saved = image::open(&report.images[0]).unwrap().to_rgb8();
    assert_eq!(*saved.get_pixel(24, 30), Rgb([255, 0, 0]));

    assert_eq!(std::fs::read_to_string(report.video.unwrap()).unwrap(), "3");
    assert!(report.video_with_audio.unwrap().exists());
  }

  #[test]
  fn no_output_dirs_write_nothing() {
    let report = task(FixedDetector::new(vec![person()]))
      .run_clip(clip(2, None), &RunOptions::default())
      .unwrap();
    assert_eq!(report.rectangles, 2);
    assert!(report.images.is_empty());
    assert!(report.video.is_none());
    assert!(report.video_with_audio.is_none());
  }

  #[test]
  fn detector_failure_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut detector = FixedDetector::new(vec![person()]);
    detector.fail_at = Some(2);
    let options = RunOptions {
      video_dir: Some(dir.path().to_path_buf()),
      ..Default::default()
    };
    let err = task(detector).run_clip(clip(4, None), &options).unwrap_err();
    assert!(matches!(err, TaskError::Detect(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn display_pushes_each_frame_to_preview() {
    let shown = std::rc::Rc::new(std::cell::Cell::new(0));
    let options = RunOptions {
      display: true,
      ..Default::default()
    };
    task(FixedDetector::new(Vec::new()))
      .with_preview(Box::new(CountingPreview(shown.clone())))
      .run_clip(clip(5, None), &options)
      .unwrap();
    assert_eq!(shown.get(), 5);
  }

  #[test]
  fn display_without_preview_is_ignored() {
    let options = RunOptions {
      display: true,
      ..Default::default()
    };
    let report = task(FixedDetector::new(Vec::new()))
      .run_clip(clip(1, None), &options)
      .unwrap();
    assert_eq!(report.rectangles, 0);
  }
}
