// 该文件是 Yingxi （影析） 项目的一部分。
// src/model/detr.rs - DETR 目标检测模型（ONNX Runtime）
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

use image::{RgbImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DEFAULT_CONFIDENCE_THRESHOLD,
  model::{ClassCatalog, Detection, Detector, NormalizedBox, coco::coco_detr_catalog},
};

const DETR_LOGITS: &str = "logits";
const DETR_PRED_BOXES: &str = "pred_boxes";
const DETR_SHORT_SIDE: u32 = 800;
const DETR_LONG_SIDE_MAX: u32 = 1333;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// DETR 模型错误
///
/// `ModelLoadError`、`ModelPathError` 与 `SessionError` 只在构建阶段出现，
/// 属于初始化失败；`ModelInvalid` 与 `RuntimeError` 出现在推理阶段。
#[derive(Error, Debug)]
pub enum DetrError {
  /// 模型文件不可读
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  /// URL 方案不是 `detr`
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  /// ONNX Runtime 会话创建失败
  #[error("会话创建错误: {0}, 错误: {1}")]
  SessionError(String, String),
  /// 模型输出与 DETR 约定不符
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  /// 推理过程中的 ONNX Runtime 错误
  #[error("ONNX Runtime 错误: {0}, 错误: {1}")]
  RuntimeError(String, String),
}

impl DetrError {
  fn session(msg: &str, e: impl std::fmt::Display) -> Self {
    DetrError::SessionError(msg.to_string(), e.to_string())
  }

  fn runtime(msg: &str, e: impl std::fmt::Display) -> Self {
    DetrError::RuntimeError(msg.to_string(), e.to_string())
  }

  /// 是否为构建阶段的初始化失败
  pub fn is_init(&self) -> bool {
    matches!(
      self,
      DetrError::ModelLoadError(_) | DetrError::ModelPathError(_) | DetrError::SessionError(..)
    )
  }
}

pub struct DetrBuilder {
  model_path: String,
  threshold: f32,
}

impl FromUrlWithScheme for DetrBuilder {
  const SCHEME: &'static str = "detr";
}

impl FromUrl for DetrBuilder {
  type Error = DetrError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetrError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(DetrBuilder {
      model_path: url.path().to_string(),
      threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    })
  }
}

impl DetrBuilder {
  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn build(self) -> Result<DetrDetector, DetrError> {
    info!("加载模型文件: {}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let session = Session::builder()
      .map_err(|e| DetrError::session("无法创建会话", e))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| DetrError::session("无法设置优化级别", e))?
      .commit_from_file(&self.model_path)
      .map_err(|e| DetrError::session("无法加载模型", e))?;
    info!("模型加载完成，置信度阈值 {}", self.threshold);

    Ok(DetrDetector {
      session,
      threshold: self.threshold,
      catalog: coco_detr_catalog(),
    })
  }
}

/// 基于 Transformer 的预训练 DETR 检测器
pub struct DetrDetector {
  session: Session,
  threshold: f32,
  catalog: ClassCatalog,
}

impl DetrDetector {
  fn preprocess(frame: &RgbImage) -> Array4<f32> {
    let (w, h) = frame.dimensions();
    let short = w.min(h).max(1) as f32;
    let long = w.max(h).max(1) as f32;
    let scale = (DETR_SHORT_SIDE as f32 / short).min(DETR_LONG_SIDE_MAX as f32 / long);
    let (nw, nh) = (
      ((w as f32 * scale).round() as u32).max(1),
      ((h as f32 * scale).round() as u32).max(1),
    );
    let resized = image::imageops::resize(frame, nw, nh, FilterType::Triangle);

    Array4::from_shape_fn((1, 3, nh as usize, nw as usize), |(_, c, y, x)| {
      let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
      (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
  }
}

impl Detector for DetrDetector {
  type Error = DetrError;

  fn catalog(&self) -> &ClassCatalog {
    &self.catalog
  }

  fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let input = CowArray::from(Self::preprocess(frame)).into_dyn();
    let inputs = ort::inputs![
      TensorRef::from_array_view(&input).map_err(|e| DetrError::runtime("无法创建输入张量", e))?
    ];
    let outputs = self
      .session
      .run(inputs)
      .map_err(|e| DetrError::runtime("推理失败", e))?;

    let logits = outputs
      .get(DETR_LOGITS)
      .ok_or_else(|| DetrError::ModelInvalid(format!("缺少输出 {}", DETR_LOGITS)))?;
    let boxes = outputs
      .get(DETR_PRED_BOXES)
      .ok_or_else(|| DetrError::ModelInvalid(format!("缺少输出 {}", DETR_PRED_BOXES)))?;
    let (logits_shape, logits) = logits
      .try_extract_tensor::<f32>()
      .map_err(|e| DetrError::runtime("无法读取 logits", e))?;
    let (_, boxes) = boxes
      .try_extract_tensor::<f32>()
      .map_err(|e| DetrError::runtime("无法读取 pred_boxes", e))?;

    // logits: [1, queries, classes + 1]
    let dims: &[i64] = logits_shape;
    let (queries, classes) = match dims {
      [_, q, c] if *q > 0 && *c > 1 => (*q as usize, *c as usize),
      _ => {
        return Err(DetrError::ModelInvalid(format!(
          "logits 形状无效: {:?}",
          dims
        )));
      }
    };
    if boxes.len() < queries * 4 {
      return Err(DetrError::ModelInvalid(format!(
        "pred_boxes 长度 {} 小于 {}",
        boxes.len(),
        queries * 4
      )));
    }

    Ok(decode_detections(
      logits,
      boxes,
      queries,
      classes,
      self.threshold,
    ))
  }
}

/// softmax 后去掉最后的“无目标”类别，保留最大概率高于阈值的查询
fn decode_detections(
  logits: &[f32],
  boxes: &[f32],
  queries: usize,
  classes: usize,
  threshold: f32,
) -> Vec<Detection> {
  let mut detections = Vec::new();
  for q in 0..queries {
    let row = &logits[q * classes..(q + 1) * classes];
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();

    let Some((class_id, prob)) = exp[..classes - 1]
      .iter()
      .enumerate()
      .max_by(|(_, a), (_, b)| a.total_cmp(b))
      .map(|(i, e)| (i as u32, e / sum))
    else {
      continue;
    };

    if prob > threshold {
      let b = &boxes[q * 4..q * 4 + 4];
      detections.push(Detection {
        class_id,
        score: prob,
        bbox: NormalizedBox::new(b[0], b[1], b[2], b[3]),
      });
    }
  }
  detections
}
