// 该文件是 Yingxi （影析） 项目的一部分。
// src/model.rs - 检测模型
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

use std::collections::BTreeMap;

use image::RgbImage;

/// 目标检测能力
///
/// 任何能把一帧 RGB 图像映射为 (类别, 归一化框) 的实现都可以替换进流水线。
/// 置信度过滤在实现内部完成。
pub trait Detector {
  type Error;

  /// 该检测器可能输出的全部类别
  fn catalog(&self) -> &ClassCatalog;

  fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  type Error = D::Error;

  fn catalog(&self) -> &ClassCatalog {
    (**self).catalog()
  }

  fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    (**self).analyze(frame)
  }
}

/// 中心点加宽高的归一化边界框，各分量相对帧尺寸
///
/// 检测器并不保证 `x_center ± width / 2` 落在 `[0, 1]` 内。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub x_center: f32,
  pub y_center: f32,
  pub width: f32,
  pub height: f32,
}

impl NormalizedBox {
  pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
    Self {
      x_center,
      y_center,
      width,
      height,
    }
  }

  /// `[x_min, y_min, x_max, y_max]`，仍为归一化坐标
  pub fn corners(&self) -> [f32; 4] {
    [
      self.x_center - self.width / 2.0,
      self.y_center - self.height / 2.0,
      self.x_center + self.width / 2.0,
      self.y_center + self.height / 2.0,
    ]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: NormalizedBox,
}

/// 类别编号到名称的映射，由检测器提供，运行期间不变
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCatalog {
  labels: BTreeMap<u32, String>,
}

impl ClassCatalog {
  pub fn label(&self, class_id: u32) -> Option<&str> {
    self.labels.get(&class_id).map(String::as_str)
  }

  pub fn contains(&self, class_id: u32) -> bool {
    self.labels.contains_key(&class_id)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.labels.iter().map(|(id, label)| (*id, label.as_str()))
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for ClassCatalog {
  fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().map(|(id, l)| (id, l.into())).collect(),
    }
  }
}

pub mod coco;

#[cfg(feature = "model_detr")]
mod detr;
#[cfg(feature = "model_detr")]
pub use self::detr::{DetrBuilder, DetrDetector, DetrError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn corners_may_leave_unit_square() {
    let bbox = NormalizedBox::new(0.05, 0.5, 0.2, 0.4);
    let [x0, y0, x1, y1] = bbox.corners();
    assert!(x0 < 0.0);
    assert!((y0 - 0.3).abs() < 1e-6);
    assert!((x1 - 0.15).abs() < 1e-6);
    assert!((y1 - 0.7).abs() < 1e-6);
  }

  #[test]
  fn catalog_lookup() {
    let catalog: ClassCatalog = [(1, "person"), (77, "cell phone")].into_iter().collect();
    assert_eq!(catalog.label(77), Some("cell phone"));
    assert_eq!(catalog.label(2), None);
    assert!(catalog.contains(1));
    assert_eq!(catalog.len(), 2);
  }
}
