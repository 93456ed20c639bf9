// 该文件是 Yingxi （影析） 项目的一部分。
// src/output/draw.rs - 在帧上绘制检测框与标签
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

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::{
  config::ColorTable,
  model::{ClassCatalog, Detection, NormalizedBox},
};

static FONT_DATA: &[u8] = include_bytes!("../../assets/font.ttf");

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const STROKE_WIDTH: i32 = 2;

#[derive(Error, Debug)]
pub enum AnnotateError {
  /// 检测结果引用了类别表之外的 id
  #[error("类别 {0} 不在检测器类别表中")]
  UnknownClass(u32),
  /// 内嵌字体无法解析
  #[error("字体加载错误")]
  FontLoadError,
}

/// 帧内的像素矩形，两端均包含
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x_min: i32,
  pub y_min: i32,
  pub x_max: i32,
  pub y_max: i32,
}

impl PixelRect {
  /// 反归一化：先截断取整，再夹到 `[0, W-1] × [0, H-1]`
  ///
  /// 夹取后宽或高为零（框完全在帧外或退化）时返回 `None`。
  pub fn from_normalized(bbox: &NormalizedBox, width: u32, height: u32) -> Option<Self> {
    if width == 0 || height == 0 {
      return None;
    }
    let (w, h) = (width as f32, height as f32);
    let [x0, y0, x1, y1] = bbox.corners();

    let x_min = ((x0 * w) as i32).clamp(0, width as i32 - 1);
    let y_min = ((y0 * h) as i32).clamp(0, height as i32 - 1);
    let x_max = ((x1 * w) as i32).clamp(0, width as i32 - 1);
    let y_max = ((y1 * h) as i32).clamp(0, height as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }
    Some(Self {
      x_min,
      y_min,
      x_max,
      y_max,
    })
  }

  fn inset(&self, by: i32) -> Option<Rect> {
    let (w, h) = (
      self.x_max - self.x_min + 1 - 2 * by,
      self.y_max - self.y_min + 1 - 2 * by,
    );
    (w > 0 && h > 0).then(|| Rect::at(self.x_min + by, self.y_min + by).of_size(w as u32, h as u32))
  }
}

/// 把检测结果画到帧上
pub struct Annotator {
  font: FontRef<'static>,
  colors: ColorTable,
}

impl Annotator {
  pub fn new(colors: ColorTable) -> Result<Self, AnnotateError> {
    let font = FontRef::try_from_slice(FONT_DATA).map_err(|_| AnnotateError::FontLoadError)?;
    Ok(Self { font, colors })
  }

  /// 原地绘制全部检测，返回实际绘制的矩形数
  ///
  /// 类别不在 `catalog` 中属于配置错误，整帧不做任何修改直接返回错误。
  pub fn draw(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    catalog: &ClassCatalog,
  ) -> Result<usize, AnnotateError> {
    let labelled = detections
      .iter()
      .map(|d| {
        catalog
          .label(d.class_id)
          .map(|label| (d, label))
          .ok_or(AnnotateError::UnknownClass(d.class_id))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let mut drawn = 0;
    for (detection, label) in labelled {
      let Some(rect) = PixelRect::from_normalized(&detection.bbox, image.width(), image.height())
      else {
        continue;
      };
      self.draw_bbox_with_label(image, &rect, label, self.colors.color(label));
      drawn += 1;
    }
    Ok(drawn)
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, rect: &PixelRect, label: &str, color: Rgb<u8>) {
    // 边框加粗为 2 像素：向内收缩逐层绘制
    for by in 0..STROKE_WIDTH {
      if let Some(r) = rect.inset(by) {
        draw_hollow_rect_mut(image, r, color);
      }
    }

    // 标签放在框的左上角上方，超出顶部时贴在第 0 行
    let label_y = (rect.y_min - LABEL_TEXT_HEIGHT).max(0);
    draw_text_mut(
      image,
      color,
      rect.x_min,
      label_y,
      PxScale::from(LABEL_FONT_SIZE),
      &self.font,
      label,
    );
  }
}
