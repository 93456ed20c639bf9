// 该文件是 Yingxi （影析） 项目的一部分。
// src/output/save_image_file.rs - 逐帧保存标注后的图像
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::output::output_timestamp;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  /// 创建目录失败
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  /// PNG 编码或写入失败
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
}

/// 把标注后的帧保存为 `detected_frame_<序号>_<时间戳>.png`
pub struct SaveImageFileOutput {
  dir: PathBuf,
}

impl SaveImageFileOutput {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn file_name(ordinal: usize, timestamp: &str) -> String {
    format!("detected_frame_{}_{}.png", ordinal, timestamp)
  }

  pub fn save_image(&self, ordinal: usize, image: &RgbImage) -> Result<PathBuf, SaveImageFileError> {
    std::fs::create_dir_all(&self.dir).map_err(SaveImageFileError::IoError)?;

    let path = self
      .dir
      .join(Self::file_name(ordinal, &output_timestamp()));
    image.save(&path).map_err(SaveImageFileError::ImageError)?;

    info!("保存图像到文件: {}", path.display());

    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_follow_pattern() {
    assert_eq!(
      SaveImageFileOutput::file_name(3, "20260101_120000"),
      "detected_frame_3_20260101_120000.png"
    );
  }

  #[test]
  fn creates_directory_and_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path().join("images"));
    let path = output
      .save_image(0, &RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3])))
      .unwrap();

    assert!(path.starts_with(output.dir()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("detected_frame_0_"));
    assert!(name.ends_with(".png"));

    let loaded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(loaded.dimensions(), (8, 6));
    assert_eq!(*loaded.get_pixel(0, 0), image::Rgb([1, 2, 3]));
  }
}
