// 该文件是 Yingxi （影析） 项目的一部分。
// src/config.rs - 流水线固定配置
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

use std::collections::HashMap;
use std::path::Path;

use image::Rgb;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::filter::RestrictedClassSet;

/// 未登记标签使用的颜色（白色）
pub const FALLBACK_COLOR: [u8; 3] = [255, 255, 255];

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;

#[derive(Error, Debug)]
pub enum ConfigError {
  /// 配置文件读取失败
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  /// JSON 格式或字段类型错误
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  /// 阈值不在 [0, 1] 内
  #[error("置信度阈值无效: {0}")]
  InvalidThreshold(f32),
}

/// 标签 → RGB 显示颜色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorTable {
  colors: HashMap<String, [u8; 3]>,
}

impl Default for ColorTable {
  fn default() -> Self {
    [
      ("person", [255, 0, 0]),
      ("cell phone", [0, 255, 0]),
      ("laptop", [0, 255, 255]),
      ("tv", [255, 165, 0]),
      ("keyboard", [255, 0, 255]),
      ("mouse", [0, 128, 255]),
    ]
    .into_iter()
    .collect()
  }
}

impl<S: Into<String>> FromIterator<(S, [u8; 3])> for ColorTable {
  fn from_iter<I: IntoIterator<Item = (S, [u8; 3])>>(iter: I) -> Self {
    Self {
      colors: iter.into_iter().map(|(l, c)| (l.into(), c)).collect(),
    }
  }
}

impl ColorTable {
  pub fn color(&self, label: &str) -> Rgb<u8> {
    Rgb(self.colors.get(label).copied().unwrap_or(FALLBACK_COLOR))
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

/// 一次运行内不可变的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub restricted_classes: RestrictedClassSet,
  pub colors: ColorTable,
  pub confidence_threshold: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      restricted_classes: RestrictedClassSet::default(),
      colors: ColorTable::default(),
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }
}

impl PipelineConfig {
  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Result<Self, ConfigError> {
    self.confidence_threshold = threshold;
    self.validate()?;
    Ok(self)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reference_configuration() {
    let config = PipelineConfig::default();
    assert_eq!(config.restricted_classes.len(), 6);
    assert_eq!(config.restricted_classes.label(77), Some("cell phone"));
    assert_eq!(config.colors.color("person"), Rgb([255, 0, 0]));
    assert_eq!(config.confidence_threshold, 0.9);
  }

  #[test]
  fn unlisted_label_falls_back() {
    let colors = ColorTable::default();
    assert_eq!(colors.color("giraffe"), Rgb(FALLBACK_COLOR));
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let config = PipelineConfig::from_json_str(
      r#"{ "restricted_classes": { "1": "person", "18": "dog" }, "confidence_threshold": 0.7 }"#,
    )
    .unwrap();
    assert_eq!(config.restricted_classes.len(), 2);
    assert_eq!(config.restricted_classes.label(18), Some("dog"));
    assert_eq!(config.confidence_threshold, 0.7);
    assert_eq!(config.colors, ColorTable::default());
  }

  #[test]
  fn rejects_threshold_out_of_range() {
    let err = PipelineConfig::from_json_str(r#"{ "confidence_threshold": 1.5 }"#).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidThreshold(_)));
    assert!(PipelineConfig::default().with_confidence_threshold(-0.1).is_err());
  }

  #[test]
  fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "colors": { "person": [1, 2, 3] } }"#).unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.colors.color("person"), Rgb([1, 2, 3]));
    assert_eq!(config.colors.color("tv"), Rgb(FALLBACK_COLOR));
  }
}
