// 该文件是 Yingxi （影析） 项目的一部分。
// src/filter.rs - 受限类别过滤
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

use serde::{Deserialize, Serialize};

use crate::model::{ClassCatalog, Detection};

/// 允许显示的类别（类别编号 → 名称），是检测器类别表的子集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestrictedClassSet {
  classes: BTreeMap<u32, String>,
}

impl Default for RestrictedClassSet {
  fn default() -> Self {
    [
      (1, "person"),
      (77, "cell phone"),
      (73, "laptop"),
      (72, "tv"),
      (76, "keyboard"),
      (74, "mouse"),
    ]
    .into_iter()
    .collect()
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for RestrictedClassSet {
  fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
    Self {
      classes: iter.into_iter().map(|(id, l)| (id, l.into())).collect(),
    }
  }
}

impl RestrictedClassSet {
  pub fn contains(&self, class_id: u32) -> bool {
    self.classes.contains_key(&class_id)
  }

  pub fn label(&self, class_id: u32) -> Option<&str> {
    self.classes.get(&class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
    self.classes.keys().copied()
  }

  /// 只保留允许的类别，保持原有顺序
  pub fn restrict(&self, detections: Vec<Detection>) -> Vec<Detection> {
    detections
      .into_iter()
      .filter(|d| self.contains(d.class_id))
      .collect()
  }

  /// 返回第一个不在类别表中的编号
  pub fn first_missing_from(&self, catalog: &ClassCatalog) -> Option<u32> {
    self.ids().find(|id| !catalog.contains(*id))
  }
}
