// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 一个检测框，`(x, y)` 为左上角，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectItem {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub class_id: u32,
  pub score: f32,
}

impl DetectItem {
  pub fn new(x: f32, y: f32, w: f32, h: f32, class_id: u32, score: f32) -> Self {
    Self {
      x,
      y,
      w,
      h,
      class_id,
      score,
    }
  }

  pub fn area(&self) -> f32 {
    self.w * self.h
  }

  /// `[x_min, y_min, x_max, y_max]`
  pub fn corners(&self) -> [f32; 4] {
    [self.x, self.y, self.x + self.w, self.y + self.h]
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  /// 以标签表查找检测框的类别名，越界时返回 `"unknown"`
  pub fn label_of<'l>(item: &DetectItem, labels: &'l [String]) -> &'l str {
    labels
      .get(item.class_id as usize)
      .map(String::as_str)
      .unwrap_or("unknown")
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 抑制之后按面积排序的方式，不影响保留哪些框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
  #[default]
  None,
  LargestFirst,
  SmallestFirst,
}

impl std::str::FromStr for SortOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "none" | "0" => Ok(SortOrder::None),
      "largest" | "desc" | "1" => Ok(SortOrder::LargestFirst),
      "smallest" | "asc" | "-1" => Ok(SortOrder::SmallestFirst),
      other => Err(format!("未知的排序方式: {}", other)),
    }
  }
}

pub mod correct;
mod error;
pub mod layout;
pub mod metadata;
pub mod nms;
pub mod proposal;
pub mod reducer;
mod yolo26;

pub use self::error::Yolo26Error;
pub use self::layout::{ResolvedHead, ScaleDescriptor};
pub use self::metadata::ModelMetadata;
pub use self::reducer::{ScoreReducer, select_reducer};
pub use self::yolo26::{DetectOptions, DetectorConfig, Yolo26, Yolo26Builder};
