// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 推理输出张量视图
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

use serde::{Deserialize, Serialize};

/// 4 维张量的存储顺序，批维恒为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  /// `[1, C, H, W]`
  #[serde(alias = "nchw")]
  ChannelFirst,
  /// `[1, H, W, C]`
  #[serde(alias = "nhwc")]
  ChannelLast,
}

impl TensorLayout {
  pub fn channels(&self, shape: [usize; 4]) -> usize {
    match self {
      TensorLayout::ChannelFirst => shape[1],
      TensorLayout::ChannelLast => shape[3],
    }
  }

  /// 返回 `(grid_h, grid_w)`
  pub fn grid(&self, shape: [usize; 4]) -> (usize, usize) {
    match self {
      TensorLayout::ChannelFirst => (shape[2], shape[3]),
      TensorLayout::ChannelLast => (shape[1], shape[2]),
    }
  }
}

/// 推理引擎声明的一个输入或输出层
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
  pub name: String,
  pub shape: Vec<usize>,
}

impl LayerInfo {
  pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
    Self {
      name: name.into(),
      shape: shape.into(),
    }
  }

  pub fn elements(&self) -> usize {
    self.shape.iter().product()
  }
}

/// 对引擎所持有的浮点缓冲区的只读借用，仅在一次前向推理内有效
#[derive(Debug, Clone, Copy)]
pub struct RawTensorView<'a> {
  shape: [usize; 4],
  data: &'a [f32],
}

impl<'a> RawTensorView<'a> {
  pub fn new(shape: [usize; 4], data: &'a [f32]) -> Self {
    Self { shape, data }
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn data(&self) -> &'a [f32] {
    self.data
  }

  /// 数据长度是否与形状一致
  pub fn is_consistent(&self) -> bool {
    self.shape.iter().product::<usize>() == self.data.len()
  }
}

/// 一次前向推理的全部命名输出
#[derive(Debug, Default)]
pub struct Tensors<'a> {
  views: HashMap<String, RawTensorView<'a>>,
}

impl<'a> Tensors<'a> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: impl Into<String>, view: RawTensorView<'a>) {
    self.views.insert(name.into(), view);
  }

  pub fn get(&self, name: &str) -> Option<&RawTensorView<'a>> {
    self.views.get(name)
  }

  pub fn len(&self) -> usize {
    self.views.len()
  }

  pub fn is_empty(&self) -> bool {
    self.views.is_empty()
  }
}

impl<'a> FromIterator<(String, RawTensorView<'a>)> for Tensors<'a> {
  fn from_iter<T: IntoIterator<Item = (String, RawTensorView<'a>)>>(iter: T) -> Self {
    Self {
      views: iter.into_iter().collect(),
    }
  }
}
