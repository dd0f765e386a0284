// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/replay.rs - 回放已保存输出张量的推理引擎
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

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineError, InferenceEngine, query_param},
  frame::{FitPolicy, ImageFrame},
  tensor::{LayerInfo, RawTensorView, TensorLayout, Tensors},
};

/// 回放文件中的一个输出张量。
///
/// `data` 给出完整数据；否则以 `fill` 填充后再按 `patches` 中的 `(下标, 值)` 修改。
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayTensor {
  pub name: String,
  pub shape: Vec<usize>,
  #[serde(default)]
  pub data: Option<Vec<f32>>,
  #[serde(default)]
  pub fill: f32,
  #[serde(default)]
  pub patches: Vec<(usize, f32)>,
}

impl ReplayTensor {
  fn materialize(self) -> Result<(LayerInfo, Vec<f32>), EngineError> {
    let info = LayerInfo::new(self.name, self.shape);
    let expected = info.elements();
    let data = match self.data {
      Some(data) => data,
      None => {
        let mut data = vec![self.fill; expected];
        for (index, value) in self.patches {
          let slot = data.get_mut(index).ok_or_else(|| {
            EngineError::Shape(format!(
              "张量 {} 的修改位置 {} 越界, 元素数 {}",
              info.name, index, expected
            ))
          })?;
          *slot = value;
        }
        data
      }
    };

    if data.len() != expected {
      error!(
        "张量 {} 数据长度 {} 与形状 {:?} 不符",
        info.name,
        data.len(),
        info.shape
      );
      return Err(EngineError::Shape(format!(
        "张量 {} 数据长度 {} 与形状 {:?} 不符",
        info.name,
        data.len(),
        info.shape
      )));
    }
    Ok((info, data))
  }
}

#[derive(Debug, Deserialize)]
struct ReplayFile {
  #[serde(default)]
  extra_info: HashMap<String, String>,
  inputs: Vec<LayerInfo>,
  #[serde(default)]
  layout: Option<TensorLayout>,
  outputs: Vec<ReplayTensor>,
  #[serde(default)]
  warmup: usize,
}

/// 每次前向推理都返回同一组保存好的输出张量。
///
/// 设置 `warmup` 后前若干次调用返回未就绪，用于模拟双缓冲流水线。
#[derive(Debug, Clone)]
pub struct ReplayEngine {
  inputs: Vec<LayerInfo>,
  outputs: Vec<LayerInfo>,
  buffers: Vec<Vec<f32>>,
  extra_info: HashMap<String, String>,
  layout: Option<TensorLayout>,
  warmup: usize,
  forwards: usize,
}

impl ReplayEngine {
  pub fn new(
    inputs: Vec<LayerInfo>,
    outputs: Vec<(LayerInfo, Vec<f32>)>,
    extra_info: HashMap<String, String>,
  ) -> Self {
    let (outputs, buffers) = outputs.into_iter().unzip();
    Self {
      inputs,
      outputs,
      buffers,
      extra_info,
      layout: None,
      warmup: 0,
      forwards: 0,
    }
  }

  pub fn with_layout(mut self, layout: Option<TensorLayout>) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }

  pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
    let file: ReplayFile = serde_json::from_str(json)?;
    let outputs = file
      .outputs
      .into_iter()
      .map(ReplayTensor::materialize)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(
      Self::new(file.inputs, outputs, file.extra_info)
        .with_layout(file.layout)
        .with_warmup(file.warmup),
    )
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let path = path.as_ref();
    info!("加载回放文件: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    let engine = Self::from_json_str(&json)?;
    debug!(
      "回放文件包含 {} 个输入, {} 个输出",
      engine.inputs.len(),
      engine.outputs.len()
    );
    Ok(engine)
  }

  /// 已执行的前向推理次数（含未就绪的调用）
  pub fn forwards(&self) -> usize {
    self.forwards
  }
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = EngineError;

  /// `replay:///path/to/dump.json?warmup=N`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(EngineError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut engine = Self::from_path(url.path())?;
    if let Some(warmup) = query_param(url, "warmup") {
      engine.warmup = warmup
        .parse()
        .map_err(|_| EngineError::Backend(format!("warmup 参数不是整数: {}", warmup)))?;
    }
    Ok(engine)
  }
}

impl InferenceEngine for ReplayEngine {
  fn inputs_info(&self) -> &[LayerInfo] {
    &self.inputs
  }

  fn outputs_info(&self) -> &[LayerInfo] {
    &self.outputs
  }

  fn extra_info(&self) -> &HashMap<String, String> {
    &self.extra_info
  }

  fn declared_layout(&self) -> Option<TensorLayout> {
    self.layout
  }

  fn forward(
    &mut self,
    frame: &ImageFrame,
    _mean: [f32; 3],
    _scale: [f32; 3],
    fit: FitPolicy,
  ) -> Result<Option<Tensors<'_>>, EngineError> {
    self.forwards += 1;
    debug!(
      "回放第 {} 次推理, 图像 {}x{}, 缩放方式 {}",
      self.forwards,
      frame.width(),
      frame.height(),
      fit
    );

    if self.forwards <= self.warmup {
      return Ok(None);
    }

    Ok(Some(
      self
        .outputs
        .iter()
        .zip(self.buffers.iter())
        .filter_map(|(info, data)| {
          let shape: [usize; 4] = info.shape.as_slice().try_into().ok()?;
          Some((info.name.clone(), RawTensorView::new(shape, data)))
        })
        .collect(),
    ))
  }
}
