// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎抽象
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

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FitPolicy, FrameError, ImageFrame},
  tensor::{LayerInfo, TensorLayout, Tensors},
};

/// 检测器依赖的推理后端。
///
/// 引擎负责预处理（按 `fit` 缩放、按 `mean`/`scale` 归一化）与前向推理，
/// 输出以浮点张量视图交回，视图只在下一次 `forward` 之前有效。
pub trait InferenceEngine {
  fn inputs_info(&self) -> &[LayerInfo];

  fn outputs_info(&self) -> &[LayerInfo];

  /// 模型附带的键值元数据
  fn extra_info(&self) -> &HashMap<String, String>;

  /// 平台明确给出的输出布局，没有时由形状推断
  fn declared_layout(&self) -> Option<TensorLayout> {
    None
  }

  /// `Ok(None)` 表示结果尚未就绪（例如双缓冲流水线的首帧）
  fn forward(
    &mut self,
    frame: &ImageFrame,
    mean: [f32; 3],
    scale: [f32; 3],
    fit: FitPolicy,
  ) -> Result<Option<Tensors<'_>>, EngineError>;
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型描述解析失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("张量形状错误: {0}")]
  Shape(String),
  #[error("缺少数据: {0}")]
  Missing(String),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("图像预处理失败: {0}")]
  Frame(#[from] FrameError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 与模型一同存放的描述文件内容
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineManifest {
  #[serde(default)]
  pub extra_info: HashMap<String, String>,
  #[serde(default)]
  pub inputs: Vec<LayerInfo>,
  #[serde(default)]
  pub layout: Option<TensorLayout>,
  #[serde(default)]
  pub outputs: Vec<LayerInfo>,
}

mod replay;
pub use self::replay::{ReplayEngine, ReplayTensor};

#[cfg(feature = "rknpu")]
mod npu;
#[cfg(feature = "rknpu")]
pub use self::npu::RknpuEngine;

pub enum EngineWrapper {
  Replay(ReplayEngine),
  #[cfg(feature = "rknpu")]
  Rknpu(RknpuEngine),
}

impl FromUrl for EngineWrapper {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayEngine::SCHEME => Ok(EngineWrapper::Replay(ReplayEngine::from_url(url)?)),
      #[cfg(feature = "rknpu")]
      RknpuEngine::SCHEME => Ok(EngineWrapper::Rknpu(RknpuEngine::from_url(url)?)),
      other => Err(EngineError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InferenceEngine for EngineWrapper {
  fn inputs_info(&self) -> &[LayerInfo] {
    match self {
      EngineWrapper::Replay(engine) => engine.inputs_info(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknpu(engine) => engine.inputs_info(),
    }
  }

  fn outputs_info(&self) -> &[LayerInfo] {
    match self {
      EngineWrapper::Replay(engine) => engine.outputs_info(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknpu(engine) => engine.outputs_info(),
    }
  }

  fn extra_info(&self) -> &HashMap<String, String> {
    match self {
      EngineWrapper::Replay(engine) => engine.extra_info(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknpu(engine) => engine.extra_info(),
    }
  }

  fn declared_layout(&self) -> Option<TensorLayout> {
    match self {
      EngineWrapper::Replay(engine) => engine.declared_layout(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknpu(engine) => engine.declared_layout(),
    }
  }

  fn forward(
    &mut self,
    frame: &ImageFrame,
    mean: [f32; 3],
    scale: [f32; 3],
    fit: FitPolicy,
  ) -> Result<Option<Tensors<'_>>, EngineError> {
    match self {
      EngineWrapper::Replay(engine) => engine.forward(frame, mean, scale, fit),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknpu(engine) => engine.forward(frame, mean, scale, fit),
    }
  }
}

/// 读取 URL 查询参数
pub(crate) fn query_param(url: &Url, key: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.into_owned())
}
