// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/npu.rs - RKNN NPU 推理引擎
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

use std::{collections::HashMap, path::PathBuf};

use ::rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineError, EngineManifest, InferenceEngine, query_param},
  frame::{FitPolicy, ImageFrame, fit_image},
  input::AsNhwcFrame,
  tensor::{LayerInfo, RawTensorView, TensorLayout, Tensors},
};

fn backend(msg: &str, e: ::rknpu::Error) -> EngineError {
  error!("{}: {}", msg, e);
  EngineError::Backend(format!("{}: {}", msg, e))
}

/// RKNN 运行时。
///
/// 归一化参数已编译进模型，输入为 NHWC 排列的 u8 图像；
/// 输出名称与形状由与模型同名的 `.json` 描述文件给出。
pub struct RknpuEngine {
  context: Context,
  manifest: EngineManifest,
  buffers: Vec<Vec<f32>>,
}

impl FromUrlWithScheme for RknpuEngine {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknpuEngine {
  type Error = EngineError;

  /// `rknn:///path/model.rknn?manifest=/path/model.json`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::SchemeMismatch(url.scheme().to_string()));
    }

    let model_path = PathBuf::from(url.path());
    let manifest_path = query_param(url, "manifest")
      .map(PathBuf::from)
      .unwrap_or_else(|| model_path.with_extension("json"));

    info!("加载模型描述文件: {}", manifest_path.display());
    let manifest: EngineManifest =
      serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;

    Self::load(model_path, manifest)
  }
}

impl RknpuEngine {
  pub fn load(model_path: impl Into<PathBuf>, manifest: EngineManifest) -> Result<Self, EngineError> {
    let model_path = model_path.into();
    info!("加载模型文件: {}", model_path.display());
    let model_data = std::fs::read(&model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())
      .map_err(|e| backend("创建推理上下文失败", e))?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => return Err(backend("无法查询 SDK 版本", e)),
    }

    let num_outputs = context
      .num_outputs()
      .map_err(|e| backend("无法获取输出数量", e))? as usize;
    if num_outputs != manifest.outputs.len() {
      error!(
        "模型输出数量为 {}, 描述文件给出 {}",
        num_outputs,
        manifest.outputs.len()
      );
      return Err(EngineError::Shape(format!(
        "模型输出数量为 {}, 描述文件给出 {}",
        num_outputs,
        manifest.outputs.len()
      )));
    }
    info!("模型加载完成, 输出数量: {}", num_outputs);

    let buffers = manifest
      .outputs
      .iter()
      .map(|info| Vec::with_capacity(info.elements()))
      .collect();
    Ok(Self {
      context,
      manifest,
      buffers,
    })
  }

  fn input_size(&self) -> Result<(u32, u32), EngineError> {
    let shape = self
      .manifest
      .inputs
      .first()
      .map(|info| info.shape.as_slice())
      .ok_or_else(|| EngineError::Missing("描述文件没有输入层".to_string()))?;
    match shape {
      [_, h, w, c] if *c <= 4 => Ok((*w as u32, *h as u32)),
      [_, _, h, w] => Ok((*w as u32, *h as u32)),
      other => Err(EngineError::Shape(format!("输入形状 {:?} 不是 4 维", other))),
    }
  }
}

impl InferenceEngine for RknpuEngine {
  fn inputs_info(&self) -> &[LayerInfo] {
    &self.manifest.inputs
  }

  fn outputs_info(&self) -> &[LayerInfo] {
    &self.manifest.outputs
  }

  fn extra_info(&self) -> &HashMap<String, String> {
    &self.manifest.extra_info
  }

  fn declared_layout(&self) -> Option<TensorLayout> {
    self.manifest.layout
  }

  fn forward(
    &mut self,
    frame: &ImageFrame,
    _mean: [f32; 3],
    _scale: [f32; 3],
    fit: FitPolicy,
  ) -> Result<Option<Tensors<'_>>, EngineError> {
    let (input_w, input_h) = self.input_size()?;
    let (fitted, _) = fit_image(frame, input_w, input_h, fit)?;

    debug!("设置模型输入");
    self
      .context
      .set_input(0, fitted.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)
      .map_err(|e| backend("设置输入失败", e))?;

    debug!("执行模型推理");
    self.context.run().map_err(|e| backend("推理失败", e))?;

    let output = self
      .context
      .get_outputs()
      .map_err(|e| backend("获取输出失败", e))?;
    for (idx, buffer) in self.buffers.iter_mut().enumerate() {
      let data = output
        .get_f32(idx)
        .map_err(|e| backend(&format!("获取第 {} 个输出失败", idx), e))?;
      buffer.clear();
      buffer.extend_from_slice(&data);
    }

    let mut tensors = Tensors::new();
    for (info, data) in self.manifest.outputs.iter().zip(self.buffers.iter()) {
      let shape: [usize; 4] = info
        .shape
        .as_slice()
        .try_into()
        .map_err(|_| EngineError::Shape(format!("输出 {} 不是 4 维", info.name)))?;
      tensors.insert(info.name.clone(), RawTensorView::new(shape, data));
    }
    Ok(Some(tensors))
  }
}
