// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/error.rs - 检测器错误定义
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

use thiserror::Error;

use crate::{engine::EngineError, frame::PixelFormat};

#[derive(Error, Debug)]
pub enum Yolo26Error {
  /// 元数据缺失或非法、输出张量数量/形状不符，加载即失败
  #[error("模型配置错误: {0}")]
  Config(String),
  #[error("图像格式不匹配, 模型输入: {expected}, 图像格式: {actual}")]
  FormatMismatch {
    expected: PixelFormat,
    actual: PixelFormat,
  },
  /// 解码时张量缺失或形状异常，仅影响本次调用
  #[error("后处理失败: {0}")]
  Decode(String),
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
}

impl Yolo26Error {
  pub fn config(msg: impl Into<String>) -> Self {
    Yolo26Error::Config(msg.into())
  }

  pub fn decode(msg: impl Into<String>) -> Self {
    Yolo26Error::Decode(msg.into())
  }
}
