// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/metadata.rs - 模型元数据解析
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

use tracing::{error, info};

use crate::{frame::PixelFormat, model::Yolo26Error};

pub const MODEL_TYPE: &str = "yolo26";
pub const DEFAULT_MEAN: [f32; 3] = [0.0, 0.0, 0.0];
pub const DEFAULT_SCALE: [f32; 3] = [1.0 / 255.0, 1.0 / 255.0, 1.0 / 255.0];

const KEY_MODEL_TYPE: &str = "model_type";
const KEY_INPUT_TYPE: &str = "input_type";
const KEY_MEAN: &str = "mean";
const KEY_SCALE: &str = "scale";
const KEY_LABELS: &str = "labels";

/// 从引擎附带的键值对中解析出的模型信息
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
  pub input_format: PixelFormat,
  pub mean: [f32; 3],
  pub scale: [f32; 3],
  /// 元数据中没有标签时为空
  pub labels: Vec<String>,
}

impl ModelMetadata {
  /// `model_type` 与 `input_type` 必须存在；`mean`、`scale`、`labels` 缺失时使用默认值
  pub fn parse(extra: &HashMap<String, String>) -> Result<Self, Yolo26Error> {
    match extra.get(KEY_MODEL_TYPE).map(|s| s.trim()) {
      Some(MODEL_TYPE) => {}
      Some(other) => {
        error!("模型类型不匹配, 期望 '{}', 实际为 '{}'", MODEL_TYPE, other);
        return Err(Yolo26Error::config(format!(
          "模型类型不匹配, 期望 '{}', 实际为 '{}'",
          MODEL_TYPE, other
        )));
      }
      None => {
        error!("元数据缺少 {} 字段", KEY_MODEL_TYPE);
        return Err(Yolo26Error::config(format!(
          "元数据缺少 {} 字段",
          KEY_MODEL_TYPE
        )));
      }
    }
    info!("模型类型: {}", MODEL_TYPE);

    let input_format = match extra.get(KEY_INPUT_TYPE) {
      Some(value) => match value.trim() {
        "rgb" => PixelFormat::Rgb888,
        "bgr" => PixelFormat::Bgr888,
        other => {
          error!("未知的输入类型: {}", other);
          return Err(Yolo26Error::config(format!("未知的输入类型: {}", other)));
        }
      },
      None => {
        error!("元数据缺少 {} 字段", KEY_INPUT_TYPE);
        return Err(Yolo26Error::config(format!(
          "元数据缺少 {} 字段",
          KEY_INPUT_TYPE
        )));
      }
    };
    info!("输入类型: {}", input_format.input_type());

    let mean = match extra.get(KEY_MEAN) {
      Some(value) => parse_triplet(KEY_MEAN, value)?,
      None => DEFAULT_MEAN,
    };
    let scale = match extra.get(KEY_SCALE) {
      Some(value) => parse_triplet(KEY_SCALE, value)?,
      None => DEFAULT_SCALE,
    };
    info!("均值: {:?}, 缩放: {:?}", mean, scale);

    let labels = extra
      .get(KEY_LABELS)
      .map(|value| parse_labels(value))
      .unwrap_or_default();
    info!("标签数量: {}", labels.len());

    Ok(Self {
      input_format,
      mean,
      scale,
      labels,
    })
  }
}

/// 解析逗号分隔的 3 个浮点数，各项两端空白会被去除
pub fn parse_triplet(key: &str, value: &str) -> Result<[f32; 3], Yolo26Error> {
  let values = value
    .split(',')
    .map(|item| {
      item.trim().parse::<f32>().map_err(|_| {
        error!("{} 的取值 '{}' 不是浮点数", key, item.trim());
        Yolo26Error::config(format!("{} 的取值 '{}' 不是浮点数", key, item.trim()))
      })
    })
    .collect::<Result<Vec<_>, _>>()?;

  values.try_into().map_err(|values: Vec<f32>| {
    Yolo26Error::config(format!("{} 需要 3 个值, 实际为 {}", key, values.len()))
  })
}

/// 逗号分隔的标签表，忽略空项
pub fn parse_labels(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|label| !label.is_empty())
    .map(str::to_string)
    .collect()
}

/// 读取标签文件，每行一个标签，忽略空行
pub fn load_label_file(path: impl AsRef<Path>) -> Result<Vec<String>, Yolo26Error> {
  let path = path.as_ref();
  info!("加载标签文件: {}", path.display());
  let content = std::fs::read_to_string(path)?;
  Ok(
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect(),
  )
}
