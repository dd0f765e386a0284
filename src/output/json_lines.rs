// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/json_lines.rs - 以 JSON Lines 记录检测结果
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

use std::{
  cell::{Cell, RefCell},
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  model::{DetectItem, DetectResult},
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonLinesError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Serialize)]
struct Detection<'a> {
  #[serde(flatten)]
  item: &'a DetectItem,
  label: &'a str,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  frame: usize,
  width: u32,
  height: u32,
  detections: Vec<Detection<'a>>,
}

/// 每帧追加一行 JSON，`json:///path/result.jsonl`
pub struct JsonLinesOutput {
  writer: RefCell<BufWriter<File>>,
  labels: Vec<String>,
  frame_index: Cell<usize>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::create(url.path())
  }
}

impl JsonLinesOutput {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, JsonLinesError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    info!("检测结果写入: {}", path.display());
    Ok(JsonLinesOutput {
      writer: RefCell::new(BufWriter::new(File::create(path)?)),
      labels: Vec::new(),
      frame_index: Cell::new(0),
    })
  }

  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }
}

impl Render<ImageFrame, DetectResult> for JsonLinesOutput {
  type Error = JsonLinesError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let index = self.frame_index.get();
    self.frame_index.set(index + 1);

    let record = FrameRecord {
      frame: index,
      width: frame.width(),
      height: frame.height(),
      detections: result
        .iter()
        .map(|item| Detection {
          item,
          label: DetectResult::label_of(item, &self.labels),
        })
        .collect(),
    };

    let mut writer = self.writer.borrow_mut();
    serde_json::to_writer(&mut *writer, &record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    debug!("第 {} 帧写入 {} 个检测结果", index, result.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelFormat;

  #[test]
  fn writes_one_line_per_frame() {
    let path = std::env::temp_dir().join(format!("shanan-json-{}.jsonl", std::process::id()));
    let output = JsonLinesOutput::create(&path)
      .unwrap()
      .with_labels(vec!["person".to_string()]);
    let frame = ImageFrame::with_shape(8, 6, PixelFormat::Rgb888);
    let result = DetectResult::from(vec![
      DetectItem::new(1.0, 2.0, 3.0, 4.0, 0, 0.75),
      DetectItem::new(0.0, 0.0, 1.0, 1.0, 5, 0.5),
    ]);
    output.render_result(&frame, &result).unwrap();
    output.render_result(&frame, &DetectResult::empty()).unwrap();
    drop(output);

    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
      .lines()
      .map(|line| serde_json::from_str(line).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["frame"], 0);
    assert_eq!(lines[0]["width"], 8);
    assert_eq!(lines[0]["detections"][0]["label"], "person");
    assert_eq!(lines[0]["detections"][0]["class_id"], 0);
    assert_eq!(lines[0]["detections"][0]["x"], 1.0);
    assert_eq!(lines[0]["detections"][1]["label"], "unknown");
    assert_eq!(lines[1]["frame"], 1);
    assert_eq!(lines[1]["detections"].as_array().unwrap().len(), 0);
  }
}
