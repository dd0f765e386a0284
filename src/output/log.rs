// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/log.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;

use crate::{FromUrlWithScheme, frame::ImageFrame, model::DetectResult, output::Render};

/// 只把检测结果写入日志，`log:`
#[derive(Debug, Default)]
pub struct LogOutput {
  labels: Vec<String>,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl crate::FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(LogOutput::default())
  }
}

impl LogOutput {
  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }
}

impl Render<ImageFrame, DetectResult> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    info!(
      "图像 {}x{}: 检测到 {} 个物体",
      frame.width(),
      frame.height(),
      result.len()
    );
    for item in result.iter() {
      info!(
        "  {} {:.2} @ ({:.1}, {:.1}, {:.1}, {:.1})",
        DetectResult::label_of(item, &self.labels),
        item.score,
        item.x,
        item.y,
        item.w,
        item.h
      );
    }
    Ok(())
  }
}
