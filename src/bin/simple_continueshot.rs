// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续处理多帧图像
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_yolo26::{
  FromUrl,
  engine::EngineWrapper,
  frame::FitPolicy,
  model::{SortOrder, Yolo26Builder},
  task::{ContinuousTask, Task},
};
use tracing::info;

/// YOLO26 连续检测，输入可为 dir:///path 目录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值，默认 0.5
  #[arg(long)]
  pub confidence: Option<f32>,
  /// NMS 交并比阈值，默认 0.45
  #[arg(long)]
  pub iou: Option<f32>,
  /// 缩放方式: fill / contain / cover，默认 contain
  #[arg(long)]
  pub fit: Option<FitPolicy>,
  /// 结果排序: none / largest / smallest
  #[arg(long)]
  pub sort: Option<SortOrder>,
  /// 处理的最大帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

/// URL 查询参数给出默认值，命令行参数优先
fn builder(args: &Args) -> Result<Yolo26Builder> {
  let mut builder = Yolo26Builder::from_url(&args.model)?;
  if let Some(confidence) = args.confidence {
    builder = builder.confidence_threshold(confidence);
  }
  if let Some(iou) = args.iou {
    builder = builder.iou_threshold(iou);
  }
  if let Some(fit) = args.fit {
    builder = builder.fit(fit);
  }
  if let Some(sort) = args.sort {
    builder = builder.sort(sort);
  }
  Ok(builder)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input_image = shanan_yolo26::input::InputWrapper::from_url(&args.input)?;
  let model = builder(&args)?.build(EngineWrapper::from_url(&args.model)?)?;
  let output =
    shanan_yolo26::output::OutputWrapper::from_url(&args.output)?.with_labels(model.labels().to_vec());

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input_image, model, output)?;

  Ok(())
}
