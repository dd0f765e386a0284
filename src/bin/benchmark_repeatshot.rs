// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理同一帧以测量耗时
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
  model::{Yolo26Builder, reducer::ReducerKind},
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// YOLO26 推理耗时测试
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，默认只写日志
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = 1000)]
  pub repeat: usize,
  /// 分类得分归约实现: wide / scalable / scalar
  #[arg(long)]
  pub reducer: Option<ReducerKind>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeat);

  let input_image = shanan_yolo26::input::InputWrapper::from_url(&args.input)?;
  let mut builder = Yolo26Builder::from_url(&args.model)?;
  if args.reducer.is_some() {
    builder = builder.reducer(args.reducer);
  }
  let model = builder.build(EngineWrapper::from_url(&args.model)?)?;
  info!("分类得分归约实现: {}", model.reducer_name());
  let output =
    shanan_yolo26::output::OutputWrapper::from_url(&args.output)?.with_labels(model.labels().to_vec());

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(input_image, model, output)?;

  Ok(())
}
