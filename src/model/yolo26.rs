// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo26.rs - YOLO26 检测器
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

use std::path::PathBuf;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  engine::{EngineWrapper, InferenceEngine, query_param},
  frame::{FitPolicy, ImageFrame, PixelFormat},
  model::{
    DetectItem, DetectResult, Model, ModelMetadata, ResolvedHead, ScaleDescriptor, ScoreReducer,
    SortOrder, Yolo26Error,
    correct::correct_boxes,
    layout::{BOX_CHANNELS, resolve_scales, synthesize_labels},
    metadata::load_label_file,
    nms::{nms, sort_by_size},
    proposal::{EARLY_EXIT_SCORE, ProposalParams, generate_proposals},
    reducer::{ReducerKind, select_reducer},
  },
  tensor::Tensors,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 检测器配置，加载时由模型元数据与调用方设置共同确定。
///
/// 加载后只读；阈值、均值、缩放与标签经由 [`Yolo26`] 的 `set_*` 方法修改，
/// 输入尺寸与像素格式随模型固定。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub input_width: u32,
  pub input_height: u32,
  pub input_format: PixelFormat,
  pub mean: [f32; 3],
  pub scale: [f32; 3],
  pub labels: Vec<String>,
  pub label_path: Option<PathBuf>,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
}

/// 单次检测的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub fit: FitPolicy,
  pub sort: SortOrder,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      fit: FitPolicy::Contain,
      sort: SortOrder::None,
    }
  }
}

impl DetectOptions {
  pub fn confidence(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn iou(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn fit(mut self, fit: FitPolicy) -> Self {
    self.fit = fit;
    self
  }

  pub fn sort(mut self, sort: SortOrder) -> Self {
    self.sort = sort;
    self
  }
}

#[derive(Debug, Clone, Default)]
pub struct Yolo26Builder {
  labels: Vec<String>,
  label_path: Option<PathBuf>,
  num_class: Option<usize>,
  reducer: Option<ReducerKind>,
  confidence_threshold: Option<f32>,
  iou_threshold: Option<f32>,
  fit: FitPolicy,
  sort: SortOrder,
}

fn parse_query<T: std::str::FromStr>(url: &Url, key: &str) -> Result<Option<T>, Yolo26Error>
where
  T::Err: std::fmt::Display,
{
  query_param(url, key)
    .map(|value| {
      value.parse::<T>().map_err(|e| {
        error!("参数 {}={} 无效: {}", key, value, e);
        Yolo26Error::ModelPath(format!("参数 {}={} 无效: {}", key, value, e))
      })
    })
    .transpose()
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  /// 读取 `labels`、`classes`、`reducer`、`confidence`、`iou`、`fit`、`sort` 查询参数
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut builder = Yolo26Builder::default();
    if let Some(path) = query_param(url, "labels") {
      builder = builder.label_path(path);
    }
    builder.num_class = parse_query(url, "classes")?;
    builder.reducer = parse_query(url, "reducer")?;
    builder.confidence_threshold = parse_query(url, "confidence")?;
    builder.iou_threshold = parse_query(url, "iou")?;
    if let Some(fit) = parse_query(url, "fit")? {
      builder.fit = fit;
    }
    if let Some(sort) = parse_query(url, "sort")? {
      builder.sort = sort;
    }
    Ok(builder)
  }
}

impl Yolo26Builder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 调用方给出的标签表，优先于标签文件与模型元数据
  pub fn labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn label_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.label_path = Some(path.into());
    self
  }

  /// 没有标签时声明分类通道数，未声明则按 80 类解析
  pub fn num_class(mut self, num_class: usize) -> Self {
    self.num_class = Some(num_class);
    self
  }

  pub fn reducer(mut self, kind: Option<ReducerKind>) -> Self {
    self.reducer = kind;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = Some(threshold);
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = Some(threshold);
    self
  }

  pub fn fit(mut self, fit: FitPolicy) -> Self {
    self.fit = fit;
    self
  }

  pub fn sort(mut self, sort: SortOrder) -> Self {
    self.sort = sort;
    self
  }

  pub fn build<E: InferenceEngine>(self, engine: E) -> Result<Yolo26<E>, Yolo26Error> {
    info!("加载 YOLO26 模型");
    let metadata = ModelMetadata::parse(engine.extra_info())?;

    let (input_width, input_height) = input_size(&engine)?;
    info!("模型输入尺寸: {}x{}", input_width, input_height);

    let labels = if !self.labels.is_empty() {
      debug!("使用调用方提供的 {} 个标签", self.labels.len());
      self.labels.clone()
    } else if let Some(path) = &self.label_path {
      load_label_file(path)?
    } else {
      metadata.labels.clone()
    };

    let class_count = if labels.is_empty() {
      self.num_class.unwrap_or(0)
    } else {
      labels.len()
    };
    let head = resolve_scales(
      engine.outputs_info(),
      input_width,
      input_height,
      class_count,
      engine.declared_layout(),
    )?;
    let labels = if labels.is_empty() {
      info!("未提供标签, 生成 {} 个占位标签", head.num_class);
      synthesize_labels(head.num_class)
    } else {
      labels
    };

    let config = DetectorConfig {
      input_width,
      input_height,
      input_format: metadata.input_format,
      mean: metadata.mean,
      scale: metadata.scale,
      labels,
      label_path: self.label_path.clone(),
      confidence_threshold: self
        .confidence_threshold
        .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
      iou_threshold: self.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
    };
    if config.confidence_threshold < EARLY_EXIT_SCORE {
      warn!(
        "置信度阈值 {} 低于提前退出得分 {:.4}, 得分介于两者之间的候选框会被丢弃",
        config.confidence_threshold, EARLY_EXIT_SCORE
      );
    }

    let reducer = select_reducer(self.reducer);
    info!("模型加载完成, 类别数: {}", head.num_class);

    Ok(Yolo26 {
      engine,
      config,
      head,
      reducer,
      scratch: Vec::new(),
      builder: self,
    })
  }
}

/// 由首个输入层得到 `(宽, 高)`：最后一轴不超过 4 视为 NHWC，否则为 NCHW
fn input_size<E: InferenceEngine>(engine: &E) -> Result<(u32, u32), Yolo26Error> {
  let info = engine.inputs_info().first().ok_or_else(|| {
    error!("模型没有输入层");
    Yolo26Error::config("模型没有输入层")
  })?;
  match info.shape.as_slice() {
    &[_, h, w, c] if c <= BOX_CHANNELS => Ok((w as u32, h as u32)),
    &[_, _, h, w] => Ok((w as u32, h as u32)),
    other => {
      error!("输入层 {} 的形状 {:?} 不是 4 维", info.name, other);
      Err(Yolo26Error::config(format!(
        "输入层 {} 的形状 {:?} 不是 4 维",
        info.name, other
      )))
    }
  }
}

/// 取出某一尺度的张量数据，并确认形状与加载时解析的一致
fn scale_tensor<'t>(
  tensors: &Tensors<'t>,
  name: &str,
  scale: &ScaleDescriptor,
  channels: usize,
) -> Result<&'t [f32], Yolo26Error> {
  let view = tensors.get(name).ok_or_else(|| {
    error!("推理结果缺少张量 {}", name);
    Yolo26Error::decode(format!("推理结果缺少张量 {}", name))
  })?;

  let shape = view.shape();
  if !view.is_consistent()
    || scale.layout.channels(shape) != channels
    || scale.layout.grid(shape) != (scale.grid_h, scale.grid_w)
  {
    error!(
      "张量 {} 形状 {:?} (数据长度 {}) 与加载时不一致",
      name,
      shape,
      view.data().len()
    );
    return Err(Yolo26Error::decode(format!(
      "张量 {} 形状 {:?} (数据长度 {}) 与加载时不一致",
      name,
      shape,
      view.data().len()
    )));
  }
  Ok(view.data())
}

pub struct Yolo26<E> {
  engine: E,
  config: DetectorConfig,
  head: ResolvedHead,
  reducer: Box<dyn ScoreReducer>,
  scratch: Vec<f32>,
  builder: Yolo26Builder,
}

impl FromUrl for Yolo26<EngineWrapper> {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let engine = EngineWrapper::from_url(url)?;
    Yolo26Builder::from_url(url)?.build(engine)
  }
}

impl<E: InferenceEngine> Yolo26<E> {
  /// 以默认设置加载
  pub fn load(engine: E) -> Result<Self, Yolo26Error> {
    Yolo26Builder::default().build(engine)
  }

  /// 用新的引擎重新加载，沿用构建时的调用方设置。失败时保持原状态不变。
  pub fn reload(&mut self, engine: E) -> Result<(), Yolo26Error> {
    *self = self.builder.clone().build(engine)?;
    Ok(())
  }

  pub fn detect(
    &mut self,
    frame: &ImageFrame,
    options: &DetectOptions,
  ) -> Result<DetectResult, Yolo26Error> {
    if frame.format() != self.config.input_format {
      error!(
        "图像格式 {} 与模型输入格式 {} 不一致",
        frame.format(),
        self.config.input_format
      );
      return Err(Yolo26Error::FormatMismatch {
        expected: self.config.input_format,
        actual: frame.format(),
      });
    }

    let Some(tensors) =
      self
        .engine
        .forward(frame, self.config.mean, self.config.scale, options.fit)?
    else {
      debug!("推理结果尚未就绪");
      return Ok(DetectResult::empty());
    };

    let num_class = self.head.num_class;
    let params = ProposalParams {
      num_class,
      conf_threshold: options.confidence_threshold,
      input_w: self.config.input_width as f32,
      input_h: self.config.input_height as f32,
      reducer: self.reducer.as_ref(),
    };

    let mut candidates: Vec<DetectItem> = Vec::new();
    for scale in &self.head.scales {
      let reg = scale_tensor(&tensors, &scale.box_tensor, scale, BOX_CHANNELS)?;
      let cls = scale_tensor(&tensors, &scale.class_tensor, scale, num_class)?;
      let before = candidates.len();
      generate_proposals(scale, reg, cls, &params, &mut self.scratch, &mut candidates);
      debug!(
        "尺度 {}x{} (步长 {}): {} 个候选框",
        scale.grid_w,
        scale.grid_h,
        scale.stride,
        candidates.len() - before
      );
    }

    let mut items = nms(candidates, options.iou_threshold);
    sort_by_size(&mut items, options.sort);
    correct_boxes(
      &mut items,
      frame.width(),
      frame.height(),
      self.config.input_width,
      self.config.input_height,
      options.fit,
    );
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }

  /// 以配置中的阈值与构建时的缩放、排序方式组成默认检测参数
  pub fn default_options(&self) -> DetectOptions {
    DetectOptions {
      confidence_threshold: self.config.confidence_threshold,
      iou_threshold: self.config.iou_threshold,
      fit: self.builder.fit,
      sort: self.builder.sort,
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.config.input_width, self.config.input_height)
  }

  pub fn input_width(&self) -> u32 {
    self.config.input_width
  }

  pub fn input_height(&self) -> u32 {
    self.config.input_height
  }

  pub fn input_format(&self) -> PixelFormat {
    self.config.input_format
  }

  pub fn labels(&self) -> &[String] {
    &self.config.labels
  }

  pub fn num_class(&self) -> usize {
    self.head.num_class
  }

  pub fn head(&self) -> &ResolvedHead {
    &self.head
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn set_confidence_threshold(&mut self, threshold: f32) {
    self.config.confidence_threshold = threshold;
  }

  pub fn set_iou_threshold(&mut self, threshold: f32) {
    self.config.iou_threshold = threshold;
  }

  /// 下一次推理起生效
  pub fn set_mean(&mut self, mean: [f32; 3]) {
    self.config.mean = mean;
  }

  pub fn set_scale(&mut self, scale: [f32; 3]) {
    self.config.scale = scale;
  }

  /// 标签数须与分类通道数一致，否则保持原标签
  pub fn set_labels(&mut self, labels: Vec<String>) -> Result<(), Yolo26Error> {
    if labels.len() != self.head.num_class {
      error!(
        "标签数 {} 与类别数 {} 不一致",
        labels.len(),
        self.head.num_class
      );
      return Err(Yolo26Error::config(format!(
        "标签数 {} 与类别数 {} 不一致",
        labels.len(),
        self.head.num_class
      )));
    }
    self.config.labels = labels;
    Ok(())
  }

  pub fn set_label_path(&mut self, path: impl Into<PathBuf>) -> Result<(), Yolo26Error> {
    let path = path.into();
    self.set_labels(load_label_file(&path)?)?;
    self.config.label_path = Some(path);
    Ok(())
  }

  pub fn reducer_name(&self) -> &'static str {
    self.reducer.name()
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }
}

impl<E: InferenceEngine> Model for Yolo26<E> {
  type Input = ImageFrame;
  type Output = DetectResult;
  type Error = Yolo26Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let options = self.default_options();
    self.detect(input, &options)
  }
}
