// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/layout.rs - 输出张量布局解析
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

//! 模型加载时把引擎声明的 6 个输出张量整理成 3 个检测尺度。
//!
//! 回归张量的通道数为 4，分类张量的通道数等于类别数（未知时按 80）。
//! 没有声明布局的平台上，通道轴由形状推断，见 [`infer_layout`]。

use tracing::{debug, error, warn};

use crate::{
  model::Yolo26Error,
  tensor::{LayerInfo, TensorLayout},
};

pub const DEFAULT_CLASS_NUM: usize = 80;
pub const NUM_SCALES: usize = 3;
pub const BOX_CHANNELS: usize = 4;
const CHANNEL_AXIS_LIMIT: usize = 100;

/// 单个检测尺度的描述，加载后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDescriptor {
  pub box_tensor: String,
  pub class_tensor: String,
  pub grid_w: usize,
  pub grid_h: usize,
  pub stride: f32,
  pub layout: TensorLayout,
}

impl ScaleDescriptor {
  pub fn spatial(&self) -> usize {
    self.grid_w * self.grid_h
  }
}

/// 解析结果：按网格由细到粗排列的 3 个尺度以及分类通道数
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHead {
  pub scales: [ScaleDescriptor; NUM_SCALES],
  pub num_class: usize,
}

fn is_small_axis(n: usize, a: usize, b: usize) -> bool {
  n <= CHANNEL_AXIS_LIMIT && n < a && n < b
}

/// 仅凭形状推断 4 维张量的通道轴。
///
/// 依次判断：某轴为 4（先看最后一轴再看第 1 轴），某轴为类别数（同样先看最后一轴），
/// 否则取同时不超过 100 且严格小于另两个空间轴的那一轴。无法判断时返回 `None`。
/// 第 1 轴与最后一轴同时命中时偏向通道在后，可用 [`is_layout_ambiguous`] 检出此情况。
pub fn infer_layout(shape: [usize; 4], class_hint: usize) -> Option<TensorLayout> {
  let [_, a, b, c] = shape;
  if c == BOX_CHANNELS {
    Some(TensorLayout::ChannelLast)
  } else if a == BOX_CHANNELS {
    Some(TensorLayout::ChannelFirst)
  } else if c == class_hint {
    Some(TensorLayout::ChannelLast)
  } else if a == class_hint {
    Some(TensorLayout::ChannelFirst)
  } else if is_small_axis(c, a, b) {
    Some(TensorLayout::ChannelLast)
  } else if is_small_axis(a, b, c) {
    Some(TensorLayout::ChannelFirst)
  } else {
    None
  }
}

/// 第 1 轴和最后一轴同为 4 或同为类别数（例如 20 类模型的 20x20 网格）
pub fn is_layout_ambiguous(shape: [usize; 4], class_hint: usize) -> bool {
  let [_, a, _, c] = shape;
  (a == BOX_CHANNELS && c == BOX_CHANNELS) || (a == class_hint && c == class_hint)
}

/// 生成占位标签 `class_0 .. class_{n-1}`
pub fn synthesize_labels(num_class: usize) -> Vec<String> {
  (0..num_class).map(|i| format!("class_{}", i)).collect()
}

#[derive(Debug)]
struct BoxTensor<'a> {
  name: &'a str,
  layout: TensorLayout,
  grid: (usize, usize),
}

#[derive(Debug)]
struct OtherTensor<'a> {
  name: &'a str,
  shape: [usize; 4],
}

fn as_rank4(shape: &[usize]) -> Option<[usize; 4]> {
  shape.try_into().ok()
}

/// 把引擎的输出张量整理为 3 个检测尺度。
///
/// `label_count` 为 0 表示类别数未知，此时只接受 80 通道的分类张量；`declared` 为平台声明的布局，给出时跳过启发式。
/// 回归张量的布局由形状推断（4 通道不易混淆），同尺度的分类张量按该布局解读，
/// 从而避开网格边长恰好等于类别数时的歧义。
pub fn resolve_scales(
  outputs: &[LayerInfo],
  input_w: u32,
  input_h: u32,
  label_count: usize,
  declared: Option<TensorLayout>,
) -> Result<ResolvedHead, Yolo26Error> {
  let class_hint = if label_count > 0 {
    label_count
  } else {
    DEFAULT_CLASS_NUM
  };

  let mut boxes = Vec::new();
  let mut others = Vec::new();

  for info in outputs {
    let Some(shape) = as_rank4(&info.shape) else {
      debug!("忽略输出 {}: 维度为 {}", info.name, info.shape.len());
      continue;
    };

    let layout = match declared.or_else(|| infer_layout(shape, class_hint)) {
      Some(layout) => layout,
      None => {
        debug!("输出 {} 无法推断通道轴 {:?}", info.name, shape);
        others.push(OtherTensor {
          name: &info.name,
          shape,
        });
        continue;
      }
    };

    if layout.channels(shape) == BOX_CHANNELS {
      debug!("输出 {} 为回归张量 {:?}, {:?}", info.name, shape, layout);
      boxes.push(BoxTensor {
        name: &info.name,
        layout,
        grid: layout.grid(shape),
      });
    } else {
      others.push(OtherTensor {
        name: &info.name,
        shape,
      });
    }
  }

  if boxes.len() != NUM_SCALES {
    error!("预期 {} 个回归输出, 实际为 {}", NUM_SCALES, boxes.len());
    return Err(Yolo26Error::config(format!(
      "预期 {} 个回归输出, 实际为 {}",
      NUM_SCALES,
      boxes.len()
    )));
  }

  let mut used = vec![false; others.len()];
  let mut scales = Vec::with_capacity(NUM_SCALES);
  let mut num_class = None;

  for b in &boxes {
    let (grid_h, grid_w) = b.grid;
    let matched = others.iter().enumerate().find(|(i, t)| {
      !used[*i] && b.layout.channels(t.shape) == class_hint && b.layout.grid(t.shape) == b.grid
    });

    let Some((idx, c)) = matched else {
      error!("回归输出 {} ({}x{}) 找不到对应的分类输出", b.name, grid_h, grid_w);
      return Err(Yolo26Error::config(format!(
        "回归输出 {} ({}x{}) 找不到对应的分类输出",
        b.name, grid_h, grid_w
      )));
    };
    used[idx] = true;

    if declared.is_none() && is_layout_ambiguous(c.shape, class_hint) {
      warn!(
        "分类输出 {} 的形状 {:?} 无法区分通道轴, 按回归输出 {} 的布局 {:?} 解读",
        c.name, c.shape, b.name, b.layout
      );
    }

    let channels = b.layout.channels(c.shape);
    match num_class {
      None => num_class = Some(channels),
      Some(n) if n != channels => {
        error!("分类输出通道数不一致: {} 与 {}", n, channels);
        return Err(Yolo26Error::config(format!(
          "分类输出通道数不一致: {} 与 {}",
          n, channels
        )));
      }
      Some(_) => {}
    }

    if grid_w == 0 || grid_h == 0 {
      return Err(Yolo26Error::config(format!("输出 {} 的网格尺寸为零", b.name)));
    }

    let stride = input_w as f32 / grid_w as f32;
    let stride_y = input_h as f32 / grid_h as f32;
    if stride.fract() != 0.0 || (stride - stride_y).abs() > f32::EPSILON {
      warn!(
        "尺度 {}x{} 的步长异常: 水平 {}, 垂直 {}",
        grid_w, grid_h, stride, stride_y
      );
    }

    scales.push(ScaleDescriptor {
      box_tensor: b.name.to_string(),
      class_tensor: c.name.to_string(),
      grid_w,
      grid_h,
      stride,
      layout: b.layout,
    });
  }

  for (t, _) in others.iter().zip(&used).filter(|(_, used)| !**used) {
    debug!("忽略输出 {}: 未与任何回归输出配对 {:?}", t.name, t.shape);
  }

  scales.sort_by(|a, b| b.spatial().cmp(&a.spatial()));

  let scales: [ScaleDescriptor; NUM_SCALES] = scales
    .try_into()
    .map_err(|_| Yolo26Error::config("检测尺度数量错误"))?;
  let num_class = num_class.ok_or_else(|| Yolo26Error::config("缺少分类输出"))?;

  for s in &scales {
    debug!(
      "检测尺度: 网格 {}x{}, 步长 {}, 回归 {}, 分类 {}, 布局 {:?}",
      s.grid_w, s.grid_h, s.stride, s.box_tensor, s.class_tensor, s.layout
    );
  }

  Ok(ResolvedHead { scales, num_class })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn nhwc_outputs(num_class: usize) -> Vec<LayerInfo> {
    vec![
      LayerInfo::new("610", [1, 20, 20, 4]),
      LayerInfo::new("580", [1, 80, 80, num_class]),
      LayerInfo::new("output0", [1, 80, 80, 4]),
      LayerInfo::new("624", [1, 20, 20, num_class]),
      LayerInfo::new("588", [1, 40, 40, 4]),
      LayerInfo::new("602", [1, 40, 40, num_class]),
    ]
  }

  #[test]
  fn infer_layout_by_channel_size() {
    assert_eq!(
      infer_layout([1, 80, 80, 4], 80),
      Some(TensorLayout::ChannelLast)
    );
    assert_eq!(
      infer_layout([1, 4, 40, 40], 80),
      Some(TensorLayout::ChannelFirst)
    );
    assert_eq!(
      infer_layout([1, 17, 40, 40], 17),
      Some(TensorLayout::ChannelFirst)
    );
  }

  #[test]
  fn infer_layout_by_smallest_axis() {
    // 类别数未知时按最小轴判断
    assert_eq!(
      infer_layout([1, 40, 40, 20], 80),
      Some(TensorLayout::ChannelLast)
    );
    assert_eq!(
      infer_layout([1, 20, 40, 40], 80),
      Some(TensorLayout::ChannelFirst)
    );
    assert_eq!(infer_layout([1, 120, 160, 160], 80), None);
    assert_eq!(infer_layout([1, 20, 20, 20], 80), None);
  }

  #[test]
  fn ambiguous_shape_is_reported() {
    assert!(is_layout_ambiguous([1, 20, 20, 20], 20));
    assert!(!is_layout_ambiguous([1, 40, 40, 20], 20));
    assert_eq!(
      infer_layout([1, 20, 20, 20], 20),
      Some(TensorLayout::ChannelLast)
    );
  }

  #[test]
  fn resolves_and_orders_nhwc_scales() {
    let head = resolve_scales(&nhwc_outputs(80), 640, 640, 80, None).unwrap();
    assert_eq!(head.num_class, 80);
    let grids: Vec<_> = head.scales.iter().map(|s| (s.grid_w, s.stride)).collect();
    assert_eq!(grids, vec![(80, 8.0), (40, 16.0), (20, 32.0)]);
    assert_eq!(head.scales[0].box_tensor, "output0");
    assert_eq!(head.scales[0].class_tensor, "580");
    assert_eq!(head.scales[2].class_tensor, "624");
    assert!(
      head
        .scales
        .iter()
        .all(|s| s.layout == TensorLayout::ChannelLast)
    );
  }

  #[test]
  fn resolves_nchw_scales() {
    let outputs = vec![
      LayerInfo::new("b0", [1, 4, 80, 80]),
      LayerInfo::new("c0", [1, 3, 80, 80]),
      LayerInfo::new("b1", [1, 4, 40, 40]),
      LayerInfo::new("c1", [1, 3, 40, 40]),
      LayerInfo::new("b2", [1, 4, 20, 20]),
      LayerInfo::new("c2", [1, 3, 20, 20]),
    ];
    let head = resolve_scales(&outputs, 640, 640, 3, None).unwrap();
    assert_eq!(head.num_class, 3);
    assert!(
      head
        .scales
        .iter()
        .all(|s| s.layout == TensorLayout::ChannelFirst)
    );
    assert_eq!(head.scales[1].box_tensor, "b1");
    assert_eq!(head.scales[1].class_tensor, "c1");
  }

  #[test]
  fn ambiguous_class_tensor_follows_box_layout() {
    // 80 类模型的 80x80 网格，NCHW 输出
    let outputs = vec![
      LayerInfo::new("b0", [1, 4, 80, 80]),
      LayerInfo::new("c0", [1, 80, 80, 80]),
      LayerInfo::new("b1", [1, 4, 40, 40]),
      LayerInfo::new("c1", [1, 80, 40, 40]),
      LayerInfo::new("b2", [1, 4, 20, 20]),
      LayerInfo::new("c2", [1, 80, 20, 20]),
    ];
    let head = resolve_scales(&outputs, 640, 640, 80, None).unwrap();
    assert_eq!(head.scales[0].class_tensor, "c0");
    assert_eq!(head.scales[0].layout, TensorLayout::ChannelFirst);
  }

  #[test]
  fn unknown_label_count_defaults_to_80_classes() {
    let head = resolve_scales(&nhwc_outputs(80), 640, 640, 0, None).unwrap();
    assert_eq!(head.num_class, DEFAULT_CLASS_NUM);
    assert_eq!(synthesize_labels(head.num_class).len(), 80);
    assert_eq!(synthesize_labels(3), vec!["class_0", "class_1", "class_2"]);

    // 类别数未知时不接受其他通道数
    let err = resolve_scales(&nhwc_outputs(20), 640, 640, 0, None).unwrap_err();
    assert!(matches!(err, Yolo26Error::Config(_)));
  }

  #[test]
  fn auxiliary_outputs_are_not_taken_as_class_maps() {
    // 单通道的辅助输出排在前面，且与分类输出网格相同
    let mut outputs = vec![
      LayerInfo::new("aux80", [1, 80, 80, 1]),
      LayerInfo::new("aux40", [1, 40, 40, 1]),
      LayerInfo::new("aux20", [1, 20, 20, 1]),
    ];
    outputs.extend(nhwc_outputs(80));
    let head = resolve_scales(&outputs, 640, 640, 0, None).unwrap();
    assert_eq!(head.num_class, 80);
    let classes: Vec<_> = head.scales.iter().map(|s| s.class_tensor.as_str()).collect();
    assert_eq!(classes, vec!["580", "602", "624"]);

    let head = resolve_scales(&outputs, 640, 640, 80, None).unwrap();
    assert_eq!(head.scales[0].class_tensor, "580");
  }

  #[test]
  fn declared_layout_skips_heuristic() {
    let head = resolve_scales(
      &nhwc_outputs(80),
      640,
      640,
      80,
      Some(TensorLayout::ChannelLast),
    )
    .unwrap();
    assert_eq!(head.scales[0].grid_h, 80);
  }

  #[test]
  fn wrong_tensor_count_is_config_error() {
    let mut outputs = nhwc_outputs(80);
    outputs.pop();
    outputs.push(LayerInfo::new("extra", [1, 8400, 84]));
    let err = resolve_scales(&outputs, 640, 640, 80, None).unwrap_err();
    assert!(matches!(err, Yolo26Error::Config(_)));
  }

  #[test]
  fn unpaired_grid_is_config_error() {
    let mut outputs = nhwc_outputs(80);
    outputs[5] = LayerInfo::new("602", [1, 30, 30, 80]);
    let err = resolve_scales(&outputs, 640, 640, 80, None).unwrap_err();
    assert!(matches!(err, Yolo26Error::Config(_)));
  }

  #[test]
  fn mismatched_label_count_is_config_error() {
    // 标签数为 3，但模型输出 80 类
    let err = resolve_scales(&nhwc_outputs(80), 640, 640, 3, None).unwrap_err();
    assert!(matches!(err, Yolo26Error::Config(_)));
  }
}
