// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/proposal.rs - 单尺度候选框生成
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

use crate::{
  model::{
    DetectItem, ScaleDescriptor, ScoreReducer,
    reducer::{first_index_of, prefetch},
  },
  tensor::TensorLayout,
};

/// 最大 logit 低于此值的网格单元直接跳过，不计算 sigmoid。
///
/// sigmoid 严格单调，跳过的单元得分必然低于 sigmoid(-0.2) ≈ 0.4502，
/// 因此只有置信度阈值不低于 [`EARLY_EXIT_SCORE`] 时这一捷径才不丢失候选框。
/// 阈值更低时得分落在 (阈值, 0.4502) 区间的候选框会被丢弃。
pub const LOGIT_THRESHOLD: f32 = -0.2;

/// `sigmoid(LOGIT_THRESHOLD)`
pub const EARLY_EXIT_SCORE: f32 = 0.450_166;

const PREFETCH_DISTANCE: usize = 4;

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 一次检测中各尺度共享的解码参数
#[derive(Debug, Clone, Copy)]
pub struct ProposalParams<'r> {
  pub num_class: usize,
  pub conf_threshold: f32,
  pub input_w: f32,
  pub input_h: f32,
  pub reducer: &'r dyn ScoreReducer,
}

/// 由网格单元 `(ax, ay)` 的 4 个边距（步长为单位）解码检测框，
/// 并裁剪到网络输入画布内。裁剪后宽或高不为正时返回 `None`。
#[inline]
pub fn decode_box(
  ax: usize,
  ay: usize,
  stride: f32,
  dist: [f32; 4],
  input_w: f32,
  input_h: f32,
) -> Option<[f32; 4]> {
  let [left, top, right, bottom] = dist;
  let cx = (ax as f32 + 0.5) * stride;
  let cy = (ay as f32 + 0.5) * stride;

  let mut x = cx - left * stride;
  let mut y = cy - top * stride;
  let mut w = (left + right) * stride;
  let mut h = (top + bottom) * stride;

  if x < 0.0 {
    w += x;
    x = 0.0;
  }
  if y < 0.0 {
    h += y;
    y = 0.0;
  }
  if x + w > input_w {
    w = input_w - x;
  }
  if y + h > input_h {
    h = input_h - y;
  }

  (w > 0.0 && h > 0.0).then_some([x, y, w, h])
}

/// 扫描一个尺度的全部网格单元，把通过阈值的候选框追加到 `out`。
///
/// `reg` 与 `cls` 的长度须已按 `scale` 校验；`scratch` 用于通道在前时收集一个单元的分类向量。
pub fn generate_proposals(
  scale: &ScaleDescriptor,
  reg: &[f32],
  cls: &[f32],
  params: &ProposalParams<'_>,
  scratch: &mut Vec<f32>,
  out: &mut Vec<DetectItem>,
) {
  let spatial = scale.spatial();
  let num_class = params.num_class;
  debug_assert_eq!(reg.len(), spatial * 4);
  debug_assert_eq!(cls.len(), spatial * num_class);

  for i in 0..spatial {
    let logits: &[f32] = match scale.layout {
      TensorLayout::ChannelLast => {
        prefetch(cls, (i + PREFETCH_DISTANCE) * num_class);
        &cls[i * num_class..(i + 1) * num_class]
      }
      TensorLayout::ChannelFirst => {
        scratch.clear();
        scratch.extend((0..num_class).map(|c| cls[c * spatial + i]));
        scratch.as_slice()
      }
    };

    let Some(max_logit) = params.reducer.max(logits) else {
      continue;
    };
    if max_logit < LOGIT_THRESHOLD {
      continue;
    }

    let Some(class_id) = first_index_of(logits, max_logit) else {
      continue;
    };

    let score = sigmoid(max_logit);
    if score <= params.conf_threshold {
      continue;
    }

    let dist = match scale.layout {
      TensorLayout::ChannelLast => [reg[i * 4], reg[i * 4 + 1], reg[i * 4 + 2], reg[i * 4 + 3]],
      TensorLayout::ChannelFirst => [
        reg[i],
        reg[spatial + i],
        reg[2 * spatial + i],
        reg[3 * spatial + i],
      ],
    };

    let ax = i % scale.grid_w;
    let ay = i / scale.grid_w;
    if let Some([x, y, w, h]) = decode_box(
      ax,
      ay,
      scale.stride,
      dist,
      params.input_w,
      params.input_h,
    ) {
      out.push(DetectItem::new(x, y, w, h, class_id as u32, score));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::reducer::{ScalableReducer, ScalarReducer, select_reducer};
  use proptest::prelude::*;

  const GRID: usize = 80;
  const NUM_CLASS: usize = 4;

  fn scale(layout: TensorLayout) -> ScaleDescriptor {
    ScaleDescriptor {
      box_tensor: "box".into(),
      class_tensor: "cls".into(),
      grid_w: GRID,
      grid_h: GRID,
      stride: 8.0,
      layout,
    }
  }

  /// 构造单个网格单元有内容的张量，其余单元 logit 为 -10
  fn tensors(
    layout: TensorLayout,
    cell: (usize, usize),
    dist: [f32; 4],
    logits: [f32; NUM_CLASS],
  ) -> (Vec<f32>, Vec<f32>) {
    let spatial = GRID * GRID;
    let i = cell.1 * GRID + cell.0;
    let mut reg = vec![0.0; spatial * 4];
    let mut cls = vec![-10.0; spatial * NUM_CLASS];
    for k in 0..4 {
      match layout {
        TensorLayout::ChannelLast => reg[i * 4 + k] = dist[k],
        TensorLayout::ChannelFirst => reg[k * spatial + i] = dist[k],
      }
    }
    for c in 0..NUM_CLASS {
      match layout {
        TensorLayout::ChannelLast => cls[i * NUM_CLASS + c] = logits[c],
        TensorLayout::ChannelFirst => cls[c * spatial + i] = logits[c],
      }
    }
    (reg, cls)
  }

  fn run(
    layout: TensorLayout,
    reg: &[f32],
    cls: &[f32],
    conf_threshold: f32,
    reducer: &dyn ScoreReducer,
  ) -> Vec<DetectItem> {
    let params = ProposalParams {
      num_class: NUM_CLASS,
      conf_threshold,
      input_w: 640.0,
      input_h: 640.0,
      reducer,
    };
    let mut out = Vec::new();
    let mut scratch = Vec::new();
    generate_proposals(&scale(layout), reg, cls, &params, &mut scratch, &mut out);
    out
  }

  #[test]
  fn early_exit_constant_matches_sigmoid() {
    assert!((sigmoid(LOGIT_THRESHOLD) - EARLY_EXIT_SCORE).abs() < 1e-5);
  }

  #[test]
  fn decodes_reference_cell() {
    for layout in [TensorLayout::ChannelLast, TensorLayout::ChannelFirst] {
      let (reg, cls) = tensors(layout, (10, 10), [1.0; 4], [0.1, -1.0, 1.5, 2.0]);
      let out = run(layout, &reg, &cls, 0.5, &ScalarReducer);
      assert_eq!(out.len(), 1, "{:?}", layout);
      let item = out[0];
      assert_eq!((item.x, item.y, item.w, item.h), (76.0, 76.0, 16.0, 16.0));
      assert_eq!(item.class_id, 3);
      assert!((item.score - 0.880_797).abs() < 1e-5);
    }
  }

  #[test]
  fn layouts_and_backends_agree() {
    let reducers = [
      select_reducer(None),
      Box::new(ScalarReducer) as Box<dyn ScoreReducer>,
      Box::new(ScalableReducer::new(3)),
    ];
    let (reg_l, cls_l) = tensors(TensorLayout::ChannelLast, (33, 7), [0.3, 2.0, 1.1, 0.4], [3.0, 3.0, 0.0, 1.0]);
    let (reg_f, cls_f) = tensors(TensorLayout::ChannelFirst, (33, 7), [0.3, 2.0, 1.1, 0.4], [3.0, 3.0, 0.0, 1.0]);
    let expected = run(TensorLayout::ChannelLast, &reg_l, &cls_l, 0.5, &ScalarReducer);
    assert_eq!(expected.len(), 1);
    assert_eq!(expected[0].class_id, 0);
    for r in &reducers {
      assert_eq!(run(TensorLayout::ChannelLast, &reg_l, &cls_l, 0.5, r.as_ref()), expected);
      assert_eq!(run(TensorLayout::ChannelFirst, &reg_f, &cls_f, 0.5, r.as_ref()), expected);
    }
  }

  #[test]
  fn early_exit_skips_low_logits_even_below_threshold() {
    // sigmoid(-0.3) ≈ 0.43 高于阈值 0.3，但低于提前退出线
    let (reg, cls) = tensors(TensorLayout::ChannelLast, (5, 5), [1.0; 4], [-0.3, -5.0, -5.0, -5.0]);
    assert!(run(TensorLayout::ChannelLast, &reg, &cls, 0.3, &ScalarReducer).is_empty());

    let (reg, cls) = tensors(TensorLayout::ChannelLast, (5, 5), [1.0; 4], [-0.1, -5.0, -5.0, -5.0]);
    assert_eq!(run(TensorLayout::ChannelLast, &reg, &cls, 0.3, &ScalarReducer).len(), 1);
  }

  #[test]
  fn score_equal_to_threshold_is_rejected() {
    let (reg, cls) = tensors(TensorLayout::ChannelLast, (5, 5), [1.0; 4], [0.0, -5.0, -5.0, -5.0]);
    assert!(run(TensorLayout::ChannelLast, &reg, &cls, 0.5, &ScalarReducer).is_empty());
    assert_eq!(run(TensorLayout::ChannelLast, &reg, &cls, 0.49, &ScalarReducer).len(), 1);
  }

  #[test]
  fn boxes_touching_canvas_edges_are_kept() {
    assert_eq!(
      decode_box(0, 0, 8.0, [0.5, 0.5, 0.5, 0.5], 640.0, 640.0),
      Some([0.0, 0.0, 8.0, 8.0])
    );
    assert_eq!(
      decode_box(79, 79, 8.0, [0.5, 0.5, 0.5, 0.5], 640.0, 640.0),
      Some([632.0, 632.0, 8.0, 8.0])
    );
  }

  #[test]
  fn boxes_are_clamped_to_canvas() {
    // 左上越界
    assert_eq!(
      decode_box(0, 0, 8.0, [2.0, 1.0, 1.0, 1.0], 640.0, 640.0),
      Some([0.0, 0.0, 16.0, 12.0])
    );
    // 右下越界
    assert_eq!(
      decode_box(79, 79, 8.0, [1.0, 1.0, 3.0, 3.0], 640.0, 640.0),
      Some([628.0, 628.0, 12.0, 12.0])
    );
    // 完全在画布外
    assert_eq!(decode_box(0, 0, 8.0, [-3.0, 1.0, 1.0, 1.0], 640.0, 640.0), None);
    assert_eq!(decode_box(10, 10, 8.0, [0.0, 0.0, 0.0, 1.0], 640.0, 640.0), None);
  }

  proptest! {
    #[test]
    fn decoded_boxes_stay_on_canvas(
      ax in 0usize..80,
      ay in 0usize..80,
      dist in prop::array::uniform4(-4.0f32..20.0),
    ) {
      if let Some([x, y, w, h]) = decode_box(ax, ay, 8.0, dist, 640.0, 640.0) {
        prop_assert!(x >= 0.0 && y >= 0.0);
        prop_assert!(w > 0.0 && h > 0.0);
        prop_assert!(x + w <= 640.0 + 1e-3);
        prop_assert!(y + h <= 640.0 + 1e-3);
      }
    }

    #[test]
    fn lowering_threshold_never_drops_candidates(
      logit in -1.0f32..4.0,
      high in 0.45f32..0.95,
      delta in 0.0f32..0.4,
    ) {
      let (reg, cls) = tensors(TensorLayout::ChannelLast, (20, 40), [1.0; 4], [logit, -5.0, -5.0, -5.0]);
      let strict = run(TensorLayout::ChannelLast, &reg, &cls, high, &ScalarReducer);
      let relaxed = run(TensorLayout::ChannelLast, &reg, &cls, high - delta, &ScalarReducer);
      for item in &strict {
        prop_assert!(relaxed.contains(item));
      }
    }
  }
}
