// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 按类别的非极大值抑制
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

use crate::model::{DetectItem, SortOrder};

/// 两个 xywh 框的交并比，并集不为正时返回 0
pub fn iou(a: &DetectItem, b: &DetectItem) -> f32 {
  let [ax0, ay0, ax1, ay1] = a.corners();
  let [bx0, by0, bx1, by1] = b.corners();

  let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
  let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
  let inter = iw * ih;
  let union = a.area() + b.area() - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 贪心 NMS：按得分降序遍历，同类且 IoU 超过阈值的低分框被抑制。
/// 不同类别的框互不影响。
pub fn nms(mut candidates: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut suppressed = vec![false; candidates.len()];
  let mut keep = Vec::new();
  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let current = candidates[i];
    keep.push(current);
    for j in (i + 1)..candidates.len() {
      if suppressed[j] || candidates[j].class_id != current.class_id {
        continue;
      }
      if iou(&current, &candidates[j]) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }
  keep
}

/// 按面积重排结果
pub fn sort_by_size(items: &mut [DetectItem], order: SortOrder) {
  match order {
    SortOrder::None => {}
    SortOrder::LargestFirst => items.sort_by(|a, b| b.area().total_cmp(&a.area())),
    SortOrder::SmallestFirst => items.sort_by(|a, b| a.area().total_cmp(&b.area())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn item(x: f32, y: f32, w: f32, h: f32, class_id: u32, score: f32) -> DetectItem {
    DetectItem::new(x, y, w, h, class_id, score)
  }

  #[test]
  fn iou_of_overlapping_boxes() {
    let a = item(0.0, 0.0, 10.0, 10.0, 0, 0.9);
    let b = item(1.0, 1.0, 10.0, 10.0, 0, 0.8);
    // 81 / 119
    assert!((iou(&a, &b) - 0.680_672).abs() < 1e-5);
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn iou_of_disjoint_or_degenerate_boxes_is_zero() {
    let a = item(0.0, 0.0, 10.0, 10.0, 0, 0.9);
    let b = item(20.0, 20.0, 5.0, 5.0, 0, 0.8);
    assert_eq!(iou(&a, &b), 0.0);

    let empty = item(3.0, 3.0, 0.0, 0.0, 0, 0.5);
    assert_eq!(iou(&empty, &empty), 0.0);
  }

  #[test]
  fn suppresses_overlapping_boxes_of_same_class() {
    let kept = nms(
      vec![
        item(1.0, 1.0, 10.0, 10.0, 0, 0.8),
        item(0.0, 0.0, 10.0, 10.0, 0, 0.9),
        item(100.0, 100.0, 10.0, 10.0, 0, 0.7),
      ],
      0.45,
    );
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn different_classes_never_suppress_each_other() {
    let kept = nms(
      vec![
        item(0.0, 0.0, 10.0, 10.0, 0, 0.9),
        item(0.0, 0.0, 10.0, 10.0, 1, 0.8),
      ],
      0.45,
    );
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    let a = item(0.0, 0.0, 10.0, 10.0, 0, 0.9);
    let b = item(5.0, 0.0, 10.0, 10.0, 0, 0.8);
    let threshold = iou(&a, &b);
    assert_eq!(nms(vec![a, b], threshold).len(), 2);
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(nms(Vec::new(), 0.45).is_empty());
  }

  #[test]
  fn sorts_by_area() {
    let mut items = vec![
      item(0.0, 0.0, 2.0, 2.0, 0, 0.9),
      item(0.0, 0.0, 5.0, 5.0, 0, 0.8),
      item(0.0, 0.0, 1.0, 1.0, 0, 0.7),
    ];
    sort_by_size(&mut items, SortOrder::LargestFirst);
    assert_eq!(items.iter().map(|i| i.w).collect::<Vec<_>>(), vec![5.0, 2.0, 1.0]);
    sort_by_size(&mut items, SortOrder::SmallestFirst);
    assert_eq!(items.iter().map(|i| i.w).collect::<Vec<_>>(), vec![1.0, 2.0, 5.0]);
  }

  fn arb_item() -> impl Strategy<Value = DetectItem> {
    (0.0f32..100.0, 0.0f32..100.0, 1.0f32..50.0, 1.0f32..50.0, 0u32..3, 0.01f32..1.0)
      .prop_map(|(x, y, w, h, c, s)| item(x, y, w, h, c, s))
  }

  proptest! {
    #[test]
    fn survivors_do_not_overlap_within_class(
      items in prop::collection::vec(arb_item(), 0..40),
      threshold in 0.1f32..0.9,
    ) {
      let kept = nms(items.clone(), threshold);
      prop_assert!(kept.len() <= items.len());
      for w in kept.windows(2) {
        prop_assert!(w[0].score >= w[1].score);
      }
      for (i, a) in kept.iter().enumerate() {
        for b in &kept[i + 1..] {
          if a.class_id == b.class_id {
            prop_assert!(iou(a, b) <= threshold);
          }
        }
      }
    }

    #[test]
    fn suppression_is_idempotent(
      items in prop::collection::vec(arb_item(), 0..40),
      threshold in 0.1f32..0.9,
    ) {
      let once = nms(items, threshold);
      let twice = nms(once.clone(), threshold);
      prop_assert_eq!(once, twice);
    }
  }
}
