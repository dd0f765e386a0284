// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/correct.rs - 检测框坐标回映射
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
  frame::{FitPolicy, Letterbox},
  model::DetectItem,
};

/// 把网络输入坐标系下的检测框映射回 `img_w x img_h` 的原图，并裁剪到图像范围内。
///
/// 输入尺寸与原图一致时不做任何改动。裁剪后退化的框仍然保留。
pub fn correct_boxes(
  items: &mut [DetectItem],
  img_w: u32,
  img_h: u32,
  input_w: u32,
  input_h: u32,
  fit: FitPolicy,
) {
  if img_w == input_w && img_h == input_h {
    return;
  }
  if img_w == 0 || img_h == 0 {
    return;
  }

  let letterbox = Letterbox::new(fit, img_w, img_h, input_w, input_h);
  let (max_w, max_h) = (img_w as f32, img_h as f32);
  for item in items.iter_mut() {
    let [x, y, w, h] = letterbox.to_source([item.x, item.y, item.w, item.h]);
    let x0 = x.clamp(0.0, max_w);
    let y0 = y.clamp(0.0, max_h);
    let x1 = (x + w).clamp(0.0, max_w);
    let y1 = (y + h).clamp(0.0, max_h);
    item.x = x0;
    item.y = y0;
    item.w = x1 - x0;
    item.h = y1 - y0;
  }
}
