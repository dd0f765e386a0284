// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/reducer.rs - 分类得分归约（SIMD / 可变长向量 / 标量）
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

//! 求一个网格单元的分类 logit 最大值与类别下标。
//!
//! 三种实现的约定一致：NaN 被忽略，最大值相同的多个类别取扫描顺序中的第一个。
//! 最大值的浮点比较与归约顺序无关，因此各实现给出的分类结果逐位一致。

use std::{fmt, str::FromStr};

use tracing::{debug, warn};

#[cfg(target_arch = "aarch64")]
use std::arch::is_aarch64_feature_detected;

/// 可变长向量实现默认的通道数（VLEN = 256 位）
pub const DEFAULT_SCALABLE_LANES: usize = 8;
const MAX_SCALABLE_LANES: usize = 64;

pub trait ScoreReducer: fmt::Debug + Send + Sync {
  fn name(&self) -> &'static str;

  /// 连续序列的最大值，空序列或全为 NaN 时返回 `None`
  fn max(&self, data: &[f32]) -> Option<f32>;

  /// 最大值及其首次出现的下标
  fn argmax(&self, data: &[f32]) -> Option<(f32, usize)> {
    let max = self.max(data)?;
    first_index_of(data, max).map(|idx| (max, idx))
  }
}

/// `max` 在 `data` 中首次出现的位置
#[inline]
pub fn first_index_of(data: &[f32], max: f32) -> Option<usize> {
  data.iter().position(|&v| v == max)
}

#[inline]
fn finite_or_none(max: f32, data: &[f32]) -> Option<f32> {
  // 全部为 NaN 时累加器停留在 -inf，但序列中并不存在 -inf
  if max == f32::NEG_INFINITY && !data.contains(&f32::NEG_INFINITY) {
    None
  } else {
    Some(max)
  }
}

/// 逐元素比较的标量实现
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarReducer;

impl ScoreReducer for ScalarReducer {
  fn name(&self) -> &'static str {
    "scalar"
  }

  fn max(&self, data: &[f32]) -> Option<f32> {
    let mut max = f32::NEG_INFINITY;
    for &v in data {
      if v > max {
        max = v;
      }
    }
    finite_or_none(max, data)
  }

  fn argmax(&self, data: &[f32]) -> Option<(f32, usize)> {
    let mut max = f32::NEG_INFINITY;
    let mut idx = None;
    for (i, &v) in data.iter().enumerate() {
      if v > max || (idx.is_none() && v == max) {
        max = v;
        idx = Some(i);
      }
    }
    idx.map(|i| (max, i))
  }
}

/// 128 位定长 SIMD 实现：x86_64 上为 SSE，aarch64 上为 NEON
#[derive(Debug, Clone, Copy)]
pub struct WideReducer {
  _checked: (),
}

impl WideReducer {
  /// 仅在运行平台支持时返回
  pub fn detect() -> Option<Self> {
    #[cfg(target_arch = "x86_64")]
    {
      if is_x86_feature_detected!("sse") {
        return Some(Self { _checked: () });
      }
    }

    #[cfg(target_arch = "aarch64")]
    {
      if is_aarch64_feature_detected!("neon") {
        return Some(Self { _checked: () });
      }
    }

    None
  }
}

impl ScoreReducer for WideReducer {
  fn name(&self) -> &'static str {
    "wide"
  }

  fn max(&self, data: &[f32]) -> Option<f32> {
    if data.is_empty() {
      return None;
    }

    #[cfg(target_arch = "x86_64")]
    let max = unsafe { max_sse(data) };

    #[cfg(target_arch = "aarch64")]
    let max = unsafe { max_neon(data) };

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let max = ScalarReducer.max(data)?;

    finite_or_none(max, data)
  }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse")]
unsafe fn max_sse(data: &[f32]) -> f32 {
  use std::arch::x86_64::{_mm_loadu_ps, _mm_max_ps, _mm_set1_ps, _mm_storeu_ps};

  let len = data.len();
  let vec_end = len / 16 * 16;
  let ptr = data.as_ptr();

  // _mm_max_ps 在任一操作数为 NaN 时返回第二个操作数，累加器放在第二位即可忽略 NaN
  let mut lanes = [0f32; 4];
  unsafe {
    let mut m0 = _mm_set1_ps(f32::NEG_INFINITY);
    let mut m1 = m0;
    let mut m2 = m0;
    let mut m3 = m0;

    let mut j = 0;
    while j < vec_end {
      m0 = _mm_max_ps(_mm_loadu_ps(ptr.add(j)), m0);
      m1 = _mm_max_ps(_mm_loadu_ps(ptr.add(j + 4)), m1);
      m2 = _mm_max_ps(_mm_loadu_ps(ptr.add(j + 8)), m2);
      m3 = _mm_max_ps(_mm_loadu_ps(ptr.add(j + 12)), m3);
      j += 16;
    }

    let merged = _mm_max_ps(_mm_max_ps(m0, m1), _mm_max_ps(m2, m3));
    _mm_storeu_ps(lanes.as_mut_ptr(), merged);
  }

  let mut max = lanes[0].max(lanes[1]).max(lanes[2].max(lanes[3]));
  for &v in &data[vec_end..] {
    if v > max {
      max = v;
    }
  }
  max
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn max_neon(data: &[f32]) -> f32 {
  use std::arch::aarch64::{vdupq_n_f32, vld1q_f32, vmaxnmq_f32, vmaxnmvq_f32};

  let len = data.len();
  let vec_end = len / 16 * 16;
  let ptr = data.as_ptr();

  let mut max = unsafe {
    let mut m0 = vdupq_n_f32(f32::NEG_INFINITY);
    let mut m1 = m0;
    let mut m2 = m0;
    let mut m3 = m0;

    let mut j = 0;
    while j < vec_end {
      m0 = vmaxnmq_f32(m0, vld1q_f32(ptr.add(j)));
      m1 = vmaxnmq_f32(m1, vld1q_f32(ptr.add(j + 4)));
      m2 = vmaxnmq_f32(m2, vld1q_f32(ptr.add(j + 8)));
      m3 = vmaxnmq_f32(m3, vld1q_f32(ptr.add(j + 12)));
      j += 16;
    }

    vmaxnmvq_f32(vmaxnmq_f32(vmaxnmq_f32(m0, m1), vmaxnmq_f32(m2, m3)))
  };

  for &v in &data[vec_end..] {
    if v > max {
      max = v;
    }
  }
  max
}

/// 可变长向量实现：按运行时给定的通道数分段处理（类似 RVV 的 `vsetvl`），
/// 尾段缩短而不是补齐。逐段的通道运算由编译器向量化。
#[derive(Debug, Clone, Copy)]
pub struct ScalableReducer {
  lanes: usize,
}

impl ScalableReducer {
  pub fn new(lanes: usize) -> Self {
    Self {
      lanes: lanes.clamp(1, MAX_SCALABLE_LANES),
    }
  }

  pub fn lanes(&self) -> usize {
    self.lanes
  }
}

impl Default for ScalableReducer {
  fn default() -> Self {
    Self::new(DEFAULT_SCALABLE_LANES)
  }
}

impl ScoreReducer for ScalableReducer {
  fn name(&self) -> &'static str {
    "scalable"
  }

  fn max(&self, data: &[f32]) -> Option<f32> {
    if data.is_empty() {
      return None;
    }

    let mut acc = [f32::NEG_INFINITY; MAX_SCALABLE_LANES];
    let acc = &mut acc[..self.lanes];

    let mut chunks = data.chunks_exact(self.lanes);
    for chunk in &mut chunks {
      for (a, &v) in acc.iter_mut().zip(chunk) {
        *a = a.max(v);
      }
    }
    for (a, &v) in acc.iter_mut().zip(chunks.remainder()) {
      *a = a.max(v);
    }

    let max = acc.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    finite_or_none(max, data)
  }
}

/// 在读取下一个网格单元之前提示缓存预取，只影响性能
#[inline(always)]
pub fn prefetch(data: &[f32], offset: usize) {
  #[cfg(target_arch = "x86_64")]
  {
    use std::arch::x86_64::{_MM_HINT_T1, _mm_prefetch};
    if offset < data.len() {
      unsafe { _mm_prefetch::<_MM_HINT_T1>(data.as_ptr().add(offset) as *const i8) };
    }
  }

  #[cfg(not(target_arch = "x86_64"))]
  {
    let _ = (data, offset);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerKind {
  Wide,
  Scalable,
  Scalar,
}

impl FromStr for ReducerKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "wide" | "simd" | "neon" | "sse" => Ok(ReducerKind::Wide),
      "scalable" | "rvv" | "vector" => Ok(ReducerKind::Scalable),
      "scalar" => Ok(ReducerKind::Scalar),
      other => Err(format!("未知的归约实现: {}", other)),
    }
  }
}

/// 选择分类得分归约实现。
///
/// 未指定时：编译目标带可变长向量扩展（riscv64 `v`）则用可变长实现，
/// 否则运行时检测定长 SIMD，都不可用时退回标量实现。
pub fn select_reducer(kind: Option<ReducerKind>) -> Box<dyn ScoreReducer> {
  let reducer: Box<dyn ScoreReducer> = match kind {
    Some(ReducerKind::Scalar) => Box::new(ScalarReducer),
    Some(ReducerKind::Scalable) => Box::new(ScalableReducer::default()),
    Some(ReducerKind::Wide) => match WideReducer::detect() {
      Some(wide) => Box::new(wide),
      None => {
        warn!("当前平台不支持定长 SIMD, 使用标量实现");
        Box::new(ScalarReducer)
      }
    },
    None => {
      if cfg!(all(target_arch = "riscv64", target_feature = "v")) {
        Box::new(ScalableReducer::default())
      } else if let Some(wide) = WideReducer::detect() {
        Box::new(wide)
      } else {
        Box::new(ScalarReducer)
      }
    }
  };
  debug!("分类得分归约实现: {}", reducer.name());
  reducer
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn backends() -> Vec<Box<dyn ScoreReducer>> {
    let mut all: Vec<Box<dyn ScoreReducer>> = vec![
      Box::new(ScalarReducer),
      Box::new(ScalableReducer::new(1)),
      Box::new(ScalableReducer::new(3)),
      Box::new(ScalableReducer::default()),
      Box::new(ScalableReducer::new(32)),
    ];
    if let Some(wide) = WideReducer::detect() {
      all.push(Box::new(wide));
    }
    all
  }

  #[test]
  fn empty_sequence_has_no_max() {
    for r in backends() {
      assert_eq!(r.max(&[]), None, "{}", r.name());
      assert_eq!(r.argmax(&[]), None, "{}", r.name());
    }
  }

  #[test]
  fn ties_resolve_to_first_occurrence() {
    let data = [0.5, 2.0, -1.0, 2.0, 2.0, 0.0, 1.0, 2.0, -3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 2.0];
    for r in backends() {
      assert_eq!(r.argmax(&data), Some((2.0, 1)), "{}", r.name());
    }
  }

  #[test]
  fn nan_is_ignored() {
    let mut data = vec![f32::NAN; 20];
    data[7] = -0.5;
    data[13] = 1.5;
    for r in backends() {
      assert_eq!(r.argmax(&data), Some((1.5, 13)), "{}", r.name());
    }
    let all_nan = [f32::NAN; 5];
    for r in backends() {
      assert_eq!(r.argmax(&all_nan), None, "{}", r.name());
    }
  }

  #[test]
  fn negative_infinity_is_a_value() {
    let data = [f32::NEG_INFINITY; 3];
    for r in backends() {
      assert_eq!(r.argmax(&data), Some((f32::NEG_INFINITY, 0)), "{}", r.name());
    }
  }

  #[test]
  fn scalable_lanes_are_clamped() {
    assert_eq!(ScalableReducer::new(0).lanes(), 1);
    assert_eq!(ScalableReducer::new(1000).lanes(), MAX_SCALABLE_LANES);
  }

  #[test]
  fn select_honours_requested_kind() {
    assert_eq!(select_reducer(Some(ReducerKind::Scalar)).name(), "scalar");
    assert_eq!(select_reducer(Some(ReducerKind::Scalable)).name(), "scalable");
    assert_eq!("rvv".parse::<ReducerKind>(), Ok(ReducerKind::Scalable));
    assert!("gpu".parse::<ReducerKind>().is_err());
  }

  proptest! {
    #[test]
    fn backends_agree_with_scalar(data in prop::collection::vec(-10.0f32..10.0, 0..200)) {
      let expected = ScalarReducer.argmax(&data);
      for r in backends() {
        prop_assert_eq!(r.argmax(&data), expected, "{}", r.name());
      }
    }

    #[test]
    fn backends_agree_on_ties(data in prop::collection::vec((-3i32..3).prop_map(|v| v as f32), 1..120)) {
      let expected = ScalarReducer.argmax(&data);
      for r in backends() {
        prop_assert_eq!(r.argmax(&data), expected, "{}", r.name());
      }
    }
  }
}
