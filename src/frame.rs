// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 图像帧与缩放适配定义
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

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::input::AsNhwcFrame;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("未知的像素格式: {0}")]
  UnknownPixelFormat(String),
  #[error("未知的缩放方式: {0}")]
  UnknownFit(String),
  #[error("图像尺寸为零: {0}x{1}")]
  EmptyImage(u32, u32),
}

/// 像素排列格式，均为每像素 3 字节的打包格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
  Rgb888,
  Bgr888,
}

impl PixelFormat {
  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 模型元数据 `input_type` 字段的取值
  pub fn input_type(&self) -> &'static str {
    match self {
      PixelFormat::Rgb888 => "rgb",
      PixelFormat::Bgr888 => "bgr",
    }
  }
}

impl fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PixelFormat::Rgb888 => write!(f, "RGB888"),
      PixelFormat::Bgr888 => write!(f, "BGR888"),
    }
  }
}

impl FromStr for PixelFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "rgb" | "rgb888" => Ok(PixelFormat::Rgb888),
      "bgr" | "bgr888" => Ok(PixelFormat::Bgr888),
      other => Err(FrameError::UnknownPixelFormat(other.to_string())),
    }
  }
}

/// 打包的 HWC 图像帧
#[derive(Debug, Clone)]
pub struct ImageFrame {
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Box<[u8]>,
}

impl ImageFrame {
  pub fn new(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let expected = format.channels() * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      format,
      data: data.into_boxed_slice(),
    })
  }

  pub fn with_shape(width: u32, height: u32, format: PixelFormat) -> Self {
    let size = format.channels() * width as usize * height as usize;
    Self {
      width,
      height,
      format,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 重新标注像素格式，数据不变
  pub fn with_format(mut self, format: PixelFormat) -> Self {
    self.format = format;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.format.channels()
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }
}

impl AsMut<[u8]> for ImageFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for ImageFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 将任意尺寸图像放入固定网络输入画布的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
  /// 各向异性拉伸，无填充
  Fill,
  /// 等比缩放，居中填充，整幅图像可见
  #[default]
  Contain,
  /// 等比缩放，居中裁剪，画布被完全填满
  Cover,
}

impl fmt::Display for FitPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FitPolicy::Fill => write!(f, "fill"),
      FitPolicy::Contain => write!(f, "contain"),
      FitPolicy::Cover => write!(f, "cover"),
    }
  }
}

impl FromStr for FitPolicy {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "fill" => Ok(FitPolicy::Fill),
      "contain" => Ok(FitPolicy::Contain),
      "cover" => Ok(FitPolicy::Cover),
      other => Err(FrameError::UnknownFit(other.to_string())),
    }
  }
}

/// 一次缩放适配所施加的缩放与平移。
///
/// 正向映射为 `dst = src * scale + offset`。`contain` 的偏移为正（填充），
/// `cover` 的偏移为负（裁剪），`fill` 无偏移但两轴缩放不同。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale_x: f32,
  pub scale_y: f32,
  pub offset_x: f32,
  pub offset_y: f32,
}

impl Letterbox {
  pub fn new(fit: FitPolicy, src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    let (src_w, src_h) = (src_w as f32, src_h as f32);
    let (dst_w, dst_h) = (dst_w as f32, dst_h as f32);
    let scale_x = dst_w / src_w;
    let scale_y = dst_h / src_h;

    match fit {
      FitPolicy::Fill => Letterbox {
        scale_x,
        scale_y,
        offset_x: 0.0,
        offset_y: 0.0,
      },
      FitPolicy::Contain | FitPolicy::Cover => {
        let scale = if fit == FitPolicy::Contain {
          scale_x.min(scale_y)
        } else {
          scale_x.max(scale_y)
        };
        Letterbox {
          scale_x: scale,
          scale_y: scale,
          offset_x: (dst_w - src_w * scale) / 2.0,
          offset_y: (dst_h - src_h * scale) / 2.0,
        }
      }
    }
  }

  /// 原图坐标 `(x, y, w, h)` 映射到网络输入坐标
  pub fn to_input(&self, bbox: [f32; 4]) -> [f32; 4] {
    let [x, y, w, h] = bbox;
    [
      x * self.scale_x + self.offset_x,
      y * self.scale_y + self.offset_y,
      w * self.scale_x,
      h * self.scale_y,
    ]
  }

  /// 网络输入坐标 `(x, y, w, h)` 映射回原图坐标
  pub fn to_source(&self, bbox: [f32; 4]) -> [f32; 4] {
    let [x, y, w, h] = bbox;
    [
      (x - self.offset_x) / self.scale_x,
      (y - self.offset_y) / self.scale_y,
      w / self.scale_x,
      h / self.scale_y,
    ]
  }

  /// 缩放后（尚未填充或裁剪）的图像尺寸
  pub fn scaled_size(&self, src_w: u32, src_h: u32) -> (u32, u32) {
    let w = (src_w as f32 * self.scale_x).round().max(1.0) as u32;
    let h = (src_h as f32 * self.scale_y).round().max(1.0) as u32;
    (w, h)
  }
}

#[cfg(feature = "image")]
impl From<image::RgbImage> for ImageFrame {
  fn from(image: image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    ImageFrame {
      width,
      height,
      format: PixelFormat::Rgb888,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

/// 按缩放方式把图像放入 `dst_w x dst_h` 画布，返回新帧与所施加的变换。
/// 像素通道顺序原样保留。
#[cfg(feature = "image")]
pub fn fit_image(
  frame: &ImageFrame,
  dst_w: u32,
  dst_h: u32,
  fit: FitPolicy,
) -> Result<(ImageFrame, Letterbox), FrameError> {
  use image::{RgbImage, imageops};

  if frame.width() == 0 || frame.height() == 0 {
    return Err(FrameError::EmptyImage(frame.width(), frame.height()));
  }

  let letterbox = Letterbox::new(fit, frame.width(), frame.height(), dst_w, dst_h);
  if frame.width() == dst_w && frame.height() == dst_h {
    return Ok((frame.clone(), letterbox));
  }

  let source = RgbImage::from_raw(frame.width(), frame.height(), frame.as_nhwc().to_vec())
    .ok_or(FrameError::SizeMismatch {
      expected: frame.channels() * frame.width() as usize * frame.height() as usize,
      actual: frame.as_nhwc().len(),
    })?;

  let (scaled_w, scaled_h) = letterbox.scaled_size(frame.width(), frame.height());
  let resized = imageops::resize(&source, scaled_w, scaled_h, imageops::FilterType::Triangle);

  let mut canvas = RgbImage::new(dst_w, dst_h);
  imageops::overlay(
    &mut canvas,
    &resized,
    letterbox.offset_x.round() as i64,
    letterbox.offset_y.round() as i64,
  );

  let fitted = ImageFrame::new(dst_w, dst_h, frame.format(), canvas.into_raw())?;
  Ok((fitted, letterbox))
}
