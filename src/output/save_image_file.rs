// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ImageFrame, PixelFormat},
  engine::query_param,
  input::AsNhwcFrame,
  model::{DetectItem, DetectResult},
  output::Render,
};

const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const PALETTE: [[u8; 3]; 6] = [
  [255, 56, 56],
  [56, 56, 255],
  [56, 255, 56],
  [255, 157, 151],
  [255, 178, 29],
  [207, 210, 49],
];

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法加载字体文件: {0}")]
  FontLoadError(String),
}

/// 在图像上绘制检测框后保存，`image:///path/out.png?font=/path/font.ttf`。
/// 给出字体时在框上方标注类别与得分。
pub struct SaveImageFileOutput {
  path: String,
  labels: Vec<String>,
  font: Option<FontArc>,
}

fn load_font(path: &str) -> Result<FontArc, SaveImageFileError> {
  let data = std::fs::read(path).map_err(SaveImageFileError::IoError)?;
  FontArc::try_from_vec(data).map_err(|_| SaveImageFileError::FontLoadError(path.to_string()))
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let font = query_param(uri, "font")
      .map(|path| load_font(&path))
      .transpose()?;
    if font.is_none() {
      debug!("未指定字体, 只绘制检测框");
    }

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      labels: Vec::new(),
      font,
    })
  }
}

/// 帧转换为 RGB 图像，BGR 帧交换通道
pub fn frame_to_image(frame: &ImageFrame) -> Option<RgbImage> {
  let mut data = frame.as_nhwc().to_vec();
  if frame.format() == PixelFormat::Bgr888 {
    for pixel in data.chunks_exact_mut(3) {
      pixel.swap(0, 2);
    }
  }
  RgbImage::from_raw(frame.width(), frame.height(), data)
}

/// 框上方的标注文字
pub fn caption(item: &DetectItem, labels: &[String]) -> String {
  format!("{} {:.2}", DetectResult::label_of(item, labels), item.score)
}

/// 以类别着色的空心矩形，宽或高不足 1 像素的框不绘制。给出字体时在框上方标注
pub fn draw_detections(
  image: &mut RgbImage,
  result: &DetectResult,
  labels: &[String],
  font: Option<&FontArc>,
) {
  for item in result.iter() {
    let color = Rgb(PALETTE[item.class_id as usize % PALETTE.len()]);
    if !draw_item(image, item, color) {
      continue;
    }
    if let Some(font) = font {
      let x = item.x.round() as i32;
      let y = (item.y.round() as i32 - LABEL_FONT_SIZE as i32).max(0);
      draw_text_mut(
        image,
        color,
        x,
        y,
        PxScale::from(LABEL_FONT_SIZE),
        font,
        &caption(item, labels),
      );
    }
  }
}

fn draw_item(image: &mut RgbImage, item: &DetectItem, color: Rgb<u8>) -> bool {
  if item.w.round() < 1.0 || item.h.round() < 1.0 {
    return false;
  }
  for t in 0..BOX_THICKNESS {
    let x = item.x.round() as i32 + t;
    let y = item.y.round() as i32 + t;
    let w = item.w.round() as i32 - 2 * t;
    let h = item.h.round() as i32 - 2 * t;
    if w < 1 || h < 1 {
      break;
    }
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w as u32, h as u32), color);
  }
  true
}

impl SaveImageFileOutput {
  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }

  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    warn!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl Render<ImageFrame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = frame_to_image(frame).ok_or_else(|| {
      SaveImageFileError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "图像数据长度与尺寸不符",
      ))
    })?;
    for item in result.iter() {
      debug!("绘制 {}", caption(item, &self.labels));
    }
    draw_detections(&mut image, result, &self.labels, self.font.as_ref());
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_outline_only() {
    let mut image = RgbImage::new(20, 20);
    let result = DetectResult::from(vec![DetectItem::new(2.0, 2.0, 10.0, 10.0, 0, 0.9)]);
    draw_detections(&mut image, &result, &[], None);
    assert_eq!(image.get_pixel(2, 2), &Rgb(PALETTE[0]));
    assert_eq!(image.get_pixel(3, 3), &Rgb(PALETTE[0]));
    assert_eq!(image.get_pixel(7, 7), &Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let mut image = RgbImage::new(4, 4);
    let result = DetectResult::from(vec![DetectItem::new(1.0, 1.0, 0.0, 2.0, 1, 0.9)]);
    draw_detections(&mut image, &result, &[], None);
    assert!(image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn caption_uses_label_and_score() {
    let labels = vec!["person".to_string(), "car".to_string()];
    let item = DetectItem::new(0.0, 0.0, 4.0, 4.0, 1, 0.876);
    assert_eq!(caption(&item, &labels), "car 0.88");
  }

  #[test]
  fn unreadable_font_is_rejected() {
    let url = Url::parse("image:///tmp/out.png?font=/nonexistent/font.ttf").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::IoError(_))
    ));

    let path = std::env::temp_dir().join(format!("shanan-font-{}.ttf", std::process::id()));
    std::fs::write(&path, b"not a font").unwrap();
    let url = Url::parse(&format!("image:///tmp/out.png?font={}", path.display())).unwrap();
    let result = SaveImageFileOutput::from_url(&url);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(result, Err(SaveImageFileError::FontLoadError(_))));
  }

  #[test]
  fn bgr_frame_is_converted() {
    let frame = ImageFrame::new(1, 1, PixelFormat::Bgr888, vec![1, 2, 3]).unwrap();
    let image = frame_to_image(&frame).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([3, 2, 1]));
  }
}
