// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::query_param,
  frame::{FrameError, ImageFrame, PixelFormat},
};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像帧错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 按目标像素格式把 RGB 图像转为帧
fn frame_from_image(image: RgbImage, format: PixelFormat) -> ImageFrame {
  let mut frame = ImageFrame::from(image);
  if format == PixelFormat::Bgr888 {
    for pixel in frame.as_mut().chunks_exact_mut(3) {
      pixel.swap(0, 2);
    }
    frame = frame.with_format(PixelFormat::Bgr888);
  }
  frame
}

fn read_frame(path: &Path, format: PixelFormat) -> Result<ImageFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?;
  Ok(frame_from_image(image.into(), format))
}

/// `?format=bgr` 指定产出帧的像素格式，默认 RGB
fn format_param(url: &Url) -> Result<PixelFormat, ImageFileInputError> {
  match query_param(url, "format") {
    Some(value) => Ok(value.parse()?),
    None => Ok(PixelFormat::Rgb888),
  }
}

fn check_scheme(url: &Url, scheme: &str) -> Result<(), ImageFileInputError> {
  if url.scheme() != scheme {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际 '{}'",
      scheme,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
  }
  Ok(())
}

/// 单张图像，只产出一帧
pub struct ImageFileInput {
  frame: Option<ImageFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let format = format_param(url)?;
    info!("读取图像文件: {}", url.path());
    let frame = read_frame(Path::new(url.path()), format)?;
    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// 目录中的图像，按文件名顺序逐一产出，无法解码的文件被跳过
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
  format: PixelFormat,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "dir";
}

impl FromUrl for DirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let format = format_param(url)?;
    Self::open(url.path(), format)
  }
}

impl DirectoryInput {
  pub fn open(dir: impl AsRef<Path>, format: PixelFormat) -> Result<Self, ImageFileInputError> {
    let dir = dir.as_ref();
    let mut files = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect::<Vec<_>>();
    files.sort();
    info!("目录 {} 中共有 {} 张图像", dir.display(), files.len());

    Ok(DirectoryInput {
      files: files.into_iter(),
      format,
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match read_frame(&path, self.format) {
        Ok(frame) => return Some(frame),
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::AsNhwcFrame;

  #[test]
  fn bgr_frames_swap_channels() {
    let image = RgbImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
    let frame = frame_from_image(image.clone(), PixelFormat::Bgr888);
    assert_eq!(frame.format(), PixelFormat::Bgr888);
    assert_eq!(frame.as_nhwc(), &[3, 2, 1, 6, 5, 4]);

    let frame = frame_from_image(image, PixelFormat::Rgb888);
    assert_eq!(frame.as_nhwc(), &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn directory_input_reads_sorted_images() {
    let dir = std::env::temp_dir().join(format!("shanan-dir-input-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    RgbImage::from_pixel(4, 2, image::Rgb([9, 9, 9]))
      .save(dir.join("b.png"))
      .unwrap();
    RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1]))
      .save(dir.join("a.png"))
      .unwrap();
    std::fs::write(dir.join("c.png"), b"not an image").unwrap();
    std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

    let url = Url::parse(&format!("dir://{}", dir.display())).unwrap();
    let frames = DirectoryInput::from_url(&url).unwrap().collect::<Vec<_>>();
    std::fs::remove_dir_all(&dir).unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].width(), frames[0].height()), (2, 2));
    assert_eq!((frames[1].width(), frames[1].height()), (4, 2));
  }

  #[test]
  fn rejects_unknown_format() {
    let url = Url::parse("image:///tmp/x.png?format=gray").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::FrameError(_))
    ));
  }
}
