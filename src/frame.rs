// 该文件是 Biaozhu （标注） 项目的一部分。
// src/frame.rs - 画面快照与模型输入张量
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

use std::str::FromStr;

use chrono::{DateTime, Utc};
use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use serde::Deserialize;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("帧尺寸无效: {0}x{1}")]
  EmptyFrame(u32, u32),
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidShape(u32, u32),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("未知的图像方向: {0}")]
  UnknownOrientation(String),
  #[error("未知的裁剪方式: {0}")]
  UnknownCrop(String),
}

/// 相机在某一时刻的画面快照
///
/// 快照在创建时就持有图像数据的独立拷贝，之后不会再去读取相机，
/// 因此同一请求中的标签与锚点总是对应同一物理时刻。
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
  image: RgbImage,
  captured_at: DateTime<Utc>,
}

impl FrameSnapshot {
  pub fn new(image: RgbImage) -> Self {
    Self::captured_at(image, Utc::now())
  }

  pub fn captured_at(image: RgbImage, captured_at: DateTime<Utc>) -> Self {
    Self { image, captured_at }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub(crate) fn timestamp(&self) -> DateTime<Utc> {
    self.captured_at
  }

  /// 按照固定方向、裁剪策略把快照转换成模型输入
  pub fn prepare(
    &self,
    shape: InputShape,
    orientation: Orientation,
    crop: CropAndScale,
  ) -> Result<ModelInput, FrameError> {
    let (width, height) = self.image.dimensions();
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame(width, height));
    }
    if shape.width == 0 || shape.height == 0 {
      return Err(FrameError::InvalidShape(shape.width, shape.height));
    }

    let oriented = orientation.apply(&self.image);
    let scaled = crop.apply(&oriented, shape.width, shape.height);
    Ok(ModelInput::from_rgb_image(&scaled, shape.layout))
  }
}

/// 采集图像相对于显示方向的摆放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
  Up,
  UpMirrored,
  Down,
  DownMirrored,
  Left,
  LeftMirrored,
  Right,
  RightMirrored,
}

impl Orientation {
  /// 把图像转回正向
  pub fn apply(self, image: &RgbImage) -> RgbImage {
    match self {
      Orientation::Up => image.clone(),
      Orientation::UpMirrored => imageops::flip_horizontal(image),
      Orientation::Down => imageops::rotate180(image),
      Orientation::DownMirrored => imageops::flip_vertical(image),
      Orientation::Left => imageops::rotate270(image),
      // 转置
      Orientation::LeftMirrored => imageops::flip_horizontal(&imageops::rotate90(image)),
      Orientation::Right => imageops::rotate90(image),
      // 反转置
      Orientation::RightMirrored => imageops::flip_horizontal(&imageops::rotate270(image)),
    }
  }
}

impl FromStr for Orientation {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "up" => Ok(Orientation::Up),
      "up-mirrored" => Ok(Orientation::UpMirrored),
      "down" => Ok(Orientation::Down),
      "down-mirrored" => Ok(Orientation::DownMirrored),
      "left" => Ok(Orientation::Left),
      "left-mirrored" => Ok(Orientation::LeftMirrored),
      "right" => Ok(Orientation::Right),
      "right-mirrored" => Ok(Orientation::RightMirrored),
      other => Err(FrameError::UnknownOrientation(other.to_string())),
    }
  }
}

/// 图像尺寸与模型输入尺寸不一致时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropAndScale {
  /// 按短边缩放后裁掉中心区域以外的部分
  #[default]
  CenterCrop,
  /// 保持宽高比缩放，空白处填充黑色
  ScaleFit,
  /// 直接拉伸到目标尺寸
  ScaleFill,
}

impl CropAndScale {
  pub fn apply(self, image: &RgbImage, width: u32, height: u32) -> RgbImage {
    match self {
      CropAndScale::CenterCrop => {
        let (x, y, w, h) = center_crop_region(image.width(), image.height(), width, height);
        let cropped = imageops::crop_imm(image, x, y, w, h).to_image();
        resize_exact(&cropped, width, height)
      }
      CropAndScale::ScaleFill => resize_exact(image, width, height),
      CropAndScale::ScaleFit => {
        let (iw, ih) = image.dimensions();
        let scale = (width as f32 / iw as f32).min(height as f32 / ih as f32);
        let w = ((iw as f32 * scale).round() as u32).clamp(1, width);
        let h = ((ih as f32 * scale).round() as u32).clamp(1, height);
        let resized = resize_exact(image, w, h);

        let mut canvas = RgbImage::new(width, height);
        imageops::replace(
          &mut canvas,
          &resized,
          ((width - w) / 2) as i64,
          ((height - h) / 2) as i64,
        );
        canvas
      }
    }
  }
}

impl FromStr for CropAndScale {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "center-crop" => Ok(CropAndScale::CenterCrop),
      "scale-fit" => Ok(CropAndScale::ScaleFit),
      "scale-fill" => Ok(CropAndScale::ScaleFill),
      other => Err(FrameError::UnknownCrop(other.to_string())),
    }
  }
}

fn resize_exact(image: &RgbImage, width: u32, height: u32) -> RgbImage {
  if image.dimensions() == (width, height) {
    return image.clone();
  }
  imageops::resize(image, width, height, FilterType::Triangle)
}

/// 计算与目标宽高比一致的最大居中区域 (x, y, w, h)
pub(crate) fn center_crop_region(
  image_w: u32,
  image_h: u32,
  target_w: u32,
  target_h: u32,
) -> (u32, u32, u32, u32) {
  let (iw, ih) = (image_w as u64, image_h as u64);
  let (tw, th) = (target_w as u64, target_h as u64);

  if iw * th > tw * ih {
    // 原图更宽，裁掉左右两侧
    let w = ((ih * tw) / th).max(1) as u32;
    ((image_w - w) / 2, 0, w, image_h)
  } else {
    let h = ((iw * th) / tw).max(1) as u32;
    (0, (image_h - h) / 2, image_w, h)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  #[serde(default)]
  pub layout: TensorLayout,
}

impl InputShape {
  pub fn new(width: u32, height: u32, layout: TensorLayout) -> Self {
    Self {
      width,
      height,
      layout,
    }
  }

  pub fn len(&self) -> usize {
    RGB_CHANNELS * self.width as usize * self.height as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 送入模型的 RGB u8 张量
#[derive(Debug, Clone)]
pub struct ModelInput {
  data: Box<[u8]>,
  shape: InputShape,
}

impl ModelInput {
  pub fn from_raw(data: Vec<u8>, shape: InputShape) -> Result<Self, FrameError> {
    if data.len() != shape.len() {
      return Err(FrameError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      shape,
    })
  }

  pub fn from_rgb_image(image: &RgbImage, layout: TensorLayout) -> Self {
    let (width, height) = image.dimensions();
    let shape = InputShape::new(width, height, layout);
    let plane_size = (width * height) as usize;
    let mut data = vec![0u8; shape.len()];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = (y * width + x) as usize;
      for c in 0..RGB_CHANNELS {
        let index = match layout {
          TensorLayout::Nhwc => idx * RGB_CHANNELS + c,
          TensorLayout::Nchw => c * plane_size + idx,
        };
        data[index] = pixel[c];
      }
    }

    Self {
      data: data.into_boxed_slice(),
      shape,
    }
  }

  pub fn shape(&self) -> InputShape {
    self.shape
  }

  pub fn width(&self) -> usize {
    self.shape.width as usize
  }

  pub fn height(&self) -> usize {
    self.shape.height as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = y * self.width() + x;
    let plane_size = self.width() * self.height();
    match self.shape.layout {
      TensorLayout::Nhwc => {
        let base = idx * RGB_CHANNELS;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
      }
      TensorLayout::Nchw => [
        self.data[idx],
        self.data[plane_size + idx],
        self.data[2 * plane_size + idx],
      ],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn striped(width: u32, height: u32) -> RgbImage {
    // 左中右三等分：红、绿、蓝
    RgbImage::from_fn(width, height, |x, _| match x * 3 / width {
      0 => Rgb([255, 0, 0]),
      1 => Rgb([0, 255, 0]),
      _ => Rgb([0, 0, 255]),
    })
  }

  #[test]
  fn center_crop_region_keeps_middle() {
    assert_eq!(center_crop_region(400, 200, 100, 100), (100, 0, 200, 200));
    assert_eq!(center_crop_region(200, 400, 100, 100), (0, 100, 200, 200));
    assert_eq!(center_crop_region(224, 224, 224, 224), (0, 0, 224, 224));
  }

  #[test]
  fn center_crop_discards_sides() {
    let snapshot = FrameSnapshot::new(striped(300, 100));
    let input = snapshot
      .prepare(
        InputShape::new(10, 10, TensorLayout::Nhwc),
        Orientation::Up,
        CropAndScale::CenterCrop,
      )
      .unwrap();

    assert_eq!(input.width(), 10);
    assert_eq!(input.height(), 10);
    for y in 0..10 {
      for x in 0..10 {
        assert_eq!(input.pixel(x, y), [0, 255, 0]);
      }
    }
  }

  #[test]
  fn scale_fit_pads_with_black() {
    let image = RgbImage::from_pixel(4, 2, Rgb([200, 200, 200]));
    let fitted = CropAndScale::ScaleFit.apply(&image, 4, 4);
    assert_eq!(fitted.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(fitted.get_pixel(1, 1), &Rgb([200, 200, 200]));
    assert_eq!(fitted.get_pixel(3, 3), &Rgb([0, 0, 0]));
  }

  #[test]
  fn up_mirrored_flips_horizontally() {
    let image = striped(3, 1);
    let flipped = Orientation::UpMirrored.apply(&image);
    assert_eq!(flipped.get_pixel(0, 0), &Rgb([0, 0, 255]));
    assert_eq!(flipped.get_pixel(2, 0), &Rgb([255, 0, 0]));
  }

  #[test]
  fn mirrored_rotations_are_transposes() {
    let image = RgbImage::from_fn(2, 3, |x, y| Rgb([x as u8, y as u8, 0]));

    let transposed = Orientation::LeftMirrored.apply(&image);
    assert_eq!(transposed.dimensions(), (3, 2));
    assert_eq!(transposed.get_pixel(2, 1), &Rgb([1, 2, 0]));

    let transversed = Orientation::RightMirrored.apply(&image);
    assert_eq!(transversed.dimensions(), (3, 2));
    // (x, y) -> (h - 1 - y, w - 1 - x)
    assert_eq!(transversed.get_pixel(0, 0), &Rgb([1, 2, 0]));
  }

  #[test]
  fn nchw_layout_is_planar() {
    let image = RgbImage::from_fn(2, 1, |x, _| Rgb([10 + x as u8, 20 + x as u8, 30 + x as u8]));
    let input = ModelInput::from_rgb_image(&image, TensorLayout::Nchw);
    assert_eq!(input.as_slice(), &[10, 11, 20, 21, 30, 31]);
    assert_eq!(input.pixel(1, 0), [11, 21, 31]);

    let input = ModelInput::from_rgb_image(&image, TensorLayout::Nhwc);
    assert_eq!(input.as_slice(), &[10, 20, 30, 11, 21, 31]);
    assert_eq!(input.pixel(1, 0), [11, 21, 31]);
  }

  #[test]
  fn empty_frame_is_rejected() {
    let snapshot = FrameSnapshot::new(RgbImage::new(0, 0));
    let err = snapshot
      .prepare(
        InputShape::new(8, 8, TensorLayout::Nhwc),
        Orientation::Up,
        CropAndScale::CenterCrop,
      )
      .unwrap_err();
    assert!(matches!(err, FrameError::EmptyFrame(0, 0)));
  }

  #[test]
  fn raw_input_length_is_checked() {
    let shape = InputShape::new(2, 2, TensorLayout::Nhwc);
    assert!(ModelInput::from_raw(vec![0; 12], shape).is_ok());
    assert!(matches!(
      ModelInput::from_raw(vec![0; 5], shape),
      Err(FrameError::LengthMismatch {
        expected: 12,
        actual: 5
      })
    ));
  }

  #[test]
  fn orientation_names_parse() {
    assert_eq!("up-mirrored".parse::<Orientation>().unwrap(), Orientation::UpMirrored);
    assert!("sideways".parse::<Orientation>().is_err());
    assert_eq!("center-crop".parse::<CropAndScale>().unwrap(), CropAndScale::CenterCrop);
  }
}
