// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model/prototype.rs - 颜色原型分类模型
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::{InputShape, ModelInput},
  model::{LoadModel, Model, Prediction},
};

const PROTOTYPE_DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Error, Debug)]
pub enum PrototypeModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型文件格式错误: {0}")]
  ModelFormatError(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输入尺寸不匹配: 期望 {expected_w}x{expected_h}, 实际 {actual_w}x{actual_h}")]
  ShapeMismatch {
    expected_w: u32,
    expected_h: u32,
    actual_w: u32,
    actual_h: u32,
  },
}

#[derive(Debug, Clone, Deserialize)]
struct Prototype {
  label: String,
  color: [u8; 3],
}

#[derive(Debug, Clone, Deserialize)]
struct PrototypeFile {
  input: InputShape,
  temperature: Option<f32>,
  prototypes: Vec<Prototype>,
}

/// 以平均颜色与各类别原型颜色的距离做 softmax 的小模型
#[derive(Debug, Clone)]
pub struct PrototypeModel {
  input: InputShape,
  temperature: f32,
  prototypes: Vec<Prototype>,
}

pub struct PrototypeModelBuilder {
  model_path: String,
  temperature: Option<f32>,
  size: Option<u32>,
}

impl FromUrlWithScheme for PrototypeModelBuilder {
  const SCHEME: &'static str = "proto";
}

impl FromUrl for PrototypeModelBuilder {
  type Error = PrototypeModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PrototypeModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = PrototypeModelBuilder {
      model_path: decode_url_path(url),
      temperature: None,
      size: None,
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "temperature" => {
          let t = v.parse::<f32>().map_err(|_| {
            PrototypeModelError::ModelPathError(format!("无法解析 temperature: {}", v))
          })?;
          builder = builder.temperature(t);
        }
        "size" => {
          let s = v
            .parse::<u32>()
            .map_err(|_| PrototypeModelError::ModelPathError(format!("无法解析 size: {}", v)))?;
          builder = builder.size(s);
        }
        _ => debug!("忽略未知的模型参数: {}={}", k, v),
      }
    }

    Ok(builder)
  }
}

impl PrototypeModelBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      temperature: None,
      size: None,
    }
  }

  pub fn temperature(mut self, temperature: f32) -> Self {
    self.temperature = Some(temperature);
    self
  }

  /// 覆盖模型文件中的输入尺寸（正方形）
  pub fn size(mut self, size: u32) -> Self {
    self.size = Some(size);
    self
  }

  pub fn build(self) -> Result<PrototypeModel, PrototypeModelError> {
    info!("加载模型文件: {}", self.model_path);
    let data = std::fs::read(&self.model_path)?;
    debug!("模型文件大小: {:.2} KB", data.len() as f64 / 1024.0);

    let file: PrototypeFile = serde_json::from_slice(&data)?;
    PrototypeModel::from_parts(file, self.temperature, self.size)
  }
}

impl LoadModel for PrototypeModelBuilder {
  type Model = PrototypeModel;
  type Error = PrototypeModelError;

  fn load(self) -> Result<Self::Model, Self::Error> {
    self.build()
  }
}

impl PrototypeModel {
  fn from_parts(
    file: PrototypeFile,
    temperature: Option<f32>,
    size: Option<u32>,
  ) -> Result<Self, PrototypeModelError> {
    let mut input = file.input;
    if let Some(size) = size {
      input.width = size;
      input.height = size;
    }
    if input.width == 0 || input.height == 0 {
      return Err(PrototypeModelError::ModelInvalid(format!(
        "输入尺寸无效: {}x{}",
        input.width, input.height
      )));
    }

    let temperature = temperature
      .or(file.temperature)
      .unwrap_or(PROTOTYPE_DEFAULT_TEMPERATURE);
    if !(temperature.is_finite() && temperature > 0.0) {
      return Err(PrototypeModelError::ModelInvalid(format!(
        "temperature 必须为正数, 实际为 {}",
        temperature
      )));
    }

    if file.prototypes.is_empty() {
      return Err(PrototypeModelError::ModelInvalid(
        "模型中没有任何类别".to_string(),
      ));
    }

    info!(
      "模型加载完成: {} 个类别, 输入 {}x{}",
      file.prototypes.len(),
      input.width,
      input.height
    );

    Ok(Self {
      input,
      temperature,
      prototypes: file.prototypes,
    })
  }
}

fn mean_color(input: &ModelInput) -> [f32; 3] {
  let mut sum = [0f64; 3];
  for y in 0..input.height() {
    for x in 0..input.width() {
      let pixel = input.pixel(x, y);
      for c in 0..3 {
        sum[c] += pixel[c] as f64;
      }
    }
  }

  let count = (input.width() * input.height()).max(1) as f64;
  sum.map(|s| (s / count / 255.0) as f32)
}

impl Model for PrototypeModel {
  type Error = PrototypeModelError;

  fn input_shape(&self) -> InputShape {
    self.input
  }

  fn infer(&self, input: &ModelInput) -> Result<Vec<Prediction>, Self::Error> {
    let shape = input.shape();
    if shape.width != self.input.width || shape.height != self.input.height {
      return Err(PrototypeModelError::ShapeMismatch {
        expected_w: self.input.width,
        expected_h: self.input.height,
        actual_w: shape.width,
        actual_h: shape.height,
      });
    }

    let mean = mean_color(input);
    debug!("输入平均颜色: {:?}", mean);

    // 距离归一化到 [0, 1]
    let logits: Vec<f32> = self
      .prototypes
      .iter()
      .map(|p| {
        let d = p
          .color
          .iter()
          .zip(mean)
          .map(|(&c, m)| (c as f32 / 255.0 - m).powi(2))
          .sum::<f32>()
          .sqrt()
          / 3f32.sqrt();
        -d / self.temperature
      })
      .collect();

    let max = logits.iter().copied().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    let mut predictions: Vec<Prediction> = self
      .prototypes
      .iter()
      .zip(exps)
      .map(|(p, e)| Prediction::new(p.label.clone(), e / total))
      .collect();
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    Ok(predictions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::TensorLayout;
  use image::{Rgb, RgbImage};
  use std::io::Write;

  const MODEL_JSON: &str = r#"{
    "input": { "width": 8, "height": 8 },
    "prototypes": [
      { "label": "banana", "color": [230, 200, 60] },
      { "label": "tomato", "color": [200, 30, 30] },
      { "label": "leaf", "color": [40, 160, 50] }
    ]
  }"#;

  fn write_model(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  fn solid(color: [u8; 3], size: u32) -> ModelInput {
    ModelInput::from_rgb_image(
      &RgbImage::from_pixel(size, size, Rgb(color)),
      TensorLayout::Nhwc,
    )
  }

  #[test]
  fn nearest_prototype_ranks_first() {
    let file = write_model(MODEL_JSON);
    let model = PrototypeModelBuilder::new(file.path().to_string_lossy())
      .build()
      .unwrap();

    let predictions = model.infer(&solid([210, 40, 35], 8)).unwrap();
    assert_eq!(predictions.len(), 3);
    assert_eq!(predictions[0].label, "tomato");

    let total: f32 = predictions.iter().map(|p| p.confidence).sum();
    assert!((total - 1.0).abs() < 1e-4);
    assert!(predictions.windows(2).all(|w| w[0].confidence >= w[1].confidence));
  }

  #[test]
  fn url_query_overrides_file() {
    let file = write_model(MODEL_JSON);
    let url = Url::parse(&format!(
      "proto://{}?temperature=0.5&size=4",
      file.path().display()
    ))
    .unwrap();
    let model = PrototypeModelBuilder::from_url(&url).unwrap().build().unwrap();

    assert_eq!(model.input_shape().width, 4);
    assert_eq!(model.temperature, 0.5);
    assert!(model.infer(&solid([0, 0, 0], 4)).is_ok());
    assert!(matches!(
      model.infer(&solid([0, 0, 0], 8)),
      Err(PrototypeModelError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn load_failures() {
    assert!(matches!(
      PrototypeModelBuilder::new("/nonexistent/model.json").build(),
      Err(PrototypeModelError::ModelLoadError(_))
    ));

    let broken = write_model("{ not json");
    assert!(matches!(
      PrototypeModelBuilder::new(broken.path().to_string_lossy()).build(),
      Err(PrototypeModelError::ModelFormatError(_))
    ));

    let empty = write_model(r#"{ "input": { "width": 8, "height": 8 }, "prototypes": [] }"#);
    assert!(matches!(
      PrototypeModelBuilder::new(empty.path().to_string_lossy()).build(),
      Err(PrototypeModelError::ModelInvalid(_))
    ));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("onnx:///models/a.json").unwrap();
    assert!(matches!(
      PrototypeModelBuilder::from_url(&url),
      Err(PrototypeModelError::ModelPathError(_))
    ));
  }
}
