// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model.rs - 分类模型
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

use serde::Serialize;

use crate::frame::{InputShape, ModelInput};

/// 已加载的分类模型
///
/// 模型句柄会被多个工作线程同时只读使用。
pub trait Model: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_shape(&self) -> InputShape;
  fn infer(&self, input: &ModelInput) -> Result<Vec<Prediction>, Self::Error>;
}

/// 模型加载器，会话启动时只调用一次
pub trait LoadModel {
  type Model: Model;
  type Error: std::error::Error;

  fn load(self) -> Result<Self::Model, Self::Error>;
}

impl<M: Model, E: std::error::Error> LoadModel for Result<M, E> {
  type Model = M;
  type Error = E;

  fn load(self) -> Result<M, E> {
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub label: String,
  pub confidence: f32,
}

impl Prediction {
  pub fn new(label: impl Into<String>, confidence: f32) -> Self {
    Self {
      label: label.into(),
      confidence,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
  pub label: String,
  pub confidence: f32,
}

/// 只保留置信度最高的候选，其余全部丢弃；并列时取靠前的一个
///
/// 不设置最低置信度门限。
pub fn top_ranked(predictions: Vec<Prediction>) -> Option<ClassificationResult> {
  predictions
    .into_iter()
    .filter(|p| p.confidence.is_finite())
    .reduce(|best, p| {
      if p.confidence > best.confidence {
        p
      } else {
        best
      }
    })
    .map(|p| ClassificationResult {
      label: p.label,
      confidence: p.confidence.clamp(0.0, 1.0),
    })
}

#[cfg(feature = "model_prototype")]
mod prototype;
#[cfg(feature = "model_prototype")]
pub use self::prototype::{PrototypeModel, PrototypeModelBuilder, PrototypeModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn top_ranked_keeps_highest() {
    let result = top_ranked(vec![
      Prediction::new("cup", 0.2),
      Prediction::new("banana", 0.7),
      Prediction::new("keyboard", 0.1),
    ])
    .unwrap();
    assert_eq!(result.label, "banana");
    assert_eq!(result.confidence, 0.7);
  }

  #[test]
  fn ties_keep_first_candidate() {
    let result = top_ranked(vec![Prediction::new("a", 0.5), Prediction::new("b", 0.5)]).unwrap();
    assert_eq!(result.label, "a");
  }

  #[test]
  fn low_confidence_is_not_filtered() {
    let result = top_ranked(vec![Prediction::new("mouse", 0.001)]).unwrap();
    assert_eq!(result.label, "mouse");
    assert_eq!(result.confidence, 0.001);
  }

  #[test]
  fn empty_or_invalid_predictions() {
    assert!(top_ranked(Vec::new()).is_none());
    assert!(top_ranked(vec![Prediction::new("nan", f32::NAN)]).is_none());
    let clamped = top_ranked(vec![Prediction::new("over", 1.5)]).unwrap();
    assert_eq!(clamped.confidence, 1.0);
  }
}
