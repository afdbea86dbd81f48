// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output.rs - 标注输出
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

use std::convert::Infallible;

use chrono::{DateTime, Utc};
use glam::Vec3;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, anchor::AnchorPose};

/// 渲染表面
///
/// 场景图不支持并发修改，实现方只会在前台调度上下文中被调用，因此不要求 `Send`。
pub trait Render {
  type Error: std::error::Error;

  fn add_annotation(&mut self, node: AnnotationNode) -> Result<(), Self::Error>;
  fn clear_annotations(&mut self) -> Result<(), Self::Error>;
}

pub mod draw;
pub use self::draw::NodeStyle;

mod scene_graph;
pub use self::scene_graph::{SceneGraph, SceneGraphError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{RecordOutput, RecordOutputError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AnnotationId(u64);

impl std::fmt::Display for AnnotationId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "A{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerGeometry {
  pub radius: f32,
  pub diffuse: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextGeometry {
  pub text: String,
  pub extrusion_depth: f32,
  pub font: String,
  pub font_size: f32,
  pub scale: f32,
  pub centered: bool,
  pub diffuse: [u8; 3],
  pub specular: [u8; 3],
  pub double_sided: bool,
}

/// 一个标注节点：小球标记 + 浮动文字
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationNode {
  pub id: AnnotationId,
  pub position: Vec3,
  pub marker: MarkerGeometry,
  pub text: TextGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub id: AnnotationId,
  pub label: String,
  pub anchor: AnchorPose,
  pub placed_at: DateTime<Utc>,
}

/// 把分类结果落到场景中，只能在前台调度上下文中使用
///
/// 已放置的标注保存在自有集合中，不会被自动更新或移除；调用方可以显式清空。
pub struct AnnotationSink<R: Render> {
  surface: R,
  style: NodeStyle,
  annotations: Vec<Annotation>,
  next_id: u64,
}

impl<R: Render> AnnotationSink<R> {
  pub fn new(surface: R, style: NodeStyle) -> Self {
    Self {
      surface,
      style,
      annotations: Vec::new(),
      next_id: 0,
    }
  }

  /// 每次调用都新建一个标注，同一锚点重复放置会得到重叠的两个标注
  pub fn place(&mut self, label: &str, anchor: AnchorPose) -> Result<&Annotation, R::Error> {
    self.next_id += 1;
    let id = AnnotationId(self.next_id);

    let node = self.style.build_node(id, label, &anchor);
    self.surface.add_annotation(node)?;
    debug!("标注 {} '{}' 已加入场景", id, label);

    let index = self.annotations.len();
    self.annotations.push(Annotation {
      id,
      label: label.to_string(),
      anchor,
      placed_at: Utc::now(),
    });
    Ok(&self.annotations[index])
  }

  pub fn annotations(&self) -> &[Annotation] {
    &self.annotations
  }

  /// 移除全部标注并返回被移除的集合
  pub fn clear(&mut self) -> Result<Vec<Annotation>, R::Error> {
    self.surface.clear_annotations()?;
    Ok(std::mem::take(&mut self.annotations))
  }

  pub fn surface(&self) -> &R {
    &self.surface
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("场景图错误: {0}")]
  SceneGraphError(#[from] SceneGraphError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl From<Infallible> for OutputError {
  fn from(e: Infallible) -> Self {
    match e {}
  }
}

pub enum OutputWrapper {
  SceneGraph(SceneGraph),
  #[cfg(feature = "directory_record")]
  RecordOutput(RecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SceneGraph::SCHEME => Ok(OutputWrapper::SceneGraph(SceneGraph::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      RecordOutput::SCHEME => Ok(OutputWrapper::RecordOutput(RecordOutput::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn add_annotation(&mut self, node: AnnotationNode) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SceneGraph(output) => output.add_annotation(node).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::RecordOutput(output) => {
        output.add_annotation(node).map_err(OutputError::from)
      }
    }
  }

  fn clear_annotations(&mut self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SceneGraph(output) => output.clear_annotations().map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::RecordOutput(output) => {
        output.clear_annotations().map_err(OutputError::from)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_anchor_twice_yields_two_annotations() {
    let mut sink = AnnotationSink::new(SceneGraph::default(), NodeStyle::default());
    let anchor = AnchorPose::from_translation(Vec3::new(0.1, -0.5, -1.0));

    let first = sink.place("cup", anchor).unwrap().id;
    let second = sink.place("cup", anchor).unwrap().id;

    assert_ne!(first, second);
    assert_eq!(sink.annotations().len(), 2);
    assert_eq!(sink.surface().nodes().len(), 2);
    assert!(
      sink
        .surface()
        .nodes()
        .iter()
        .all(|n| n.position == anchor.position())
    );
  }

  #[test]
  fn clear_empties_collection_and_scene() {
    let mut sink = AnnotationSink::new(SceneGraph::default(), NodeStyle::default());
    sink
      .place("a", AnchorPose::from_translation(Vec3::X))
      .unwrap();
    sink
      .place("b", AnchorPose::from_translation(Vec3::Y))
      .unwrap();

    let removed = sink.clear().unwrap();
    assert_eq!(removed.len(), 2);
    assert!(sink.annotations().is_empty());
    assert!(sink.surface().nodes().is_empty());

    // 清空后继续放置，编号不会重复
    let id = sink
      .place("c", AnchorPose::from_translation(Vec3::Z))
      .unwrap()
      .id;
    assert!(!removed.iter().any(|a| a.id == id));
  }

  #[test]
  fn output_wrapper_picks_surface_by_scheme() {
    let url = Url::parse("scene://root").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::SceneGraph(_))
    ));

    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
