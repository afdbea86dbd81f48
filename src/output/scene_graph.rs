// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/scene_graph.rs - 内存中的场景根节点
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotationNode, Render},
};

#[derive(Error, Debug)]
pub enum SceneGraphError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
}

#[derive(Debug, Default)]
pub struct SceneGraph {
  root: Vec<AnnotationNode>,
}

impl FromUrlWithScheme for SceneGraph {
  const SCHEME: &'static str = "scene";
}

impl FromUrl for SceneGraph {
  type Error = SceneGraphError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SceneGraphError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }
    Ok(Self::default())
  }
}

impl SceneGraph {
  pub fn nodes(&self) -> &[AnnotationNode] {
    &self.root
  }
}

impl Render for SceneGraph {
  type Error = Infallible;

  fn add_annotation(&mut self, node: AnnotationNode) -> Result<(), Self::Error> {
    info!(
      "场景新增标注 {} '{}' @ ({:.3}, {:.3}, {:.3})",
      node.id, node.text.text, node.position.x, node.position.y, node.position.z
    );
    self.root.push(node);
    Ok(())
  }

  fn clear_annotations(&mut self) -> Result<(), Self::Error> {
    info!("清空场景中的 {} 个标注", self.root.len());
    self.root.clear();
    Ok(())
  }
}
