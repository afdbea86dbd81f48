// 该文件是 Biaozhu （标注） 项目的一部分。
// src/anchor.rs - 点击位置到空间锚点的解析
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

use chrono::{DateTime, Utc};
use glam::{Mat4, Quat, Vec2, Vec3};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::frame::FrameSnapshot;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnchorError {
  #[error("无效的射线查询: ({0}, {1})")]
  InvalidQuery(f32, f32),
  #[error("射线没有命中任何平面")]
  NoHit,
}

/// 一次用户点击，坐标为视图像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapEvent {
  pub point: Vec2,
  pub timestamp: DateTime<Utc>,
}

impl TapEvent {
  pub fn new(point: Vec2) -> Self {
    Self {
      point,
      timestamp: Utc::now(),
    }
  }
}

/// 场景世界坐标系下的位姿，创建后不可变
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnchorPose {
  rotation: Quat,
  translation: Vec3,
}

impl AnchorPose {
  pub fn new(rotation: Quat, translation: Vec3) -> Self {
    Self {
      rotation: rotation.normalize(),
      translation,
    }
  }

  pub fn from_translation(translation: Vec3) -> Self {
    Self::new(Quat::IDENTITY, translation)
  }

  pub fn rotation(&self) -> Quat {
    self.rotation
  }

  pub fn position(&self) -> Vec3 {
    self.translation
  }

  pub fn world_transform(&self) -> Mat4 {
    Mat4::from_rotation_translation(self.rotation, self.translation)
  }
}

/// 射线允许命中的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaycastTarget {
  /// 由特征点临时估计出的平面
  #[default]
  EstimatedPlane,
  /// 只接受已经检测到的平面
  ExistingPlane,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaneAlignment {
  #[default]
  Any,
  Horizontal,
  Vertical,
}

impl PlaneAlignment {
  pub fn accepts(self, alignment: PlaneAlignment) -> bool {
    self == PlaneAlignment::Any || self == alignment
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneConstraint {
  pub target: RaycastTarget,
  pub alignment: PlaneAlignment,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastQuery {
  pub point: Vec2,
  pub constraint: PlaneConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
  pub pose: AnchorPose,
  pub distance: f32,
}

/// 场景/会话提供方
///
/// 实现方只需在前台调度上下文中被访问，因此不要求 `Send`。
pub trait SceneSession {
  /// 视图尺寸（像素）
  fn viewport(&self) -> Vec2;

  /// 当前相机画面，相机尚未就绪时返回 `None`
  fn current_frame(&self) -> Option<FrameSnapshot>;

  /// 按由近到远的顺序返回命中结果
  fn raycast(&self, query: &RaycastQuery) -> Vec<RaycastHit>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialAnchorResolver {
  constraint: PlaneConstraint,
}

impl SpatialAnchorResolver {
  pub fn new(constraint: PlaneConstraint) -> Self {
    Self { constraint }
  }

  pub fn constraint(&self) -> PlaneConstraint {
    self.constraint
  }

  /// 点击点落在视图之外或坐标不是有限数时，无法构造查询
  pub fn query(&self, point: Vec2, viewport: Vec2) -> Option<RaycastQuery> {
    let inside = point.is_finite()
      && point.x >= 0.0
      && point.y >= 0.0
      && point.x < viewport.x
      && point.y < viewport.y;

    inside.then_some(RaycastQuery {
      point,
      constraint: self.constraint,
    })
  }

  pub fn resolve<S: SceneSession + ?Sized>(
    &self,
    tap: &TapEvent,
    scene: &S,
  ) -> Result<AnchorPose, AnchorError> {
    let query = self
      .query(tap.point, scene.viewport())
      .ok_or(AnchorError::InvalidQuery(tap.point.x, tap.point.y))?;

    let hits = scene.raycast(&query);
    debug!("射线查询 {:?} 命中 {} 个结果", tap.point, hits.len());

    // 只取第一个（最近的）结果
    hits
      .into_iter()
      .next()
      .map(|hit| hit.pose)
      .ok_or(AnchorError::NoHit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FixedHits(Vec<RaycastHit>);

  impl SceneSession for FixedHits {
    fn viewport(&self) -> Vec2 {
      Vec2::new(640.0, 480.0)
    }

    fn current_frame(&self) -> Option<FrameSnapshot> {
      None
    }

    fn raycast(&self, _query: &RaycastQuery) -> Vec<RaycastHit> {
      self.0.clone()
    }
  }

  fn hit(z: f32) -> RaycastHit {
    RaycastHit {
      pose: AnchorPose::from_translation(Vec3::new(0.0, 0.0, z)),
      distance: -z,
    }
  }

  #[test]
  fn first_hit_wins() {
    let scene = FixedHits(vec![hit(-1.0), hit(-2.0), hit(-3.0)]);
    let anchor = SpatialAnchorResolver::default()
      .resolve(&TapEvent::new(Vec2::new(10.0, 10.0)), &scene)
      .unwrap();
    assert_eq!(anchor.position(), Vec3::new(0.0, 0.0, -1.0));
  }

  #[test]
  fn empty_raycast_is_no_hit() {
    let scene = FixedHits(Vec::new());
    let err = SpatialAnchorResolver::default()
      .resolve(&TapEvent::new(Vec2::new(10.0, 10.0)), &scene)
      .unwrap_err();
    assert_eq!(err, AnchorError::NoHit);
  }

  #[test]
  fn taps_outside_viewport_are_invalid() {
    let scene = FixedHits(vec![hit(-1.0)]);
    let resolver = SpatialAnchorResolver::default();
    for point in [
      Vec2::new(-1.0, 10.0),
      Vec2::new(640.0, 10.0),
      Vec2::new(10.0, 480.0),
      Vec2::new(f32::NAN, 10.0),
    ] {
      let err = resolver.resolve(&TapEvent::new(point), &scene).unwrap_err();
      assert!(matches!(err, AnchorError::InvalidQuery(..)));
    }
  }

  #[test]
  fn alignment_any_accepts_everything() {
    assert!(PlaneAlignment::Any.accepts(PlaneAlignment::Vertical));
    assert!(PlaneAlignment::Horizontal.accepts(PlaneAlignment::Horizontal));
    assert!(!PlaneAlignment::Horizontal.accepts(PlaneAlignment::Vertical));
  }

  #[test]
  fn world_transform_carries_translation() {
    let pose = AnchorPose::new(Quat::from_rotation_y(1.0), Vec3::new(1.0, 2.0, 3.0));
    let column = pose.world_transform().w_axis;
    assert_eq!(column.truncate(), Vec3::new(1.0, 2.0, 3.0));
  }
}
