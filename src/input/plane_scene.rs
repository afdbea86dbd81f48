// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input/plane_scene.rs - 由针孔相机与若干平面组成的简单场景
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

use glam::{Quat, Vec2, Vec3};
use image::RgbImage;
use tracing::debug;

use crate::{
  anchor::{
    AnchorPose, PlaneAlignment, RaycastHit, RaycastQuery, RaycastTarget, SceneSession,
  },
  frame::FrameSnapshot,
};

const RAY_EPSILON: f32 = 1e-6;
const TABLETOP_FOV_DEG: f32 = 60.0;
const TABLETOP_FLOOR_HEIGHT: f32 = -0.5;
const TABLETOP_WALL_DISTANCE: f32 = 2.0;

/// 相机沿自身 -Z 方向观察，+Y 朝上；视图坐标 x 向右、y 向下
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
  pub focal: Vec2,
  pub principal: Vec2,
  pub viewport: Vec2,
  pub rotation: Quat,
  pub position: Vec3,
}

impl PinholeCamera {
  pub fn with_fov(viewport: Vec2, vertical_fov_deg: f32) -> Self {
    let fy = (viewport.y * 0.5) / (vertical_fov_deg.to_radians() * 0.5).tan();
    Self {
      focal: Vec2::splat(fy),
      principal: viewport * 0.5,
      viewport,
      rotation: Quat::IDENTITY,
      position: Vec3::ZERO,
    }
  }

  /// 返回世界坐标下的射线起点与单位方向
  pub fn ray(&self, point: Vec2) -> (Vec3, Vec3) {
    let local = Vec3::new(
      (point.x - self.principal.x) / self.focal.x,
      -(point.y - self.principal.y) / self.focal.y,
      -1.0,
    );
    (self.position, (self.rotation * local).normalize())
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
  pub origin: Vec3,
  pub normal: Vec3,
  pub alignment: PlaneAlignment,
  /// 已被平面检测确认；否则只是由特征点估计出来的
  pub detected: bool,
}

impl Plane {
  pub fn horizontal(height: f32, detected: bool) -> Self {
    Self {
      origin: Vec3::new(0.0, height, 0.0),
      normal: Vec3::Y,
      alignment: PlaneAlignment::Horizontal,
      detected,
    }
  }

  pub fn vertical(origin: Vec3, normal: Vec3, detected: bool) -> Self {
    Self {
      origin,
      normal: normal.normalize(),
      alignment: PlaneAlignment::Vertical,
      detected,
    }
  }

  fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
    let denom = self.normal.dot(direction);
    if denom.abs() < RAY_EPSILON {
      return None;
    }
    let t = self.normal.dot(self.origin - origin) / denom;
    (t > RAY_EPSILON).then_some(t)
  }
}

pub struct PlaneScene {
  camera: PinholeCamera,
  planes: Vec<Plane>,
  frame: Option<RgbImage>,
}

impl PlaneScene {
  pub fn new(camera: PinholeCamera) -> Self {
    Self {
      camera,
      planes: Vec::new(),
      frame: None,
    }
  }

  /// 水平相机，下方是已检测的桌面，前方是估计出的墙面
  pub fn tabletop(viewport: Vec2) -> Self {
    Self::new(PinholeCamera::with_fov(viewport, TABLETOP_FOV_DEG))
      .with_plane(Plane::horizontal(TABLETOP_FLOOR_HEIGHT, true))
      .with_plane(Plane::vertical(
        Vec3::new(0.0, 0.0, -TABLETOP_WALL_DISTANCE),
        Vec3::Z,
        false,
      ))
  }

  pub fn with_plane(mut self, plane: Plane) -> Self {
    self.planes.push(plane);
    self
  }

  pub fn with_frame(mut self, frame: RgbImage) -> Self {
    self.frame = Some(frame);
    self
  }

  pub fn set_frame(&mut self, frame: Option<RgbImage>) {
    self.frame = frame;
  }

  pub fn camera(&self) -> &PinholeCamera {
    &self.camera
  }
}

impl SceneSession for PlaneScene {
  fn viewport(&self) -> Vec2 {
    self.camera.viewport
  }

  fn current_frame(&self) -> Option<FrameSnapshot> {
    self.frame.clone().map(FrameSnapshot::new)
  }

  fn raycast(&self, query: &RaycastQuery) -> Vec<RaycastHit> {
    let (origin, direction) = self.camera.ray(query.point);

    let mut hits: Vec<RaycastHit> = self
      .planes
      .iter()
      .filter(|plane| query.constraint.alignment.accepts(plane.alignment))
      .filter(|plane| match query.constraint.target {
        RaycastTarget::EstimatedPlane => true,
        RaycastTarget::ExistingPlane => plane.detected,
      })
      .filter_map(|plane| {
        plane.intersect(origin, direction).map(|t| RaycastHit {
          pose: AnchorPose::new(
            Quat::from_rotation_arc(Vec3::Y, plane.normal),
            origin + direction * t,
          ),
          distance: t,
        })
      })
      .collect();

    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    debug!("射线 {:?} 与 {} 个平面相交", direction, hits.len());
    hits
  }
}
