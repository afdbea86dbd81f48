// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/draw.rs - 标注节点的外观
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

use crate::{
  anchor::AnchorPose,
  output::{AnnotationId, AnnotationNode, MarkerGeometry, TextGeometry},
};

// 节点外观常量，单位为米
const MARKER_RADIUS: f32 = 0.01;
const LABEL_FONT: &str = "Futura";
const LABEL_FONT_SIZE: f32 = 0.15;
const LABEL_SCALE: f32 = 0.2;
const LABEL_SPECULAR: [u8; 3] = [255, 255, 255]; // 白色高光
const GOLDEN_ANGLE_DEG: f32 = 137.508;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStyle {
  pub marker_radius: f32,
  pub font: String,
  pub font_size: f32,
  pub text_scale: f32,
  pub saturation: f32,
  pub value: f32,
}

impl Default for NodeStyle {
  fn default() -> Self {
    Self {
      marker_radius: MARKER_RADIUS,
      font: LABEL_FONT.to_string(),
      font_size: LABEL_FONT_SIZE,
      text_scale: LABEL_SCALE,
      saturation: 0.8,
      value: 0.9,
    }
  }
}

impl NodeStyle {
  /// 节点只使用锚点的平移部分定位
  pub fn build_node(&self, id: AnnotationId, label: &str, anchor: &AnchorPose) -> AnnotationNode {
    // 标记按编号以黄金角错开色相，文字颜色由标签决定
    let marker_hue = (id.0 as f32 * GOLDEN_ANGLE_DEG) % 360.0;
    let text_hue = label_hue(label);

    AnnotationNode {
      id,
      position: anchor.position(),
      marker: MarkerGeometry {
        radius: self.marker_radius,
        diffuse: hsv_to_rgb(marker_hue, self.saturation, self.value),
      },
      text: TextGeometry {
        text: label.to_string(),
        extrusion_depth: 0.0,
        font: self.font.clone(),
        font_size: self.font_size,
        scale: self.text_scale,
        centered: true,
        diffuse: hsv_to_rgb(text_hue, self.saturation, self.value),
        specular: LABEL_SPECULAR,
        double_sided: true,
      },
    }
  }
}

// FNV-1a
fn label_hue(label: &str) -> f32 {
  let hash = label
    .bytes()
    .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
      (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    });
  (hash % 360) as f32
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  [
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use glam::{Quat, Vec3};

  #[test]
  fn node_uses_anchor_translation() {
    let anchor = AnchorPose::new(Quat::from_rotation_x(0.3), Vec3::new(1.0, 2.0, 3.0));
    let node = NodeStyle::default().build_node(AnnotationId(1), "keyboard", &anchor);

    assert_eq!(node.position, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(node.text.text, "keyboard");
    assert_eq!(node.marker.radius, MARKER_RADIUS);
    assert_eq!(node.text.specular, [255, 255, 255]);
    assert!(node.text.double_sided && node.text.centered);
  }

  #[test]
  fn same_label_same_text_color() {
    let style = NodeStyle::default();
    let anchor = AnchorPose::from_translation(Vec3::ZERO);
    let a = style.build_node(AnnotationId(1), "mug", &anchor);
    let b = style.build_node(AnnotationId(2), "mug", &anchor);
    assert_eq!(a.text.diffuse, b.text.diffuse);
    assert_ne!(a.marker.diffuse, b.marker.diffuse);
  }

  #[test]
  fn hsv_primaries() {
    assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [255, 0, 0]);
    assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), [0, 255, 0]);
    assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), [0, 0, 255]);
  }
}
