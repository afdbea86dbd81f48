// 该文件是 Biaozhu （标注） 项目的一部分。
// src/session.rs - 点击事件分发与会话
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

use std::{
  collections::HashMap,
  sync::mpsc::{self, Receiver, RecvTimeoutError},
  time::{Duration, Instant},
};

use glam::Vec2;
use tracing::{debug, error, info, warn};

use crate::{
  anchor::{AnchorError, AnchorPose, PlaneConstraint, SceneSession, SpatialAnchorResolver, TapEvent},
  coordinator::{
    ClassificationConfig, ClassificationRequestCoordinator, Completion, DropReason, Outcome,
    RequestHandle, RequestId, SubmitError,
  },
  frame::{CropAndScale, Orientation},
  model::LoadModel,
  output::{Annotation, AnnotationId, AnnotationSink, NodeStyle, Render},
};

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
  pub classification: ClassificationConfig,
  pub constraint: PlaneConstraint,
  pub style: NodeStyle,
}

impl SessionConfig {
  pub fn workers(mut self, workers: usize) -> Self {
    self.classification.workers = workers;
    self
  }

  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.classification.queue_capacity = capacity;
    self
  }

  pub fn orientation(mut self, orientation: Orientation) -> Self {
    self.classification.orientation = orientation;
    self
  }

  pub fn crop(mut self, crop: CropAndScale) -> Self {
    self.classification.crop = crop;
    self
  }

  pub fn constraint(mut self, constraint: PlaneConstraint) -> Self {
    self.constraint = constraint;
    self
  }

  pub fn style(mut self, style: NodeStyle) -> Self {
    self.style = style;
    self
  }
}

/// 一次点击在前台同步阶段的结局
#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
  /// 没有解析出锚点，本次点击什么也不做
  NoAnchor(AnchorError),
  FrameUnavailable,
  Rejected(SubmitError),
  /// 已进入后台分类，结果稍后由 [`Session::pump`] 取回
  Dispatched(RequestId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
  Annotated {
    annotation: AnnotationId,
    label: String,
    confidence: f32,
  },
  Dropped(DropReason),
}

/// 一个请求的最终状态
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
  pub id: RequestId,
  pub anchor: AnchorPose,
  pub settlement: Settlement,
}

/// 一次 AR 会话内的完整流水线
///
/// 会话归前台调度上下文独占：点击处理、射线检测与场景修改都发生在持有会话的线程上，
/// 后台推理结果只能经由通道回到这里，再由 [`Session::pump`] 写入场景。
pub struct Session<S: SceneSession, R: Render> {
  scene: S,
  resolver: SpatialAnchorResolver,
  coordinator: ClassificationRequestCoordinator,
  sink: AnnotationSink<R>,
  completions: Receiver<Completion>,
  in_flight: HashMap<RequestId, RequestHandle>,
}

impl<S: SceneSession, R: Render> Session<S, R> {
  pub fn new<L>(config: SessionConfig, scene: S, loader: L, surface: R) -> Self
  where
    L: LoadModel,
    L::Model: 'static,
  {
    let (tx, rx) = mpsc::channel();
    let coordinator = ClassificationRequestCoordinator::new(loader, &config.classification, tx);

    Self {
      scene,
      resolver: SpatialAnchorResolver::new(config.constraint),
      coordinator,
      sink: AnnotationSink::new(surface, config.style),
      completions: rx,
      in_flight: HashMap::new(),
    }
  }

  pub fn on_tap(&mut self, point: Vec2) -> TapOutcome {
    self.handle_tap(TapEvent::new(point))
  }

  pub fn handle_tap(&mut self, tap: TapEvent) -> TapOutcome {
    let anchor = match self.resolver.resolve(&tap, &self.scene) {
      Ok(anchor) => anchor,
      Err(e) => {
        info!("点击 ({:.1}, {:.1}) 未能解析锚点: {}", tap.point.x, tap.point.y, e);
        return TapOutcome::NoAnchor(e);
      }
    };
    debug!(
      "点击 ({:.1}, {:.1}) 解析到锚点 {:?}",
      tap.point.x,
      tap.point.y,
      anchor.position()
    );

    if !self.coordinator.is_enabled() {
      debug!("分类不可用，忽略本次点击");
      return TapOutcome::Rejected(SubmitError::Disabled);
    }

    let Some(snapshot) = self.scene.current_frame() else {
      warn!("当前没有可用的相机画面");
      return TapOutcome::FrameUnavailable;
    };

    match self.coordinator.submit(anchor, snapshot) {
      Ok(handle) => {
        let id = handle.id();
        self.in_flight.insert(id, handle);
        TapOutcome::Dispatched(id)
      }
      Err(e) => {
        warn!("分类请求未能派发: {}", e);
        TapOutcome::Rejected(e)
      }
    }
  }

  /// 非阻塞地处理所有已完成的请求
  pub fn pump(&mut self) -> Vec<Settled> {
    let mut settled = Vec::new();
    while let Ok(completion) = self.completions.try_recv() {
      settled.push(self.settle(completion));
    }
    settled
  }

  /// 最多等待 `timeout` 直到至少一个请求完成
  pub fn pump_timeout(&mut self, timeout: Duration) -> Vec<Settled> {
    match self.completions.recv_timeout(timeout) {
      Ok(completion) => {
        let mut settled = vec![self.settle(completion)];
        settled.extend(self.pump());
        settled
      }
      Err(_) => Vec::new(),
    }
  }

  /// 等待所有在途请求结束，超时后返回已处理的部分
  ///
  /// 超时时间过大（例如 `Duration::MAX`）时一直等待。
  pub fn wait_idle(&mut self, timeout: Duration) -> Vec<Settled> {
    let deadline = Instant::now().checked_add(timeout);
    let mut settled = self.pump();

    while !self.in_flight.is_empty() {
      let received = match deadline {
        Some(deadline) => self
          .completions
          .recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => self
          .completions
          .recv()
          .map_err(|_| RecvTimeoutError::Disconnected),
      };
      match received {
        Ok(completion) => settled.push(self.settle(completion)),
        Err(RecvTimeoutError::Timeout) => {
          warn!("等待超时，仍有 {} 个请求未完成", self.in_flight.len());
          break;
        }
        Err(RecvTimeoutError::Disconnected) => {
          error!("推理线程已全部退出，放弃 {} 个请求", self.in_flight.len());
          self.in_flight.clear();
          break;
        }
      }
    }

    settled
  }

  fn settle(&mut self, completion: Completion) -> Settled {
    let Completion {
      id,
      anchor,
      outcome,
    } = completion;

    let cancelled = match self.in_flight.remove(&id) {
      Some(handle) => handle.is_cancelled(),
      None => {
        warn!("收到未知请求 {} 的结果", id);
        false
      }
    };

    let settlement = match outcome {
      Outcome::Classified(_) if cancelled => {
        debug!("请求 {} 已取消，丢弃结果", id);
        Settlement::Dropped(DropReason::Cancelled)
      }
      Outcome::Classified(result) => match self.sink.place(&result.label, anchor) {
        Ok(annotation) => Settlement::Annotated {
          annotation: annotation.id,
          label: result.label,
          confidence: result.confidence,
        },
        Err(e) => {
          warn!("请求 {} 的标注无法加入场景: {}", id, e);
          Settlement::Dropped(DropReason::Render)
        }
      },
      Outcome::Dropped(reason) => {
        debug!("请求 {} 被丢弃: {:?}", id, reason);
        Settlement::Dropped(reason)
      }
    };

    Settled {
      id,
      anchor,
      settlement,
    }
  }

  pub fn cancel(&mut self, id: RequestId) -> bool {
    match self.in_flight.get(&id) {
      Some(handle) => {
        handle.cancel();
        true
      }
      None => false,
    }
  }

  pub fn cancel_all(&mut self) {
    for handle in self.in_flight.values() {
      handle.cancel();
    }
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight.len()
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight.is_empty()
  }

  pub fn is_classification_enabled(&self) -> bool {
    self.coordinator.is_enabled()
  }

  pub fn annotations(&self) -> &[Annotation] {
    self.sink.annotations()
  }

  pub fn clear_annotations(&mut self) -> Result<Vec<Annotation>, R::Error> {
    self.sink.clear()
  }

  pub fn surface(&self) -> &R {
    self.sink.surface()
  }

  pub fn scene(&self) -> &S {
    &self.scene
  }

  pub fn scene_mut(&mut self) -> &mut S {
    &mut self.scene
  }
}

impl<S: SceneSession, R: Render> Drop for Session<S, R> {
  fn drop(&mut self) {
    if !self.in_flight.is_empty() {
      debug!("会话结束，取消 {} 个在途请求", self.in_flight.len());
      self.cancel_all();
    }
  }
}
