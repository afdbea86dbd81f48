// 该文件是 Biaozhu （标注） 项目的一部分。
// src/coordinator.rs - 分类请求的派发与后台推理
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
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
  },
  thread,
  time::Instant,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  anchor::AnchorPose,
  frame::{CropAndScale, FrameSnapshot, InputShape, Orientation},
  model::{ClassificationResult, LoadModel, Model, top_ranked},
};

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// `submit` 返回给调用方的句柄
#[derive(Debug, Clone)]
pub struct RequestHandle {
  id: RequestId,
  token: CancelToken,
}

impl RequestHandle {
  pub fn id(&self) -> RequestId {
    self.id
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

/// 一个快照绑定一个锚点，二者都随请求移动，不会被共享
#[derive(Debug)]
struct ClassificationRequest {
  id: RequestId,
  anchor: AnchorPose,
  snapshot: FrameSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
  Cancelled,
  Preprocess,
  Inference,
  NoPrediction,
  WorkerPanic,
  Render,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Classified(ClassificationResult),
  Dropped(DropReason),
}

/// 后台推理完成后发往前台的消息，自带请求创建时的锚点
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
  pub id: RequestId,
  pub anchor: AnchorPose,
  pub outcome: Outcome,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
  #[error("分类已禁用: 模型未能加载")]
  Disabled,
  #[error("分类队列已满，丢弃请求 {0}")]
  QueueFull(RequestId),
  #[error("推理线程已停止")]
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationConfig {
  pub workers: usize,
  /// 等待推理的请求上限，超过后新的点击会被拒绝
  pub queue_capacity: usize,
  pub orientation: Orientation,
  pub crop: CropAndScale,
}

impl Default for ClassificationConfig {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      orientation: Orientation::UpMirrored,
      crop: CropAndScale::CenterCrop,
    }
  }
}

struct Job {
  request: ClassificationRequest,
  token: CancelToken,
}

#[derive(Clone, Copy)]
struct Preprocess {
  shape: InputShape,
  orientation: Orientation,
  crop: CropAndScale,
}

/// 丢弃时只关闭队列，不等待正在推理的线程；线程处理完手头的任务后自行退出
struct WorkerPool {
  queue: Option<SyncSender<Job>>,
}

impl WorkerPool {
  fn spawn<M: Model + 'static>(
    model: M,
    config: &ClassificationConfig,
    completions: Sender<Completion>,
  ) -> Self {
    let preprocess = Preprocess {
      shape: model.input_shape(),
      orientation: config.orientation,
      crop: config.crop,
    };
    let model = Arc::new(model);
    let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
    let jobs = Arc::new(Mutex::new(rx));

    // 句柄直接丢弃，线程以分离方式运行
    let workers = (0..config.workers.max(1))
      .filter_map(|index| {
        let model = Arc::clone(&model);
        let jobs = Arc::clone(&jobs);
        let completions = completions.clone();
        thread::Builder::new()
          .name(format!("classify-{}", index))
          .spawn(move || worker_loop(index, model, jobs, completions, preprocess))
          .inspect_err(|e| error!("无法创建推理线程 {}: {}", index, e))
          .ok()
      })
      .count();

    info!("启动 {} 个推理线程", workers);
    Self {
      queue: (workers > 0).then_some(tx),
    }
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    if self.queue.take().is_some() {
      debug!("关闭分类队列，推理线程将在当前任务结束后退出");
    }
  }
}

fn worker_loop<M: Model>(
  index: usize,
  model: Arc<M>,
  jobs: Arc<Mutex<Receiver<Job>>>,
  completions: Sender<Completion>,
  preprocess: Preprocess,
) {
  loop {
    let job = match jobs.lock() {
      Ok(rx) => rx.recv(),
      Err(_) => {
        error!("推理线程 {}: 任务队列锁已损坏", index);
        break;
      }
    };
    let Ok(job) = job else {
      debug!("推理线程 {} 退出", index);
      break;
    };

    let id = job.request.id;
    let anchor = job.request.anchor;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_job(&*model, &preprocess, job)))
      .unwrap_or_else(|_| {
        error!("请求 {} 推理过程中发生 panic", id);
        Outcome::Dropped(DropReason::WorkerPanic)
      });

    if completions
      .send(Completion {
        id,
        anchor,
        outcome,
      })
      .is_err()
    {
      debug!("会话已结束，丢弃请求 {} 的结果", id);
    }
  }
}

fn run_job<M: Model>(model: &M, preprocess: &Preprocess, job: Job) -> Outcome {
  let Job { request, token } = job;
  let id = request.id;

  if token.is_cancelled() {
    debug!("请求 {} 在推理前被取消", id);
    return Outcome::Dropped(DropReason::Cancelled);
  }
  debug!(
    "请求 {} 开始处理，快照已等待 {} ms",
    id,
    (Utc::now() - request.snapshot.timestamp()).num_milliseconds()
  );

  let input = match request
    .snapshot
    .prepare(preprocess.shape, preprocess.orientation, preprocess.crop)
  {
    Ok(input) => input,
    Err(e) => {
      warn!("请求 {} 预处理失败: {}", id, e);
      return Outcome::Dropped(DropReason::Preprocess);
    }
  };

  let now = Instant::now();
  let predictions = match model.infer(&input) {
    Ok(predictions) => predictions,
    Err(e) => {
      warn!("请求 {} 推理失败: {}", id, e);
      return Outcome::Dropped(DropReason::Inference);
    }
  };
  debug!("请求 {} 推理完成，耗时: {:.2?}", id, now.elapsed());

  if token.is_cancelled() {
    debug!("请求 {} 在推理后被取消", id);
    return Outcome::Dropped(DropReason::Cancelled);
  }

  match top_ranked(predictions) {
    Some(result) => {
      info!(
        "请求 {}: {} 置信度 {:.2}%",
        id,
        result.label,
        result.confidence * 100.0
      );
      Outcome::Classified(result)
    }
    None => {
      warn!("请求 {} 没有任何有效的分类结果", id);
      Outcome::Dropped(DropReason::NoPrediction)
    }
  }
}

/// 持有模型并把每次点击变成一个后台分类任务
///
/// 模型加载失败时进入永久禁用状态，之后的提交都直接返回，不会重试加载。
pub struct ClassificationRequestCoordinator {
  pool: Option<WorkerPool>,
  next_id: u64,
}

impl ClassificationRequestCoordinator {
  pub fn new<L>(loader: L, config: &ClassificationConfig, completions: Sender<Completion>) -> Self
  where
    L: LoadModel,
    L::Model: 'static,
  {
    let now = Instant::now();
    let pool = match loader.load() {
      Ok(model) => {
        info!("模型加载完成，耗时: {:.2?}", now.elapsed());
        Some(WorkerPool::spawn(model, config, completions))
      }
      Err(e) => {
        error!("模型加载失败，本次会话禁用分类: {}", e);
        None
      }
    };

    Self { pool, next_id: 0 }
  }

  pub fn is_enabled(&self) -> bool {
    self
      .pool
      .as_ref()
      .is_some_and(|pool| pool.queue.is_some())
  }

  /// 快照在调用时已经捕获并移入请求，之后不会再读取相机
  pub fn submit(
    &mut self,
    anchor: AnchorPose,
    snapshot: FrameSnapshot,
  ) -> Result<RequestHandle, SubmitError> {
    let pool = self.pool.as_ref().ok_or(SubmitError::Disabled)?;
    let queue = pool.queue.as_ref().ok_or(SubmitError::Stopped)?;

    self.next_id += 1;
    let id = RequestId(self.next_id);
    let token = CancelToken::default();
    let job = Job {
      request: ClassificationRequest {
        id,
        anchor,
        snapshot,
      },
      token: token.clone(),
    };

    match queue.try_send(job) {
      Ok(()) => {
        debug!("请求 {} 已派发", id);
        Ok(RequestHandle { id, token })
      }
      Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull(id)),
      Err(TrySendError::Disconnected(_)) => Err(SubmitError::Stopped),
    }
  }
}
