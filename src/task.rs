// 该文件是 Biaozhu （标注） 项目的一部分。
// src/task.rs - 点击驱动的任务循环
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
  sync::mpsc::{self, RecvTimeoutError},
  thread,
  time::{Duration, Instant},
};

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::{
  anchor::SceneSession,
  coordinator::SubmitError,
  output::Render,
  session::{Session, Settled, Settlement, TapOutcome},
};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait Task<I, S: SceneSession, R: Render>: Sized {
  type Error;
  fn run_task(self, input: I, session: &mut Session<S, R>) -> Result<TaskReport, Self::Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
  pub taps: usize,
  pub dispatched: usize,
  pub no_anchor: usize,
  pub rejected: usize,
  pub annotated: usize,
  pub dropped: usize,
}

impl TaskReport {
  fn record_tap(&mut self, outcome: &TapOutcome) {
    self.taps += 1;
    match outcome {
      TapOutcome::Dispatched(_) => self.dispatched += 1,
      TapOutcome::NoAnchor(_) => self.no_anchor += 1,
      TapOutcome::FrameUnavailable | TapOutcome::Rejected(_) => self.rejected += 1,
    }
  }

  fn record_settled(&mut self, settled: &[Settled]) {
    for s in settled {
      match &s.settlement {
        Settlement::Annotated {
          label, confidence, ..
        } => {
          info!(
            "请求 {} 标注为 '{}' ({:.2}%)",
            s.id,
            label,
            confidence * 100.0
          );
          self.annotated += 1;
        }
        Settlement::Dropped(_) => self.dropped += 1,
      }
    }
  }
}

/// 依次回放全部点击，最后等待所有请求结束
///
/// 分类队列已满时先处理在途请求再重试同一点击，回放的每次点击都会被派发。
#[derive(Debug)]
pub struct ReplayTask {
  interval: Option<Duration>,
  timeout: Duration,
}

impl Default for ReplayTask {
  fn default() -> Self {
    Self {
      interval: None,
      timeout: DEFAULT_DRAIN_TIMEOUT,
    }
  }
}

impl ReplayTask {
  /// 两次点击之间至少间隔的时间，期间继续处理已完成的请求
  pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn tap<S: SceneSession, R: Render>(
    &self,
    point: Vec2,
    session: &mut Session<S, R>,
    report: &mut TaskReport,
  ) -> TapOutcome {
    loop {
      let outcome = session.on_tap(point);
      if !matches!(outcome, TapOutcome::Rejected(SubmitError::QueueFull(_))) || session.is_idle() {
        return outcome;
      }

      debug!("分类队列已满，等待在途请求完成后重试");
      let settled = session.pump_timeout(self.timeout);
      if settled.is_empty() {
        warn!("等待 {:.2?} 后队列仍然已满，放弃本次点击", self.timeout);
        return outcome;
      }
      report.record_settled(&settled);
    }
  }

  fn wait_interval<S: SceneSession, R: Render>(
    &self,
    session: &mut Session<S, R>,
    report: &mut TaskReport,
  ) {
    let Some(interval) = self.interval else {
      report.record_settled(&session.pump());
      return;
    };

    let deadline = Instant::now().checked_add(interval);
    loop {
      let remaining = match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => interval,
      };
      if remaining.is_zero() {
        break;
      }
      report.record_settled(&session.pump_timeout(remaining));
    }
  }
}

impl<I, S, R> Task<I, S, R> for ReplayTask
where
  I: IntoIterator<Item = Vec2>,
  S: SceneSession,
  R: Render,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, session: &mut Session<S, R>) -> Result<TaskReport, Self::Error> {
    info!("开始回放点击...");
    let mut report = TaskReport::default();

    for point in input {
      let outcome = self.tap(point, session, &mut report);
      report.record_tap(&outcome);
      self.wait_interval(session, &mut report);
    }

    report.record_settled(&session.wait_idle(self.timeout));
    if !session.is_idle() {
      anyhow::bail!(
        "等待 {:.2?} 后仍有 {} 个请求未完成",
        self.timeout,
        session.in_flight()
      );
    }

    info!("回放完成: {:?}", report);
    Ok(report)
  }
}

/// 持续从输入读取点击，直到输入结束、达到点击数量或收到中断信号
#[derive(Debug)]
pub struct ContinuousTask {
  tap_limit: Option<usize>,
  poll: Duration,
  drain_timeout: Duration,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      tap_limit: None,
      poll: DEFAULT_POLL_INTERVAL,
      drain_timeout: DEFAULT_DRAIN_TIMEOUT,
    }
  }
}

impl ContinuousTask {
  pub fn with_tap_limit(mut self, tap_limit: Option<usize>) -> Self {
    self.tap_limit = tap_limit;
    self
  }

  pub fn with_poll(mut self, poll: Duration) -> Self {
    self.poll = poll;
    self
  }

  pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
    self.drain_timeout = timeout;
    self
  }
}

impl<I, S, R> Task<I, S, R> for ContinuousTask
where
  I: Iterator<Item = Vec2> + Send + 'static,
  S: SceneSession,
  R: Render,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, session: &mut Session<S, R>) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = stop_tx.send(());
    })?;

    // 输入读取可能阻塞，放到单独的线程里，前台只通过通道接收点击
    let (tap_tx, tap_rx) = mpsc::channel();
    thread::Builder::new()
      .name("tap-input".to_string())
      .spawn(move || {
        for point in input {
          if tap_tx.send(point).is_err() {
            break;
          }
        }
      })?;

    let mut report = TaskReport::default();
    loop {
      match tap_rx.recv_timeout(self.poll) {
        Ok(point) => {
          let outcome = session.on_tap(point);
          report.record_tap(&outcome);
        }
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
          info!("输入结束，退出任务循环");
          break;
        }
      }

      report.record_settled(&session.pump());

      if self.tap_limit.is_some_and(|n| report.taps >= n) {
        info!("达到指定点击数 {}, 退出任务循环", report.taps);
        break;
      }
      if stop_rx.try_recv().is_ok() {
        warn!("中断信号接收，取消在途请求并退出任务循环");
        session.cancel_all();
        break;
      }
    }

    report.record_settled(&session.wait_idle(self.drain_timeout));
    info!("任务完成，退出: {:?}", report);
    Ok(report)
  }
}
