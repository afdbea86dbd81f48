// 该文件是 Biaozhu （标注） 项目的一部分。
// src/bin/continuous.rs - 从标准输入持续读取点击
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

use std::{io::BufReader, time::Duration};

use anyhow::Result;
use clap::Parser;
use glam::Vec2;
use url::Url;

use biaozhu::{
  FromUrl, Session, SessionConfig,
  frame::{CropAndScale, Orientation},
  input::{ImageFileInput, LineTaps, PlaneScene},
  model::PrototypeModelBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Biaozhu 持续运行参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分类模型路径，例如 proto:///path/to/model.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 相机画面，例如 image:///path/to/frame.png
  #[arg(long, value_name = "FRAME")]
  pub frame: Url,
  /// 标注输出，scene:// 或 record:///path/to/dir
  #[arg(long, value_name = "OUTPUT", default_value = "scene://")]
  pub output: Url,

  #[arg(long, default_value_t = 2)]
  pub workers: usize,
  #[arg(long, default_value_t = 8)]
  pub queue: usize,
  #[arg(long, default_value = "up-mirrored")]
  pub orientation: Orientation,
  #[arg(long, default_value = "center-crop")]
  pub crop: CropAndScale,

  /// 处理指定数量的点击后退出
  #[arg(long, value_name = "TAP_NUMBER")]
  pub tap_number: Option<usize>,
  /// 退出前等待在途请求的时间（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 10_000)]
  pub timeout_ms: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("画面来源: {}", args.frame);
  info!("输出路径: {}", args.output);

  let frame = ImageFileInput::from_url(&args.frame)?;
  let (width, height) = frame.dimensions();
  let scene =
    PlaneScene::tabletop(Vec2::new(width as f32, height as f32)).with_frame(frame.into_image());
  let output = OutputWrapper::from_url(&args.output)?;
  let loader = PrototypeModelBuilder::from_url(&args.model).and_then(PrototypeModelBuilder::build);

  let config = SessionConfig::default()
    .workers(args.workers)
    .queue_capacity(args.queue)
    .orientation(args.orientation)
    .crop(args.crop);
  let mut session = Session::new(config, scene, loader, output);

  info!("从标准输入读取点击，每行一个 x,y");
  ContinuousTask::default()
    .with_tap_limit(args.tap_number)
    .with_drain_timeout(Duration::from_millis(args.timeout_ms))
    .run_task(LineTaps::new(BufReader::new(std::io::stdin())), &mut session)?;

  info!("会话结束，共 {} 个标注", session.annotations().len());
  Ok(())
}
