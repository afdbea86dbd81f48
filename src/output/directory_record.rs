// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  output::{AnnotationNode, Render},
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RecordLine<'a> {
  Added {
    at: DateTime<Utc>,
    node: &'a AnnotationNode,
  },
  Cleared {
    at: DateTime<Utc>,
  },
}

/// 把每个标注作为一行 JSON 追加到按日期分目录的记录文件中
pub struct RecordOutput {
  path: PathBuf,
  written: u64,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }

    Ok(Self::new(decode_url_path(url), Utc::now()))
  }
}

impl RecordOutput {
  /// 记录文件为 `<directory>/YYYY/MM/DD/HH-MM-SS-annotations.jsonl`
  pub fn new(directory: impl AsRef<Path>, started: DateTime<Utc>) -> Self {
    let path = directory
      .as_ref()
      .join(started.year().to_string())
      .join(format!("{:02}", started.month()))
      .join(format!("{:02}", started.day()))
      .join(format!("{}-annotations.jsonl", started.format("%H-%M-%S")));

    Self { path, written: 0 }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn written(&self) -> u64 {
    self.written
  }

  fn append(&mut self, line: &RecordLine<'_>) -> Result<(), RecordOutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.exists()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    serde_json::to_writer(&mut file, line)?;
    file.write_all(b"\n")?;

    self.written += 1;
    debug!("写入第 {} 条记录到 {}", self.written, self.path.display());
    Ok(())
  }
}

impl Render for RecordOutput {
  type Error = RecordOutputError;

  fn add_annotation(&mut self, node: AnnotationNode) -> Result<(), Self::Error> {
    self.append(&RecordLine::Added {
      at: Utc::now(),
      node: &node,
    })
  }

  fn clear_annotations(&mut self) -> Result<(), Self::Error> {
    warn!("记录输出无法删除历史记录，仅追加清空事件");
    self.append(&RecordLine::Cleared { at: Utc::now() })
  }
}
