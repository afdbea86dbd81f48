// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input/tap_script.rs - 点击脚本
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

use std::{io::BufRead, str::FromStr};

use glam::Vec2;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path};

#[derive(Error, Debug)]
pub enum TapScriptError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法解析点击坐标 '{0}'，应为 x,y")]
  InvalidPoint(String),
}

/// 解析 `x,y` 形式的视图坐标
pub fn parse_point(s: &str) -> Result<Vec2, TapScriptError> {
  let invalid = || TapScriptError::InvalidPoint(s.to_string());
  let (x, y) = s.trim().split_once(',').ok_or_else(invalid)?;
  let x = x.trim().parse::<f32>().map_err(|_| invalid())?;
  let y = y.trim().parse::<f32>().map_err(|_| invalid())?;
  Ok(Vec2::new(x, y))
}

/// 一串预先录好的点击，按行或分号分隔，`#` 开头为注释
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapScript {
  points: Vec<Vec2>,
}

impl FromStr for TapScript {
  type Err = TapScriptError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let points = s
      .split(['\n', ';'])
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(parse_point)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { points })
  }
}

impl FromUrlWithScheme for TapScript {
  const SCHEME: &'static str = "taps";
}

impl FromUrl for TapScript {
  type Error = TapScriptError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TapScriptError::SchemeMismatch);
    }
    std::fs::read_to_string(decode_url_path(url))?.parse()
  }
}

impl TapScript {
  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn extend(&mut self, points: impl IntoIterator<Item = Vec2>) {
    self.points.extend(points);
  }
}

impl IntoIterator for TapScript {
  type Item = Vec2;
  type IntoIter = std::vec::IntoIter<Vec2>;

  fn into_iter(self) -> Self::IntoIter {
    self.points.into_iter()
  }
}

/// 从文本流中逐行读取点击，无法解析的行会被跳过
pub struct LineTaps<B> {
  reader: B,
  line: String,
}

impl<B: BufRead> LineTaps<B> {
  pub fn new(reader: B) -> Self {
    Self {
      reader,
      line: String::new(),
    }
  }
}

impl<B: BufRead> Iterator for LineTaps<B> {
  type Item = Vec2;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      self.line.clear();
      match self.reader.read_line(&mut self.line) {
        Ok(0) => return None,
        Ok(_) => {
          let line = self.line.trim();
          if line.is_empty() || line.starts_with('#') {
            continue;
          }
          match parse_point(line) {
            Ok(point) => return Some(point),
            Err(e) => warn!("{}", e),
          }
        }
        Err(e) => {
          warn!("读取点击输入失败: {}", e);
          return None;
        }
      }
    }
  }
}
