// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/model/labels.rs - 类别标签集合
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("标签集合为空")]
  Empty,
}

/// 启动时加载一次的有序标签集合，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  labels: Box<[String]>,
}

impl LabelSet {
  pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  /// 每行一个标签，行首尾空白会被去除
  pub fn parse(content: &str) -> Result<Self, LabelError> {
    Self::new(content.lines().map(|l| l.trim().to_string()).collect())
  }

  pub fn from_file(path: &Path) -> Result<Self, LabelError> {
    let content = std::fs::read_to_string(path).map_err(|source| LabelError::IoError {
      path: path.display().to_string(),
      source,
    })?;
    let labels = Self::parse(&content)?;
    info!("从 {} 加载 {} 个标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn get(&self, id: usize) -> Option<&str> {
    self.labels.get(id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_trims_lines_and_keeps_order() {
    let labels = LabelSet::parse("bolt \r\n nut\nwasher\n").unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.get(0), Some("bolt"));
    assert_eq!(labels.get(1), Some("nut"));
    assert_eq!(labels.get(2), Some("washer"));
    assert_eq!(labels.get(3), None);
  }

  #[test]
  fn empty_file_is_rejected() {
    assert!(matches!(LabelSet::parse(""), Err(LabelError::Empty)));
  }

  #[test]
  fn missing_file_reports_path() {
    let err = LabelSet::from_file(Path::new("/nonexistent/labels.txt")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/labels.txt"));
  }
}
