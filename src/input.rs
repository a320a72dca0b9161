// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/input.rs - 图像来源
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法读取目录 {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// 待处理帧的来源，每次轮询返回当前可见的全部候选文件
pub trait FrameSource {
  fn poll(&mut self) -> Result<Vec<PathBuf>, InputError>;
}

/// 扩展名是否为支持的图像格式（不区分大小写）
pub fn is_supported_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    .unwrap_or(false)
}

/// 轮询目录中的图像文件
#[derive(Debug, Clone)]
pub struct DirectoryInput {
  directory: PathBuf,
}

impl DirectoryInput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  /// 按文件名排序返回目录中支持的图像文件
  pub fn scan(&self) -> Result<Vec<PathBuf>, InputError> {
    let io_error = |source| InputError::IoError {
      path: self.directory.display().to_string(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&self.directory).map_err(io_error)? {
      let entry = entry.map_err(io_error)?;
      let path = entry.path();
      if !entry.file_type().map_err(io_error)?.is_file() {
        continue;
      }
      if is_supported_image(&path) {
        files.push(path);
      } else {
        debug!("跳过不支持的文件: {}", path.display());
      }
    }
    files.sort();
    Ok(files)
  }
}

impl FrameSource for DirectoryInput {
  fn poll(&mut self) -> Result<Vec<PathBuf>, InputError> {
    self.scan()
  }
}

/// 单个文件来源，最多产出一次
#[derive(Debug, Clone)]
pub struct SingleFileInput {
  path: Option<PathBuf>,
}

impl SingleFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
    }
  }
}

impl FrameSource for SingleFileInput {
  fn poll(&mut self) -> Result<Vec<PathBuf>, InputError> {
    Ok(self.path.take().into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extension_check_is_case_insensitive() {
    for name in ["a.png", "b.JPG", "c.Jpeg", "d.bmp", "e.TIFF", "f.tif", "dir/g.jpg"] {
      assert!(is_supported_image(Path::new(name)), "{name}");
    }
    for name in ["a.gif", "b", "c.png.txt", ".jpg", "archive.tar"] {
      assert!(!is_supported_image(Path::new(name)), "{name}");
    }
  }

  #[test]
  fn scan_lists_sorted_images_only() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.JPG", "notes.txt", "c.tif"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let files = DirectoryInput::new(dir.path()).scan().unwrap();
    let names: Vec<_> = files
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["a.JPG", "b.png", "c.tif"]);
  }

  #[test]
  fn missing_directory_is_an_error() {
    let result = DirectoryInput::new("/nonexistent/sink").scan();
    assert!(matches!(result, Err(InputError::IoError { .. })));
  }

  #[test]
  fn single_file_yields_once() {
    let mut input = SingleFileInput::new("/tmp/a.png");
    assert_eq!(input.poll().unwrap().len(), 1);
    assert!(input.poll().unwrap().is_empty());
  }
}
