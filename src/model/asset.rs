// 该文件是 Jingtou （镜头） 项目的一部分。
// src/model/asset.rs - 模型资源解析
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
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AssetError {
  #[error("资源不存在: {0}")]
  NotFound(String),
  #[error("资源名无效: {0}")]
  InvalidName(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 将逻辑资源名解析为本地文件系统上的绝对路径
pub trait AssetResolver {
  fn resolve(&self, name: &str) -> Result<PathBuf, AssetError>;
}

/// 打包资源目录与本地文件目录
///
/// 首次解析时把资源复制到本地文件目录；目标已存在且非空时直接复用。
#[derive(Debug, Clone)]
pub struct AssetDirectory {
  assets: PathBuf,
  files: PathBuf,
}

impl AssetDirectory {
  pub fn new(assets: impl Into<PathBuf>, files: impl Into<PathBuf>) -> Self {
    Self {
      assets: assets.into(),
      files: files.into(),
    }
  }

  fn check_name(name: &str) -> Result<&Path, AssetError> {
    let path = Path::new(name);
    let plain = !name.is_empty()
      && path
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if plain {
      Ok(path)
    } else {
      Err(AssetError::InvalidName(name.to_string()))
    }
  }
}

impl AssetResolver for AssetDirectory {
  fn resolve(&self, name: &str) -> Result<PathBuf, AssetError> {
    let relative = Self::check_name(name)?;
    let target = self.files.join(relative);

    if let Ok(meta) = std::fs::metadata(&target)
      && meta.is_file()
      && meta.len() > 0
    {
      debug!("资源已存在: {}", target.display());
      return Ok(std::path::absolute(&target)?);
    }

    let source = self.assets.join(relative);
    if !source.is_file() {
      return Err(AssetError::NotFound(source.display().to_string()));
    }

    if let Some(parent) = target.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let copied = std::fs::copy(&source, &target)?;
    info!(
      "资源 {} 已解压到 {} ({} 字节)",
      name,
      target.display(),
      copied
    );

    Ok(std::path::absolute(&target)?)
  }
}
