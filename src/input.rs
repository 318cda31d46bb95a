// 该文件是 Jingtou （镜头） 项目的一部分。
// src/input.rs - 摄像头/图像帧输入
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::{FrameError, YuvFrame},
};

/// 逐帧产出 YUV 图像；返回 `None` 表示输入结束
pub trait FrameSource {
  fn next_frame(&mut self) -> Option<Result<YuvFrame, InputError>>;
}

/// 摄像头访问权限
pub trait CameraPermission {
  fn check(&self) -> bool;
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInputError, ImageFileSource};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lFrameSource, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("帧数据无效: {0}")]
  FrameError(#[from] FrameError),
  #[error("查询参数 {0} 无效: {1}")]
  InvalidQuery(String, String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 读取 URL 中的 `rotation` 参数，缺省为 0
pub(crate) fn query_rotation(url: &Url) -> Result<u32, InputError> {
  match url.query_pairs().find(|(k, _)| k == "rotation") {
    None => Ok(0),
    Some((_, v)) => {
      let degrees: u32 = v
        .parse()
        .map_err(|_| InputError::InvalidQuery("rotation".to_string(), v.to_string()))?;
      if !matches!(degrees, 0 | 90 | 180 | 270) {
        return Err(FrameError::UnsupportedRotation(degrees).into());
      }
      Ok(degrees)
    }
  }
}

pub enum InputWrapper {
  #[cfg(feature = "v4l_input")]
  V4lInput(V4lFrameSource),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileSource),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lFrameSource::SCHEME {
        let input = V4lFrameSource::from_url(url)?;
        return Ok(InputWrapper::V4lInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileSource::SCHEME {
        let input = ImageFileSource::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn next_frame(&mut self) -> Option<Result<YuvFrame, InputError>> {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.next_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next_frame(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}

/// 按输入 URL 检查设备权限
///
/// `v4l` 设备节点需要可读写打开；其余来源不需要授权。
#[derive(Debug, Clone)]
pub struct DevicePermission {
  device: Option<PathBuf>,
}

impl DevicePermission {
  pub fn granted() -> Self {
    Self { device: None }
  }

  pub fn device(path: impl Into<PathBuf>) -> Self {
    Self {
      device: Some(path.into()),
    }
  }
}

impl FromUrl for DevicePermission {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "v4l" => {
        let path = url.path();
        Ok(Self::device(if path.is_empty() || path == "/" {
          "/dev/video0"
        } else {
          path
        }))
      }
      _ => Ok(Self::granted()),
    }
  }
}

impl CameraPermission for DevicePermission {
  fn check(&self) -> bool {
    let Some(device) = &self.device else {
      return true;
    };
    match std::fs::OpenOptions::new()
      .read(true)
      .write(true)
      .open(device)
    {
      Ok(_) => {
        info!("已获得设备权限: {}", device.display());
        true
      }
      Err(e) => {
        warn!("无法访问设备 {}: {}", device.display(), e);
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rotation_defaults_to_zero() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert_eq!(query_rotation(&url).unwrap(), 0);
  }

  #[test]
  fn rotation_is_read_from_query() {
    let url = Url::parse("image:///tmp/a.png?rotation=270").unwrap();
    assert_eq!(query_rotation(&url).unwrap(), 270);
  }

  #[test]
  fn odd_rotation_is_rejected() {
    let url = Url::parse("image:///tmp/a.png?rotation=45").unwrap();
    assert!(matches!(
      query_rotation(&url),
      Err(InputError::FrameError(FrameError::UnsupportedRotation(45)))
    ));

    let url = Url::parse("image:///tmp/a.png?rotation=left").unwrap();
    assert!(matches!(
      query_rotation(&url),
      Err(InputError::InvalidQuery(..))
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn image_sources_need_no_permission() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(DevicePermission::from_url(&url).unwrap().check());
  }

  #[test]
  fn missing_device_is_denied() {
    let url = Url::parse("v4l:///dev/jingtou-missing-video").unwrap();
    assert!(!DevicePermission::from_url(&url).unwrap().check());
  }

  #[test]
  fn writable_file_is_granted() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert!(DevicePermission::device(file.path()).check());
  }
}
