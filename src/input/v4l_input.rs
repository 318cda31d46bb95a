// 该文件是 Jingtou （镜头） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::time::Instant;

use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::YuvFrame,
  input::{FrameSource, InputError, query_rotation},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法打开设备 {0}: {1}")]
  OpenError(String, std::io::Error),
  #[error("V4L 错误: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
}

/// V4L2 摄像头，以 YUYV 格式采集
///
/// URL 形如 `v4l:///dev/video0?rotation=90`。
pub struct V4lFrameSource {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  /// 每行字节数
  stride: usize,
  rotation: u32,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lFrameSource {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lFrameSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch(url.scheme().to_string()).into());
    }

    let rotation = query_rotation(url)?;
    let device_path = match url.path() {
      "" | "/" => DEFAULT_DEVICE,
      path => path,
    };

    Ok(Self::open(device_path, rotation)?)
  }
}

impl V4lFrameSource {
  pub fn open(device_path: &str, rotation: u32) -> Result<Self, V4lInputError> {
    let device = Device::with_path(device_path)
      .map_err(|e| V4lInputError::OpenError(device_path.to_string(), e))?;

    let mut format = device.format()?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }
    info!(
      "打开摄像头 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)?;

    Ok(V4lFrameSource {
      stream,
      width: format.width,
      height: format.height,
      stride: (format.stride as usize).max(format.width as usize * 2),
      rotation,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }

  fn capture(&mut self) -> Result<YuvFrame, InputError> {
    let (buffer, _meta) = self.stream.next().map_err(V4lInputError::from)?;
    let timestamp_ms = self.start_time.elapsed().as_millis() as u64;
    let frame = YuvFrame::from_yuyv(self.width, self.height, self.stride, buffer)?
      .with_rotation(self.rotation)?
      .with_index(self.frame_index, timestamp_ms);
    Ok(frame)
  }
}

impl FrameSource for V4lFrameSource {
  fn next_frame(&mut self) -> Option<Result<YuvFrame, InputError>> {
    let frame = self.capture();
    self.frame_index += 1;
    Some(frame)
  }
}
