// 该文件是 Jingtou （镜头） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::time::{Duration, Instant};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::YuvFrame,
  input::{FrameSource, InputError, query_rotation},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("查询参数 {0} 无效: {1}")]
  InvalidQuery(String, String),
}

/// 反复产出同一张静态图像，模拟摄像头
///
/// URL 形如 `image:///path/to/still.png?count=30&fps=15&rotation=90`；
/// 不给 `count` 时无限产出。
pub struct ImageFileSource {
  frame: YuvFrame,
  remaining: Option<usize>,
  interval: Option<Duration>,
  frame_index: u64,
  start_time: Instant,
  last_frame: Option<Instant>,
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

fn query_number<T: std::str::FromStr>(
  url: &Url,
  key: &str,
) -> Result<Option<T>, ImageFileInputError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    None => Ok(None),
    Some((_, v)) => v
      .parse()
      .map(Some)
      .map_err(|_| ImageFileInputError::InvalidQuery(key.to_string(), v.to_string())),
  }
}

impl FromUrl for ImageFileSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()).into());
    }

    let rotation = query_rotation(url)?;
    let remaining = query_number::<usize>(url, "count")?;
    let interval = query_number::<f64>(url, "fps")?
      .filter(|fps| *fps > 0.0)
      .map(|fps| Duration::from_secs_f64(1.0 / fps));

    let path = url.path();
    let image = ImageReader::open(path)
      .map_err(ImageFileInputError::from)?
      .decode()
      .map_err(ImageFileInputError::from)?
      .to_rgb8();
    info!(
      "读取图像文件: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    let frame = YuvFrame::from_rgb_image(&image)?.with_rotation(rotation)?;

    Ok(ImageFileSource {
      frame,
      remaining,
      interval,
      frame_index: 0,
      start_time: Instant::now(),
      last_frame: None,
    })
  }
}

impl ImageFileSource {
  /// 以内存中的帧构造，便于测试和演示
  pub fn from_frame(frame: YuvFrame, count: Option<usize>) -> Self {
    ImageFileSource {
      frame,
      remaining: count,
      interval: None,
      frame_index: 0,
      start_time: Instant::now(),
      last_frame: None,
    }
  }

  fn pace(&mut self) {
    if let Some(interval) = self.interval
      && let Some(last) = self.last_frame
    {
      let elapsed = last.elapsed();
      if elapsed < interval {
        std::thread::sleep(interval - elapsed);
      }
    }
    self.last_frame = Some(Instant::now());
  }
}

impl FrameSource for ImageFileSource {
  fn next_frame(&mut self) -> Option<Result<YuvFrame, InputError>> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        debug!("图像文件输入已耗尽");
        return None;
      }
      *remaining -= 1;
    }

    self.pace();
    let timestamp_ms = self.start_time.elapsed().as_millis() as u64;
    let frame = self.frame.clone().with_index(self.frame_index, timestamp_ms);
    self.frame_index += 1;
    Some(Ok(frame))
  }
}
