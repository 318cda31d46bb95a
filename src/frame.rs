// 该文件是 Jingtou （镜头） 项目的一部分。
// src/frame.rs - YUV 帧与张量定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidSize(u32, u32),
  #[error("{plane} 平面数据不足: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  PlaneTooShort {
    plane: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("行步长 {stride} 小于一行数据 {row} 字节")]
  InvalidStride { stride: usize, row: usize },
  #[error("不支持的旋转角度: {0}")]
  UnsupportedRotation(u32),
}

/// 单个颜色平面，带行步长与像素步长
#[derive(Debug, Clone)]
pub struct YuvPlane {
  data: Box<[u8]>,
  row_stride: usize,
  pixel_stride: usize,
}

impl YuvPlane {
  pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data: data.into_boxed_slice(),
      row_stride,
      pixel_stride,
    }
  }

  fn packed(data: Vec<u8>, width: usize) -> Self {
    Self::new(data, width, 1)
  }

  pub fn row_stride(&self) -> usize {
    self.row_stride
  }

  pub fn pixel_stride(&self) -> usize {
    self.pixel_stride
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  fn required_len(&self, cols: usize, rows: usize) -> usize {
    if cols == 0 || rows == 0 {
      return 0;
    }
    (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
  }

  #[inline]
  pub(crate) fn sample(&self, col: usize, row: usize) -> u8 {
    self.data[row * self.row_stride + col * self.pixel_stride]
  }
}

/// 一帧 YUV 4:2:0 图像，附带旋转提示
#[derive(Debug, Clone)]
pub struct YuvFrame {
  width: u32,
  height: u32,
  y: YuvPlane,
  u: YuvPlane,
  v: YuvPlane,
  rotation: u32,
  pub index: u64,
  pub timestamp_ms: u64,
}

fn chroma_size(width: u32, height: u32) -> (usize, usize) {
  (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

impl YuvFrame {
  pub fn from_planes(
    width: u32,
    height: u32,
    y: YuvPlane,
    u: YuvPlane,
    v: YuvPlane,
  ) -> Result<Self, FrameError> {
    let frame = Self {
      width,
      height,
      y,
      u,
      v,
      rotation: 0,
      index: 0,
      timestamp_ms: 0,
    };
    frame.validate()?;
    Ok(frame)
  }

  /// 从连续存放的 I420 数据构造
  pub fn from_i420(width: u32, height: u32, data: &[u8]) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidSize(width, height));
    }
    let luma = width as usize * height as usize;
    let (cw, ch) = chroma_size(width, height);
    let chroma = cw * ch;
    let expected = luma + 2 * chroma;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    let y = YuvPlane::packed(data[..luma].to_vec(), width as usize);
    let u = YuvPlane::packed(data[luma..luma + chroma].to_vec(), cw);
    let v = YuvPlane::packed(data[luma + chroma..].to_vec(), cw);
    Self::from_planes(width, height, y, u, v)
  }

  /// 将 YUYV (YUV 4:2:2 打包) 格式转换为 4:2:0 平面格式
  ///
  /// 纵向相邻两行的色度取平均值。
  ///
  /// `stride` 为每行字节数，驱动可能在行尾填充。
  pub fn from_yuyv(
    width: u32,
    height: u32,
    stride: usize,
    yuyv: &[u8],
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 || width % 2 != 0 {
      return Err(FrameError::InvalidSize(width, height));
    }
    let (w, h) = (width as usize, height as usize);
    if stride < w * 2 {
      return Err(FrameError::InvalidStride { stride, row: w * 2 });
    }
    let expected = (h - 1) * stride + w * 2;
    if yuyv.len() < expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: yuyv.len(),
      });
    }

    let (cw, ch) = chroma_size(width, height);
    let mut y = Vec::with_capacity(w * h);
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];

    for row in 0..h {
      let start = row * stride;
      for chunk in yuyv[start..start + w * 2].chunks_exact(4) {
        y.push(chunk[0]);
        y.push(chunk[2]);
      }
    }

    for cy in 0..ch {
      let top = 2 * cy;
      let bottom = (top + 1).min(h - 1);
      for cx in 0..cw {
        let at = |row: usize, offset: usize| yuyv[row * stride + cx * 4 + offset] as u16;
        u[cy * cw + cx] = ((at(top, 1) + at(bottom, 1) + 1) / 2) as u8;
        v[cy * cw + cx] = ((at(top, 3) + at(bottom, 3) + 1) / 2) as u8;
      }
    }

    Self::from_planes(
      width,
      height,
      YuvPlane::packed(y, w),
      YuvPlane::packed(u, cw),
      YuvPlane::packed(v, cw),
    )
  }

  /// 使用 BT.601 全范围系数将 RGB 图像转换为 4:2:0
  pub fn from_rgb_image(image: &RgbImage) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidSize(width, height));
    }
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_size(width, height);

    let mut y = Vec::with_capacity(w * h);
    for pixel in image.pixels() {
      let [r, g, b] = pixel.0.map(f32::from);
      y.push((0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8);
    }

    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];
    for cy in 0..ch {
      for cx in 0..cw {
        let (mut su, mut sv, mut n) = (0.0f32, 0.0f32, 0.0f32);
        for py in (2 * cy)..(2 * cy + 2).min(h) {
          for px in (2 * cx)..(2 * cx + 2).min(w) {
            let [r, g, b] = image.get_pixel(px as u32, py as u32).0.map(f32::from);
            su += -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
            sv += 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
            n += 1.0;
          }
        }
        u[cy * cw + cx] = (su / n).round().clamp(0.0, 255.0) as u8;
        v[cy * cw + cx] = (sv / n).round().clamp(0.0, 255.0) as u8;
      }
    }

    Self::from_planes(
      width,
      height,
      YuvPlane::packed(y, w),
      YuvPlane::packed(u, cw),
      YuvPlane::packed(v, cw),
    )
  }

  pub fn with_rotation(mut self, degrees: u32) -> Result<Self, FrameError> {
    match degrees {
      0 | 90 | 180 | 270 => {
        self.rotation = degrees;
        Ok(self)
      }
      other => Err(FrameError::UnsupportedRotation(other)),
    }
  }

  pub fn with_index(mut self, index: u64, timestamp_ms: u64) -> Self {
    self.index = index;
    self.timestamp_ms = timestamp_ms;
    self
  }

  /// 检查三个平面的数据是否覆盖声明的几何尺寸
  pub fn validate(&self) -> Result<(), FrameError> {
    if self.width == 0 || self.height == 0 {
      return Err(FrameError::InvalidSize(self.width, self.height));
    }
    let (cw, ch) = chroma_size(self.width, self.height);
    let planes = [
      ("Y", &self.y, self.width as usize, self.height as usize),
      ("U", &self.u, cw, ch),
      ("V", &self.v, cw, ch),
    ];
    for (plane, data, cols, rows) in planes {
      let expected = data.required_len(cols, rows);
      if data.as_bytes().len() < expected {
        return Err(FrameError::PlaneTooShort {
          plane,
          expected,
          actual: data.as_bytes().len(),
        });
      }
    }
    Ok(())
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn rotation(&self) -> u32 {
    self.rotation
  }

  /// 读取源坐标处的 (Y, U, V)
  #[inline]
  pub(crate) fn yuv_at(&self, x: usize, y: usize) -> (u8, u8, u8) {
    (
      self.y.sample(x, y),
      self.u.sample(x / 2, y / 2),
      self.v.sample(x / 2, y / 2),
    )
  }
}

/// 借用形式的张量视图，推理引擎的输入
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
  pub shape: &'a [usize],
  pub data: &'a [f32],
}

/// 推理引擎输出的张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn zeros(shape: Vec<usize>) -> Self {
    let size = shape.iter().product();
    Self {
      shape,
      data: vec![0.0; size],
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }

  pub fn view(&self) -> TensorRef<'_> {
    TensorRef {
      shape: &self.shape,
      data: &self.data,
    }
  }
}

/// 形状固定为 1×3×H×W 的 RGB 浮点输入张量，平面存放
#[derive(Debug, Clone)]
pub struct FloatTensor<const W: u32, const H: u32> {
  shape: [usize; 4],
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for FloatTensor<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      shape: [1, RGB_CHANNELS, H as usize, W as usize],
      data: vec![0.0f32; size].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> FloatTensor<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn view(&self) -> TensorRef<'_> {
    TensorRef {
      shape: &self.shape,
      data: &self.data,
    }
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for FloatTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn yuyv_splits_luma_and_averages_chroma() {
    // 2x2: 两行，每行一个 YUYV 宏像素
    let yuyv = [10, 100, 20, 200, 30, 110, 40, 210];
    let frame = YuvFrame::from_yuyv(2, 2, 4, &yuyv).unwrap();

    assert_eq!(frame.yuv_at(0, 0), (10, 105, 205));
    assert_eq!(frame.yuv_at(1, 0), (20, 105, 205));
    assert_eq!(frame.yuv_at(0, 1), (30, 105, 205));
    assert_eq!(frame.yuv_at(1, 1), (40, 105, 205));
  }

  #[test]
  fn yuyv_skips_row_padding() {
    // 每行 4 字节数据后有 2 字节填充
    let yuyv = [10, 100, 20, 200, 0xEE, 0xEE, 30, 110, 40, 210];
    let frame = YuvFrame::from_yuyv(2, 2, 6, &yuyv).unwrap();

    assert_eq!(frame.yuv_at(0, 0), (10, 105, 205));
    assert_eq!(frame.yuv_at(1, 0), (20, 105, 205));
    assert_eq!(frame.yuv_at(0, 1), (30, 105, 205));
    assert_eq!(frame.yuv_at(1, 1), (40, 105, 205));
  }

  #[test]
  fn yuyv_rejects_stride_shorter_than_row() {
    let err = YuvFrame::from_yuyv(4, 1, 6, &[0u8; 8]).unwrap_err();
    assert_eq!(err, FrameError::InvalidStride { stride: 6, row: 8 });
  }

  #[test]
  fn yuyv_rejects_short_buffer() {
    let err = YuvFrame::from_yuyv(4, 2, 8, &[0u8; 8]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 16,
        actual: 8
      }
    );
  }

  #[test]
  fn gray_rgb_maps_to_neutral_chroma() {
    let image = RgbImage::from_pixel(3, 3, Rgb([128, 128, 128]));
    let frame = YuvFrame::from_rgb_image(&image).unwrap();

    for y in 0..3 {
      for x in 0..3 {
        assert_eq!(frame.yuv_at(x, y), (128, 128, 128));
      }
    }
  }

  #[test]
  fn validate_catches_truncated_plane() {
    let y = YuvPlane::new(vec![0; 16], 4, 1);
    let u = YuvPlane::new(vec![0; 4], 2, 1);
    let v = YuvPlane::new(vec![0; 3], 2, 1);

    let err = YuvFrame::from_planes(4, 4, y, u, v).unwrap_err();
    assert!(matches!(err, FrameError::PlaneTooShort { plane: "V", .. }));
  }

  #[test]
  fn interleaved_chroma_planes_are_accepted() {
    // NV12 风格：U/V 交错，像素步长为 2
    let y = YuvPlane::new(vec![50; 4], 2, 1);
    let u = YuvPlane::new(vec![60, 70], 2, 2);
    let v = YuvPlane::new(vec![70], 2, 2);

    let frame = YuvFrame::from_planes(2, 2, y, u, v).unwrap();
    assert_eq!(frame.yuv_at(1, 1), (50, 60, 70));
  }

  #[test]
  fn rotation_must_be_right_angle() {
    let frame = YuvFrame::from_i420(2, 2, &[0u8; 6]).unwrap();
    assert!(frame.clone().with_rotation(270).is_ok());
    assert_eq!(
      frame.with_rotation(45).unwrap_err(),
      FrameError::UnsupportedRotation(45)
    );
  }

  #[test]
  fn float_tensor_has_fixed_nchw_shape() {
    let tensor = FloatTensor::<4, 2>::default();
    assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
    assert_eq!(tensor.as_slice().len(), 24);
  }

  #[test]
  fn tensor_checks_element_count() {
    assert!(Tensor::new(vec![1, 3], vec![0.0; 3]).is_ok());
    assert!(Tensor::new(vec![1, 3], vec![0.0; 4]).is_err());
  }
}
