// 该文件是 Jingtou （镜头） 项目的一部分。
// src/preprocess.rs - YUV 帧到归一化张量的转换
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

use thiserror::Error;
use tracing::debug;

use crate::frame::{FloatTensor, FrameError, Tensor, YuvFrame};

pub const TORCHVISION_NORM_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
pub const TORCHVISION_NORM_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];
pub const HALF_NORM_MEAN_RGB: [f32; 3] = [0.5, 0.5, 0.5];
pub const HALF_NORM_STD_RGB: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
  #[error("帧数据无效: {0}")]
  InvalidFrame(#[from] FrameError),
  #[error("输出缓冲区过小: 需要 {required} 个元素, 实际 {actual} 个")]
  BufferTooSmall { required: usize, actual: usize },
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTarget(usize, usize),
  #[error("张量形状无效: {0:?}")]
  InvalidShape(Vec<usize>),
  #[error("填充尺寸不匹配: 源 {src_w}x{src_h} 加边距 {pad} 超出目标 {dst_w}x{dst_h}")]
  LetterboxOverflow {
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
    pad: usize,
  },
}

/// 每通道的均值与标准差
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

impl Normalization {
  pub const TORCHVISION: Self = Self {
    mean: TORCHVISION_NORM_MEAN_RGB,
    std: TORCHVISION_NORM_STD_RGB,
  };

  pub const HALF: Self = Self {
    mean: HALF_NORM_MEAN_RGB,
    std: HALF_NORM_STD_RGB,
  };
}

impl Default for Normalization {
  fn default() -> Self {
    Self::TORCHVISION
  }
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  [
    (y + 1.402 * v).clamp(0.0, 255.0) as u8,
    (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
    (y + 1.772 * u).clamp(0.0, 255.0) as u8,
  ]
}

/// 旋转后坐标 (rx, ry) 映射回源图像坐标，旋转为顺时针角度
#[inline]
fn unrotate(rx: usize, ry: usize, width: usize, height: usize, rotation: u32) -> (usize, usize) {
  match rotation {
    90 => (ry, height - 1 - rx),
    180 => (width - 1 - rx, height - 1 - ry),
    270 => (width - 1 - ry, rx),
    _ => (rx, ry),
  }
}

/// 将 YUV420 帧旋转、中心裁剪并缩放到 `width`x`height`，
/// 归一化后按 R、G、B 平面写入 `out[offset..]`
///
/// 裁剪在旋转后的图像上进行，取与目标宽高比一致的最大中心区域，
/// 采样方式为最近邻。成功时整个目标区域都会被写入。
pub fn yuv420_center_crop_to_float_buffer(
  frame: &YuvFrame,
  rotation: u32,
  width: usize,
  height: usize,
  norm: &Normalization,
  out: &mut [f32],
  offset: usize,
) -> Result<(), PreprocessError> {
  if width == 0 || height == 0 {
    return Err(PreprocessError::InvalidTarget(width, height));
  }
  frame.validate()?;
  if !matches!(rotation, 0 | 90 | 180 | 270) {
    return Err(FrameError::UnsupportedRotation(rotation).into());
  }

  let plane = width * height;
  let required = offset + 3 * plane;
  if out.len() < required {
    return Err(PreprocessError::BufferTooSmall {
      required,
      actual: out.len(),
    });
  }

  let (src_w, src_h) = (frame.width() as usize, frame.height() as usize);
  let (rot_w, rot_h) = if rotation == 90 || rotation == 270 {
    (src_h, src_w)
  } else {
    (src_w, src_h)
  };

  let (crop_w, crop_h) = if width * rot_h <= height * rot_w {
    ((width * rot_h / height).max(1), rot_h)
  } else {
    (rot_w, (height * rot_w / width).max(1))
  };
  let crop_x = (rot_w - crop_w) / 2;
  let crop_y = (rot_h - crop_h) / 2;

  debug!(
    "预处理: 源 {}x{}, 旋转 {}, 裁剪 {}x{}@({}, {}), 目标 {}x{}",
    src_w, src_h, rotation, crop_w, crop_h, crop_x, crop_y, width, height
  );

  let out = &mut out[offset..required];
  for ty in 0..height {
    let ry = crop_y + ty * crop_h / height;
    for tx in 0..width {
      let rx = crop_x + tx * crop_w / width;
      let (sx, sy) = unrotate(rx, ry, src_w, src_h, rotation);
      let (y, u, v) = frame.yuv_at(sx, sy);
      let rgb = yuv_to_rgb(y, u, v);

      let index = ty * width + tx;
      for c in 0..3 {
        out[c * plane + index] = (rgb[c] as f32 / 255.0 - norm.mean[c]) / norm.std[c];
      }
    }
  }

  Ok(())
}

/// 使用帧自身的旋转提示填充固定形状的输入张量
pub fn fill_input_tensor<const W: u32, const H: u32>(
  frame: &YuvFrame,
  norm: &Normalization,
  tensor: &mut FloatTensor<W, H>,
) -> Result<(), PreprocessError> {
  yuv420_center_crop_to_float_buffer(
    frame,
    frame.rotation(),
    W as usize,
    H as usize,
    norm,
    tensor.as_mut(),
    0,
  )
}

/// 将一个 `src_w`x`src_h` 平面复制到更大的 `dst_w`x`dst_h` 平面的 (pad, pad) 处
///
/// 目标平面中未覆盖的部分保持原值。
pub fn letterbox_plane(
  src: &[f32],
  src_w: usize,
  src_h: usize,
  dst: &mut [f32],
  dst_w: usize,
  dst_h: usize,
  pad: usize,
) -> Result<(), PreprocessError> {
  if src_w + 2 * pad > dst_w || src_h + 2 * pad > dst_h {
    return Err(PreprocessError::LetterboxOverflow {
      src_w,
      src_h,
      dst_w,
      dst_h,
      pad,
    });
  }
  if src.len() < src_w * src_h {
    return Err(PreprocessError::BufferTooSmall {
      required: src_w * src_h,
      actual: src.len(),
    });
  }
  if dst.len() < dst_w * dst_h {
    return Err(PreprocessError::BufferTooSmall {
      required: dst_w * dst_h,
      actual: dst.len(),
    });
  }

  for j in 0..src_h {
    for i in 0..src_w {
      dst[(j + pad) * dst_w + i + pad] = src[j * src_w + i];
    }
  }
  Ok(())
}

/// 对输入张量的每个通道做 letterbox，写入形状为 1×3×(H+2p)×(W+2p) 的张量
pub fn letterbox_tensor<const W: u32, const H: u32>(
  src: &FloatTensor<W, H>,
  dst: &mut Tensor,
  pad: usize,
) -> Result<(), PreprocessError> {
  let (src_w, src_h) = (W as usize, H as usize);
  let (dst_w, dst_h) = match dst.shape() {
    [1, 3, h, w] => (*w, *h),
    _ => return Err(PreprocessError::InvalidShape(dst.shape().to_vec())),
  };

  let src_plane = src_w * src_h;
  let dst_plane = dst_w * dst_h;
  for c in 0..3 {
    letterbox_plane(
      &src.as_slice()[c * src_plane..(c + 1) * src_plane],
      src_w,
      src_h,
      &mut dst.data_mut()[c * dst_plane..(c + 1) * dst_plane],
      dst_w,
      dst_h,
      pad,
    )?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn quadrant_frame() -> YuvFrame {
    // 4x2 图像：左半边黑，右半边白
    let image = RgbImage::from_fn(4, 2, |x, _| {
      if x < 2 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
    });
    YuvFrame::from_rgb_image(&image).unwrap()
  }

  const IDENTITY: Normalization = Normalization {
    mean: [0.0; 3],
    std: [1.0; 3],
  };

  #[test]
  fn center_crop_keeps_middle_columns() {
    let frame = quadrant_frame();
    let mut out = vec![f32::NAN; 3 * 2 * 2];

    yuv420_center_crop_to_float_buffer(&frame, 0, 2, 2, &IDENTITY, &mut out, 0).unwrap();

    // 裁剪区域为第 1..3 列：左黑右白
    for c in 0..3 {
      assert!(out[c * 4] < 0.05);
      assert!(out[c * 4 + 1] > 0.95);
      assert!(out[c * 4 + 2] < 0.05);
      assert!(out[c * 4 + 3] > 0.95);
    }
  }

  #[test]
  fn rotation_180_mirrors_both_axes() {
    let frame = quadrant_frame();
    let mut out = vec![0.0; 3 * 2 * 2];

    yuv420_center_crop_to_float_buffer(&frame, 180, 2, 2, &IDENTITY, &mut out, 0).unwrap();

    assert!(out[0] > 0.95);
    assert!(out[1] < 0.05);
  }

  #[test]
  fn rotation_90_swaps_axes() {
    let frame = quadrant_frame();
    let mut out = vec![0.0; 3 * 4 * 2];

    // 旋转后为 2x4：上半黑，下半白
    yuv420_center_crop_to_float_buffer(&frame, 90, 2, 4, &IDENTITY, &mut out, 0).unwrap();

    assert!(out[0] < 0.05);
    assert!(out[1] < 0.05);
    assert!(out[6] > 0.95);
    assert!(out[7] > 0.95);
  }

  #[test]
  fn normalization_is_applied_per_channel() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
    let frame = YuvFrame::from_rgb_image(&image).unwrap();
    let mut out = vec![0.0; 3 * 4];

    yuv420_center_crop_to_float_buffer(&frame, 0, 2, 2, &Normalization::HALF, &mut out, 0)
      .unwrap();

    for value in out {
      assert!((value - 1.0).abs() < 1e-2, "value = {value}");
    }
  }

  #[test]
  fn offset_is_respected() {
    let frame = quadrant_frame();
    let mut out = vec![-7.0; 2 + 3 * 4];

    yuv420_center_crop_to_float_buffer(&frame, 0, 2, 2, &IDENTITY, &mut out, 2).unwrap();

    assert_eq!(out[0], -7.0);
    assert_eq!(out[1], -7.0);
    assert!(out[3] > 0.95);
  }

  #[test]
  fn small_buffer_is_an_error() {
    let frame = quadrant_frame();
    let mut out = vec![0.0; 5];

    let err =
      yuv420_center_crop_to_float_buffer(&frame, 0, 2, 2, &IDENTITY, &mut out, 0).unwrap_err();
    assert_eq!(
      err,
      PreprocessError::BufferTooSmall {
        required: 12,
        actual: 5
      }
    );
  }

  #[test]
  fn letterbox_places_source_at_pad_offset() {
    let src = [1.0, 2.0, 3.0, 4.0];
    let mut dst = vec![0.0; 16];

    letterbox_plane(&src, 2, 2, &mut dst, 4, 4, 1).unwrap();

    #[rustfmt::skip]
    let expected = [
      0.0, 0.0, 0.0, 0.0,
      0.0, 1.0, 2.0, 0.0,
      0.0, 3.0, 4.0, 0.0,
      0.0, 0.0, 0.0, 0.0,
    ];
    assert_eq!(dst, expected);
  }

  #[test]
  fn letterbox_rejects_overflow() {
    let mut dst = vec![0.0; 9];
    assert!(matches!(
      letterbox_plane(&[0.0; 4], 2, 2, &mut dst, 3, 3, 1),
      Err(PreprocessError::LetterboxOverflow { .. })
    ));
  }

  #[test]
  fn letterbox_tensor_pads_all_channels() {
    let mut src = FloatTensor::<2, 2>::default();
    src.as_mut().fill(1.0);
    let mut dst = Tensor::zeros(vec![1, 3, 4, 4]);

    letterbox_tensor(&src, &mut dst, 1).unwrap();

    let total: f32 = dst.data().iter().sum();
    assert_eq!(total, 12.0);
    assert_eq!(dst.data()[16 + 5], 1.0);
    assert_eq!(dst.data()[32], 0.0);
  }
}
