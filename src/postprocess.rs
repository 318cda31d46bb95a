// 该文件是 Jingtou （镜头） 项目的一部分。
// src/postprocess.rs - 推理结果后处理
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

use std::path::Path;

use image::{Rgba, RgbaImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::Tensor;

pub const TOP_K: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum PostprocessError {
  #[error("输出张量大小不匹配: 期望至少 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLabel {
  pub label: String,
  pub score: f32,
}

impl ScoredLabel {
  pub fn new(label: impl Into<String>, score: f32) -> Self {
    Self {
      label: label.into(),
      score,
    }
  }
}

fn check_len(data: &[f32], width: u32, height: u32) -> Result<usize, PostprocessError> {
  let plane = width as usize * height as usize;
  if data.len() < 3 * plane {
    return Err(PostprocessError::ShapeMismatch {
      expected: 3 * plane,
      actual: data.len(),
    });
  }
  Ok(plane)
}

/// 将 3×H×W 输出反归一化为灰度位图
///
/// 每个通道按 `(v * 0.5 + 0.5) * 255` 截断取整，三通道整数平均得到亮度。
pub fn luminance_image(
  output: &Tensor,
  width: u32,
  height: u32,
) -> Result<RgbaImage, PostprocessError> {
  let data = output.data();
  let plane = check_len(data, width, height)?;

  let denormalize = |v: f32| (((v * 0.5 + 0.5) * 255.0) as i32).clamp(0, 255);
  Ok(RgbaImage::from_fn(width, height, |x, y| {
    let i = y as usize * width as usize + x as usize;
    let r = denormalize(data[i]);
    let g = denormalize(data[plane + i]);
    let b = denormalize(data[2 * plane + i]);
    let c = ((r + g + b) / 3) as u8;
    Rgba([c, c, c, 0xFF])
  }))
}

/// 将输入张量还原为彩色位图，每个通道按 `v * 128 + 128` 映射
pub fn preview_image(data: &[f32], width: u32, height: u32) -> Result<RgbaImage, PostprocessError> {
  let plane = check_len(data, width, height)?;

  let to_byte = |v: f32| (v * 128.0 + 128.0).clamp(0.0, 255.0) as u8;
  Ok(RgbaImage::from_fn(width, height, |x, y| {
    let i = y as usize * width as usize + x as usize;
    Rgba([
      to_byte(data[i]),
      to_byte(data[plane + i]),
      to_byte(data[2 * plane + i]),
      0xFF,
    ])
  }))
}

/// 从输出张量得到排好序的类别与分数
pub trait Ranking {
  fn rank(&self, output: &Tensor) -> Vec<ScoredLabel>;
}

/// 占位排序：无论输入如何都返回固定的 a、b、c
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRanking;

impl Ranking for PlaceholderRanking {
  fn rank(&self, _output: &Tensor) -> Vec<ScoredLabel> {
    ["a", "b", "c"]
      .into_iter()
      .map(|label| ScoredLabel::new(label, 1.0))
      .collect()
  }
}

/// 对输出做 softmax 并取概率最高的 K 个类别
#[derive(Debug, Clone)]
pub struct SoftmaxTopK {
  labels: Vec<String>,
  k: usize,
}

impl SoftmaxTopK {
  pub fn new(labels: Vec<String>, k: usize) -> Self {
    Self { labels, k }
  }

  /// 每行一个类别名，空行被忽略
  pub fn from_label_file(path: &Path, k: usize) -> std::io::Result<Self> {
    let text = std::fs::read_to_string(path)?;
    let labels: Vec<String> = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect();
    debug!("读取 {} 个类别名: {}", labels.len(), path.display());
    Ok(Self::new(labels, k))
  }

  fn label_of(&self, index: usize) -> String {
    self
      .labels
      .get(index)
      .cloned()
      .unwrap_or_else(|| format!("class {}", index))
  }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|v| v / sum).collect()
}

impl Ranking for SoftmaxTopK {
  fn rank(&self, output: &Tensor) -> Vec<ScoredLabel> {
    let logits = output.data();
    if !self.labels.is_empty() && logits.len() != self.labels.len() {
      warn!(
        "输出类别数 {} 与类别名数量 {} 不一致",
        logits.len(),
        self.labels.len()
      );
    }

    let probs = softmax(logits);
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    order
      .into_iter()
      .take(self.k)
      .map(|index| ScoredLabel::new(self.label_of(index), probs[index]))
      .collect()
  }
}

/// 命令行可选的排序方式
#[derive(Debug, Clone)]
pub enum RankingMode {
  Placeholder(PlaceholderRanking),
  Softmax(SoftmaxTopK),
}

impl Default for RankingMode {
  fn default() -> Self {
    RankingMode::Placeholder(PlaceholderRanking)
  }
}

impl Ranking for RankingMode {
  fn rank(&self, output: &Tensor) -> Vec<ScoredLabel> {
    match self {
      RankingMode::Placeholder(ranking) => ranking.rank(output),
      RankingMode::Softmax(ranking) => ranking.rank(output),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn planes(r: f32, g: f32, b: f32, plane: usize) -> Tensor {
    let mut data = vec![r; plane];
    data.extend(std::iter::repeat_n(g, plane));
    data.extend(std::iter::repeat_n(b, plane));
    Tensor::new(vec![1, 3, 1, plane], data).unwrap()
  }

  #[test]
  fn luminance_averages_denormalized_channels() {
    // r = 255, g = 127, b = 0 -> (255 + 127 + 0) / 3 = 127
    let output = planes(1.0, 0.0, -1.0, 4);
    let image = luminance_image(&output, 2, 2).unwrap();

    for pixel in image.pixels() {
      assert_eq!(pixel.0, [127, 127, 127, 255]);
    }
  }

  #[test]
  fn luminance_clamps_out_of_range_values() {
    let output = planes(3.0, 3.0, 3.0, 1);
    let image = luminance_image(&output, 1, 1).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255, 255]);

    let output = planes(-3.0, -3.0, -3.0, 1);
    let image = luminance_image(&output, 1, 1).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
  }

  #[test]
  fn luminance_uses_row_major_layout() {
    // 宽 3 高 1，单像素非零
    let mut data = vec![-1.0; 9];
    for c in 0..3 {
      data[c * 3 + 2] = 1.0;
    }
    let output = Tensor::new(vec![1, 3, 1, 3], data).unwrap();
    let image = luminance_image(&output, 3, 1).unwrap();

    assert_eq!(image.get_pixel(0, 0).0[0], 0);
    assert_eq!(image.get_pixel(2, 0).0[0], 255);
  }

  #[test]
  fn short_output_is_rejected() {
    let output = Tensor::new(vec![5], vec![0.0; 5]).unwrap();
    assert_eq!(
      luminance_image(&output, 2, 1).unwrap_err(),
      PostprocessError::ShapeMismatch {
        expected: 6,
        actual: 5
      }
    );
  }

  #[test]
  fn preview_maps_unit_range_to_bytes() {
    let data = [0.0, 0.5, -1.0];
    let image = preview_image(&data, 1, 1).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [128, 192, 0, 255]);
  }

  #[test]
  fn placeholder_ignores_input() {
    let output = Tensor::new(vec![2], vec![9.0, -9.0]).unwrap();
    let ranked = PlaceholderRanking.rank(&output);

    let labels: Vec<&str> = ranked.iter().map(|r| r.label.as_str()).collect();
    let scores: Vec<f32> = ranked.iter().map(|r| r.score).collect();
    assert_eq!(labels, ["a", "b", "c"]);
    assert_eq!(scores, [1.0, 1.0, 1.0]);
    assert_eq!(ranked.len(), TOP_K);
  }

  #[test]
  fn softmax_top_k_orders_by_probability() {
    let labels = ["cat", "dog", "fish", "bird"]
      .map(String::from)
      .to_vec();
    let ranking = SoftmaxTopK::new(labels, 3);
    let output = Tensor::new(vec![1, 4], vec![1.0, 3.0, 0.0, 2.0]).unwrap();

    let ranked = ranking.rank(&output);

    let labels: Vec<&str> = ranked.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["dog", "bird", "cat"]);
    assert!(ranked[0].score > ranked[1].score && ranked[1].score > ranked[2].score);
    let total: f32 = softmax(output.data()).iter().sum();
    assert!((total - 1.0).abs() < 1e-5);
  }

  #[test]
  fn missing_labels_fall_back_to_index() {
    let ranking = SoftmaxTopK::new(vec!["only".into()], 2);
    let output = Tensor::new(vec![2], vec![0.0, 5.0]).unwrap();

    let ranked = ranking.rank(&output);

    assert_eq!(ranked[0].label, "class 1");
    assert_eq!(ranked[1].label, "only");
  }

  #[test]
  fn label_file_skips_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.txt");
    std::fs::write(&path, "tench\n\n goldfish \nshark\n").unwrap();

    let ranking = SoftmaxTopK::from_label_file(&path, 3).unwrap();

    assert_eq!(ranking.labels, ["tench", "goldfish", "shark"]);
  }
}
