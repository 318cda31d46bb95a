// 该文件是 Jingtou （镜头） 项目的一部分。
// src/tracker.rs - 推理耗时滑动平均
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

use std::collections::VecDeque;

pub const MOVING_AVG_PERIOD: usize = 10;

/// 固定容量的滑动窗口，维护窗口内样本之和
///
/// 窗口未满时不给出平均值，避免显示不具代表性的数值。
#[derive(Debug, Clone)]
pub struct MovingAverage<const N: usize = MOVING_AVG_PERIOD> {
  queue: VecDeque<u64>,
  sum: u64,
}

impl<const N: usize> Default for MovingAverage<N> {
  fn default() -> Self {
    Self {
      queue: VecDeque::with_capacity(N + 1),
      sum: 0,
    }
  }
}

impl<const N: usize> MovingAverage<N> {
  pub fn push(&mut self, sample: u64) {
    self.sum += sample;
    self.queue.push_back(sample);
    if self.queue.len() > N
      && let Some(oldest) = self.queue.pop_front()
    {
      self.sum -= oldest;
    }
  }

  pub fn sum(&self) -> u64 {
    self.sum
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.queue.len() == N
  }

  pub fn average(&self) -> Option<f32> {
    self.is_full().then(|| self.sum as f32 / N as f32)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn average_is_hidden_until_window_fills() {
    let mut avg = MovingAverage::<10>::default();
    for sample in 1..10 {
      avg.push(sample);
      assert_eq!(avg.average(), None);
    }
    avg.push(10);
    assert!(avg.is_full());
    assert_eq!(avg.average(), Some(5.5));
  }

  #[test]
  fn steps_of_ten_average_to_55() {
    let mut avg = MovingAverage::<10>::default();
    for sample in (10..=100).step_by(10) {
      avg.push(sample);
    }
    assert_eq!(avg.sum(), 550);
    assert_eq!(avg.average(), Some(55.0));
  }

  #[test]
  fn sum_covers_only_last_window() {
    let samples: Vec<u64> = (1..=25).map(|v| v * 3).collect();
    let mut avg = MovingAverage::<10>::default();

    for (n, &sample) in samples.iter().enumerate() {
      avg.push(sample);
      let count = n + 1;
      let start = count.saturating_sub(10);
      let expected: u64 = samples[start..count].iter().sum();
      assert_eq!(avg.sum(), expected);
      assert_eq!(avg.len(), count.min(10));
    }
  }

  #[test]
  fn default_period_is_ten() {
    let avg: MovingAverage = MovingAverage::default();
    assert!(avg.is_empty());
    assert!(!avg.is_full());
    assert_eq!(MOVING_AVG_PERIOD, 10);
  }
}
