// 该文件是 Jingtou （镜头） 项目的一部分。
// src/analyzer.rs - 单帧分析流程
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

use image::RgbaImage;
use tracing::{debug, warn};

use crate::{
  frame::{FloatTensor, Tensor, YuvFrame},
  input::InputError,
  model::{AssetResolver, ErrorNotifier, InferenceEngine, InferenceSession, SessionError},
  postprocess::{Ranking, ScoredLabel, luminance_image, preview_image},
  preprocess::{Normalization, fill_input_tensor, letterbox_tensor},
};

/// letterbox 四周的填充宽度
pub const LETTERBOX_PAD: usize = 16;

/// 一帧分析完成后交给界面的结果
#[derive(Debug, Clone)]
pub struct AnalysisResult {
  pub image: RgbaImage,
  pub ranked: Vec<ScoredLabel>,
  /// 模型推理耗时；没有推理时为 `None`
  pub forward_duration: Option<Duration>,
  pub analysis_duration: Duration,
}

/// 在工作线程上逐帧调用的分析器
pub trait Analyzer {
  fn analyze(&mut self, frame: &YuvFrame) -> Option<AnalysisResult>;

  /// 采集失败的帧直接跳过，不产生结果
  fn on_frame(&mut self, frame: Result<YuvFrame, InputError>) -> Option<AnalysisResult> {
    match frame {
      Ok(frame) => self.analyze(&frame),
      Err(e) => {
        warn!("获取帧失败，跳过: {}", e);
        None
      }
    }
  }

  /// 释放分析器持有的资源
  fn close(&mut self) {}
}

/// 结果位图的来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultImage {
  /// 模型输出张量的灰度图
  #[default]
  Output,
  /// 预处理后的输入张量
  Input,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerConfig {
  /// 推理前为输入张量加上 letterbox 填充
  pub letterbox: bool,
  pub image: ResultImage,
}

/// 分类界面的分析器：预处理、推理、后处理、排序
pub struct ClassificationAnalyzer<const W: u32, const H: u32, E: InferenceEngine, A, N, R> {
  session: InferenceSession<E, A, N>,
  input: FloatTensor<W, H>,
  letterbox: Option<Tensor>,
  norm: Normalization,
  image: ResultImage,
  ranking: R,
}

impl<const W: u32, const H: u32, E, A, N, R> ClassificationAnalyzer<W, H, E, A, N, R>
where
  E: InferenceEngine,
  A: AssetResolver,
  N: ErrorNotifier,
  R: Ranking,
{
  pub fn new(session: InferenceSession<E, A, N>, ranking: R, config: AnalyzerConfig) -> Self {
    let letterbox = config.letterbox.then(|| {
      Tensor::zeros(vec![
        1,
        3,
        H as usize + 2 * LETTERBOX_PAD,
        W as usize + 2 * LETTERBOX_PAD,
      ])
    });
    Self {
      session,
      input: FloatTensor::default(),
      letterbox,
      norm: Normalization::HALF,
      image: config.image,
      ranking,
    }
  }

  pub fn session(&self) -> &InferenceSession<E, A, N> {
    &self.session
  }

  fn render(&mut self, output: &Tensor) -> Option<RgbaImage> {
    let rendered = match self.image {
      ResultImage::Output => luminance_image(output, W, H),
      ResultImage::Input => preview_image(self.input.as_slice(), W, H),
    };
    match rendered {
      Ok(image) => Some(image),
      Err(e) => {
        self.session.fail(SessionError::Output(e.to_string()));
        None
      }
    }
  }
}

impl<const W: u32, const H: u32, E, A, N, R> Analyzer for ClassificationAnalyzer<W, H, E, A, N, R>
where
  E: InferenceEngine,
  A: AssetResolver,
  N: ErrorNotifier,
  R: Ranking,
{
  fn analyze(&mut self, frame: &YuvFrame) -> Option<AnalysisResult> {
    if self.session.is_failed() || !self.session.ensure_loaded() {
      return None;
    }

    let start = Instant::now();
    if let Err(e) = fill_input_tensor(frame, &self.norm, &mut self.input) {
      warn!("第 {} 帧预处理失败，跳过: {}", frame.index, e);
      return None;
    }

    let input = match &mut self.letterbox {
      Some(padded) => {
        if let Err(e) = letterbox_tensor(&self.input, padded, LETTERBOX_PAD) {
          warn!("第 {} 帧 letterbox 失败，跳过: {}", frame.index, e);
          return None;
        }
        padded.view()
      }
      None => self.input.view(),
    };

    let forward_start = Instant::now();
    let output = self.session.forward(input)?;
    let forward_duration = forward_start.elapsed();

    let image = self.render(&output)?;
    let ranked = self.ranking.rank(&output);
    let analysis_duration = start.elapsed();

    debug!(
      "第 {} 帧分析完成: 推理 {:.2?}, 总计 {:.2?}",
      frame.index, forward_duration, analysis_duration
    );

    Some(AnalysisResult {
      image,
      ranked,
      forward_duration: Some(forward_duration),
      analysis_duration,
    })
  }

  fn close(&mut self) {
    self.session.close();
  }
}

/// 预览界面的分析器：只做预处理并把张量还原成位图
pub struct PreviewAnalyzer<const W: u32, const H: u32> {
  input: FloatTensor<W, H>,
  norm: Normalization,
}

impl<const W: u32, const H: u32> Default for PreviewAnalyzer<W, H> {
  fn default() -> Self {
    Self {
      input: FloatTensor::default(),
      norm: Normalization::TORCHVISION,
    }
  }
}

impl<const W: u32, const H: u32> Analyzer for PreviewAnalyzer<W, H> {
  fn analyze(&mut self, frame: &YuvFrame) -> Option<AnalysisResult> {
    let start = Instant::now();
    if let Err(e) = fill_input_tensor(frame, &self.norm, &mut self.input) {
      warn!("第 {} 帧预处理失败，跳过: {}", frame.index, e);
      return None;
    }

    let image = match preview_image(self.input.as_slice(), W, H) {
      Ok(image) => image,
      Err(e) => {
        warn!("第 {} 帧生成预览失败: {}", frame.index, e);
        return None;
      }
    };

    Some(AnalysisResult {
      image,
      ranked: Vec::new(),
      forward_duration: None,
      analysis_duration: start.elapsed(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{FrameError, TensorRef},
    model::AssetError,
    postprocess::PlaceholderRanking,
  };
  use image::{Rgb, RgbImage};
  use std::{
    cell::{Cell, RefCell},
    path::{Path, PathBuf},
    rc::Rc,
  };

  #[derive(Debug, thiserror::Error)]
  #[error("boom")]
  struct Boom;

  #[derive(Default)]
  struct Probe {
    loads: Cell<usize>,
    forwards: Cell<usize>,
    notices: Cell<usize>,
    last_shape: RefCell<Vec<usize>>,
  }

  /// 回显输入的引擎；`output_len` 可截断输出
  struct EchoEngine {
    probe: Rc<Probe>,
    fail_load: bool,
    output_len: Option<usize>,
  }

  impl InferenceEngine for EchoEngine {
    type Module = ();
    type Error = Boom;

    fn load(&self, _path: &Path) -> Result<(), Boom> {
      self.probe.loads.set(self.probe.loads.get() + 1);
      if self.fail_load { Err(Boom) } else { Ok(()) }
    }

    fn forward(&self, _module: &mut (), input: TensorRef<'_>) -> Result<Tensor, Boom> {
      self.probe.forwards.set(self.probe.forwards.get() + 1);
      *self.probe.last_shape.borrow_mut() = input.shape.to_vec();
      let len = self.output_len.unwrap_or(input.data.len());
      Ok(Tensor::new(vec![len], input.data[..len].to_vec()).unwrap())
    }

    fn destroy(&self, _module: ()) {}
  }

  struct Here;

  impl AssetResolver for Here {
    fn resolve(&self, name: &str) -> Result<PathBuf, AssetError> {
      Ok(PathBuf::from(name))
    }
  }

  type TestAnalyzer =
    ClassificationAnalyzer<2, 2, EchoEngine, Here, Box<dyn Fn(&str)>, PlaceholderRanking>;

  fn analyzer(fail_load: bool, output_len: Option<usize>, config: AnalyzerConfig) -> (Rc<Probe>, TestAnalyzer) {
    let probe = Rc::new(Probe::default());
    let engine = EchoEngine {
      probe: probe.clone(),
      fail_load,
      output_len,
    };
    let notices = probe.clone();
    let notifier: Box<dyn Fn(&str)> =
      Box::new(move |_: &str| notices.notices.set(notices.notices.get() + 1));
    let session = InferenceSession::new(engine, Here, "echo.onnx", notifier);
    (
      probe,
      ClassificationAnalyzer::new(session, PlaceholderRanking, config),
    )
  }

  fn frame() -> YuvFrame {
    let image = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
    YuvFrame::from_rgb_image(&image).unwrap()
  }

  #[test]
  fn completed_frame_produces_result() {
    let (probe, mut analyzer) = analyzer(false, None, AnalyzerConfig::default());

    let result = analyzer.analyze(&frame()).unwrap();

    assert_eq!(result.image.dimensions(), (2, 2));
    // 白色输入经 0.5/0.5 归一化后为 1.0，反归一化为 255
    assert_eq!(result.image.get_pixel(1, 1).0, [255, 255, 255, 255]);
    let labels: Vec<&str> = result.ranked.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["a", "b", "c"]);
    assert!(result.forward_duration.is_some_and(|d| d <= result.analysis_duration));
    assert_eq!(*probe.last_shape.borrow(), [1, 3, 2, 2]);
  }

  #[test]
  fn load_failure_yields_nothing_for_every_frame() {
    let (probe, mut analyzer) = analyzer(true, None, AnalyzerConfig::default());

    for _ in 0..5 {
      assert!(analyzer.analyze(&frame()).is_none());
    }

    assert_eq!(probe.loads.get(), 1);
    assert_eq!(probe.forwards.get(), 0);
    assert_eq!(probe.notices.get(), 1);
  }

  #[test]
  fn short_output_latches_session() {
    let (probe, mut analyzer) = analyzer(false, Some(4), AnalyzerConfig::default());

    assert!(analyzer.analyze(&frame()).is_none());
    assert!(analyzer.analyze(&frame()).is_none());

    assert!(analyzer.session().is_failed());
    assert_eq!(probe.forwards.get(), 1);
    assert_eq!(probe.notices.get(), 1);
  }

  #[test]
  fn input_image_does_not_need_spatial_output() {
    let config = AnalyzerConfig {
      image: ResultImage::Input,
      ..Default::default()
    };
    let (_probe, mut analyzer) = analyzer(false, Some(4), config);

    let result = analyzer.analyze(&frame()).unwrap();

    assert_eq!(result.image.dimensions(), (2, 2));
  }

  #[test]
  fn letterbox_forwards_padded_tensor() {
    let config = AnalyzerConfig {
      letterbox: true,
      image: ResultImage::Input,
    };
    let (probe, mut analyzer) = analyzer(false, None, config);

    assert!(analyzer.analyze(&frame()).is_some());

    let side = 2 + 2 * LETTERBOX_PAD;
    assert_eq!(*probe.last_shape.borrow(), [1, 3, side, side]);
  }

  #[test]
  fn failed_acquisition_is_skipped() {
    let (probe, mut analyzer) = analyzer(false, None, AnalyzerConfig::default());

    let result = analyzer.on_frame(Err(InputError::from(FrameError::InvalidSize(0, 0))));

    assert!(result.is_none());
    assert_eq!(probe.loads.get(), 0);
  }

  #[test]
  fn preview_restores_input_bitmap() {
    let mut analyzer = PreviewAnalyzer::<2, 2>::default();

    let result = analyzer.analyze(&frame()).unwrap();

    assert_eq!(result.image.dimensions(), (2, 2));
    assert_eq!(result.forward_duration, None);
    assert!(result.ranked.is_empty());
  }
}
