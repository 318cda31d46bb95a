// 该文件是 Jingtou （镜头） 项目的一部分。
// src/bin/classify_camera.rs - 摄像头实时分类
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

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use tracing::info;
use url::Url;

use jingtou::{
  FromUrl,
  analyzer::{AnalyzerConfig, ClassificationAnalyzer, LETTERBOX_PAD, ResultImage},
  input::{DevicePermission, InputWrapper},
  model::{AssetDirectory, EngineWrapper, InferenceSession, asset_name_of},
  output::{ConsoleView, OutputWrapper, Presenter},
  postprocess::{RankingMode, SoftmaxTopK, TOP_K},
  task::{ContinuousTask, OneShotTask, Task, UiNotifier, request_camera},
};

const INPUT_WIDTH: u32 = 224;
const INPUT_HEIGHT: u32 = 224;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingKind {
  /// 固定返回 a、b、c
  Placeholder,
  /// softmax 后取前 K 个类别
  Softmax,
}

/// Jingtou 分类程序参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，scheme 选择推理引擎，路径为资源名
  #[arg(long, value_name = "MODEL", default_value = "tract:resnet18.onnx")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,
  /// 结果位图输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 打包资源目录
  #[arg(long, value_name = "DIR", default_value = "assets")]
  pub assets: PathBuf,
  /// 本地文件目录
  #[arg(long, value_name = "DIR", default_value = "files")]
  pub files: PathBuf,
  /// 排序方式
  #[arg(long, value_enum, default_value_t = RankingKind::Placeholder)]
  pub ranking: RankingKind,
  /// 类别名文件，每行一个
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 推理前为输入加上 letterbox 填充
  #[arg(long)]
  pub letterbox: bool,
  /// 最多采集的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 只分析一帧
  #[arg(long)]
  pub once: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let asset_name = asset_name_of(&args.model)?;
  let sink = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;
  let mut presenter = Presenter::new(ConsoleView::new(sink))
    .with_ranking_table()
    .with_model_info(&asset_name);

  let permission = DevicePermission::from_url(&args.input)?;
  request_camera(&permission, &mut presenter)?;
  let source = InputWrapper::from_url(&args.input)?;

  let pad = if args.letterbox { 2 * LETTERBOX_PAD } else { 0 };
  let engine = EngineWrapper::from_url_with_shape(
    &args.model,
    [1, 3, INPUT_HEIGHT as usize + pad, INPUT_WIDTH as usize + pad],
  )?;

  let (ranking, image) = match args.ranking {
    RankingKind::Placeholder => (RankingMode::default(), ResultImage::Output),
    RankingKind::Softmax => {
      let labels = args
        .labels
        .as_deref()
        .ok_or_else(|| anyhow!("softmax 排序需要 --labels"))?;
      let ranking = SoftmaxTopK::from_label_file(labels, TOP_K)?;
      (RankingMode::Softmax(ranking), ResultImage::Input)
    }
  };
  let config = AnalyzerConfig {
    letterbox: args.letterbox,
    image,
  };

  let assets = AssetDirectory::new(&args.assets, &args.files);
  let factory = move |notifier: UiNotifier| {
    let session = InferenceSession::new(engine, assets, asset_name, notifier);
    ClassificationAnalyzer::<INPUT_WIDTH, INPUT_HEIGHT, _, _, _, _>::new(session, ranking, config)
  };

  if args.once {
    OneShotTask.run_task(source, factory, &mut presenter)
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_interrupt(true)
      .run_task(source, factory, &mut presenter)
  }
}
