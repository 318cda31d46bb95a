// 该文件是 Jingtou （镜头） 项目的一部分。
// src/bin/hello_preview.rs - 摄像头预处理预览
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use jingtou::{
  FromUrl,
  analyzer::PreviewAnalyzer,
  input::{DevicePermission, InputWrapper},
  output::{ConsoleView, OutputWrapper, Presenter},
  task::{ContinuousTask, OneShotTask, Task, UiNotifier, request_camera},
};

/// Jingtou 预览程序参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,
  /// 预览位图输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 最多采集的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 只处理一帧
  #[arg(long)]
  pub once: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let sink = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;
  let mut presenter = Presenter::new(ConsoleView::new(sink));

  let permission = DevicePermission::from_url(&args.input)?;
  request_camera(&permission, &mut presenter)?;
  let source = InputWrapper::from_url(&args.input)?;

  let factory = |_: UiNotifier| PreviewAnalyzer::<256, 256>::default();

  if args.once {
    OneShotTask.run_task(source, factory, &mut presenter)
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_interrupt(true)
      .run_task(source, factory, &mut presenter)
  }
}
