// 该文件是 Jingtou （镜头） 项目的一部分。
// src/output.rs - 界面展示与输出
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

use image::RgbaImage;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  analyzer::AnalysisResult,
  postprocess::TOP_K,
  tracker::MovingAverage,
};

/// 把位图输出到某处
pub trait Render {
  type Error;
  fn render(&self, image: &RgbaImage) -> Result<(), Self::Error>;
}

mod console_view;
pub use self::console_view::ConsoleView;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(any(feature = "save_image_file", feature = "directory_record"))]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render(&self, image: &RgbaImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.render(image).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.render(image).map_err(OutputError::from)
      }
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch("未启用任何输出".to_string())),
    }
  }
}

/// 界面上的文本控件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextSlot {
  Latency,
  Fps,
  AverageLatency,
  Info,
}

/// 界面控件的设置接口，只在界面线程上调用
pub trait View {
  fn set_image(&mut self, image: &RgbaImage);
  fn set_row(&mut self, index: usize, name: &str, score: &str, loading: bool);
  fn set_header(&mut self, name: &str, score: &str);
  fn set_text(&mut self, slot: TextSlot, text: &str);
  fn set_visible(&mut self, slot: TextSlot, visible: bool);
  fn is_visible(&self, slot: TextSlot) -> bool;
  /// 弹出错误对话框，关闭后会话结束
  fn show_error_dialog(&mut self, message: &str);
  /// 短暂提示
  fn show_notice(&mut self, message: &str);
  /// 一次结果更新完毕
  fn commit(&mut self) {}
}

/// 将分析结果应用到界面，并维护推理耗时的滑动平均
pub struct Presenter<V: View> {
  view: V,
  tracker: MovingAverage,
  rows: usize,
}

impl<V: View> Presenter<V> {
  pub fn new(view: V) -> Self {
    Self {
      view,
      tracker: MovingAverage::default(),
      rows: 0,
    }
  }

  /// 分类结果表格：表头与处于加载状态的空行
  pub fn with_ranking_table(mut self) -> Self {
    self.rows = TOP_K;
    self.view.set_header("Category", "Score");
    for index in 0..self.rows {
      self.view.set_row(index, "", "", true);
    }
    self
  }

  pub fn with_model_info(mut self, asset_name: &str) -> Self {
    self
      .view
      .set_text(TextSlot::Info, &format!("\nModel file name: {}", asset_name));
    self.show(TextSlot::Info);
    self
  }

  pub fn view(&self) -> &V {
    &self.view
  }

  pub fn view_mut(&mut self) -> &mut V {
    &mut self.view
  }

  pub fn into_view(self) -> V {
    self.view
  }

  pub fn tracker(&self) -> &MovingAverage {
    &self.tracker
  }

  fn show(&mut self, slot: TextSlot) {
    if !self.view.is_visible(slot) {
      self.view.set_visible(slot, true);
    }
  }

  pub fn apply(&mut self, result: &AnalysisResult) {
    self.view.set_image(&result.image);
    for (index, item) in result.ranked.iter().take(self.rows).enumerate() {
      self
        .view
        .set_row(index, &item.label, &format!("{:.2}", item.score), false);
    }

    if let Some(forward) = result.forward_duration {
      let forward_ms = forward.as_millis() as u64;
      self.tracker.push(forward_ms);
      self
        .view
        .set_text(TextSlot::Latency, &format!("{}ms", forward_ms));
      self.show(TextSlot::Latency);
    }

    let analysis_ms = result.analysis_duration.as_millis();
    if analysis_ms > 0 {
      self.view.set_text(
        TextSlot::Fps,
        &format!("{:.1}FPS", 1000.0 / analysis_ms as f32),
      );
      self.show(TextSlot::Fps);
    }

    if result.forward_duration.is_some()
      && let Some(average) = self.tracker.average()
    {
      self
        .view
        .set_text(TextSlot::AverageLatency, &format!("avg:{:.0}ms", average));
      self.show(TextSlot::AverageLatency);
    }

    self.view.commit();
  }

  pub fn show_error(&mut self, message: &str) {
    self.view.show_error_dialog(message);
  }

  pub fn show_notice(&mut self, message: &str) {
    self.view.show_notice(message);
  }
}
