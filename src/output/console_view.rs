// 该文件是 Jingtou （镜头） 项目的一部分。
// src/output/console_view.rs - 终端界面
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

use std::{
  collections::{HashMap, HashSet},
  fmt::Display,
};

use image::RgbaImage;
use tracing::{error, info, warn};

use crate::output::{Render, TextSlot, View};

#[derive(Debug, Clone, Default, PartialEq)]
struct Row {
  name: String,
  score: String,
  loading: bool,
}

/// 把控件状态写入日志，位图交给可选的输出
pub struct ConsoleView<R> {
  sink: Option<R>,
  header: (String, String),
  rows: Vec<Row>,
  texts: HashMap<TextSlot, String>,
  visible: HashSet<TextSlot>,
  image: Option<RgbaImage>,
  dialog: Option<String>,
  updates: u64,
}

impl<R> Default for ConsoleView<R> {
  fn default() -> Self {
    Self {
      sink: None,
      header: Default::default(),
      rows: Vec::new(),
      texts: HashMap::new(),
      visible: HashSet::new(),
      image: None,
      dialog: None,
      updates: 0,
    }
  }
}

impl<R> ConsoleView<R>
where
  R: Render,
  R::Error: Display,
{
  pub fn new(sink: Option<R>) -> Self {
    Self {
      sink,
      ..Default::default()
    }
  }

  pub fn text(&self, slot: TextSlot) -> Option<&str> {
    self.texts.get(&slot).map(String::as_str)
  }

  pub fn image(&self) -> Option<&RgbaImage> {
    self.image.as_ref()
  }

  /// 最近一次弹出的错误对话框
  pub fn dialog(&self) -> Option<&str> {
    self.dialog.as_deref()
  }

  pub fn updates(&self) -> u64 {
    self.updates
  }

  fn visible_text(&self, slot: TextSlot) -> &str {
    if self.visible.contains(&slot) {
      self.text(slot).unwrap_or("")
    } else {
      ""
    }
  }
}

impl<R> View for ConsoleView<R>
where
  R: Render,
  R::Error: Display,
{
  fn set_image(&mut self, image: &RgbaImage) {
    self.image = Some(image.clone());
  }

  fn set_row(&mut self, index: usize, name: &str, score: &str, loading: bool) {
    if self.rows.len() <= index {
      self.rows.resize(index + 1, Row::default());
    }
    self.rows[index] = Row {
      name: name.to_string(),
      score: score.to_string(),
      loading,
    };
  }

  fn set_header(&mut self, name: &str, score: &str) {
    self.header = (name.to_string(), score.to_string());
    info!("{:<24} {}", name, score);
  }

  fn set_text(&mut self, slot: TextSlot, text: &str) {
    self.texts.insert(slot, text.to_string());
    if slot == TextSlot::Info {
      info!("{}", text.trim());
    }
  }

  fn set_visible(&mut self, slot: TextSlot, visible: bool) {
    if visible {
      self.visible.insert(slot);
    } else {
      self.visible.remove(&slot);
    }
  }

  fn is_visible(&self, slot: TextSlot) -> bool {
    self.visible.contains(&slot)
  }

  fn show_error_dialog(&mut self, message: &str) {
    error!("图像分析出错: {}", message);
    self.dialog = Some(message.to_string());
  }

  fn show_notice(&mut self, message: &str) {
    warn!("{}", message);
  }

  fn commit(&mut self) {
    self.updates += 1;

    for row in self.rows.iter().filter(|row| !row.loading) {
      info!("{:<24} {}", row.name, row.score);
    }
    info!(
      "[{}] {} {} {}",
      self.updates,
      self.visible_text(TextSlot::Latency),
      self.visible_text(TextSlot::Fps),
      self.visible_text(TextSlot::AverageLatency)
    );

    if let (Some(sink), Some(image)) = (&self.sink, &self.image)
      && let Err(e) = sink.render(image)
    {
      warn!("输出图像失败: {}", e);
    }
  }
}
