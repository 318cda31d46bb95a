// 该文件是 Jingtou （镜头） 项目的一部分。
// src/model/session.rs - 推理会话与错误锁存
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

use std::mem;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{Tensor, TensorRef},
  model::{AssetError, AssetResolver, InferenceEngine},
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型资源解析失败: {0}")]
  Asset(#[from] AssetError),
  #[error("模型加载失败: {0}")]
  Load(Box<dyn std::error::Error + Send + Sync>),
  #[error("模型推理失败: {0}")]
  Forward(Box<dyn std::error::Error + Send + Sync>),
  #[error("推理结果无效: {0}")]
  Output(String),
}

/// 致命错误的通知出口，负责把错误对话框投递到 UI 上下文
pub trait ErrorNotifier {
  fn notify(&self, message: &str);
}

impl<F: Fn(&str)> ErrorNotifier for F {
  fn notify(&self, message: &str) {
    self(message)
  }
}

/// 模块状态：`Failed` 一旦进入便不可离开
pub enum ModuleState<M> {
  Unloaded,
  Ready(M),
  Failed,
}

impl<M> ModuleState<M> {
  pub fn is_failed(&self) -> bool {
    matches!(self, ModuleState::Failed)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, ModuleState::Ready(_))
  }
}

/// 懒加载模型并在整个会话期间持有
///
/// 加载或推理的任何错误都会锁存为 `Failed`：记录日志，通知一次，
/// 之后的每次调用都直接返回 `None`，不再调用引擎。
pub struct InferenceSession<E: InferenceEngine, A, N> {
  engine: E,
  assets: A,
  asset_name: String,
  notifier: N,
  state: ModuleState<E::Module>,
}

impl<E, A, N> InferenceSession<E, A, N>
where
  E: InferenceEngine,
  A: AssetResolver,
  N: ErrorNotifier,
{
  pub fn new(engine: E, assets: A, asset_name: impl Into<String>, notifier: N) -> Self {
    Self {
      engine,
      assets,
      asset_name: asset_name.into(),
      notifier,
      state: ModuleState::Unloaded,
    }
  }

  pub fn asset_name(&self) -> &str {
    &self.asset_name
  }

  pub fn state(&self) -> &ModuleState<E::Module> {
    &self.state
  }

  pub fn is_failed(&self) -> bool {
    self.state.is_failed()
  }

  /// 确保模型已加载，失败时锁存错误并返回 `false`
  pub fn ensure_loaded(&mut self) -> bool {
    match self.state {
      ModuleState::Ready(_) => true,
      ModuleState::Failed => false,
      ModuleState::Unloaded => match self.load() {
        Ok(module) => {
          self.state = ModuleState::Ready(module);
          true
        }
        Err(e) => {
          self.fail(e);
          false
        }
      },
    }
  }

  fn load(&self) -> Result<E::Module, SessionError> {
    let path = self.assets.resolve(&self.asset_name)?;
    debug!("模型资源: {}", self.asset_name);
    debug!("模型路径: {}", path.display());
    let module = self
      .engine
      .load(&path)
      .map_err(|e| SessionError::Load(Box::new(e)))?;
    info!("模型 {} 已就绪", self.asset_name);
    Ok(module)
  }

  /// 执行一次前向推理
  pub fn forward(&mut self, input: TensorRef<'_>) -> Option<Tensor> {
    if !self.ensure_loaded() {
      return None;
    }

    let result = match &mut self.state {
      ModuleState::Ready(module) => self
        .engine
        .forward(module, input)
        .map_err(|e| SessionError::Forward(Box::new(e))),
      _ => return None,
    };

    match result {
      Ok(output) => Some(output),
      Err(e) => {
        self.fail(e);
        None
      }
    }
  }

  /// 锁存错误状态；仅第一次调用会释放模型并发出通知
  pub fn fail(&mut self, err: SessionError) {
    match mem::replace(&mut self.state, ModuleState::Failed) {
      ModuleState::Failed => {
        debug!("会话已处于错误状态，忽略: {}", err);
      }
      previous => {
        error!("图像分析出错: {}", err);
        if let ModuleState::Ready(module) = previous {
          self.engine.destroy(module);
        }
        self.notifier.notify(&err.to_string());
      }
    }
  }

  /// 显式释放模型
  pub fn close(&mut self) {
    if !self.state.is_ready() {
      return;
    }
    if let ModuleState::Ready(module) = mem::replace(&mut self.state, ModuleState::Unloaded) {
      info!("释放模型 {}", self.asset_name);
      self.engine.destroy(module);
    }
  }
}

impl<E: InferenceEngine, A, N> Drop for InferenceSession<E, A, N> {
  fn drop(&mut self) {
    if let ModuleState::Ready(module) = mem::replace(&mut self.state, ModuleState::Failed) {
      self.engine.destroy(module);
    }
  }
}
