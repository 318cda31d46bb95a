// 该文件是 Jingtou （镜头） 项目的一部分。
// src/model.rs - 推理引擎
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  frame::{Tensor, TensorRef},
};

/// 推理运行时：加载模型、执行一次前向推理、释放模型
///
/// 张量只使用 `f32`。模块句柄只会在单个工作线程中使用。
pub trait InferenceEngine {
  type Module;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, path: &Path) -> Result<Self::Module, Self::Error>;
  fn forward(&self, module: &mut Self::Module, input: TensorRef<'_>)
  -> Result<Tensor, Self::Error>;
  fn destroy(&self, module: Self::Module);
}

mod asset;
pub use self::asset::{AssetDirectory, AssetError, AssetResolver};

mod session;
pub use self::session::{ErrorNotifier, InferenceSession, ModuleState, SessionError};

#[cfg(feature = "tract_engine")]
mod tract;
#[cfg(feature = "tract_engine")]
pub use self::tract::{TractEngine, TractEngineError, TractModule};

#[cfg(feature = "rknn_engine")]
mod rknn;
#[cfg(feature = "rknn_engine")]
pub use self::rknn::{RknnEngine, RknnEngineError};

#[derive(Error, Debug)]
pub enum EngineError {
  #[cfg(feature = "tract_engine")]
  #[error("Tract 引擎错误: {0}")]
  TractEngineError(#[from] TractEngineError),
  #[cfg(feature = "rknn_engine")]
  #[error("RKNN 引擎错误: {0}")]
  RknnEngineError(#[from] RknnEngineError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型资源名为空")]
  EmptyAssetName,
}

/// 由 URL 选择的推理引擎，URL 路径是模型的资源名
///
/// 例如 `tract:resnet18.onnx` 或 `rknn:resnet18.rknn`。
pub enum EngineWrapper {
  #[cfg(feature = "tract_engine")]
  Tract(TractEngine),
  #[cfg(feature = "rknn_engine")]
  Rknn(RknnEngine),
}

pub enum ModuleWrapper {
  #[cfg(feature = "tract_engine")]
  Tract(TractModule),
  #[cfg(feature = "rknn_engine")]
  Rknn(rknpu::Context),
}

/// 从模型 URL 中取出资源名
pub fn asset_name_of(url: &Url) -> Result<String, EngineError> {
  let name = url.path().trim_start_matches('/');
  if name.is_empty() {
    return Err(EngineError::EmptyAssetName);
  }
  Ok(name.to_string())
}

impl EngineWrapper {
  /// 按输入形状构造引擎，部分后端需要在加载时固定输入形状
  pub fn from_url_with_shape(url: &Url, input_shape: [usize; 4]) -> Result<Self, EngineError> {
    asset_name_of(url)?;
    match url.scheme() {
      #[cfg(feature = "tract_engine")]
      "tract" => Ok(EngineWrapper::Tract(TractEngine::new(input_shape))),
      #[cfg(feature = "rknn_engine")]
      "rknn" => Ok(EngineWrapper::Rknn(RknnEngine::default())),
      other => {
        let _ = input_shape;
        Err(EngineError::SchemeMismatch(other.to_string()))
      }
    }
  }
}

impl FromUrl for EngineWrapper {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::from_url_with_shape(url, [1, 3, 224, 224])
  }
}

impl InferenceEngine for EngineWrapper {
  type Module = ModuleWrapper;
  type Error = EngineError;

  fn load(&self, path: &Path) -> Result<Self::Module, Self::Error> {
    match self {
      #[cfg(feature = "tract_engine")]
      EngineWrapper::Tract(engine) => Ok(ModuleWrapper::Tract(engine.load(path)?)),
      #[cfg(feature = "rknn_engine")]
      EngineWrapper::Rknn(engine) => Ok(ModuleWrapper::Rknn(engine.load(path)?)),
      #[allow(unreachable_patterns)]
      _ => Err(EngineError::SchemeMismatch("未启用任何推理引擎".to_string())),
    }
  }

  fn forward(
    &self,
    module: &mut Self::Module,
    input: TensorRef<'_>,
  ) -> Result<Tensor, Self::Error> {
    match (self, module) {
      #[cfg(feature = "tract_engine")]
      (EngineWrapper::Tract(engine), ModuleWrapper::Tract(module)) => {
        Ok(engine.forward(module, input)?)
      }
      #[cfg(feature = "rknn_engine")]
      (EngineWrapper::Rknn(engine), ModuleWrapper::Rknn(module)) => {
        Ok(engine.forward(module, input)?)
      }
      #[allow(unreachable_patterns)]
      _ => Err(EngineError::SchemeMismatch(
        "模块与引擎类型不一致".to_string(),
      )),
    }
  }

  fn destroy(&self, module: Self::Module) {
    match (self, module) {
      #[cfg(feature = "tract_engine")]
      (EngineWrapper::Tract(engine), ModuleWrapper::Tract(module)) => engine.destroy(module),
      #[cfg(feature = "rknn_engine")]
      (EngineWrapper::Rknn(engine), ModuleWrapper::Rknn(module)) => engine.destroy(module),
      #[allow(unreachable_patterns)]
      _ => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn asset_name_comes_from_url_path() {
    let url = Url::parse("tract:resnet18.onnx").unwrap();
    assert_eq!(asset_name_of(&url).unwrap(), "resnet18.onnx");

    let url = Url::parse("tract:///models/resnet18.onnx").unwrap();
    assert_eq!(asset_name_of(&url).unwrap(), "models/resnet18.onnx");
  }

  #[test]
  fn empty_asset_name_is_rejected() {
    let url = Url::parse("tract:").unwrap();
    assert!(matches!(
      asset_name_of(&url),
      Err(EngineError::EmptyAssetName)
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("torch:resnet18.pt").unwrap();
    assert!(matches!(
      EngineWrapper::from_url(&url),
      Err(EngineError::SchemeMismatch(_))
    ));
  }
}
