// 该文件是 Jingtou （镜头） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理引擎
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
use tracing::{debug, info};
use tract_onnx::prelude::{
  DatumExt, Framework, Graph, InferenceModelExt, SimplePlan, Tensor as TractTensor, TypedFact,
  TypedOp, tvec,
};

use crate::{
  frame::{Tensor, TensorRef},
  model::InferenceEngine,
};

type RunnablePlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Error, Debug)]
pub enum TractEngineError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShapeMismatch {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("推理执行错误: {0}")]
  RunError(String),
  #[error("模型没有输出")]
  NoOutput,
}

pub struct TractModule {
  plan: RunnablePlan,
}

/// ONNX 推理引擎，输入形状在加载时固定
#[derive(Debug, Clone)]
pub struct TractEngine {
  input_shape: [usize; 4],
}

impl TractEngine {
  pub fn new(input_shape: [usize; 4]) -> Self {
    Self { input_shape }
  }

  pub fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }
}

impl InferenceEngine for TractEngine {
  type Module = TractModule;
  type Error = TractEngineError;

  fn load(&self, path: &Path) -> Result<Self::Module, Self::Error> {
    if !path.exists() {
      return Err(TractEngineError::ModelNotFound(path.display().to_string()));
    }

    info!("加载模型文件: {}", path.display());
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| model.with_input_fact(0, f32::fact(self.input_shape).into()))
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| TractEngineError::ModelLoadError(format!("{e:#}")))?;
    debug!("模型输入形状: {:?}", self.input_shape);
    info!("模型加载完成");

    Ok(TractModule { plan })
  }

  fn forward(
    &self,
    module: &mut Self::Module,
    input: TensorRef<'_>,
  ) -> Result<Tensor, Self::Error> {
    if input.shape != self.input_shape {
      return Err(TractEngineError::InputShapeMismatch {
        expected: self.input_shape.to_vec(),
        actual: input.shape.to_vec(),
      });
    }

    let tensor = TractTensor::from_shape(input.shape, input.data)
      .map_err(|e| TractEngineError::RunError(e.to_string()))?;

    debug!("执行模型推理");
    let outputs = module
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| TractEngineError::RunError(format!("{e:#}")))?;

    let output = outputs.first().ok_or(TractEngineError::NoOutput)?;
    let data = output
      .as_slice::<f32>()
      .map_err(|e| TractEngineError::RunError(e.to_string()))?
      .to_vec();

    Tensor::new(output.shape().to_vec(), data)
      .map_err(|e| TractEngineError::RunError(e.to_string()))
  }

  fn destroy(&self, module: Self::Module) {
    debug!("释放 tract 模型");
    drop(module);
  }
}
