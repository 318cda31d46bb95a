// 该文件是 Jingtou （镜头） 项目的一部分。
// src/model/rknn.rs - 基于 RKNPU 的推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{Tensor, TensorRef},
  model::InferenceEngine,
};

const RKNN_NUM_INPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("输出张量形状无效: {0}")]
  OutputShape(String),
}

impl From<std::io::Error> for RknnEngineError {
  fn from(err: std::io::Error) -> Self {
    RknnEngineError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnEngineError {
  fn from(err: rknpu::Error) -> Self {
    RknnEngineError::RknnError(err)
  }
}

impl RknnEngineError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnEngineError::ModelInvalid(msg.to_string(), e)
  }
}

/// NPU 推理引擎，输入为 NCHW 排布的 float32 张量
#[derive(Debug, Default)]
pub struct RknnEngine;

impl InferenceEngine for RknnEngine {
  type Module = Context;
  type Error = RknnEngineError;

  fn load(&self, path: &Path) -> Result<Self::Module, Self::Error> {
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输入数量", e))?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(RknnEngineError::invalid(
        &format!(
          "预期模型输入数量为 {}, 实际为 {}",
          RKNN_NUM_INPUTS, num_inputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }
    info!("模型加载完成");

    Ok(context)
  }

  fn forward(
    &self,
    module: &mut Self::Module,
    input: TensorRef<'_>,
  ) -> Result<Tensor, Self::Error> {
    let bytes: Vec<u8> = input
      .data
      .iter()
      .flat_map(|value| value.to_ne_bytes())
      .collect();

    debug!("设置模型输入");
    module.set_input(0, &bytes, TensorFormat::NCHW, TensorType::Float32)?;

    debug!("执行模型推理");
    module.run()?;

    debug!("获取模型输出");
    let output = module.get_outputs()?;
    let data = output.get_f32(0)?.to_vec();

    // 运行时不提供输出形状，按一维向量返回
    Tensor::new(vec![1, data.len()], data)
      .map_err(|e| RknnEngineError::OutputShape(e.to_string()))
  }

  fn destroy(&self, module: Self::Module) {
    debug!("释放 RKNN 推理上下文");
    drop(module);
  }
}
