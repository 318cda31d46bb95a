// 该文件是 Jingtou （镜头） 项目的一部分。
// src/task.rs - 采集、分析与界面线程的调度
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
  sync::{
    Arc, Condvar, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError, Sender},
  },
  thread,
  time::Duration,
};

use anyhow::{anyhow, bail};
use tracing::{debug, info, warn};

use crate::{
  analyzer::{AnalysisResult, Analyzer},
  input::{CameraPermission, FrameSource},
  model::ErrorNotifier,
  output::{Presenter, View},
};

pub const PERMISSION_DENIED_NOTICE: &str = "Permissions not granted by the user.";

const UI_POLL_INTERVAL: Duration = Duration::from_millis(100);
const FORCE_EXIT_DELAY: Duration = Duration::from_secs(30);

/// 工作线程投递给界面线程的消息
#[derive(Debug)]
pub enum UiEvent {
  Result(AnalysisResult),
  FatalError(String),
  Finished,
}

/// 把致命错误投递到界面线程
#[derive(Debug, Clone)]
pub struct UiNotifier {
  sender: Sender<UiEvent>,
}

impl UiNotifier {
  pub fn new(sender: Sender<UiEvent>) -> Self {
    Self { sender }
  }
}

impl ErrorNotifier for UiNotifier {
  fn notify(&self, message: &str) {
    if self
      .sender
      .send(UiEvent::FatalError(message.to_string()))
      .is_err()
    {
      warn!("界面线程已退出，错误未能显示: {}", message);
    }
  }
}

struct Slot<T> {
  item: Option<T>,
  closed: bool,
  dropped: u64,
}

/// 只保留最新一帧的单槽队列
///
/// 分析慢于采集时，未被取走的旧帧直接被新帧覆盖。
pub struct LatestFrame<T> {
  slot: Mutex<Slot<T>>,
  ready: Condvar,
}

impl<T> Default for LatestFrame<T> {
  fn default() -> Self {
    Self {
      slot: Mutex::new(Slot {
        item: None,
        closed: false,
        dropped: 0,
      }),
      ready: Condvar::new(),
    }
  }
}

impl<T> LatestFrame<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// 放入新帧；关闭后的写入被忽略
  pub fn publish(&self, item: T) {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.closed {
      return;
    }
    if slot.item.replace(item).is_some() {
      slot.dropped += 1;
    }
    self.ready.notify_one();
  }

  /// 阻塞等待下一帧；关闭且为空时返回 `None`
  pub fn take(&self) -> Option<T> {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if let Some(item) = slot.item.take() {
        return Some(item);
      }
      if slot.closed {
        return None;
      }
      slot = self
        .ready
        .wait(slot)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  pub fn close(&self) {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    slot.closed = true;
    self.ready.notify_all();
  }

  pub fn dropped(&self) -> u64 {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .dropped
  }
}

/// 启动前检查摄像头权限；拒绝时提示并返回错误
pub fn request_camera<P: CameraPermission, V: View>(
  permission: &P,
  presenter: &mut Presenter<V>,
) -> anyhow::Result<()> {
  if permission.check() {
    return Ok(());
  }
  presenter.show_notice(PERMISSION_DENIED_NOTICE);
  bail!("摄像头权限未授予")
}

pub trait Task<S, F, V: View>: Sized {
  type Error;
  fn run_task(self, source: S, factory: F, presenter: &mut Presenter<V>)
  -> Result<(), Self::Error>;
}

/// 只分析一帧，全部在当前线程完成
pub struct OneShotTask;

impl<S, F, A, V> Task<S, F, V> for OneShotTask
where
  S: FrameSource,
  F: FnOnce(UiNotifier) -> A,
  A: Analyzer,
  V: View,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut source: S,
    factory: F,
    presenter: &mut Presenter<V>,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();
    let mut analyzer = factory(UiNotifier::new(tx));

    let frame = source
      .next_frame()
      .ok_or_else(|| anyhow!("没有输入帧"))?;
    let result = analyzer.on_frame(frame);
    analyzer.close();
    drop(analyzer);

    if let Some(result) = &result {
      info!("分析完成，耗时: {:.2?}", result.analysis_duration);
      presenter.apply(result);
    }

    if let Some(UiEvent::FatalError(message)) = rx.try_iter().next() {
      presenter.show_error(&message);
      bail!("图像分析出错: {}", message);
    }
    if result.is_none() {
      warn!("该帧没有产生分析结果");
    }
    Ok(())
  }
}

/// 采集线程、分析线程与界面线程并行运行，直到输入结束、
/// 达到帧数上限、收到中断或出现致命错误
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  fn install_interrupt(&self, stop: &Arc<AtomicBool>) {
    if !self.interrupt {
      return;
    }
    let stop = stop.clone();
    let installed = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_DELAY);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = installed {
      warn!("无法设置中断处理: {}", e);
    }
  }
}

impl<S, F, A, V> Task<S, F, V> for ContinuousTask
where
  S: FrameSource + Send,
  F: FnOnce(UiNotifier) -> A + Send,
  A: Analyzer,
  V: View,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut source: S,
    factory: F,
    presenter: &mut Presenter<V>,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    self.install_interrupt(&stop);

    let latest = LatestFrame::new();
    let (tx, rx) = mpsc::channel();
    let frame_number = self.frame_number;
    let mut fatal = None;

    thread::scope(|scope| {
      let latest = &latest;
      let stop = &stop;

      scope.spawn(move || {
        let mut captured = 0usize;
        while !stop.load(Ordering::SeqCst) {
          let Some(frame) = source.next_frame() else {
            info!("输入结束");
            break;
          };
          latest.publish(frame);
          captured += 1;
          if frame_number.is_some_and(|n| captured >= n) {
            info!("达到指定帧数 {}, 停止采集", captured);
            break;
          }
        }
        latest.close();
      });

      scope.spawn(move || {
        let mut analyzer = factory(UiNotifier::new(tx.clone()));
        while let Some(frame) = latest.take() {
          if stop.load(Ordering::SeqCst) {
            break;
          }
          if let Some(result) = analyzer.on_frame(frame)
            && tx.send(UiEvent::Result(result)).is_err()
          {
            break;
          }
        }
        analyzer.close();
        let _ = tx.send(UiEvent::Finished);
      });

      loop {
        match rx.recv_timeout(UI_POLL_INTERVAL) {
          Ok(UiEvent::Result(result)) => {
            debug!("更新界面，分析耗时 {:.2?}", result.analysis_duration);
            presenter.apply(&result);
          }
          Ok(UiEvent::FatalError(message)) => {
            presenter.show_error(&message);
            if fatal.is_none() {
              fatal = Some(message);
            }
            stop.store(true, Ordering::SeqCst);
            latest.close();
          }
          Ok(UiEvent::Finished) | Err(RecvTimeoutError::Disconnected) => break,
          Err(RecvTimeoutError::Timeout) => {
            if stop.load(Ordering::SeqCst) {
              latest.close();
            }
          }
        }
      }
      stop.store(true, Ordering::SeqCst);
    });

    info!("任务完成，丢弃 {} 帧", latest.dropped());
    match fatal {
      Some(message) => bail!("图像分析出错: {}", message),
      None => Ok(()),
    }
  }
}
