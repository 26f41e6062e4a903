// 该文件是 Tanzhao （探照） 项目的一部分。
// src/controller.rs - 标注控制器：上传、渲染与高亮的组合
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

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::failure::{ErrorKind, FailureSource, Incoming, Resolution, resolve};
use crate::format::{ObjectDetails, describe_object};
use crate::geometry::{RenderGeometry, hit_test};
use crate::input::ImageFile;
use crate::model::{DetectResult, DetectionObject, ModelDescriptor, UploadOutcome};
use crate::output::draw::Draw;
use crate::render::{BitmapDecoded, Painted, PointerHook, Redraw, RenderConfig, RenderPipeline};
use crate::upload::{EndpointConfig, SelectOutcome, Transport, UploadSettled, Uploader};

pub const UPLOADING_MESSAGE: &str = "Uploading";

/// 后台任务完成后送回控制器的事件
#[derive(Debug)]
pub enum Event {
  BitmapDecoded(BitmapDecoded),
  UploadSettled(UploadSettled),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetStatus {
  Initial,
  Uploading,
  Failed { kind: ErrorKind, source: FailureSource },
  InferenceComplete,
}

impl WidgetStatus {
  fn failure_source(&self) -> Option<FailureSource> {
    match self {
      WidgetStatus::Failed { source, .. } => Some(*source),
      _ => None,
    }
  }
}

/// 结果区域应展示的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultView {
  /// 尚未收到任何响应，显示占位内容
  Placeholder,
  /// 已收到响应，但没有检测框
  NoResults,
  Results(usize),
}

// 指针命中测试，结果写回高亮索引
struct Highlighter<'a> {
  objects: &'a [DetectionObject],
  highlighted: &'a mut Option<usize>,
}

impl PointerHook for Highlighter<'_> {
  fn on_pointer_move(&mut self, x: f64, y: f64, geometry: Option<&RenderGeometry>) -> Redraw {
    *self.highlighted = geometry.and_then(|geometry| hit_test(self.objects, geometry, x, y));
    Redraw::Skip
  }
}

pub struct AnnotationController {
  model: ModelDescriptor,
  uploader: Uploader,
  pipeline: RenderPipeline,
  draw: Draw,
  events: Receiver<Event>,
  status: WidgetStatus,
  outcome: Option<UploadOutcome>,
  detections: DetectResult,
  highlighted: Option<usize>,
}

impl AnnotationController {
  pub fn new(
    model: ModelDescriptor,
    endpoint: EndpointConfig,
    transport: Arc<dyn Transport>,
    config: RenderConfig,
    layout_width: u32,
  ) -> Self {
    let (tx, rx) = mpsc::channel();
    let mut controller = Self {
      model,
      uploader: Uploader::new(endpoint, transport, tx.clone()),
      pipeline: RenderPipeline::new(config, layout_width, tx),
      draw: Draw::default(),
      events: rx,
      status: WidgetStatus::Initial,
      outcome: None,
      detections: DetectResult::default(),
      highlighted: None,
    };
    controller.repaint();
    controller
  }

  pub fn status(&self) -> WidgetStatus {
    self.status
  }

  pub fn model(&self) -> &ModelDescriptor {
    &self.model
  }

  pub fn outcome(&self) -> Option<&UploadOutcome> {
    self.outcome.as_ref()
  }

  pub fn detections(&self) -> &DetectResult {
    &self.detections
  }

  pub fn highlighted(&self) -> Option<usize> {
    self.highlighted
  }

  pub fn surface(&self) -> &RgbaImage {
    self.pipeline.surface()
  }

  pub fn geometry(&self) -> Option<&RenderGeometry> {
    self.pipeline.geometry()
  }

  /// 尚未完成的解码与上传任务数
  pub fn pending(&self) -> usize {
    self.pipeline.in_flight() + self.uploader.in_flight()
  }

  pub fn select_file(&mut self, file: ImageFile) -> SelectOutcome {
    self.select_file_with(file, |_| true)
  }

  /// 选择文件，`veto` 返回 `false` 时取消上传
  pub fn select_file_with<F>(&mut self, file: ImageFile, veto: F) -> SelectOutcome
  where
    F: FnOnce(&ImageFile) -> bool,
  {
    let outcome = self.uploader.select_file(&file, &self.model, veto);
    match outcome {
      SelectOutcome::Rejected(kind) => self.fail(kind, FailureSource::Uploader),
      SelectOutcome::Vetoed => {}
      SelectOutcome::Started { generation } => {
        info!("开始处理 {}，上传代数 {}", file.name(), generation);
        self.outcome = None;
        self.detections = DetectResult::default();
        self.highlighted = None;
        self.status = WidgetStatus::Uploading;
        self.pipeline.set_image(Some(file));
      }
    }
    self.repaint();
    outcome
  }

  /// 处理已经就绪的事件，不阻塞
  pub fn pump(&mut self) -> usize {
    let mut handled = 0;
    while let Ok(event) = self.events.try_recv() {
      self.handle(event);
      handled += 1;
    }
    handled
  }

  /// 阻塞直到没有进行中的任务，超时返回 `false`
  pub fn wait_settled(&mut self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      self.pump();
      if self.pending() == 0 {
        return true;
      }

      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.events.recv_timeout(remaining) {
        Ok(event) => self.handle(event),
        Err(RecvTimeoutError::Timeout) => {
          warn!("等待超时，仍有 {} 个任务未完成", self.pending());
          return false;
        }
        Err(RecvTimeoutError::Disconnected) => return false,
      }
    }
  }

  pub fn resize(&mut self, layout_width: u32, now: Instant) {
    self.pipeline.resize(layout_width, now);
    self.repaint();
  }

  pub fn pointer_moved(&mut self, x: f64, y: f64) {
    self.pipeline.pointer_moved(x, y);
  }

  /// 动画帧
  pub fn tick(&mut self, now: Instant) -> Painted {
    let Self {
      pipeline,
      detections,
      highlighted,
      ..
    } = self;
    let mut hook = Highlighter {
      objects: &detections.items,
      highlighted,
    };
    pipeline.tick(now, &mut hook);
    self.repaint()
  }

  /// 结果表格中的选择，越界索引视为取消选择
  pub fn select_result(&mut self, index: Option<usize>) -> Painted {
    self.highlighted = index.filter(|&index| index < self.detections.len());
    self.repaint()
  }

  /// 当前状态下展示给用户的提示
  pub fn overlay_message(&self) -> Option<&'static str> {
    match self.status {
      WidgetStatus::Initial | WidgetStatus::InferenceComplete => None,
      WidgetStatus::Uploading => Some(UPLOADING_MESSAGE),
      WidgetStatus::Failed { kind, .. } => Some(kind.user_message()),
    }
  }

  pub fn result_view(&self) -> ResultView {
    let received = self.outcome.as_ref().is_some_and(|outcome| {
      outcome.standard_inference.is_some() || !outcome.raw_response.is_empty()
    });
    match (received, self.detections.len()) {
      (false, _) => ResultView::Placeholder,
      (true, 0) => ResultView::NoResults,
      (true, count) => ResultView::Results(count),
    }
  }

  /// 当前高亮检测框的详情
  pub fn object_details(&self) -> Option<ObjectDetails> {
    self
      .highlighted
      .and_then(|index| self.detections.items.get(index))
      .map(describe_object)
  }

  fn handle(&mut self, event: Event) {
    match event {
      Event::BitmapDecoded(decoded) => {
        if let Err(e) = self.pipeline.on_bitmap_decoded(decoded) {
          self.fail(e.kind(), FailureSource::Renderer);
        }
      }
      Event::UploadSettled(settled) => match self.uploader.settle(settled) {
        None => {}
        Some(Ok(outcome)) => self.complete(outcome),
        Some(Err(kind)) => self.fail(kind, FailureSource::Uploader),
      },
    }
    self.repaint();
  }

  fn complete(&mut self, outcome: UploadOutcome) {
    self.detections = outcome.detections();
    info!("推理完成，共 {} 个检测框", self.detections.len());
    self.outcome = Some(outcome);

    let current = self.status.failure_source();
    if resolve(current, Incoming::UploadSucceeded) == Resolution::Replace {
      self.status = WidgetStatus::InferenceComplete;
    }
  }

  fn fail(&mut self, kind: ErrorKind, source: FailureSource) {
    let current = self.status.failure_source();
    match resolve(current, Incoming::Failed(source)) {
      Resolution::Replace => {
        warn!("{:?} 失败: {}", source, kind);
        self.status = WidgetStatus::Failed { kind, source };
      }
      Resolution::Keep => debug!("保留已有的失败状态，忽略 {:?}: {}", source, kind),
    }
  }

  fn repaint(&mut self) -> Painted {
    self
      .pipeline
      .set_rerender_key(&(self.outcome.is_some(), self.highlighted));

    let Self {
      pipeline,
      draw,
      detections,
      highlighted,
      ..
    } = self;
    pipeline.flush(|surface, geometry| {
      if let Some(geometry) = geometry {
        draw.draw_detections(surface, geometry, &detections.items, *highlighted);
      }
    })
  }
}
