// 该文件是 Tanzhao （探照） 项目的一部分。
// src/render.rs - 位图解码与渲染流水线
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

use std::hash::{DefaultHasher, Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::controller::Event;
use crate::failure::ErrorKind;
use crate::geometry::{RenderGeometry, compute_geometry};
use crate::input::{FileId, ImageFile, ImageFileInputError};
use crate::schedule::{FrameCoalescer, RESIZE_THROTTLE, Throttle};

/// 默认的渲染最大高度
pub const DEFAULT_MAX_HEIGHT: u32 = 800;
/// 没有图像时表面的默认高度
pub const DEFAULT_SURFACE_HEIGHT: u32 = 150;

/// 解码后的位图，在重绘之间共享
pub type Bitmap = Arc<RgbaImage>;

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("位图解码失败: {0}")]
  Decode(#[from] ImageFileInputError),
  #[error("位图尺寸为零")]
  EmptyBitmap,
  #[error("解码线程异常退出")]
  DecodePanicked,
}

impl RenderError {
  pub fn kind(&self) -> ErrorKind {
    ErrorKind::BitmapDecodeError
  }
}

/// 渲染配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
  /// 固定宽度，未设置时跟随布局宽度
  pub width: Option<u32>,
  pub max_height: Option<u32>,
  pub default_height: u32,
  pub resize_throttle: Duration,
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      width: None,
      max_height: Some(DEFAULT_MAX_HEIGHT),
      default_height: DEFAULT_SURFACE_HEIGHT,
      resize_throttle: RESIZE_THROTTLE,
    }
  }
}

/// 解码完成事件，带有发起时的代数
#[derive(Debug)]
pub struct BitmapDecoded {
  pub generation: u64,
  pub file: FileId,
  pub result: Result<Bitmap, RenderError>,
}

/// 指针回调是否需要额外重绘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redraw {
  Skip,
  /// 强制重绘。正常情况下高亮变化会通过重绘键触发重绘，很少需要这个
  Request,
}

pub trait PointerHook {
  fn on_pointer_move(&mut self, x: f64, y: f64, geometry: Option<&RenderGeometry>) -> Redraw;
}

/// 一次 `flush` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Painted {
  /// 无需重绘
  Clean,
  /// 已绘制新的一帧
  Frame,
  /// 位图仍在解码，重绘保持挂起
  AwaitingBitmap,
  /// 位图不可用，表面已清空
  Blank,
}

#[derive(Debug, Clone)]
enum BitmapSlot {
  Missing,
  Decoding,
  Ready(Bitmap),
  Failed,
}

pub struct RenderPipeline {
  config: RenderConfig,
  events: Sender<Event>,
  surface: RgbaImage,
  image: Option<ImageFile>,
  generation: u64,
  bitmap: BitmapSlot,
  geometry: Option<RenderGeometry>,
  layout_width: u32,
  last_width: u32,
  resize: Throttle<u32>,
  pointer: FrameCoalescer<(f64, f64)>,
  rerender_key: Option<u64>,
  dirty: bool,
  in_flight: usize,
}

impl RenderPipeline {
  pub fn new(config: RenderConfig, layout_width: u32, events: Sender<Event>) -> Self {
    let last_width = config.width.unwrap_or(layout_width);
    Self {
      config,
      events,
      surface: RgbaImage::new(0, 0),
      image: None,
      generation: 0,
      bitmap: BitmapSlot::Missing,
      geometry: None,
      layout_width,
      last_width,
      resize: Throttle::new(config.resize_throttle),
      pointer: FrameCoalescer::new(),
      rerender_key: None,
      dirty: true,
      in_flight: 0,
    }
  }

  pub fn surface(&self) -> &RgbaImage {
    &self.surface
  }

  /// 最近一帧的几何信息，没有图像时为 `None`
  pub fn geometry(&self) -> Option<&RenderGeometry> {
    self.geometry.as_ref()
  }

  pub fn image(&self) -> Option<&ImageFile> {
    self.image.as_ref()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// 尚未返回的解码任务数
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  /// 生效的目标宽度
  pub fn target_width(&self) -> u32 {
    self.config.width.unwrap_or(self.layout_width)
  }

  /// 更换源文件。同一文件复用已解码的位图，上次解码失败时重新解码
  pub fn set_image(&mut self, image: Option<ImageFile>) -> bool {
    let current = self.image.as_ref().map(ImageFile::id);
    let incoming = image.as_ref().map(ImageFile::id);
    if current == incoming && !matches!(self.bitmap, BitmapSlot::Failed) {
      return false;
    }

    self.generation += 1;
    debug!(
      "源文件变化: {:?} -> {:?}，代数 {}",
      current, incoming, self.generation
    );
    self.image = image;
    self.bitmap = BitmapSlot::Missing;
    self.dirty = true;
    true
  }

  /// 重绘键变化时标记重绘，键的值本身不被使用
  pub fn set_rerender_key<K: Hash>(&mut self, key: &K) -> bool {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let key = hasher.finish();

    if self.rerender_key == Some(key) {
      return false;
    }
    self.rerender_key = Some(key);
    self.dirty = true;
    true
  }

  /// 布局宽度变化（节流）
  pub fn resize(&mut self, layout_width: u32, now: Instant) {
    if let Some(width) = self.resize.submit(layout_width, now) {
      self.apply_layout_width(width);
    }
  }

  fn apply_layout_width(&mut self, layout_width: u32) {
    self.layout_width = layout_width;
    let width = self.target_width();
    if width != self.last_width {
      debug!("表面宽度变化: {} -> {}", self.last_width, width);
      self.last_width = width;
      self.dirty = true;
    }
  }

  /// 记录指针位置，下一帧统一处理
  pub fn pointer_moved(&mut self, x: f64, y: f64) {
    self.pointer.schedule((x, y));
  }

  /// 动画帧：放行节流中的尺寸变化，并处理最新的指针位置
  pub fn tick<H: PointerHook>(&mut self, now: Instant, hook: &mut H) -> Redraw {
    if let Some(width) = self.resize.poll(now) {
      self.apply_layout_width(width);
    }

    let Some((x, y)) = self.pointer.take() else {
      return Redraw::Skip;
    };

    let redraw = hook.on_pointer_move(x, y, self.geometry.as_ref());
    if redraw == Redraw::Request {
      warn!("指针回调请求重绘");
      self.dirty = true;
    }
    redraw
  }

  /// 处理解码完成事件。过期代数的结果直接丢弃
  pub fn on_bitmap_decoded(&mut self, decoded: BitmapDecoded) -> Result<bool, RenderError> {
    self.in_flight = self.in_flight.saturating_sub(1);

    if decoded.generation != self.generation {
      debug!(
        "丢弃过期的解码结果: 代数 {}，当前 {}",
        decoded.generation, self.generation
      );
      return Ok(false);
    }

    let result = decoded.result.and_then(|bitmap| {
      if bitmap.width() == 0 || bitmap.height() == 0 {
        Err(RenderError::EmptyBitmap)
      } else {
        Ok(bitmap)
      }
    });

    match result {
      Ok(bitmap) => {
        info!("位图解码完成: {}x{}", bitmap.width(), bitmap.height());
        self.bitmap = BitmapSlot::Ready(bitmap);
        self.dirty = true;
        Ok(true)
      }
      Err(e) => {
        error!("无法解码所选文件: {}", e);
        self.bitmap = BitmapSlot::Failed;
        self.reset_after_failure();
        Err(e)
      }
    }
  }

  /// 重绘：清空表面，绘制位图，再调用叠加层回调
  pub fn flush<F>(&mut self, draw: F) -> Painted
  where
    F: FnOnce(&mut RgbaImage, Option<&RenderGeometry>),
  {
    if !self.dirty {
      return Painted::Clean;
    }

    let width = self.target_width();
    if self.image.is_none() {
      let height = self.default_height();
      self.surface = RgbaImage::new(width, height);
      self.geometry = None;
      self.dirty = false;
      draw(&mut self.surface, None);
      return Painted::Frame;
    }

    match &self.bitmap {
      BitmapSlot::Missing => {
        self.start_decode();
        Painted::AwaitingBitmap
      }
      BitmapSlot::Decoding => Painted::AwaitingBitmap,
      BitmapSlot::Failed => {
        self.reset_after_failure();
        Painted::Blank
      }
      BitmapSlot::Ready(bitmap) => {
        let bitmap = bitmap.clone();
        let geometry = compute_geometry(
          bitmap.width(),
          bitmap.height(),
          width as f64,
          self.config.max_height.map(f64::from),
        );

        self.surface = RgbaImage::new(width, geometry.height.round() as u32);
        draw_bitmap(&mut self.surface, &bitmap, &geometry);
        self.geometry = Some(geometry);
        self.dirty = false;
        draw(&mut self.surface, Some(&geometry));
        Painted::Frame
      }
    }
  }

  fn start_decode(&mut self) {
    let Some(file) = self.image.clone() else {
      return;
    };
    let generation = self.generation;
    let events = self.events.clone();
    self.bitmap = BitmapSlot::Decoding;
    self.in_flight += 1;

    debug!("开始解码 {}，代数 {}", file.name(), generation);
    thread::spawn(move || {
      let result = match panic::catch_unwind(AssertUnwindSafe(|| file.decode())) {
        Ok(decoded) => decoded.map(Arc::new).map_err(RenderError::from),
        Err(_) => {
          error!("解码线程发生 panic");
          Err(RenderError::DecodePanicked)
        }
      };

      let decoded = BitmapDecoded {
        generation,
        file: file.id(),
        result,
      };
      if events.send(Event::BitmapDecoded(decoded)).is_err() {
        debug!("事件接收端已关闭，丢弃解码结果");
      }
    });
  }

  fn default_height(&self) -> u32 {
    let max_height = self.config.max_height.unwrap_or(self.config.default_height);
    self.config.default_height.min(max_height)
  }

  // 失败后表面重置为宽度一半的空白区域
  fn reset_after_failure(&mut self) {
    let width = self.target_width();
    let max_height = self.config.max_height.unwrap_or(self.config.default_height);
    self.surface = RgbaImage::new(width, (width / 2).min(max_height));
    self.geometry = None;
    self.dirty = false;
  }
}

fn draw_bitmap(surface: &mut RgbaImage, bitmap: &RgbaImage, geometry: &RenderGeometry) {
  let width = geometry.width.round() as u32;
  let height = geometry.height.round() as u32;
  if width == 0 || height == 0 {
    return;
  }

  let x = geometry.x.round() as i64;
  let y = geometry.y.round() as i64;
  if bitmap.dimensions() == (width, height) {
    imageops::replace(surface, bitmap, x, y);
  } else {
    let scaled = imageops::resize(bitmap, width, height, FilterType::Triangle);
    imageops::replace(surface, &scaled, x, y);
  }
}
