// 该文件是 Tanzhao （探照） 项目的一部分。
// src/output/draw.rs - 检测框叠加层绘制
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

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{Blend, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use crate::format::NO_VALUE_LABEL;
use crate::geometry::{BoxScale, RenderGeometry, SurfaceRect};
use crate::model::{DetectionObject, WithLabel};

const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_MARGIN: f32 = 5.0;
// 标签移入框内时的下移比例
const LABEL_INSIDE_FACTOR: f32 = 0.8;

const ACCENT_COLOR: [u8; 3] = [0x00, 0x76, 0xff];
const OK_COLOR: [u8; 3] = [124, 252, 0]; // lawngreen
const FAIL_COLOR: [u8; 3] = [255, 0, 0];
const LINE_COLOR: [u8; 3] = [255, 255, 255];

const OPAQUE: u8 = 255;
/// 存在高亮时其余检测框的透明度（0.2）
const DIMMED: u8 = 51;

/// 类别对应的描边颜色
pub fn class_color(class: Option<&str>) -> [u8; 3] {
  match class {
    Some("OK") => OK_COLOR,
    Some("FAIL") => FAIL_COLOR,
    _ => ACCENT_COLOR,
  }
}

fn with_alpha(color: [u8; 3], alpha: u8) -> Rgba<u8> {
  Rgba([color[0], color[1], color[2], alpha])
}

pub struct Draw {
  font: FontArc,
  font_scale: PxScale,
  margin: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new()
  }
}

impl Draw {
  pub fn new() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      margin: LABEL_MARGIN,
    }
  }

  /// 在表面上绘制全部检测框。有高亮时，其余检测框以 0.2 的透明度绘制
  pub fn draw_detections(
    &self,
    surface: &mut RgbaImage,
    geometry: &RenderGeometry,
    objects: &[DetectionObject],
    highlighted: Option<usize>,
  ) {
    if objects.is_empty() {
      return;
    }

    let scale = BoxScale::new(geometry, objects);
    let bounds = surface.dimensions();
    let mut canvas = Blend(std::mem::replace(surface, RgbaImage::new(0, 0)));

    for (index, object) in objects.iter().enumerate() {
      let alpha = match highlighted {
        Some(selected) if selected != index => DIMMED,
        _ => OPAQUE,
      };
      let rect = scale.to_surface(geometry, object);
      if is_off_surface(&rect, bounds) {
        debug!("检测框 {} 完全位于表面之外，跳过", index);
        continue;
      }
      let color = class_color(object.class.as_deref());
      let label = object
        .to_label_str()
        .unwrap_or_else(|| NO_VALUE_LABEL.to_string());

      stroke_box(&mut canvas, &rect, bounds, color, alpha);
      self.draw_label(&mut canvas, &rect, bounds, &label, color, alpha);
    }

    *surface = canvas.0;
  }

  fn draw_label(
    &self,
    canvas: &mut Blend<RgbaImage>,
    rect: &SurfaceRect,
    (surface_width, surface_height): (u32, u32),
    label: &str,
    color: [u8; 3],
    alpha: u8,
  ) {
    let font_size = self.font_scale.y;
    let mut text_x = rect.left as f32;
    let mut baseline = rect.top as f32 - self.margin;

    // 超出表面顶部时移入框内
    if baseline - font_size < 0.0 {
      baseline += 2.0 * self.margin + LABEL_INSIDE_FACTOR * font_size;
      text_x += self.margin;
    }

    // 标签位置限制在表面附近
    let (limit_x, limit_y) = (surface_width as f32, surface_height as f32);
    let scaled = self.font.as_scaled(self.font_scale);
    let top = (baseline - scaled.ascent()).clamp(-limit_y, limit_y).round() as i32;
    let line_height = (scaled.ascent() - scaled.descent()).ceil().max(1.0) as u32;
    let (text_width, _) = text_size(self.font_scale, &self.font, label);
    let x = text_x.clamp(-limit_x, limit_x).round() as i32;

    draw_filled_rect_mut(
      canvas,
      Rect::at(x, top).of_size(text_width.max(1), line_height),
      with_alpha(color, alpha),
    );
    draw_text_mut(
      canvas,
      with_alpha(LINE_COLOR, alpha),
      x,
      top,
      self.font_scale,
      &self.font,
      label,
    );
  }
}

fn is_off_surface(rect: &SurfaceRect, (width, height): (u32, u32)) -> bool {
  rect.left + rect.width < 0.0
    || rect.top + rect.height < 0.0
    || rect.left > width as f64
    || rect.top > height as f64
}

fn stroke_box(
  canvas: &mut Blend<RgbaImage>,
  rect: &SurfaceRect,
  (surface_width, surface_height): (u32, u32),
  color: [u8; 3],
  alpha: u8,
) {
  if !(rect.width.round() >= 1.0 && rect.height.round() >= 1.0) {
    return;
  }

  // 裁剪到表面范围，外侧保留一像素给阴影
  let left = rect.left.max(-1.0);
  let top = rect.top.max(-1.0);
  let right = (rect.left + rect.width).min(surface_width as f64 + 1.0);
  let bottom = (rect.top + rect.height).min(surface_height as f64 + 1.0);
  let width = (right - left).round();
  let height = (bottom - top).round();
  if width < 1.0 || height < 1.0 {
    return;
  }

  let (x, y) = (left.round() as i32, top.round() as i32);
  let (width, height) = (width as u32, height as u32);

  // 3 像素宽的类别颜色阴影
  let shadow = with_alpha(color, alpha);
  draw_hollow_rect_mut(
    canvas,
    Rect::at(x.saturating_sub(1), y.saturating_sub(1))
      .of_size(width.saturating_add(2), height.saturating_add(2)),
    shadow,
  );
  if width > 2 && height > 2 {
    draw_hollow_rect_mut(
      canvas,
      Rect::at(x.saturating_add(1), y.saturating_add(1)).of_size(width - 2, height - 2),
      shadow,
    );
  }

  draw_hollow_rect_mut(
    canvas,
    Rect::at(x, y).of_size(width, height),
    with_alpha(LINE_COLOR, alpha),
  );
}
