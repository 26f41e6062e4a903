// 该文件是 Tanzhao （探照） 项目的一部分。
// src/geometry.rs - 渲染几何与命中测试
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

use crate::model::DetectionObject;

/// 位图在绘制表面中的位置与缩放，每次重绘重新计算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGeometry {
  /// 图像左侧偏移
  pub x: f64,
  /// 图像顶部偏移
  pub y: f64,
  /// 渲染宽度
  pub width: f64,
  /// 渲染高度
  pub height: f64,
  /// 渲染尺寸相对原始位图的比例
  pub scale: f64,
}

/// 按目标宽度缩放位图；超过最大高度时按高度缩放并水平居中（只留边，不裁剪）
pub fn compute_geometry(
  bitmap_width: u32,
  bitmap_height: u32,
  target_width: f64,
  max_height: Option<f64>,
) -> RenderGeometry {
  let scale = target_width / bitmap_width as f64;
  let height = scale * bitmap_height as f64;

  let mut geometry = RenderGeometry {
    x: 0.0,
    y: 0.0,
    width: target_width,
    height,
    scale,
  };

  if let Some(max_height) = max_height
    && height > max_height
  {
    let scale = max_height / bitmap_height as f64;
    geometry.scale = scale;
    geometry.width = scale * bitmap_width as f64;
    geometry.height = max_height;
    geometry.x = (target_width - geometry.width) / 2.0;
  }

  geometry
}

/// 检测框坐标的表示方式，对整组结果统一推断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateMode {
  /// 原图分辨率下的像素坐标
  Pixel,
  /// `[0, 1]` 范围内的比例坐标
  Fractional,
}

impl CoordinateMode {
  /// 非空且每个框的每个坐标都不大于 1 时为比例坐标，空集合按像素处理
  pub fn infer(objects: &[DetectionObject]) -> Self {
    if !objects.is_empty() && objects.iter().all(|o| o.max_coordinate() <= 1.0) {
      CoordinateMode::Fractional
    } else {
      CoordinateMode::Pixel
    }
  }
}

/// 检测框坐标到表面坐标的缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxScale {
  pub mode: CoordinateMode,
  pub x: f64,
  pub y: f64,
}

impl BoxScale {
  pub fn new(geometry: &RenderGeometry, objects: &[DetectionObject]) -> Self {
    let mode = CoordinateMode::infer(objects);
    let (x, y) = match mode {
      CoordinateMode::Pixel => (geometry.scale, geometry.scale),
      CoordinateMode::Fractional => (geometry.width, geometry.height),
    };
    Self { mode, x, y }
  }

  /// 表面上的指针位置换算为检测框坐标
  pub fn to_bitmap(&self, geometry: &RenderGeometry, pointer_x: f64, pointer_y: f64) -> (f64, f64) {
    (
      (pointer_x - geometry.x) / self.x,
      (pointer_y - geometry.y) / self.y,
    )
  }

  /// 检测框在表面上的矩形
  pub fn to_surface(&self, geometry: &RenderGeometry, object: &DetectionObject) -> SurfaceRect {
    SurfaceRect {
      left: geometry.x + self.x * object.left,
      top: geometry.y + self.y * object.top,
      width: self.x * (object.right - object.left),
      height: self.y * (object.bottom - object.top),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
  pub left: f64,
  pub top: f64,
  pub width: f64,
  pub height: f64,
}

/// 点到矩形最近边的有符号内距，点在框内时非负
pub fn border_distance(object: &DetectionObject, x: f64, y: f64) -> f64 {
  (x - object.left)
    .min(object.right - x)
    .min(y - object.top)
    .min(object.bottom - y)
}

/// 在检测框坐标系中选出包含该点且内距最小的框；并列时取先出现的
pub fn nearest_containing(objects: &[DetectionObject], x: f64, y: f64) -> Option<usize> {
  objects
    .iter()
    .enumerate()
    .map(|(index, object)| (index, border_distance(object, x, y)))
    .fold(None, |best: Option<(usize, f64)>, (index, distance)| {
      if distance < 0.0 || distance.is_nan() {
        return best;
      }
      match best {
        Some((_, closest)) if distance >= closest => best,
        _ => Some((index, distance)),
      }
    })
    .map(|(index, _)| index)
}

/// 表面上的指针位置命中测试
pub fn hit_test(
  objects: &[DetectionObject],
  geometry: &RenderGeometry,
  pointer_x: f64,
  pointer_y: f64,
) -> Option<usize> {
  if objects.is_empty() {
    return None;
  }
  let scale = BoxScale::new(geometry, objects);
  let (x, y) = scale.to_bitmap(geometry, pointer_x, pointer_y);
  nearest_containing(objects, x, y)
}
