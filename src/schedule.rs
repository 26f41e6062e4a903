// 该文件是 Tanzhao （探照） 项目的一部分。
// src/schedule.rs - 节流与按帧合并
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

use std::time::{Duration, Instant};

/// 调整尺寸的默认节流间隔
pub const RESIZE_THROTTLE: Duration = Duration::from_millis(200);

/// 节流器：每个间隔内最多放行一次，窗口内到达的最新值在窗口结束后放行
#[derive(Debug, Clone)]
pub struct Throttle<T> {
  interval: Duration,
  last_fired: Option<Instant>,
  pending: Option<T>,
}

impl<T> Throttle<T> {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      last_fired: None,
      pending: None,
    }
  }

  /// 提交新值。窗口已经结束时立即放行，否则暂存等待 `poll`
  pub fn submit(&mut self, value: T, now: Instant) -> Option<T> {
    if self.window_elapsed(now) {
      self.last_fired = Some(now);
      self.pending = None;
      Some(value)
    } else {
      self.pending = Some(value);
      None
    }
  }

  /// 放行窗口结束前暂存的最新值
  pub fn poll(&mut self, now: Instant) -> Option<T> {
    if self.pending.is_some() && self.window_elapsed(now) {
      self.last_fired = Some(now);
      self.pending.take()
    } else {
      None
    }
  }

  fn window_elapsed(&self, now: Instant) -> bool {
    self
      .last_fired
      .map(|fired| now.saturating_duration_since(fired) >= self.interval)
      .unwrap_or(true)
  }
}

/// 每帧最多处理一次的待办值，新值覆盖尚未处理的旧值
#[derive(Debug, Clone, Default)]
pub struct FrameCoalescer<T> {
  pending: Option<T>,
}

impl<T> FrameCoalescer<T> {
  pub fn new() -> Self {
    Self { pending: None }
  }

  /// 安排下一帧处理，返回被取消的旧值
  pub fn schedule(&mut self, value: T) -> Option<T> {
    self.pending.replace(value)
  }

  /// 帧到来时取出待办值
  pub fn take(&mut self) -> Option<T> {
    self.pending.take()
  }
}
