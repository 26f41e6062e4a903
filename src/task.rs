// 该文件是 Tanzhao （探照） 项目的一部分。
// src/task.rs - 任务执行
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

use image::RgbaImage;
use tracing::{info, warn};

use crate::{
  controller::AnnotationController, input::ImageFile, model::DetectResult, output::Render,
  upload::SelectOutcome,
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(
    self,
    controller: &mut AnnotationController,
    input: I,
    output: O,
  ) -> Result<(), Self::Error>;
}

/// 上传一张图像，等待推理与解码完成，再输出绘制结果
pub struct OneShotTask {
  pub timeout: Duration,
  /// 模拟一次指针移动（表面坐标）
  pub pointer: Option<(f64, f64)>,
  /// 直接选中某个结果，`pointer` 优先
  pub select: Option<usize>,
}

impl<RE, O> Task<ImageFile, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<RgbaImage, DetectResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    controller: &mut AnnotationController,
    input: ImageFile,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务: {} ({} 字节)", input.name(), input.size());
    let now = Instant::now();

    match controller.select_file(input) {
      SelectOutcome::Started { .. } => {
        if !controller.wait_settled(self.timeout) {
          anyhow::bail!("等待推理结果超时 ({:.2?})", self.timeout);
        }
        info!("推理完成，耗时: {:.2?}", now.elapsed());
      }
      outcome => warn!("未发出请求: {:?}", outcome),
    }

    if let Some((x, y)) = self.pointer {
      controller.pointer_moved(x, y);
      controller.tick(Instant::now());
    } else if let Some(index) = self.select {
      controller.select_result(Some(index));
    }

    output.render_result(controller.surface(), controller.detections())?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}
