// 该文件是 Tanzhao （探照） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tanzhao::{
  FromUrl,
  controller::{AnnotationController, ResultView},
  input::ImageFile,
  model::ModelDescriptor,
  output::SaveImageFileOutput,
  render::RenderConfig,
  task::{OneShotTask, Task},
  upload::{EndpointConfig, HttpTransport},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("推理服务: {} (路由 {})", args.api_url, args.route);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let model = match &args.descriptor {
    Some(url) => ModelDescriptor::from_url(url)?,
    None => ModelDescriptor::default(),
  };
  if let Some(requirements) = model.requirements("image") {
    info!("{}", requirements);
  }

  let endpoint = EndpointConfig::with_route(&args.api_url, &args.route)?
    .endpoint_name(args.endpoint_name.clone())
    .mvs_info(args.mvs_info.clone());
  let transport = Arc::new(HttpTransport::new()?);
  let config = RenderConfig {
    width: args.width,
    max_height: Some(args.max_height),
    ..RenderConfig::default()
  };

  let mut controller = AnnotationController::new(model, endpoint, transport, config, args.layout_width);
  let input = ImageFile::from_url(&args.input)?;
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let task = OneShotTask {
    timeout: Duration::from_secs(args.timeout),
    pointer: args.pointer,
    select: args.select,
  };
  task.run_task(&mut controller, input, output)?;

  println!("状态: {:?}", controller.status());
  if let Some(message) = controller.overlay_message() {
    println!("{}", message);
  }
  match controller.result_view() {
    ResultView::Placeholder => println!("尚未收到推理结果"),
    ResultView::NoResults => println!("没有检测结果"),
    ResultView::Results(count) => println!("检测数: {}", count),
  }
  if let Some(details) = controller.object_details() {
    println!("选中: {} ({})", details.label, details.confidence);
    for (key, value) in &details.entries {
      println!("  - {}: {}", key, value);
    }
  }

  Ok(())
}
