// 该文件是 Tanzhao （探照） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use tanzhao::render::DEFAULT_MAX_HEIGHT;
use tanzhao::upload::DEFAULT_ROUTE;

/// Tanzhao 目标检测演示：上传图像并绘制检测结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务根地址（http/https）
  #[arg(long, value_name = "URL")]
  pub api_url: Url,

  /// 追加在根地址后的路由
  #[arg(long, default_value = DEFAULT_ROUTE, value_name = "ROUTE")]
  pub route: String,

  /// 模型描述 JSON（file:// 地址），提供类型与大小约束
  #[arg(long, value_name = "DESCRIPTOR")]
  pub descriptor: Option<Url>,

  /// 输入图像（file:// 地址）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出图像（image:// 地址），加上 `?record=true` 同时写出检测记录
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 布局宽度
  #[arg(long, default_value = "800", value_name = "PIXELS")]
  pub layout_width: u32,

  /// 固定渲染宽度，覆盖布局宽度
  #[arg(long, value_name = "PIXELS")]
  pub width: Option<u32>,

  /// 渲染最大高度
  #[arg(long, default_value_t = DEFAULT_MAX_HEIGHT, value_name = "PIXELS")]
  pub max_height: u32,

  /// 模拟指针位置，格式为 `x,y`
  #[arg(long, value_parser = parse_point, value_name = "X,Y")]
  pub pointer: Option<(f64, f64)>,

  /// 直接选中第几个检测结果
  #[arg(long, value_name = "INDEX")]
  pub select: Option<usize>,

  /// 等待推理结果的秒数
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub timeout: u64,

  /// endpoint-name 请求头
  #[arg(long, env = "TANZHAO_ENDPOINT_NAME")]
  pub endpoint_name: Option<String>,

  /// mvs-info 请求头
  #[arg(long, env = "TANZHAO_MVS_INFO")]
  pub mvs_info: Option<String>,
}

fn parse_point(value: &str) -> Result<(f64, f64), String> {
  let (x, y) = value
    .split_once(',')
    .ok_or_else(|| format!("期望 `x,y`，实际 '{}'", value))?;
  let x = x.trim().parse().map_err(|e| format!("无效的 x 坐标: {}", e))?;
  let y = y.trim().parse().map_err(|e| format!("无效的 y 坐标: {}", e))?;
  Ok((x, y))
}
