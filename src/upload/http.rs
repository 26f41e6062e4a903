// 该文件是 Tanzhao （探照） 项目的一部分。
// src/upload/http.rs - 基于 reqwest 的 HTTP 传输
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

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use super::{RawResponse, Transport, TransportError, UploadRequest};

pub struct HttpTransport {
  client: Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = Client::builder()
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: &UploadRequest) -> Result<RawResponse, TransportError> {
    let mut builder = self
      .client
      .post(request.url.clone())
      .header(CONTENT_TYPE, request.content_type.as_str())
      .body(request.body.to_vec());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send()?;
    let status = response.status().as_u16();
    debug!("收到响应: HTTP {}", status);

    // 已经拿到状态码，正文读取失败交给解析阶段处理
    let body = match response.bytes() {
      Ok(bytes) => bytes.to_vec(),
      Err(e) => {
        warn!("读取响应正文失败: {}", e);
        Vec::new()
      }
    };

    Ok(RawResponse { status, body })
  }
}
