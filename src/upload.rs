// 该文件是 Tanzhao （探照） 项目的一部分。
// src/upload.rs - 上传状态机与响应分类
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

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::FromUrl;
use crate::controller::Event;
use crate::failure::ErrorKind;
use crate::input::ImageFile;
use crate::model::{ModelDescriptor, UploadOutcome};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use self::http::HttpTransport;

/// 默认的推理路由
pub const DEFAULT_ROUTE: &str = "ride";

pub const ENDPOINT_NAME_HEADER: &str = "endpoint-name";
pub const MVS_INFO_HEADER: &str = "mvs-info";

#[derive(Error, Debug)]
pub enum TransportError {
  #[cfg(feature = "http")]
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("无法连接推理服务: {0}")]
  Unreachable(String),
}

#[derive(Error, Debug)]
pub enum EndpointError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法在该地址后追加路由: {0}")]
  NotABase(Url),
}

/// 推理服务地址与请求头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
  pub url: Url,
  pub endpoint_name: Option<String>,
  pub mvs_info: Option<String>,
}

impl FromUrl for EndpointConfig {
  type Error = EndpointError;

  /// 地址按原样作为请求地址使用
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" => Ok(Self {
        url: url.clone(),
        endpoint_name: None,
        mvs_info: None,
      }),
      other => Err(EndpointError::SchemeMismatch(format!(
        "期望 'http' 或 'https', 实际 '{}'",
        other
      ))),
    }
  }
}

impl EndpointConfig {
  /// 在 API 根地址后追加路由，例如 `https://host/prod` + `ride`
  pub fn with_route(api: &Url, route: &str) -> Result<Self, EndpointError> {
    let mut config = Self::from_url(api)?;
    config
      .url
      .path_segments_mut()
      .map_err(|_| EndpointError::NotABase(api.clone()))?
      .pop_if_empty()
      .push(route);
    Ok(config)
  }

  pub fn endpoint_name(mut self, name: Option<String>) -> Self {
    self.endpoint_name = name;
    self
  }

  pub fn mvs_info(mut self, info: Option<String>) -> Self {
    self.mvs_info = info;
    self
  }

  pub fn request_for(&self, file: &ImageFile) -> UploadRequest {
    let mut headers = Vec::new();
    if let Some(name) = &self.endpoint_name {
      headers.push((ENDPOINT_NAME_HEADER.to_string(), name.clone()));
    }
    if let Some(info) = &self.mvs_info {
      headers.push((MVS_INFO_HEADER.to_string(), info.clone()));
    }

    UploadRequest {
      url: self.url.clone(),
      headers,
      content_type: file.mime().to_string(),
      body: Arc::from(file.bytes()),
    }
  }
}

/// `POST <endpoint>`，正文为原始文件数据
#[derive(Debug, Clone)]
pub struct UploadRequest {
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub content_type: String,
  pub body: Arc<[u8]>,
}

/// 传输层返回的状态码与正文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

pub trait Transport: Send + Sync {
  /// 没有拿到响应时返回错误；拿到任何状态码的响应都应返回 `Ok`
  fn send(&self, request: &UploadRequest) -> Result<RawResponse, TransportError>;
}

/// 响应分类，按顺序判断：
/// 1. 传输失败 → `NetworkError`
/// 2. 非 2xx → 状态码映射，不解析正文
/// 3. 2xx 但正文不是 JSON → `ParsingError`
/// 4. 成功：首元素重新序列化为 `raw_response`，完整顶层保留为 `standard_inference`
pub fn classify_response(
  response: Result<RawResponse, TransportError>,
) -> Result<UploadOutcome, ErrorKind> {
  let response = response.map_err(|e| {
    warn!("没有拿到响应: {}", e);
    ErrorKind::NetworkError
  })?;

  if !(200..300).contains(&response.status) {
    error!("请求失败，HTTP 状态码 {}", response.status);
    return Err(ErrorKind::from_status(response.status));
  }

  let json: Value = serde_json::from_slice(&response.body).map_err(|e| {
    error!("无法将响应解析为 JSON: {}", e);
    ErrorKind::ParsingError
  })?;

  let raw_response = serde_json::to_string(&json[0]).map_err(|e| {
    error!("无法序列化响应首元素: {}", e);
    ErrorKind::Other
  })?;

  Ok(UploadOutcome {
    raw_response,
    standard_inference: Some(json),
  })
}

/// 在文件大小与类型上校验，失败时不发请求
pub fn validate_file(file: &ImageFile, model: &ModelDescriptor) -> Result<(), ErrorKind> {
  let constraints = model.constraints();
  let size = file.size();

  if let Some(max) = constraints.max_length
    && size > max
  {
    return Err(ErrorKind::FileTooLarge);
  }
  if let Some(min) = constraints.min_length
    && size < min
  {
    return Err(ErrorKind::FileConstraintsError);
  }
  if !model.accepts_mime(file.mime()) {
    return Err(ErrorKind::FileConstraintsError);
  }
  Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
  Idle,
  Uploading { generation: u64 },
  Succeeded,
  Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
  /// 校验失败，没有发出请求
  Rejected(ErrorKind),
  /// 调用方否决，没有发出请求
  Vetoed,
  Started { generation: u64 },
}

/// 上传完成事件
#[derive(Debug)]
pub struct UploadSettled {
  pub generation: u64,
  pub result: Result<UploadOutcome, ErrorKind>,
}

pub struct Uploader {
  endpoint: EndpointConfig,
  transport: Arc<dyn Transport>,
  events: Sender<Event>,
  state: UploadState,
  generation: u64,
  in_flight: usize,
}

impl Uploader {
  pub fn new(endpoint: EndpointConfig, transport: Arc<dyn Transport>, events: Sender<Event>) -> Self {
    Self {
      endpoint,
      transport,
      events,
      state: UploadState::Idle,
      generation: 0,
      in_flight: 0,
    }
  }

  pub fn state(&self) -> &UploadState {
    &self.state
  }

  pub fn is_uploading(&self) -> bool {
    matches!(self.state, UploadState::Uploading { .. })
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// 选择文件。任何状态下都可以重新选择，之前的上传结果随之作废
  pub fn select_file<F>(&mut self, file: &ImageFile, model: &ModelDescriptor, veto: F) -> SelectOutcome
  where
    F: FnOnce(&ImageFile) -> bool,
  {
    self.generation += 1;

    if let Err(kind) = validate_file(file, model) {
      warn!("文件 {} 未通过校验: {}", file.name(), kind);
      self.state = UploadState::Failed(kind);
      return SelectOutcome::Rejected(kind);
    }

    if !veto(file) {
      info!("调用方取消了 {} 的上传", file.name());
      self.state = UploadState::Idle;
      return SelectOutcome::Vetoed;
    }

    let generation = self.generation;
    self.state = UploadState::Uploading { generation };
    self.spawn_upload(self.endpoint.request_for(file), generation);
    SelectOutcome::Started { generation }
  }

  fn spawn_upload(&mut self, request: UploadRequest, generation: u64) {
    let transport = self.transport.clone();
    let events = self.events.clone();
    self.in_flight += 1;

    info!("上传 {} 字节到 {}", request.body.len(), request.url);
    thread::spawn(move || {
      let result = panic::catch_unwind(AssertUnwindSafe(|| {
        classify_response(transport.send(&request))
      }))
      .unwrap_or_else(|_| {
        error!("上传过程中出现未处理的异常");
        Err(ErrorKind::Other)
      });

      if events
        .send(Event::UploadSettled(UploadSettled { generation, result }))
        .is_err()
      {
        debug!("事件接收端已关闭，丢弃上传结果");
      }
    });
  }

  /// 处理上传完成事件。只有最新一次选择的结果会被采用
  pub fn settle(&mut self, settled: UploadSettled) -> Option<Result<UploadOutcome, ErrorKind>> {
    self.in_flight = self.in_flight.saturating_sub(1);

    let current = matches!(
      self.state,
      UploadState::Uploading { generation } if generation == settled.generation
    );
    if !current {
      debug!(
        "丢弃过期的上传结果: 代数 {}，当前 {}",
        settled.generation, self.generation
      );
      return None;
    }

    self.state = match &settled.result {
      Ok(_) => UploadState::Succeeded,
      Err(kind) => UploadState::Failed(*kind),
    };
    Some(settled.result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::UploadConstraints;
  use serde_json::json;
  use std::sync::mpsc;
  use std::time::Duration;

  fn ok(status: u16, body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
      status,
      body: body.as_bytes().to_vec(),
    })
  }

  struct Fixed(u16, &'static str);

  impl Transport for Fixed {
    fn send(&self, _: &UploadRequest) -> Result<RawResponse, TransportError> {
      ok(self.0, self.1)
    }
  }

  struct Panics;

  impl Transport for Panics {
    fn send(&self, _: &UploadRequest) -> Result<RawResponse, TransportError> {
      panic!("transport exploded")
    }
  }

  fn endpoint() -> EndpointConfig {
    EndpointConfig::from_url(&Url::parse("http://localhost/ride").unwrap()).unwrap()
  }

  fn settled(rx: &mpsc::Receiver<Event>) -> UploadSettled {
    match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
      Event::UploadSettled(settled) => settled,
      other => panic!("unexpected event: {:?}", other),
    }
  }

  #[test]
  fn classifies_status_codes() {
    assert_eq!(classify_response(ok(413, "")), Err(ErrorKind::FileTooLarge));
    assert_eq!(classify_response(ok(429, "[]")), Err(ErrorKind::RateLimited));
    assert_eq!(classify_response(ok(418, "[]")), Err(ErrorKind::Other));
  }

  #[test]
  fn unparsable_success_is_parsing_error() {
    assert_eq!(
      classify_response(ok(200, "<html>")),
      Err(ErrorKind::ParsingError)
    );
  }

  #[test]
  fn missing_response_is_network_error() {
    let result = classify_response(Err(TransportError::Unreachable("refused".into())));
    assert_eq!(result, Err(ErrorKind::NetworkError));
  }

  #[test]
  fn success_keeps_whole_array_and_first_element() {
    let outcome = classify_response(ok(200, r#"[{"objects":[]},{"extra":1}]"#)).unwrap();
    assert_eq!(outcome.raw_response, r#"{"objects":[]}"#);
    assert_eq!(
      outcome.standard_inference,
      Some(json!([{"objects": []}, {"extra": 1}]))
    );
  }

  #[test]
  fn empty_array_is_a_received_response() {
    let outcome = classify_response(ok(200, "[]")).unwrap();
    assert_eq!(outcome.raw_response, "null");
    assert_eq!(outcome.standard_inference, Some(json!([])));
  }

  #[test]
  fn endpoint_route_and_headers() {
    let api = Url::parse("https://example.com/prod").unwrap();
    let endpoint = EndpointConfig::with_route(&api, DEFAULT_ROUTE)
      .unwrap()
      .endpoint_name(Some("detector".into()))
      .mvs_info(Some("v1".into()));
    assert_eq!(endpoint.url.as_str(), "https://example.com/prod/ride");

    let file = ImageFile::from_bytes("a.png", vec![1, 2, 3]);
    let request = endpoint.request_for(&file);
    assert_eq!(&*request.body, &[1, 2, 3]);
    assert_eq!(request.content_type, "image/png");
    assert_eq!(
      request.headers,
      vec![
        (ENDPOINT_NAME_HEADER.to_string(), "detector".to_string()),
        (MVS_INFO_HEADER.to_string(), "v1".to_string())
      ]
    );

    let ftp = Url::parse("ftp://example.com").unwrap();
    assert!(EndpointConfig::from_url(&ftp).is_err());
  }

  #[test]
  fn validation_rejects_without_request() {
    let (tx, rx) = mpsc::channel();
    let mut uploader = Uploader::new(endpoint(), Arc::new(Fixed(200, "[]")), tx);
    let model = ModelDescriptor {
      input_constraints: UploadConstraints {
        max_length: Some(2),
        min_length: None,
      },
      ..ModelDescriptor::default()
    };

    let file = ImageFile::from_bytes("a.png", vec![0; 3]);
    let outcome = uploader.select_file(&file, &model, |_| true);
    assert_eq!(outcome, SelectOutcome::Rejected(ErrorKind::FileTooLarge));
    assert_eq!(uploader.state(), &UploadState::Failed(ErrorKind::FileTooLarge));
    assert_eq!(uploader.in_flight(), 0);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn too_small_and_wrong_type_are_constraint_errors() {
    let model = ModelDescriptor {
      input_mime_types: vec!["image/jpeg".into()],
      input_constraints: UploadConstraints {
        max_length: None,
        min_length: Some(2),
      },
      ..ModelDescriptor::default()
    };

    let tiny = ImageFile::from_bytes("a.jpg", vec![0]);
    assert_eq!(validate_file(&tiny, &model), Err(ErrorKind::FileConstraintsError));

    let png = ImageFile::from_bytes("a.png", vec![0; 10]);
    assert_eq!(validate_file(&png, &model), Err(ErrorKind::FileConstraintsError));

    let jpeg = ImageFile::from_bytes("a.jpg", vec![0; 10]);
    assert_eq!(validate_file(&jpeg, &model), Ok(()));
  }

  #[test]
  fn veto_returns_to_idle() {
    let (tx, rx) = mpsc::channel();
    let mut uploader = Uploader::new(endpoint(), Arc::new(Fixed(200, "[]")), tx);
    let file = ImageFile::from_bytes("a.png", vec![0; 3]);

    let outcome = uploader.select_file(&file, &ModelDescriptor::default(), |_| false);
    assert_eq!(outcome, SelectOutcome::Vetoed);
    assert_eq!(uploader.state(), &UploadState::Idle);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn latest_selection_wins() {
    let (tx, rx) = mpsc::channel();
    let mut uploader = Uploader::new(endpoint(), Arc::new(Fixed(200, "[]")), tx);
    let model = ModelDescriptor::default();

    let first = ImageFile::from_bytes("a.png", vec![0; 3]);
    let second = ImageFile::from_bytes("b.png", vec![0; 3]);
    assert_eq!(
      uploader.select_file(&first, &model, |_| true),
      SelectOutcome::Started { generation: 1 }
    );
    assert_eq!(
      uploader.select_file(&second, &model, |_| true),
      SelectOutcome::Started { generation: 2 }
    );

    let mut results = vec![settled(&rx), settled(&rx)];
    results.sort_by_key(|settled| settled.generation);
    let newest = results.pop().unwrap();
    let stale = results.pop().unwrap();

    assert!(uploader.settle(stale).is_none());
    assert_eq!(uploader.state(), &UploadState::Uploading { generation: 2 });
    assert!(uploader.settle(newest).unwrap().is_ok());
    assert_eq!(uploader.state(), &UploadState::Succeeded);
    assert_eq!(uploader.in_flight(), 0);
  }

  #[test]
  fn panicking_transport_is_coerced_to_other() {
    let (tx, rx) = mpsc::channel();
    let mut uploader = Uploader::new(endpoint(), Arc::new(Panics), tx);
    let file = ImageFile::from_bytes("a.png", vec![0; 3]);
    uploader.select_file(&file, &ModelDescriptor::default(), |_| true);

    let result = uploader.settle(settled(&rx)).unwrap();
    assert_eq!(result, Err(ErrorKind::Other));
    assert_eq!(uploader.state(), &UploadState::Failed(ErrorKind::Other));
  }
}
