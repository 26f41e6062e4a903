// 该文件是 Tanzhao （探照） 项目的一部分。
// tests/widget.rs - 控制器端到端测试
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

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use image::{ImageFormat, Rgba, RgbaImage};
use url::Url;

use tanzhao::controller::{AnnotationController, ResultView, UPLOADING_MESSAGE, WidgetStatus};
use tanzhao::failure::{ErrorKind, FailureSource};
use tanzhao::input::ImageFile;
use tanzhao::model::{ModelDescriptor, UploadConstraints};
use tanzhao::render::RenderConfig;
use tanzhao::upload::{
  EndpointConfig, RawResponse, SelectOutcome, Transport, TransportError, UploadRequest,
};

const WAIT: Duration = Duration::from_secs(10);

const TWO_NESTED: &str = r#"[{"objects": [
  {"left": 10, "right": 60, "top": 10, "bottom": 60, "tags": "outer"},
  {"left": 20, "right": 40, "top": 20, "bottom": 40, "score": 0.9,
   "tags": {"_MAIN": "inner", "color": "red"}}
]}]"#;

const ONE_BOX: &str = r#"[{"objects": [{"left": 0, "right": 5, "top": 0, "bottom": 5}]}]"#;

#[derive(Clone, Copy)]
struct Reply {
  delay: Duration,
  status: Option<u16>,
  body: &'static str,
}

impl Reply {
  fn ok(body: &'static str) -> Self {
    Self::status(200, body)
  }

  fn status(status: u16, body: &'static str) -> Self {
    Self {
      delay: Duration::ZERO,
      status: Some(status),
      body,
    }
  }

  fn unreachable() -> Self {
    Self {
      delay: Duration::ZERO,
      status: None,
      body: "",
    }
  }

  fn after(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

type Script = dyn Fn(&UploadRequest) -> Reply + Send + Sync;

struct MockTransport {
  script: Box<Script>,
  requests: AtomicUsize,
}

impl MockTransport {
  fn new(script: impl Fn(&UploadRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
    Arc::new(Self {
      script: Box::new(script),
      requests: AtomicUsize::new(0),
    })
  }

  fn always(reply: Reply) -> Arc<Self> {
    Self::new(move |_| reply)
  }

  fn requests(&self) -> usize {
    self.requests.load(Ordering::SeqCst)
  }
}

impl Transport for MockTransport {
  fn send(&self, request: &UploadRequest) -> Result<RawResponse, TransportError> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    let reply = (self.script)(request);
    thread::sleep(reply.delay);
    match reply.status {
      Some(status) => Ok(RawResponse {
        status,
        body: reply.body.as_bytes().to_vec(),
      }),
      None => Err(TransportError::Unreachable("connection refused".into())),
    }
  }
}

fn png_file(name: &str, width: u32, height: u32, color: [u8; 4]) -> ImageFile {
  let image = RgbaImage::from_pixel(width, height, Rgba(color));
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png).unwrap();
  ImageFile::from_bytes(name, buffer.into_inner())
}

fn broken_file() -> ImageFile {
  ImageFile::from_bytes("broken.png", b"definitely not a png".to_vec())
}

fn controller_with(model: ModelDescriptor, transport: Arc<MockTransport>) -> AnnotationController {
  let api = Url::parse("http://localhost:8080/prod").unwrap();
  AnnotationController::new(
    model,
    EndpointConfig::with_route(&api, "ride").unwrap(),
    transport,
    RenderConfig::default(),
    400,
  )
}

fn controller(transport: Arc<MockTransport>) -> AnnotationController {
  controller_with(ModelDescriptor::default(), transport)
}

fn uploader_failure(kind: ErrorKind) -> WidgetStatus {
  WidgetStatus::Failed {
    kind,
    source: FailureSource::Uploader,
  }
}

#[test]
fn upload_render_and_highlight() {
  let transport = MockTransport::always(Reply::ok(TWO_NESTED));
  let mut controller = controller(transport.clone());

  let outcome = controller.select_file(png_file("photo.png", 200, 100, [0, 0, 0, 255]));
  assert!(matches!(outcome, SelectOutcome::Started { .. }));
  assert_eq!(controller.status(), WidgetStatus::Uploading);
  assert!(controller.wait_settled(WAIT));

  assert_eq!(transport.requests(), 1);
  assert_eq!(controller.status(), WidgetStatus::InferenceComplete);
  assert_eq!(controller.overlay_message(), None);
  assert_eq!(controller.result_view(), ResultView::Results(2));
  assert_eq!(controller.detections().len(), 2);
  assert_eq!(controller.surface().dimensions(), (400, 200));
  assert_eq!(controller.geometry().unwrap().scale, 2.0);

  // 两个框都包含该点，取内距更小的内层框
  controller.pointer_moved(60.0, 60.0);
  assert_eq!(controller.highlighted(), None);
  controller.tick(Instant::now());
  assert_eq!(controller.highlighted(), Some(1));

  let details = controller.object_details().unwrap();
  assert_eq!(details.label, "inner");
  assert_eq!(details.confidence, "90.00%");
  assert_eq!(details.entries, vec![("color".to_string(), "red".to_string())]);

  // 框外
  controller.pointer_moved(390.0, 190.0);
  controller.tick(Instant::now());
  assert_eq!(controller.highlighted(), None);
}

#[test]
fn overlay_is_drawn_on_the_bitmap() {
  let transport = MockTransport::always(Reply::ok(TWO_NESTED));
  let mut controller = controller(transport);
  controller.select_file(png_file("photo.png", 200, 100, [0, 0, 0, 255]));
  assert!(controller.wait_settled(WAIT));

  // 外层框左边缘位于表面 x = 20
  let edge = controller.surface().get_pixel(20, 100);
  assert_eq!(edge, &Rgba([255, 255, 255, 255]));
  let inside = controller.surface().get_pixel(100, 100);
  assert_eq!(inside, &Rgba([0, 0, 0, 255]));
}

#[test]
fn resize_rescales_cached_bitmap() {
  let transport = MockTransport::always(Reply::ok("[]"));
  let mut controller = controller(transport);
  controller.select_file(png_file("photo.png", 200, 100, [0, 0, 0, 255]));
  assert!(controller.wait_settled(WAIT));
  assert_eq!(controller.surface().dimensions(), (400, 200));

  controller.resize(200, Instant::now());
  assert_eq!(controller.surface().dimensions(), (200, 100));
  assert_eq!(controller.geometry().unwrap().scale, 1.0);
  assert_eq!(controller.pending(), 0);
}

#[test]
fn latest_selection_wins_over_slow_response() {
  let slow = png_file("slow.png", 10, 10, [255, 0, 0, 255]);
  let fast = png_file("fast.png", 20, 10, [0, 255, 0, 255]);
  let slow_bytes = slow.bytes().to_vec();

  let transport = MockTransport::new(move |request| {
    if *request.body == *slow_bytes {
      Reply::ok(ONE_BOX).after(Duration::from_millis(300))
    } else {
      Reply::ok(TWO_NESTED)
    }
  });
  let mut controller = controller(transport.clone());

  controller.select_file(slow);
  controller.select_file(fast);
  assert!(controller.wait_settled(WAIT));

  assert_eq!(transport.requests(), 2);
  assert_eq!(controller.status(), WidgetStatus::InferenceComplete);
  assert_eq!(controller.detections().len(), 2);
  assert_eq!(controller.surface().dimensions(), (400, 200));
}

#[test]
fn response_classification() {
  let cases = [
    (Reply::status(413, "too big"), ErrorKind::FileTooLarge),
    (Reply::status(429, "[]"), ErrorKind::RateLimited),
    (Reply::status(424, "[]"), ErrorKind::ModelError),
    (Reply::ok("<html>oops</html>"), ErrorKind::ParsingError),
    (Reply::unreachable(), ErrorKind::NetworkError),
    (Reply::status(503, "[]"), ErrorKind::Other),
  ];

  for (reply, kind) in cases {
    let mut controller = controller(MockTransport::always(reply));
    controller.select_file(png_file("photo.png", 4, 4, [0, 0, 0, 255]));
    assert!(controller.wait_settled(WAIT));

    assert_eq!(controller.status(), uploader_failure(kind));
    assert_eq!(controller.overlay_message(), Some(kind.user_message()));
    assert!(controller.outcome().is_none());
  }
}

#[test]
fn empty_response_completes_without_detections() {
  let mut controller = controller(MockTransport::always(Reply::ok("[]")));
  assert_eq!(controller.result_view(), ResultView::Placeholder);

  controller.select_file(png_file("photo.png", 4, 4, [0, 0, 0, 255]));
  assert_eq!(controller.result_view(), ResultView::Placeholder);
  assert!(controller.wait_settled(WAIT));

  assert_eq!(controller.status(), WidgetStatus::InferenceComplete);
  assert_eq!(controller.overlay_message(), None);
  assert_eq!(controller.result_view(), ResultView::NoResults);
  let outcome = controller.outcome().unwrap();
  assert_eq!(outcome.raw_response, "null");
  assert!(controller.detections().is_empty());
}

#[test]
fn decode_failure_keeps_results_visible() {
  let mut controller = controller(MockTransport::always(Reply::ok(ONE_BOX)));
  controller.select_file(broken_file());
  assert!(controller.wait_settled(WAIT));

  assert_eq!(
    controller.status(),
    WidgetStatus::Failed {
      kind: ErrorKind::BitmapDecodeError,
      source: FailureSource::Renderer,
    }
  );
  assert!(controller.outcome().is_some());
  assert_eq!(controller.detections().len(), 1);
  assert!(controller.geometry().is_none());
  assert_eq!(controller.surface().dimensions(), (400, 200));
}

#[test]
fn reselecting_a_broken_file_reports_decode_failure_again() {
  let mut controller = controller(MockTransport::always(Reply::ok("[]")));
  let broken = broken_file();
  let decode_failure = WidgetStatus::Failed {
    kind: ErrorKind::BitmapDecodeError,
    source: FailureSource::Renderer,
  };

  controller.select_file(broken.clone());
  assert!(controller.wait_settled(WAIT));
  assert_eq!(controller.status(), decode_failure);

  controller.select_file(broken);
  assert_eq!(controller.status(), WidgetStatus::Uploading);
  assert!(controller.wait_settled(WAIT));
  assert_eq!(controller.status(), decode_failure);
  assert!(controller.geometry().is_none());
}

#[test]
fn server_boxes_far_outside_the_image_are_clamped() {
  const HUGE: &str =
    r#"[{"objects": [{"left": -1e12, "right": 1e12, "top": 0, "bottom": 50}]}]"#;
  let mut controller = controller(MockTransport::always(Reply::ok(HUGE)));
  controller.select_file(png_file("photo.png", 200, 100, [0, 0, 0, 255]));
  assert!(controller.wait_settled(WAIT));

  assert_eq!(controller.status(), WidgetStatus::InferenceComplete);
  assert_eq!(controller.surface().dimensions(), (400, 200));
  // 上边缘位于 y = 0，贯穿整个表面
  assert_eq!(controller.surface().get_pixel(200, 0), &Rgba([255, 255, 255, 255]));
  assert_eq!(controller.surface().get_pixel(200, 150), &Rgba([0, 0, 0, 255]));
}

#[test]
fn server_failure_takes_precedence_over_decode_failure() {
  for delay in [Duration::ZERO, Duration::from_millis(200)] {
    let transport = MockTransport::always(Reply::status(500, "").after(delay));
    let mut controller = controller(transport);
    controller.select_file(broken_file());
    assert!(controller.wait_settled(WAIT));

    assert_eq!(controller.status(), uploader_failure(ErrorKind::ServerError));
  }
}

#[test]
fn new_selection_resets_outcome_and_highlight() {
  let mut controller = controller(MockTransport::always(Reply::ok(TWO_NESTED)));

  controller.select_file(png_file("first.png", 200, 100, [0, 0, 0, 255]));
  assert!(controller.wait_settled(WAIT));
  controller.select_result(Some(0));
  assert_eq!(controller.highlighted(), Some(0));
  assert!(controller.outcome().is_some());

  controller.select_file(png_file("second.png", 200, 100, [9, 9, 9, 255]));
  assert_eq!(controller.status(), WidgetStatus::Uploading);
  assert_eq!(controller.overlay_message(), Some(UPLOADING_MESSAGE));
  assert!(controller.outcome().is_none());
  assert_eq!(controller.highlighted(), None);
  assert!(controller.detections().is_empty());

  assert!(controller.wait_settled(WAIT));
  assert_eq!(controller.status(), WidgetStatus::InferenceComplete);
}

#[test]
fn oversized_file_is_rejected_before_upload() {
  let transport = MockTransport::always(Reply::ok("[]"));
  let model = ModelDescriptor {
    input_constraints: UploadConstraints {
      max_length: Some(16),
      min_length: None,
    },
    ..ModelDescriptor::default()
  };
  let mut controller = controller_with(model, transport.clone());

  let outcome = controller.select_file(png_file("photo.png", 64, 64, [0, 0, 0, 255]));
  assert_eq!(outcome, SelectOutcome::Rejected(ErrorKind::FileTooLarge));
  assert_eq!(controller.status(), uploader_failure(ErrorKind::FileTooLarge));
  assert_eq!(controller.pending(), 0);
  assert_eq!(transport.requests(), 0);
}

#[test]
fn fractional_coordinates_follow_rendered_size() {
  const FRACTIONAL: &str =
    r#"[{"objects": [{"left": 0.5, "right": 1.0, "top": 0.0, "bottom": 1.0, "tags": "right half"}]}]"#;
  let mut controller = controller(MockTransport::always(Reply::ok(FRACTIONAL)));
  controller.select_file(png_file("photo.png", 200, 100, [0, 0, 0, 255]));
  assert!(controller.wait_settled(WAIT));

  controller.pointer_moved(300.0, 100.0);
  controller.tick(Instant::now());
  assert_eq!(controller.highlighted(), Some(0));

  controller.pointer_moved(100.0, 100.0);
  controller.tick(Instant::now());
  assert_eq!(controller.highlighted(), None);
}
