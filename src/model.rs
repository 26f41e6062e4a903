// 该文件是 Tanzhao （探照） 项目的一部分。
// src/model.rs - 模型描述与检测结果
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

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, format::human_friendly_filesize};

/// 默认的最大上传大小：5 MiB
pub const DEFAULT_MAX_LENGTH: u64 = 5 * 1024 * 1024;

/// 标签主键
pub const MAIN_TAG_KEY: &str = "_MAIN";

pub trait WithLabel {
  /// 可展示的标签文本，没有可用标签时返回 `None`
  fn to_label_str(&self) -> Option<String>;
}

/// 检测框的标签，可以是字符串，也可以是键值表
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Tags {
  Text(String),
  Map(Map<String, Value>),
  Other(Value),
}

impl WithLabel for Tags {
  fn to_label_str(&self) -> Option<String> {
    match self {
      Tags::Text(text) => {
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
      }
      Tags::Map(map) => match map.get(MAIN_TAG_KEY) {
        Some(Value::String(main)) if !main.is_empty() => Some(main.clone()),
        _ => Some(Value::Object(map.clone()).to_string()),
      },
      Tags::Other(value) if is_falsy(value) => None,
      Tags::Other(value) => Some(value.to_string()),
    }
  }
}

fn is_falsy(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::Bool(b) => !b,
    Value::Number(n) => n.as_f64().map(|v| v == 0.0 || v.is_nan()).unwrap_or(false),
    Value::String(s) => s.is_empty(),
    _ => false,
  }
}

/// 单个检测框。坐标可能是原图像素，也可能是 `[0, 1]` 的比例，由整组结果推断
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionObject {
  pub left: f64,
  pub right: f64,
  pub top: f64,
  pub bottom: f64,
  #[serde(default)]
  pub class: Option<String>,
  #[serde(default, deserialize_with = "deserialize_score")]
  pub score: Option<f64>,
  #[serde(default)]
  pub tags: Option<Tags>,
}

impl DetectionObject {
  pub fn new(left: f64, right: f64, top: f64, bottom: f64) -> Self {
    Self {
      left,
      right,
      top,
      bottom,
      class: None,
      score: None,
      tags: None,
    }
  }

  pub fn with_class(mut self, class: impl Into<String>) -> Self {
    self.class = Some(class.into());
    self
  }

  pub fn with_score(mut self, score: f64) -> Self {
    self.score = Some(score);
    self
  }

  pub fn with_tags(mut self, tags: Tags) -> Self {
    self.tags = Some(tags);
    self
  }

  /// 四个坐标中的最大值，用于推断坐标表示方式
  pub fn max_coordinate(&self) -> f64 {
    self.left.max(self.right).max(self.top).max(self.bottom)
  }
}

impl WithLabel for DetectionObject {
  fn to_label_str(&self) -> Option<String> {
    self.tags.as_ref().and_then(WithLabel::to_label_str)
  }
}

// 置信度可能以数字或数字字符串给出
fn deserialize_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::Number(n)) => n.as_f64(),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}

/// 一次推理返回的全部检测框
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectionObject]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 从推理载荷的 `objects` 数组中读取检测框，无法解析的条目会被跳过
  pub fn from_payload(payload: &Value) -> Self {
    let Some(objects) = payload.get("objects").and_then(Value::as_array) else {
      debug!("推理结果中没有 objects 字段");
      return Self::default();
    };

    let items = objects
      .iter()
      .enumerate()
      .filter_map(|(index, object)| {
        match serde_json::from_value::<DetectionObject>(object.clone()) {
          Ok(item) => Some(item),
          Err(e) => {
            warn!("跳过无法解析的检测框 #{}: {}", index, e);
            None
          }
        }
      })
      .collect();

    Self { items }
  }
}

impl From<Vec<DetectionObject>> for DetectResult {
  fn from(items: Vec<DetectionObject>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 上传文件的大小约束
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConstraints {
  #[serde(default)]
  pub max_length: Option<u64>,
  #[serde(default)]
  pub min_length: Option<u64>,
}

impl UploadConstraints {
  /// 在默认约束之上叠加外部给出的约束
  pub fn with_defaults(external: &UploadConstraints) -> Self {
    Self {
      max_length: external.max_length.or(Some(DEFAULT_MAX_LENGTH)),
      min_length: external.min_length,
    }
  }
}

/// 模型描述，由外部提供
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
  #[serde(default)]
  pub product_title: String,
  #[serde(default)]
  pub input_description: String,
  #[serde(default)]
  pub input_mime_types: Vec<String>,
  #[serde(default)]
  pub input_constraints: UploadConstraints,
}

#[derive(Error, Debug)]
pub enum DescriptorError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型描述解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

impl FromUrlWithScheme for ModelDescriptor {
  const SCHEME: &'static str = "file";
}

impl FromUrl for ModelDescriptor {
  type Error = DescriptorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DescriptorError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let data = std::fs::read(url.path())?;
    Ok(serde_json::from_slice(&data)?)
  }
}

impl ModelDescriptor {
  /// 生效的上传约束（已叠加默认值）
  pub fn constraints(&self) -> UploadConstraints {
    UploadConstraints::with_defaults(&self.input_constraints)
  }

  /// 是否接受给定的 MIME 类型，未声明类型时接受全部
  pub fn accepts_mime(&self, mime: &str) -> bool {
    self.input_mime_types.is_empty()
      || self
        .input_mime_types
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(mime))
  }

  /// 面向用户的文件要求说明，例如 "file must be png or jpeg and be no larger than 5 MB"
  pub fn requirements(&self, type_name: &str) -> Option<String> {
    let types: Vec<&str> = self
      .input_mime_types
      .iter()
      .map(|mime| mime.rsplit('/').next().unwrap_or(mime))
      .collect();

    let friendly_types = match types.as_slice() {
      [] => None,
      [only] => Some(only.to_string()),
      [init @ .., last] => Some(format!("{} or {}", init.join(", "), last)),
    };
    let friendly_size = self
      .constraints()
      .max_length
      .map(|max| format!("be no larger than {}", human_friendly_filesize(max)));

    match (friendly_types, friendly_size) {
      (None, None) => None,
      (Some(types), None) => Some(format!("{} must be {}", type_name, types)),
      (None, Some(size)) => Some(format!("{} must {}", type_name, size)),
      (Some(types), Some(size)) => Some(format!("{} must be {} and {}", type_name, types, size)),
    }
  }
}

/// 一次上传收到的响应
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
  /// 数组首元素的重新序列化
  pub raw_response: String,
  /// 完整的顶层响应
  pub standard_inference: Option<Value>,
}

impl UploadOutcome {
  /// 规范推理载荷：顶层为数组时取首元素，否则取顶层本身
  pub fn canonical_payload(&self) -> Option<&Value> {
    match self.standard_inference.as_ref()? {
      Value::Array(values) => values.first(),
      other => Some(other),
    }
  }

  pub fn detections(&self) -> DetectResult {
    self
      .canonical_payload()
      .map(DetectResult::from_payload)
      .unwrap_or_default()
  }
}
