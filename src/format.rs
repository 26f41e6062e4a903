// 该文件是 Tanzhao （探照） 项目的一部分。
// src/format.rs - 文本格式化
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

use serde_json::Value;

use crate::model::{DetectionObject, MAIN_TAG_KEY, Tags, WithLabel};

pub const NO_VALUE_CHAR: &str = "-";
pub const NO_VALUE_LABEL: &str = "(no tag)";
pub const NO_VALUE_SCORE: &str = "N/A";

const DATA_UNITS: [&str; 7] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB"];

/// 置信度格式化为百分比
pub fn format_score(score: Option<f64>) -> Option<String> {
  score
    .filter(|s| !s.is_nan())
    .map(|s| format!("{:.2}%", 100.0 * s))
}

pub fn human_friendly_filesize(bytes: u64) -> String {
  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < DATA_UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  let fixed = format!("{:.2}", value);
  let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
  format!("{} {}", trimmed, DATA_UNITS[unit])
}

/// 选中检测框的详情
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetails {
  pub label: String,
  pub confidence: String,
  /// 除 `_MAIN` 以外的标签键值
  pub entries: Vec<(String, String)>,
}

pub fn describe_object(object: &DetectionObject) -> ObjectDetails {
  let confidence = format_score(object.score).unwrap_or_else(|| NO_VALUE_SCORE.to_string());

  let (label, entries) = match &object.tags {
    Some(Tags::Map(map)) => {
      let entries = map
        .iter()
        .filter(|(key, _)| key.as_str() != MAIN_TAG_KEY)
        .map(|(key, value)| (key.clone(), entry_text(value)))
        .collect();
      (object.to_label_str(), entries)
    }
    _ => (object.to_label_str(), Vec::new()),
  };

  ObjectDetails {
    label: label.unwrap_or_else(|| NO_VALUE_LABEL.to_string()),
    confidence,
    entries,
  }
}

fn entry_text(value: &Value) -> String {
  match value {
    Value::Null => NO_VALUE_CHAR.to_string(),
    Value::String(s) if s.is_empty() => NO_VALUE_CHAR.to_string(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
