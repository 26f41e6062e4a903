// 该文件是 Tanzhao （探照） 项目的一部分。
// src/failure.rs - 失败原因与优先级
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

use thiserror::Error;

/// 失败原因，只在边界处分类一次，下游不再重新解释。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  #[error("Bad request")]
  BadRequest,
  #[error("File is too large")]
  FileTooLarge,
  #[error("File constraints error")]
  FileConstraintsError,
  #[error("Rate limited")]
  RateLimited,
  #[error("Unauthenticated")]
  Unauthenticated,
  #[error("Internal model error")]
  ModelError,
  #[error("Server error")]
  ServerError,
  #[error("Network error")]
  NetworkError,
  #[error("Error parsing response")]
  ParsingError,
  #[error("Could not parse bitmap file")]
  BitmapDecodeError,
  #[error("Unknown error")]
  Other,
}

impl ErrorKind {
  /// HTTP 状态码到失败原因的固定映射，未列出的非 2xx 状态一律为 `Other`
  pub fn from_status(status: u16) -> Self {
    match status {
      400 => ErrorKind::BadRequest,
      401 => ErrorKind::Unauthenticated,
      413 => ErrorKind::FileTooLarge,
      424 => ErrorKind::ModelError,
      429 => ErrorKind::RateLimited,
      500 => ErrorKind::ServerError,
      _ => ErrorKind::Other,
    }
  }

  /// 展示给用户的提示文本
  pub fn user_message(&self) -> &'static str {
    match self {
      ErrorKind::BadRequest | ErrorKind::FileConstraintsError => {
        "The provided image is not supported by this model. Try using a different one."
      }
      ErrorKind::ModelError => "The model could not process your image, try using a different one.",
      ErrorKind::FileTooLarge => "The selected image is too large. Please check file size.",
      ErrorKind::RateLimited => {
        "You have reached the maximum number of requests allowed for this demo. Please try again later."
      }
      ErrorKind::Unauthenticated => "Your session has expired, please reload the page",
      ErrorKind::ServerError => "Request failed.  Please try again later",
      ErrorKind::NetworkError => {
        "Could not upload image due to a network error. Please check your connection and try again."
      }
      ErrorKind::BitmapDecodeError => {
        "The selected image is not supported by your browser. You may still see results below."
      }
      ErrorKind::ParsingError | ErrorKind::Other => {
        "Upload or inference failed. Please try again later"
      }
    }
  }
}

/// 失败来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureSource {
  /// 上传与推理请求
  Uploader,
  /// 位图解码与渲染
  Renderer,
}

/// 新事件到来时对当前失败状态的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// 采用新的状态
  Replace,
  /// 保持当前状态不变
  Keep,
}

/// 导致状态迁移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
  UploadSucceeded,
  Failed(FailureSource),
}

/// 失败优先级表，按顺序匹配：
///
/// | 当前失败来源 | 新事件            | 结果    |
/// |--------------|-------------------|---------|
/// | 任意         | 上传失败          | Replace |
/// | Uploader     | 渲染失败          | Keep    |
/// | Renderer     | 上传成功          | Keep    |
/// | 其他         | 任意              | Replace |
///
/// 网络侧失败优先于解码失败，直到下一次选择文件重置。
pub fn resolve(current: Option<FailureSource>, incoming: Incoming) -> Resolution {
  match (current, incoming) {
    (_, Incoming::Failed(FailureSource::Uploader)) => Resolution::Replace,
    (Some(FailureSource::Uploader), Incoming::Failed(FailureSource::Renderer)) => Resolution::Keep,
    (Some(FailureSource::Renderer), Incoming::UploadSucceeded) => Resolution::Keep,
    _ => Resolution::Replace,
  }
}
