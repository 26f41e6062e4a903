// 该文件是 Tanzhao （探照） 项目的一部分。
// src/output/save_image_file.rs - 保存渲染表面与检测记录
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

use std::path::{Path, PathBuf};

use image::RgbaImage;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  format::describe_object,
  model::DetectResult,
  output::Render,
};

/// 保存已经绘制好叠加层的表面。`record=true` 时额外写出同名 `.txt` 检测记录
pub struct SaveImageFileOutput {
  path: PathBuf,
  record: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("表面为空，没有可保存的内容")]
  EmptySurface,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let record = uri
      .query_pairs()
      .any(|(key, value)| key == "record" && value == "true");

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      record,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &RgbaImage) -> Result<(), SaveImageFileError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(SaveImageFileError::EmptySurface);
    }

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    warn!("保存图像到文件: {}", self.path.display());
    Ok(())
  }

  fn save_record(&self, result: &DetectResult) -> Result<(), SaveImageFileError> {
    let records: Vec<String> = result
      .items
      .iter()
      .map(|object| {
        let details = describe_object(object);
        format!(
          "{}, {}, {:.4}, {:.4}, {:.4}, {:.4}",
          details.label, details.confidence, object.left, object.top, object.right, object.bottom
        )
      })
      .collect();

    let path = self.path.with_extension("txt");
    std::fs::write(&path, records.join("\n"))?;
    warn!("保存检测记录到文件: {}", path.display());
    Ok(())
  }
}

impl Render<RgbaImage, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbaImage, result: &DetectResult) -> Result<(), Self::Error> {
    self.save_image(frame)?;
    if self.record {
      self.save_record(result)?;
    }
    Ok(())
  }
}
