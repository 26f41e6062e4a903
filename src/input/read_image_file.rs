// 该文件是 Tanzhao （探照） 项目的一部分。
// src/input/read_image_file.rs - 读取与解码图像文件
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
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const OCTET_STREAM: &str = "application/octet-stream";

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 文件标识，每次读取或构造文件都会分配新的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u64);

impl FileId {
  fn next() -> Self {
    FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

/// 用户选择的图像文件。克隆共享同一份数据与标识
#[derive(Debug, Clone)]
pub struct ImageFile {
  id: FileId,
  name: String,
  mime: String,
  bytes: Arc<[u8]>,
}

impl FromUrlWithScheme for ImageFile {
  const SCHEME: &'static str = "file";
}

impl FromUrl for ImageFile {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFile {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Ok(Self::from_bytes(name, bytes))
  }

  /// 由内存数据构造，MIME 类型先按文件名推断，再按内容推断
  pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    let name = name.into();
    let bytes: Vec<u8> = bytes.into();
    let mime = ImageFormat::from_path(&name)
      .or_else(|_| image::guess_format(&bytes))
      .map(|format| format.to_mime_type().to_string())
      .unwrap_or_else(|_| OCTET_STREAM.to_string());

    Self {
      id: FileId::next(),
      name,
      mime,
      bytes: bytes.into(),
    }
  }

  pub fn id(&self) -> FileId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn mime(&self) -> &str {
    &self.mime
  }

  pub fn size(&self) -> u64 {
    self.bytes.len() as u64
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  /// 解码为 RGBA 位图，并按 EXIF 方向信息旋转
  pub fn decode(&self) -> Result<RgbaImage, ImageFileInputError> {
    let image = ImageReader::new(Cursor::new(&self.bytes[..]))
      .with_guessed_format()?
      .decode()?;

    let orientation = read_exif_orientation(&self.bytes);
    if orientation != 1 {
      debug!("{} 的 EXIF 方向为 {}", self.name, orientation);
    }

    Ok(apply_orientation(image, orientation).into_rgba8())
  }
}

/// 读取 EXIF 方向标签，没有 EXIF 或标签时返回 1
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
  let mut cursor = Cursor::new(bytes);
  let Ok(reader) = exif::Reader::new().read_from_container(&mut cursor) else {
    return 1;
  };

  reader
    .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
    .and_then(|field| field.value.get_uint(0))
    .unwrap_or(1)
}

pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
  match orientation {
    2 => image.fliph(),
    3 => image.rotate180(),
    4 => image.flipv(),
    5 => image.rotate90().fliph(),
    6 => image.rotate90(),
    7 => image.rotate270().fliph(),
    8 => image.rotate270(),
    _ => image,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgba, RgbaImage};

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
  }

  #[test]
  fn decodes_png_from_memory() {
    let file = ImageFile::from_bytes("pixel.png", png_bytes(4, 3));
    assert_eq!(file.mime(), "image/png");
    assert_eq!(file.size(), file.bytes().len() as u64);

    let bitmap = file.decode().unwrap();
    assert_eq!(bitmap.dimensions(), (4, 3));
    assert_eq!(bitmap.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
  }

  #[test]
  fn mime_is_guessed_from_content_without_extension() {
    let file = ImageFile::from_bytes("upload", png_bytes(1, 1));
    assert_eq!(file.mime(), "image/png");

    let file = ImageFile::from_bytes("notes", b"plain text".to_vec());
    assert_eq!(file.mime(), OCTET_STREAM);
  }

  #[test]
  fn garbage_fails_to_decode() {
    let file = ImageFile::from_bytes("broken.png", b"not an image".to_vec());
    assert!(file.decode().is_err());
  }

  #[test]
  fn each_file_gets_its_own_identity() {
    let a = ImageFile::from_bytes("a.png", png_bytes(1, 1));
    let b = ImageFile::from_bytes("a.png", png_bytes(1, 1));
    assert_ne!(a.id(), b.id());
    assert_eq!(a.clone().id(), a.id());
  }

  #[test]
  fn missing_exif_means_upright() {
    assert_eq!(read_exif_orientation(&png_bytes(2, 2)), 1);
  }

  #[test]
  fn orientation_six_rotates_clockwise() {
    let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 2));
    let rotated = apply_orientation(image, 6);
    assert_eq!((rotated.width(), rotated.height()), (2, 4));
  }
}
