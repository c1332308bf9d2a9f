use crate::error::{ErrorKind, ThumbnailError};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// 待處理的來源影像，由呼叫端提供
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub byte_size: u64,
}

impl SourceImage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, byte_size: u64) -> Self {
        Self {
            path: path.into(),
            byte_size,
        }
    }

    /// 由檔案系統讀取大小
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ThumbnailError> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|e| ThumbnailError::InvalidSourceFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path,
            byte_size: metadata.len(),
        })
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        self.path.file_name().map_or_else(
            || self.path.display().to_string(),
            |name| name.to_string_lossy().to_string(),
        )
    }
}

/// 一組會一起處理的來源檔案
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    items: Vec<SourceImage>,
    total_bytes: u64,
}

impl Batch {
    pub(crate) fn push(&mut self, source: SourceImage) {
        self.total_bytes = self.total_bytes.saturating_add(source.byte_size);
        self.items.push(source);
    }

    #[must_use]
    pub fn items(&self) -> &[SourceImage] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<SourceImage> {
        self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// 解碼後的單一頁面，由處理該頁的工作執行緒獨佔
#[derive(Debug)]
pub struct DecodedPage {
    pub page_index: usize,
    pub image: DynamicImage,
}

impl DecodedPage {
    #[must_use]
    pub const fn new(page_index: usize, image: DynamicImage) -> Self {
        Self { page_index, image }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }
}

/// tile 在頁面上的位置，`grid_x`/`grid_y` 為網格座標
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub grid_x: u32,
    pub grid_y: u32,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.origin_x < other.origin_x + other.width
            && other.origin_x < self.origin_x + self.width
            && self.origin_y < other.origin_y + other.height
            && other.origin_y < self.origin_y + self.height
    }
}

/// tile 工作執行緒回傳的像素副本
#[derive(Debug)]
pub struct Tile {
    pub rect: TileRect,
    pub pixels: DynamicImage,
}

/// 單一頁面的處理結果
#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    /// 多頁檔案的頁碼；單頁檔案為 `None`
    pub page_index: Option<usize>,
    pub success: bool,
    pub error: Option<ThumbnailError>,
}

impl ThumbnailResult {
    #[must_use]
    pub fn succeeded(source: &Path, output_path: PathBuf, page_index: Option<usize>) -> Self {
        Self {
            source_path: source.to_path_buf(),
            output_path,
            page_index,
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        source: &Path,
        output_path: PathBuf,
        page_index: Option<usize>,
        error: ThumbnailError,
    ) -> Self {
        Self {
            source_path: source.to_path_buf(),
            output_path,
            page_index,
            success: false,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ThumbnailError::kind)
    }
}
