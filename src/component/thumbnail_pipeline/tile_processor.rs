use super::types::{DecodedPage, Tile, TileRect};
use crate::error::{PoolError, ThumbnailError};
use crate::tools::{TaskHandle, WorkerPool};
use image::{DynamicImage, imageops};
use log::debug;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_TILE_EDGE: u32 = 1024;

/// 頁面的 tile 總數
///
/// 以 u64 計算，極端尺寸配上很小的 tile 邊長時不會溢位。
#[must_use]
pub fn tile_count(width: u32, height: u32, tile_edge: u32) -> u64 {
    let tile_edge = tile_edge.max(1);
    u64::from(width.div_ceil(tile_edge)) * u64::from(height.div_ceil(tile_edge))
}

/// 依列優先順序逐一產生 tile 區域
///
/// 邊緣的 tile 會裁切到剩餘寬高，不做填補。
pub fn tile_rects(width: u32, height: u32, tile_edge: u32) -> impl Iterator<Item = TileRect> {
    let tile_edge = tile_edge.max(1);
    let x_tiles = width.div_ceil(tile_edge);
    let y_tiles = height.div_ceil(tile_edge);

    (0..y_tiles).flat_map(move |grid_y| {
        (0..x_tiles).map(move |grid_x| {
            // grid * edge 一定小於對應的邊長，不會溢位
            let origin_x = grid_x * tile_edge;
            let origin_y = grid_y * tile_edge;
            TileRect {
                grid_x,
                grid_y,
                origin_x,
                origin_y,
                width: tile_edge.min(width - origin_x),
                height: tile_edge.min(height - origin_y),
            }
        })
    })
}

/// 計算頁面的 tile 網格（列優先）
#[must_use]
pub fn tile_grid(width: u32, height: u32, tile_edge: u32) -> Vec<TileRect> {
    tile_rects(width, height, tile_edge).collect()
}

/// 將頁面切成 tile 平行處理，再由呼叫端執行緒拼回完整緩衝
///
/// tile 工作執行緒只回傳像素副本，拼接緩衝只有呼叫端會寫入。
/// 同時存在的 tile 數量以執行緒池的工作數加佇列容量為上限，
/// 超過時先拼接最早提交的 tile 再提交新的。
pub struct TileProcessor {
    tile_edge: u32,
    pool: Arc<WorkerPool>,
}

impl TileProcessor {
    #[must_use]
    pub fn new(tile_edge: u32, pool: Arc<WorkerPool>) -> Self {
        Self {
            tile_edge: tile_edge.max(1),
            pool,
        }
    }

    #[must_use]
    pub const fn tile_edge(&self) -> u32 {
        self.tile_edge
    }

    pub fn process(&self, source: &Path, page: DecodedPage) -> Result<DynamicImage, ThumbnailError> {
        let DecodedPage { page_index, image } = page;
        let (width, height) = (image.width(), image.height());
        let expected = tile_count(width, height, self.tile_edge);
        let window = self.pool.worker_count() + self.pool.queue_capacity();

        debug!(
            "{} 頁 {page_index}: {width}x{height}, {expected} 個 tile",
            source.display()
        );

        let mut stitcher = Stitcher::new(source, page_index, &image, expected);
        let image = Arc::new(image);
        let mut in_flight: VecDeque<TaskHandle<Tile>> = VecDeque::with_capacity(window);

        for rect in tile_rects(width, height, self.tile_edge) {
            if in_flight.len() >= window {
                if let Some(handle) = in_flight.pop_front() {
                    stitcher.accept(handle.join())?;
                }
            }

            let page = Arc::clone(&image);
            let handle = self
                .pool
                .submit(move || extract_tile(&page, rect))
                .map_err(|e| stitcher.failure(&e.to_string()))?;
            in_flight.push_back(handle);
        }

        while let Some(handle) = in_flight.pop_front() {
            stitcher.accept(handle.join())?;
        }

        stitcher.finish()
    }
}

/// tile 工作：複製頁面的子區域
#[must_use]
pub fn extract_tile(page: &DynamicImage, rect: TileRect) -> Tile {
    Tile {
        rect,
        pixels: page.crop_imm(rect.origin_x, rect.origin_y, rect.width, rect.height),
    }
}

struct Stitcher {
    source: PathBuf,
    page_index: usize,
    canvas: DynamicImage,
    expected: u64,
    received: u64,
    covered_area: u64,
}

impl Stitcher {
    fn new(source: &Path, page_index: usize, page: &DynamicImage, expected: u64) -> Self {
        Self {
            source: source.to_path_buf(),
            page_index,
            canvas: DynamicImage::new(page.width(), page.height(), page.color()),
            expected,
            received: 0,
            covered_area: 0,
        }
    }

    fn accept(&mut self, outcome: Result<Tile, PoolError>) -> Result<(), ThumbnailError> {
        let tile = outcome.map_err(|e| self.failure(&e.to_string()))?;
        let rect = tile.rect;

        if tile.pixels.width() != rect.width || tile.pixels.height() != rect.height {
            return Err(self.failure(&format!(
                "tile ({}, {}) 尺寸 {}x{} 與預期 {}x{} 不符",
                rect.grid_x,
                rect.grid_y,
                tile.pixels.width(),
                tile.pixels.height(),
                rect.width,
                rect.height
            )));
        }
        if rect.origin_x + rect.width > self.canvas.width()
            || rect.origin_y + rect.height > self.canvas.height()
        {
            return Err(self.failure(&format!(
                "tile ({}, {}) 超出頁面範圍",
                rect.grid_x, rect.grid_y
            )));
        }

        blit(&mut self.canvas, &tile);
        self.received += 1;
        self.covered_area += rect.area();
        Ok(())
    }

    fn finish(self) -> Result<DynamicImage, ThumbnailError> {
        let page_area = u64::from(self.canvas.width()) * u64::from(self.canvas.height());
        if self.received != self.expected || self.covered_area != page_area {
            return Err(self.failure(&format!(
                "收到 {}/{} 個 tile，覆蓋 {}/{} 像素",
                self.received, self.expected, self.covered_area, page_area
            )));
        }
        Ok(self.canvas)
    }

    fn failure(&self, detail: &str) -> ThumbnailError {
        ThumbnailError::TileAssemblyFailure {
            path: self.source.clone(),
            page: Some(self.page_index),
            detail: detail.to_string(),
        }
    }
}

fn blit(canvas: &mut DynamicImage, tile: &Tile) {
    let x = i64::from(tile.rect.origin_x);
    let y = i64::from(tile.rect.origin_y);

    match (canvas, &tile.pixels) {
        (DynamicImage::ImageRgb8(dest), DynamicImage::ImageRgb8(src)) => {
            imageops::replace(dest, src, x, y);
        }
        (DynamicImage::ImageRgba8(dest), DynamicImage::ImageRgba8(src)) => {
            imageops::replace(dest, src, x, y);
        }
        (DynamicImage::ImageLuma8(dest), DynamicImage::ImageLuma8(src)) => {
            imageops::replace(dest, src, x, y);
        }
        (DynamicImage::ImageLumaA8(dest), DynamicImage::ImageLumaA8(src)) => {
            imageops::replace(dest, src, x, y);
        }
        (dest, src) => imageops::replace(dest, src, x, y),
    }
}
