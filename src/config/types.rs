use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_SETTINGS_FILE: &str = "thumbnailer.json";

/// 縮圖輸出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// 單一批次累計檔案大小上限
    pub batch_memory_threshold_bytes: u64,
    /// 單一批次檔案數上限
    pub max_batch_item_count: usize,
    pub tile_edge_pixels: u32,
    /// 縮圖長邊像素
    pub max_thumbnail_long_side_pixels: u32,
    /// 壓縮品質 0.0 - 1.0
    pub thumbnail_quality: f32,
    /// 批次執行緒數，未設定時為 max(2, CPU 數 - 2)
    pub worker_pool_size: Option<usize>,
    /// tile 執行緒數，未設定時沿用 `worker_pool_size`，兩者都未設定時為 CPU 數
    pub tile_pool_size: Option<usize>,
    pub output_directory_name: String,
    pub output_format: OutputFormat,
    /// 去除透明度時合成的背景色
    pub alpha_background: [u8; 3],
    pub shutdown_timeout_secs: u64,
    /// 單頁解碼後緩衝的位元組上限，超過時該頁視為損毀
    pub max_decoded_page_bytes: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_memory_threshold_bytes: 500 * MIB,
            max_batch_item_count: 20,
            tile_edge_pixels: 1024,
            max_thumbnail_long_side_pixels: 1200,
            thumbnail_quality: 0.6,
            worker_pool_size: None,
            tile_pool_size: None,
            output_directory_name: "thumbnails".to_string(),
            output_format: OutputFormat::Jpeg,
            alpha_background: [0, 0, 0],
            shutdown_timeout_secs: 60,
            max_decoded_page_bytes: 2048 * MIB,
        }
    }
}

impl PipelineSettings {
    #[must_use]
    pub fn batch_workers(&self) -> usize {
        self.worker_pool_size
            .unwrap_or_else(|| available_cores().saturating_sub(2).max(2))
    }

    #[must_use]
    pub fn batch_queue_capacity(&self) -> usize {
        self.batch_workers() * 2
    }

    #[must_use]
    pub fn tile_workers(&self) -> usize {
        self.tile_pool_size
            .or(self.worker_pool_size)
            .unwrap_or_else(available_cores)
    }

    #[must_use]
    pub fn tile_queue_capacity(&self) -> usize {
        self.tile_workers() * 2
    }

    /// JPEG 編碼器使用的 1-100 品質
    #[must_use]
    pub fn jpeg_quality(&self) -> u8 {
        let scaled = (self.thumbnail_quality.clamp(0.0, 1.0) * 100.0).round();
        // 已限制在 0-100 之間
        (scaled as u8).max(1)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn available_cores() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: PipelineSettings,
}
