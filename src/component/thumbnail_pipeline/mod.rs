//! TIFF 批次縮圖元件
//!
//! 流程：
//! A. 依大小與數量切分批次
//! B. 檔案層級執行緒池逐檔處理
//! C. 逐頁解碼，切成 tile 平行處理後拼接
//! D. 去除透明度、縮小、編碼寫出
//!
//! 每個批次完全結束後才開始下一個批次，峰值記憶體大約為一個批次的解碼量。

mod batch_executor;
mod batch_planner;
mod encoder;
mod main;
mod page_coordinator;
mod page_normalizer;
mod page_source;
mod reporter;
mod tile_processor;
mod types;

pub use batch_executor::{BatchExecutor, ReclaimHook};
pub use batch_planner::BatchPlanner;
pub use encoder::{ImageCrateEncoder, ThumbnailEncoder};
pub use main::{PipelineReport, ThumbnailPipeline};
pub use page_coordinator::{MultiPageCoordinator, thumbnail_output_path};
pub use page_normalizer::{DEFAULT_MAX_LONG_SIDE, PageNormalizer, remove_alpha, target_dimensions};
pub use page_source::{PageSource, SingleFrameSource, TiffPageSource, open_page_source};
pub use reporter::{LogReporter, NoopReporter, ProgressReporter, ResourceReporter};
pub use tile_processor::{
    DEFAULT_TILE_EDGE, TileProcessor, extract_tile, tile_count, tile_grid, tile_rects,
};
pub use types::{Batch, DecodedPage, SourceImage, ThumbnailResult, Tile, TileRect};
