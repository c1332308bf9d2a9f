//! 功能元件模組

pub mod thumbnail_pipeline;

pub use thumbnail_pipeline::ThumbnailPipeline;
