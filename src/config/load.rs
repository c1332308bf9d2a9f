use crate::config::types::{Config, DEFAULT_SETTINGS_FILE, PipelineSettings};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;

impl Config {
    /// 讀取工作目錄下的 `thumbnailer.json`，不存在時使用預設值
    pub fn new() -> Result<Self> {
        let path = Path::new(DEFAULT_SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: PipelineSettings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("設定檔內容無效: {}", path.display()))?;

        Ok(Self { settings })
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.thumbnail_quality) {
            bail!("thumbnailQuality 必須介於 0 與 1 之間: {}", self.thumbnail_quality);
        }
        if self.max_batch_item_count == 0 {
            bail!("maxBatchItemCount 必須至少為 1");
        }
        if self.tile_edge_pixels == 0 {
            bail!("tileEdgePixels 必須至少為 1");
        }
        if self.max_thumbnail_long_side_pixels == 0 {
            bail!("maxThumbnailLongSidePixels 必須至少為 1");
        }
        if self.worker_pool_size == Some(0) || self.tile_pool_size == Some(0) {
            bail!("執行緒池大小必須至少為 1");
        }
        if self.max_decoded_page_bytes == 0 {
            bail!("maxDecodedPageBytes 必須大於 0");
        }
        if self.output_directory_name.trim().is_empty() {
            bail!("outputDirectoryName 不可為空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("thumbnailer.json");
        fs::write(&path, r#"{"maxBatchItemCount": 5, "thumbnailQuality": 0.8}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.settings.max_batch_item_count, 5);
        assert!((config.settings.thumbnail_quality - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_rejects_invalid_quality() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("thumbnailer.json");
        fs::write(&path, r#"{"thumbnailQuality": 1.5}"#).unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_load_reports_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("thumbnailer.json");
        fs::write(&path, "{not json").unwrap();

        let error = Config::load_from(&path).unwrap_err();
        assert!(format!("{error:#}").contains("Failed to parse settings"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = PipelineSettings::default();
        assert!(settings.validate().is_ok());

        settings.max_batch_item_count = 0;
        assert!(settings.validate().is_err());

        settings = PipelineSettings {
            tile_pool_size: Some(0),
            ..PipelineSettings::default()
        };
        assert!(settings.validate().is_err());

        settings = PipelineSettings {
            max_decoded_page_bytes: 0,
            ..PipelineSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
