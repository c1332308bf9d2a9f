use crate::config::types::PipelineSettings;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn save_settings(path: &Path, settings: &PipelineSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Config, OutputFormat};
    use tempfile::TempDir;

    #[test]
    fn test_saved_settings_load_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("thumbnailer.json");
        let settings = PipelineSettings {
            output_format: OutputFormat::Png,
            worker_pool_size: Some(4),
            ..PipelineSettings::default()
        };

        save_settings(&path, &settings).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"batchMemoryThresholdBytes\""));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.settings, settings);
    }
}
