use anyhow::{Result, bail};
use std::io;
use std::path::{Path, PathBuf};

pub fn validate_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("路徑不存在: {}", path.display());
    }
    if !path.is_dir() {
        bail!("路徑不是資料夾: {}", path.display());
    }
    Ok(())
}

/// 建立資料夾（含上層），已存在時不做任何事
pub fn ensure_directory_exists(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// 來源檔案旁的縮圖輸出資料夾
#[must_use]
pub fn thumbnail_directory(source: &Path, directory_name: &str) -> PathBuf {
    source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(directory_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_rejects_missing_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("scan.tif");
        std::fs::write(&file, b"x").unwrap();

        assert!(validate_directory_exists(temp_dir.path()).is_ok());
        assert!(validate_directory_exists(&file).is_err());
        assert!(validate_directory_exists(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_ensure_directory_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("thumbnails");

        ensure_directory_exists(&nested).unwrap();
        ensure_directory_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_thumbnail_directory_is_beside_source() {
        let dir = thumbnail_directory(Path::new("/archive/box1/scan.tif"), "thumbnails");
        assert_eq!(dir, PathBuf::from("/archive/box1/thumbnails"));
    }
}
