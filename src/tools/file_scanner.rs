use crate::component::thumbnail_pipeline::SourceImage;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use walkdir::WalkDir;

const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

#[must_use]
pub fn is_tiff_path(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| TIFF_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}

/// 遞迴掃描資料夾下的 TIFF 檔案，依路徑排序
///
/// 名稱為 `skip_directory` 的子資料夾（縮圖輸出資料夾）不會被掃描。
pub fn scan_tiff_files(directory: &Path, skip_directory: &str) -> Result<Vec<SourceImage>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir() && entry.file_name() == OsStr::new(skip_directory))
        });

    for entry in walker {
        let entry =
            entry.with_context(|| format!("無法掃描資料夾: {}", directory.display()))?;
        if !entry.file_type().is_file() || !is_tiff_path(entry.path()) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("無法讀取檔案資訊: {}", entry.path().display()))?;
        files.push(SourceImage::new(entry.into_path(), metadata.len()));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
