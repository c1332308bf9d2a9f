//! 縮圖流程的錯誤模型
//!
//! 檔案、頁面層級的失敗都以 `ThumbnailError` 表示，並附在 `ThumbnailResult` 上回報；
//! 執行緒池本身的失敗以 `PoolError` 表示。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 回報給呼叫端的錯誤類別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidSourceFile,
    UnsupportedFormat,
    CorruptImage,
    TileAssemblyFailure,
    EncodeFailure,
    PoolSaturationTimeout,
}

#[derive(Debug, Clone, Error)]
pub enum ThumbnailError {
    #[error("無效的來源檔案 {}: {reason}", .path.display())]
    InvalidSourceFile { path: PathBuf, reason: String },

    #[error("找不到可用的解碼器 {}: {detail}", .path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    #[error("影像解碼失敗 {} (頁 {}): {detail}", .path.display(), page_label(.page))]
    CorruptImage {
        path: PathBuf,
        page: Option<usize>,
        detail: String,
    },

    #[error("tile 合併失敗 {} (頁 {}): {detail}", .path.display(), page_label(.page))]
    TileAssemblyFailure {
        path: PathBuf,
        page: Option<usize>,
        detail: String,
    },

    #[error("縮圖寫入失敗 {}: {detail}", .path.display())]
    EncodeFailure { path: PathBuf, detail: String },

    #[error("執行緒池 {pool} 未能正常結束: {detail}")]
    PoolSaturationTimeout { pool: String, detail: String },
}

impl ThumbnailError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSourceFile { .. } => ErrorKind::InvalidSourceFile,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::CorruptImage { .. } => ErrorKind::CorruptImage,
            Self::TileAssemblyFailure { .. } => ErrorKind::TileAssemblyFailure,
            Self::EncodeFailure { .. } => ErrorKind::EncodeFailure,
            Self::PoolSaturationTimeout { .. } => ErrorKind::PoolSaturationTimeout,
        }
    }

    /// 檔案層級任務未能取得結果時的錯誤轉換
    ///
    /// 任務 panic 視為解碼器在損毀資料上崩潰；其餘情況都是執行緒池無法完成任務。
    #[must_use]
    pub fn from_file_task(path: PathBuf, pool: &str, error: PoolError) -> Self {
        match error {
            PoolError::TaskPanicked(detail) => Self::CorruptImage {
                path,
                page: None,
                detail: format!("處理時發生 panic: {detail}"),
            },
            other => Self::PoolSaturationTimeout {
                pool: pool.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

fn page_label(page: &Option<usize>) -> String {
    page.map_or_else(|| "-".to_string(), |index| index.to_string())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("無法建立執行緒池 {pool}: {detail}")]
    Build { pool: String, detail: String },

    #[error("執行緒池已關閉，不再接受任務")]
    ShutDown,

    #[error("任務執行時 panic: {0}")]
    TaskPanicked(String),

    #[error("任務已被強制取消")]
    Cancelled,

    #[error("執行緒池 {pool} 在 {timeout:?} 內未結束，已強制取消")]
    ShutdownTimeout { pool: String, timeout: Duration },

    #[error("等待執行緒池 {pool} 結束時收到中斷信號，已強制取消")]
    Interrupted { pool: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let error = ThumbnailError::CorruptImage {
            path: PathBuf::from("/scan/a.tif"),
            page: Some(2),
            detail: "bad strip".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
        assert!(error.to_string().contains("頁 2"));
    }

    #[test]
    fn test_file_task_panic_maps_to_corrupt_image() {
        let error = ThumbnailError::from_file_task(
            PathBuf::from("/scan/a.tif"),
            "batch",
            PoolError::TaskPanicked("index out of bounds".to_string()),
        );
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_file_task_cancel_maps_to_pool_timeout() {
        let error =
            ThumbnailError::from_file_task(PathBuf::from("/scan/a.tif"), "batch", PoolError::Cancelled);
        assert_eq!(error.kind(), ErrorKind::PoolSaturationTimeout);
    }
}
