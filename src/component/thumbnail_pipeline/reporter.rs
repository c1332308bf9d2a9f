use super::types::{Batch, ThumbnailResult};
use crate::tools::MemoryMonitor;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 進度與記憶體資訊的接收端
///
/// 所有方法預設不做任何事，實作者只需覆寫關心的事件。
pub trait ResourceReporter: Send + Sync {
    fn batch_started(&self, _index: usize, _total: usize, _batch: &Batch) {}

    fn batch_finished(
        &self,
        _index: usize,
        _batch: &Batch,
        _results: &[ThumbnailResult],
        _elapsed: Duration,
    ) {
    }

    fn page_finished(&self, _result: &ThumbnailResult) {}

    fn memory_snapshot(&self, _context: &str) {}
}

/// 不回報任何事件
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ResourceReporter for NoopReporter {}

/// 寫入日誌，記憶體快照使用 sysinfo
#[derive(Default)]
pub struct LogReporter {
    monitor: Mutex<MemoryMonitor>,
}

impl LogReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceReporter for LogReporter {
    fn batch_started(&self, index: usize, total: usize, batch: &Batch) {
        info!(
            "開始批次 {}/{}: {} 個檔案, 共 {:.2} MB",
            index + 1,
            total,
            batch.len(),
            batch.total_bytes() as f64 / 1024.0 / 1024.0
        );
    }

    fn batch_finished(
        &self,
        index: usize,
        _batch: &Batch,
        results: &[ThumbnailResult],
        elapsed: Duration,
    ) {
        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            "批次 {} 完成 - 成功: {}, 失敗: {}, 耗時 {:.2} 秒",
            index + 1,
            results.len() - failed,
            failed,
            elapsed.as_secs_f64()
        );
    }

    fn page_finished(&self, result: &ThumbnailResult) {
        match &result.error {
            None => info!("縮圖已建立: {}", result.output_path.display()),
            Some(e) => error!("縮圖建立失敗 {}: {e}", result.source_path.display()),
        }
    }

    fn memory_snapshot(&self, context: &str) {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log_usage(context);
    }
}

/// 終端機進度條，每個檔案完成時前進一格，其餘事件轉給 `LogReporter`
pub struct ProgressReporter {
    progress_bar: ProgressBar,
    inner: LogReporter,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(total_files: usize) -> Self {
        let progress_bar = ProgressBar::new(total_files as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress_bar.set_message("產生縮圖中...");

        Self {
            progress_bar,
            inner: LogReporter::new(),
        }
    }

    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.progress_bar.abandon_with_message(message.to_string());
    }
}

impl ResourceReporter for ProgressReporter {
    fn batch_started(&self, index: usize, total: usize, batch: &Batch) {
        self.progress_bar
            .set_message(format!("批次 {}/{}", index + 1, total));
        self.inner.batch_started(index, total, batch);
    }

    fn batch_finished(
        &self,
        index: usize,
        batch: &Batch,
        results: &[ThumbnailResult],
        elapsed: Duration,
    ) {
        self.progress_bar.inc(batch.len() as u64);
        self.inner.batch_finished(index, batch, results, elapsed);
    }

    fn page_finished(&self, result: &ThumbnailResult) {
        self.progress_bar.suspend(|| self.inner.page_finished(result));
    }

    fn memory_snapshot(&self, context: &str) {
        self.progress_bar
            .suspend(|| self.inner.memory_snapshot(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::thumbnail_pipeline::types::SourceImage;
    use std::path::PathBuf;

    #[test]
    fn test_progress_advances_per_file() {
        let reporter = ProgressReporter::new(3);
        let mut batch = Batch::default();
        batch.push(SourceImage::new("/scan/a.tif", 1));
        batch.push(SourceImage::new("/scan/b.tif", 1));

        let result = ThumbnailResult::succeeded(
            &PathBuf::from("/scan/a.tif"),
            PathBuf::from("/scan/thumbnails/a.jpg"),
            None,
        );
        reporter.batch_started(0, 2, &batch);
        reporter.page_finished(&result);
        reporter.batch_finished(0, &batch, &[result], Duration::from_millis(5));

        assert_eq!(reporter.progress_bar.position(), 2);
        reporter.finish("done");
    }
}
