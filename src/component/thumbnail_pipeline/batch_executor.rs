use super::page_coordinator::MultiPageCoordinator;
use super::reporter::ResourceReporter;
use super::types::{Batch, ThumbnailResult};
use crate::error::ThumbnailError;
use crate::tools::{TaskHandle, WorkerPool};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// 批次結束後的記憶體回收時機
pub type ReclaimHook = Arc<dyn Fn() + Send + Sync>;

/// 以檔案層級執行緒池執行單一批次
///
/// 每個檔案一個任務，完成後依提交順序攤平結果。
pub struct BatchExecutor {
    pool: WorkerPool,
    coordinator: Arc<MultiPageCoordinator>,
    reporter: Arc<dyn ResourceReporter>,
    reclaim_hook: Option<ReclaimHook>,
}

impl BatchExecutor {
    #[must_use]
    pub fn new(
        pool: WorkerPool,
        coordinator: Arc<MultiPageCoordinator>,
        reporter: Arc<dyn ResourceReporter>,
        reclaim_hook: Option<ReclaimHook>,
    ) -> Self {
        Self {
            pool,
            coordinator,
            reporter,
            reclaim_hook,
        }
    }

    /// 阻塞直到批次內所有檔案都有結果
    pub fn run_batch(&self, batch: &Batch) -> Vec<ThumbnailResult> {
        self.reporter.memory_snapshot("批次開始前");

        let handles: Vec<_> = batch
            .items()
            .iter()
            .map(|source| {
                let coordinator = Arc::clone(&self.coordinator);
                let task_source = source.clone();
                let handle = self.pool.submit(move || coordinator.process(&task_source));
                (source, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        for (source, handle) in handles {
            match handle.and_then(TaskHandle::join) {
                Ok(file_results) => results.extend(file_results),
                Err(e) => {
                    let error =
                        ThumbnailError::from_file_task(source.path.clone(), self.pool.name(), e);
                    let result = ThumbnailResult::failed(
                        &source.path,
                        self.coordinator.output_path(&source.path, None),
                        None,
                        error,
                    );
                    self.reporter.page_finished(&result);
                    results.push(result);
                }
            }
        }

        if let Some(hook) = &self.reclaim_hook {
            debug!("執行批次後的記憶體回收");
            hook();
        }
        self.reporter.memory_snapshot("批次結束後");

        results
    }

    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// 關閉檔案層級執行緒池
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ThumbnailError> {
        self.pool
            .shutdown(timeout)
            .map_err(|e| ThumbnailError::PoolSaturationTimeout {
                pool: self.pool.name().to_string(),
                detail: e.to_string(),
            })
    }
}
