use super::batch_executor::{BatchExecutor, ReclaimHook};
use super::batch_planner::BatchPlanner;
use super::encoder::{ImageCrateEncoder, ThumbnailEncoder};
use super::page_coordinator::{MultiPageCoordinator, thumbnail_output_path};
use super::page_normalizer::PageNormalizer;
use super::reporter::{LogReporter, ResourceReporter};
use super::tile_processor::TileProcessor;
use super::types::{Batch, SourceImage, ThumbnailResult};
use crate::config::PipelineSettings;
use crate::error::{PoolError, ThumbnailError};
use crate::tools::WorkerPool;
use anyhow::Result;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 一次執行的完整結果
#[derive(Debug)]
pub struct PipelineReport {
    /// 依批次、檔案、頁碼排序
    pub results: Vec<ThumbnailResult>,
    /// 實際執行的批次數
    pub batches: usize,
    /// 收到中斷信號後未被處理的檔案
    pub skipped_files: Vec<PathBuf>,
    pub elapsed: Duration,
    /// 執行緒池建立或關閉時的錯誤，每個池各自回報
    pub pool_errors: Vec<ThumbnailError>,
}

impl PipelineReport {
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// 批次縮圖產生流程
///
/// 執行緒池在每次 `run` 時建立並在結束前關閉：
/// 檔案層級池每個來源檔案一個任務，tile 層級池由所有檔案共用。
pub struct ThumbnailPipeline {
    settings: PipelineSettings,
    shutdown_signal: Arc<AtomicBool>,
    reporter: Arc<dyn ResourceReporter>,
    encoder: Arc<dyn ThumbnailEncoder>,
    reclaim_hook: Option<ReclaimHook>,
}

impl ThumbnailPipeline {
    pub fn new(settings: PipelineSettings, shutdown_signal: Arc<AtomicBool>) -> Result<Self> {
        settings.validate()?;
        let encoder: Arc<dyn ThumbnailEncoder> = Arc::new(ImageCrateEncoder::from_settings(&settings));

        Ok(Self {
            settings,
            shutdown_signal,
            reporter: Arc::new(LogReporter::new()),
            encoder,
            reclaim_hook: None,
        })
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ResourceReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn ThumbnailEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// 每個批次結束後呼叫，只作為釋放記憶體的提示
    #[must_use]
    pub fn with_reclaim_hook(mut self, hook: ReclaimHook) -> Self {
        self.reclaim_hook = Some(hook);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// 依序執行所有批次
    ///
    /// 收到中斷信號後不再開始新的批次，已開始的批次會跑完。
    pub fn run(&self, files: Vec<SourceImage>) -> PipelineReport {
        let start = Instant::now();
        self.reporter.memory_snapshot("開始處理前");
        let planned = BatchPlanner::from_settings(&self.settings).plan(files);
        let total_batches = planned.len();
        info!(
            "共 {} 個檔案，分為 {total_batches} 個批次",
            planned.iter().map(|b| b.len()).sum::<usize>()
        );

        let (tile_pool, executor) = match self.build_pools() {
            Ok(pools) => pools,
            Err(e) => {
                error!("{e}");
                return self.unstarted_report(planned, &e, start);
            }
        };

        let mut results = Vec::new();
        let mut skipped_files = Vec::new();
        let mut batches = 0;

        for (index, batch) in planned.into_iter().enumerate() {
            if self.shutdown_signal.load(Ordering::SeqCst) {
                skipped_files.extend(batch.into_items().into_iter().map(|s| s.path));
                continue;
            }

            self.reporter.batch_started(index, total_batches, &batch);
            let batch_start = Instant::now();
            let batch_results = executor.run_batch(&batch);
            self.reporter
                .batch_finished(index, &batch, &batch_results, batch_start.elapsed());

            results.extend(batch_results);
            batches += 1;
        }

        if !skipped_files.is_empty() {
            warn!("收到中斷信號，略過 {} 個未處理的檔案", skipped_files.len());
        }

        let pool_errors = shutdown_pools(&executor, &tile_pool, self.settings.shutdown_timeout());
        for e in &pool_errors {
            error!("{e}");
        }
        self.reporter.memory_snapshot("全部完成後");

        let report = PipelineReport {
            results,
            batches,
            skipped_files,
            elapsed: start.elapsed(),
            pool_errors,
        };
        info!(
            "全部完成 - 成功: {}, 失敗: {}, 略過: {}, 耗時 {:.2} 秒",
            report.success_count(),
            report.failure_count(),
            report.skipped_files.len(),
            report.elapsed.as_secs_f64()
        );
        report
    }

    fn build_pools(&self) -> Result<(Arc<WorkerPool>, BatchExecutor), ThumbnailError> {
        let tile_pool = Arc::new(
            WorkerPool::new(
                "tile",
                self.settings.tile_workers(),
                self.settings.tile_queue_capacity(),
            )
            .map_err(|e| pool_failure("tile", &e))?
            .with_interrupt_signal(Arc::clone(&self.shutdown_signal)),
        );
        let executor = self.build_executor(Arc::clone(&tile_pool))?;
        Ok((tile_pool, executor))
    }

    fn build_executor(&self, tile_pool: Arc<WorkerPool>) -> Result<BatchExecutor, ThumbnailError> {
        let coordinator = MultiPageCoordinator::new(
            TileProcessor::new(self.settings.tile_edge_pixels, tile_pool),
            PageNormalizer::new(
                self.settings.max_thumbnail_long_side_pixels,
                self.settings.alpha_background,
                Arc::clone(&self.encoder),
            ),
            &self.settings.output_directory_name,
            self.settings.max_decoded_page_bytes,
            Arc::clone(&self.reporter),
        );

        let batch_pool = WorkerPool::new(
            "batch",
            self.settings.batch_workers(),
            self.settings.batch_queue_capacity(),
        )
        .map_err(|e| pool_failure("batch", &e))?
        .with_interrupt_signal(Arc::clone(&self.shutdown_signal));

        Ok(BatchExecutor::new(
            batch_pool,
            Arc::new(coordinator),
            Arc::clone(&self.reporter),
            self.reclaim_hook.clone(),
        ))
    }

    /// 執行緒池無法建立時，每個檔案各回報一筆失敗
    fn unstarted_report(
        &self,
        planned: Vec<Batch>,
        error: &ThumbnailError,
        start: Instant,
    ) -> PipelineReport {
        let extension = self.settings.output_format.extension();
        let results = planned
            .into_iter()
            .flat_map(Batch::into_items)
            .map(|source| {
                let output_path = thumbnail_output_path(
                    &source.path,
                    &self.settings.output_directory_name,
                    None,
                    extension,
                );
                ThumbnailResult::failed(&source.path, output_path, None, error.clone())
            })
            .collect();

        PipelineReport {
            results,
            batches: 0,
            skipped_files: Vec::new(),
            elapsed: start.elapsed(),
            pool_errors: vec![error.clone()],
        }
    }
}

/// 依序關閉檔案層級與 tile 層級的執行緒池
///
/// 兩個池都一定會被關閉，前一個失敗不影響後一個；回傳所有失敗。
fn shutdown_pools(
    executor: &BatchExecutor,
    tile_pool: &WorkerPool,
    timeout: Duration,
) -> Vec<ThumbnailError> {
    let batch_outcome = executor.shutdown(timeout);
    let tile_outcome = tile_pool
        .shutdown(timeout)
        .map_err(|e| pool_failure(tile_pool.name(), &e));

    [batch_outcome, tile_outcome]
        .into_iter()
        .filter_map(Result::err)
        .collect()
}

fn pool_failure(pool: &str, error: &PoolError) -> ThumbnailError {
    ThumbnailError::PoolSaturationTimeout {
        pool: pool.to_string(),
        detail: error.to_string(),
    }
}
