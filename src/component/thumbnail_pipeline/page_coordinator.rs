use super::page_normalizer::PageNormalizer;
use super::page_source::open_page_source;
use super::reporter::ResourceReporter;
use super::tile_processor::TileProcessor;
use super::types::{DecodedPage, SourceImage, ThumbnailResult};
use crate::error::ThumbnailError;
use crate::tools::thumbnail_directory;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// 縮圖輸出路徑
///
/// 單頁：`<parent>/<dir>/<stem>.<ext>`；多頁：`<parent>/<dir>/<stem>_page_<index>.<ext>`
#[must_use]
pub fn thumbnail_output_path(
    source: &Path,
    directory_name: &str,
    page_index: Option<usize>,
    extension: &str,
) -> PathBuf {
    let stem = source.file_stem().map_or_else(
        || "image".to_string(),
        |stem| stem.to_string_lossy().to_string(),
    );
    let file_name = match page_index {
        Some(index) => format!("{stem}_page_{index}.{extension}"),
        None => format!("{stem}.{extension}"),
    };
    thumbnail_directory(source, directory_name).join(file_name)
}

/// 處理單一來源檔案的所有頁面
///
/// 每頁依序解碼、切 tile 拼接、正規化後寫出。單頁失敗只影響該頁的結果。
pub struct MultiPageCoordinator {
    tile_processor: TileProcessor,
    normalizer: PageNormalizer,
    output_directory_name: String,
    max_decoded_page_bytes: u64,
    reporter: Arc<dyn ResourceReporter>,
}

impl MultiPageCoordinator {
    #[must_use]
    pub fn new(
        tile_processor: TileProcessor,
        normalizer: PageNormalizer,
        output_directory_name: &str,
        max_decoded_page_bytes: u64,
        reporter: Arc<dyn ResourceReporter>,
    ) -> Self {
        Self {
            tile_processor,
            normalizer,
            output_directory_name: output_directory_name.to_string(),
            max_decoded_page_bytes,
            reporter,
        }
    }

    #[must_use]
    pub fn output_path(&self, source: &Path, page_index: Option<usize>) -> PathBuf {
        thumbnail_output_path(
            source,
            &self.output_directory_name,
            page_index,
            self.normalizer.extension(),
        )
    }

    /// 回傳依頁碼排序的結果
    pub fn process(&self, source: &SourceImage) -> Vec<ThumbnailResult> {
        let start = Instant::now();

        let mut pages = match open_page_source(&source.path, self.max_decoded_page_bytes) {
            Ok(pages) => pages,
            Err(e) => {
                let result =
                    ThumbnailResult::failed(&source.path, self.output_path(&source.path, None), None, e);
                self.reporter.page_finished(&result);
                return vec![result];
            }
        };

        let page_count = pages.page_count();
        let multi_page = page_count > 1;
        let mut results = Vec::with_capacity(page_count);
        debug!("{} 共 {page_count} 頁", source.display_name());

        while let Some(decoded) = pages.next_page() {
            let page_label = multi_page.then_some(results.len());
            let output_path = self.output_path(&source.path, page_label);
            let page_start = Instant::now();

            let result = match decoded.and_then(|page| self.process_page(&source.path, page, &output_path)) {
                Ok(()) => {
                    debug!(
                        "{} 耗時 {:.2} 秒",
                        output_path.display(),
                        page_start.elapsed().as_secs_f64()
                    );
                    ThumbnailResult::succeeded(&source.path, output_path, page_label)
                }
                Err(e) => ThumbnailResult::failed(&source.path, output_path, page_label, e),
            };

            self.reporter.page_finished(&result);
            results.push(result);
        }

        info!(
            "{} 處理完成: {} 頁, 耗時 {:.2} 秒",
            source.display_name(),
            results.len(),
            start.elapsed().as_secs_f64()
        );
        results
    }

    fn process_page(
        &self,
        source: &Path,
        page: DecodedPage,
        output_path: &Path,
    ) -> Result<(), ThumbnailError> {
        if page.width() == 0 || page.height() == 0 {
            return Err(ThumbnailError::CorruptImage {
                path: source.to_path_buf(),
                page: Some(page.page_index),
                detail: "頁面尺寸為零".to_string(),
            });
        }

        let stitched = self.tile_processor.process(source, page)?;
        self.normalizer.normalize(stitched, output_path)?;
        Ok(())
    }
}
