use crate::config::{OutputFormat, PipelineSettings};
use crate::error::ThumbnailError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageResult, RgbImage};
use log::warn;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// 縮圖編碼能力
pub trait ThumbnailEncoder: Send + Sync {
    /// 輸出檔案的副檔名（不含點）
    fn extension(&self) -> &str;

    fn encode(&self, image: &RgbImage, output_path: &Path) -> Result<(), ThumbnailError>;
}

/// 使用 `image` crate 的 JPEG / PNG 編碼器
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateEncoder {
    format: OutputFormat,
    jpeg_quality: u8,
}

impl ImageCrateEncoder {
    #[must_use]
    pub fn new(format: OutputFormat, jpeg_quality: u8) -> Self {
        Self {
            format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.output_format, settings.jpeg_quality())
    }

    fn write(&self, image: &RgbImage, output_path: &Path) -> ImageResult<()> {
        let mut writer = BufWriter::new(File::create(output_path)?);
        match self.format {
            OutputFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality).encode_image(image)?;
            }
            OutputFormat::Png => PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )?,
        }
        writer.flush()?;
        Ok(())
    }
}

impl ThumbnailEncoder for ImageCrateEncoder {
    fn extension(&self) -> &str {
        self.format.extension()
    }

    fn encode(&self, image: &RgbImage, output_path: &Path) -> Result<(), ThumbnailError> {
        self.write(image, output_path).map_err(|e| {
            // 不留下寫到一半的檔案
            if output_path.exists() {
                if let Err(remove_error) = fs::remove_file(output_path) {
                    warn!(
                        "無法刪除失敗的輸出檔案 {}: {remove_error}",
                        output_path.display()
                    );
                }
            }
            ThumbnailError::EncodeFailure {
                path: output_path.to_path_buf(),
                detail: e.to_string(),
            }
        })
    }
}
