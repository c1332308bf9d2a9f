use super::encoder::ThumbnailEncoder;
use crate::error::ThumbnailError;
use crate::tools::ensure_directory_exists;
use fast_image_resize as fr;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use log::warn;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_MAX_LONG_SIDE: u32 = 1200;

/// 去除透明度、縮小並編碼拼接後的頁面
pub struct PageNormalizer {
    max_long_side: u32,
    background: Rgb<u8>,
    encoder: Arc<dyn ThumbnailEncoder>,
}

impl PageNormalizer {
    #[must_use]
    pub fn new(max_long_side: u32, background: [u8; 3], encoder: Arc<dyn ThumbnailEncoder>) -> Self {
        Self {
            max_long_side: max_long_side.max(1),
            background: Rgb(background),
            encoder,
        }
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        self.encoder.extension()
    }

    /// 寫出縮圖，回傳輸出尺寸
    pub fn normalize(
        &self,
        page: DynamicImage,
        output_path: &Path,
    ) -> Result<(u32, u32), ThumbnailError> {
        let opaque = remove_alpha(page, self.background).into_rgb8();
        let (width, height) = target_dimensions(opaque.width(), opaque.height(), self.max_long_side);
        let resized = resize_rgb(opaque, width, height);

        if let Some(directory) = output_path.parent() {
            ensure_directory_exists(directory).map_err(|e| ThumbnailError::EncodeFailure {
                path: output_path.to_path_buf(),
                detail: format!("無法建立輸出資料夾 {}: {e}", directory.display()),
            })?;
        }

        self.encoder.encode(&resized, output_path)?;
        Ok((width, height))
    }
}

/// 將含透明度的影像以 source-over 合成到不透明背景上
///
/// 沒有透明通道的影像原樣回傳。
#[must_use]
pub fn remove_alpha(image: DynamicImage, background: Rgb<u8>) -> DynamicImage {
    if !image.color().has_alpha() {
        return image;
    }

    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    let mut opaque = RgbImage::new(width, height);

    for (dest, src) in opaque.pixels_mut().zip(rgba.pixels()) {
        let alpha = u16::from(src[3]);
        for channel in 0..3 {
            let fg = u16::from(src[channel]);
            let bg = u16::from(background[channel]);
            dest[channel] = ((fg * alpha + bg * (255 - alpha) + 127) / 255) as u8;
        }
    }

    DynamicImage::ImageRgb8(opaque)
}

/// 長邊等於 `max_long_side`，短邊等比例縮放後無條件捨去
#[must_use]
pub fn target_dimensions(width: u32, height: u32, max_long_side: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let scale_short = |short: u32, long: u32| {
        // short <= long，結果不會超過 max_long_side
        let scaled = u64::from(max_long_side) * u64::from(short) / u64::from(long);
        u32::try_from(scaled).unwrap_or(max_long_side).max(1)
    };

    if width >= height {
        (max_long_side, scale_short(height, width))
    } else {
        (scale_short(width, height), max_long_side)
    }
}

fn resize_rgb(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }

    match resize_with_fast_image_resize(&image, width, height) {
        Ok(resized) => resized,
        Err(detail) => {
            warn!("fast_image_resize 縮放失敗，改用 image::imageops::resize: {detail}");
            imageops::resize(&image, width, height, FilterType::Lanczos3)
        }
    }
}

fn resize_with_fast_image_resize(
    image: &RgbImage,
    width: u32,
    height: u32,
) -> Result<RgbImage, String> {
    let src_image = fr::images::ImageRef::new(
        image.width(),
        image.height(),
        image.as_raw(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| format!("建立來源緩衝失敗: {e}"))?;
    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| e.to_string())?;

    RgbImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| "輸出緩衝長度異常".to_string())
}
