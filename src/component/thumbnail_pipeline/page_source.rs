//! 頁面解碼
//!
//! TIFF 使用 `tiff` crate 逐頁解碼；其他格式交給 `image` crate，視為單頁來源。

use super::types::DecodedPage;
use crate::error::ThumbnailError;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageReader, RgbImage, RgbaImage};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};

const TIFF_MAGIC: [[u8; 4]; 4] = [
    *b"II*\0",
    *b"MM\0*",
    // BigTIFF
    *b"II+\0",
    *b"MM\0+",
];

/// 可逐頁解碼的影像容器
pub trait PageSource: Send {
    fn page_count(&self) -> usize;

    /// 依頁碼順序回傳下一頁；所有頁面都已回傳時為 `None`
    fn next_page(&mut self) -> Option<Result<DecodedPage, ThumbnailError>>;
}

/// 開啟來源檔案並選擇解碼器
///
/// `max_page_bytes` 是單頁解碼後緩衝的上限，標頭宣告的尺寸超過時該頁回報為損毀，
/// 不會嘗試配置記憶體。
pub fn open_page_source(
    path: &Path,
    max_page_bytes: u64,
) -> Result<Box<dyn PageSource>, ThumbnailError> {
    let metadata = std::fs::metadata(path).map_err(|e| invalid_source(path, &e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid_source(path, "不是一般檔案"));
    }

    let mut magic = [0u8; 4];
    let mut file = File::open(path).map_err(|e| invalid_source(path, &e.to_string()))?;
    let is_tiff = file.read_exact(&mut magic).is_ok() && TIFF_MAGIC.contains(&magic);

    if is_tiff {
        Ok(Box::new(TiffPageSource::open(path, max_page_bytes)?))
    } else {
        Ok(Box::new(SingleFrameSource::open(path, max_page_bytes)?))
    }
}

/// 多頁 TIFF
pub struct TiffPageSource {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    page_count: usize,
    next_index: usize,
    broken_chain: Option<String>,
    max_page_bytes: u64,
}

impl TiffPageSource {
    pub fn open(path: &Path, max_page_bytes: u64) -> Result<Self, ThumbnailError> {
        let page_count = count_tiff_pages(path, max_page_bytes)?;
        let decoder = open_tiff_decoder(path, max_page_bytes)?;
        debug!("開啟 TIFF {}: {page_count} 頁", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            page_count,
            next_index: 0,
            broken_chain: None,
            max_page_bytes,
        })
    }

    fn decode_current(&mut self, index: usize) -> Result<DecodedPage, ThumbnailError> {
        let corrupt = |e: tiff::TiffError| corrupt_page(&self.path, index, &e.to_string());

        let (width, height) = self.decoder.dimensions().map_err(corrupt)?;
        let color = self.decoder.colortype().map_err(corrupt)?;

        let required = decoded_page_bytes(width, height, color);
        if required > self.max_page_bytes {
            return Err(corrupt_page(
                &self.path,
                index,
                &format!(
                    "頁面 {width}x{height} 解碼需要 {required} 位元組，超過上限 {}",
                    self.max_page_bytes
                ),
            ));
        }

        let data = self.decoder.read_image().map_err(corrupt)?;
        let image = tiff_to_image(&self.path, index, width, height, color, data)?;

        Ok(DecodedPage::new(index, image))
    }
}

impl PageSource for TiffPageSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn next_page(&mut self) -> Option<Result<DecodedPage, ThumbnailError>> {
        if self.next_index >= self.page_count {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        if index > 0 && self.broken_chain.is_none() {
            if let Err(e) = self.decoder.next_image() {
                warn!("無法前進到第 {index} 頁 {}: {e}", self.path.display());
                self.broken_chain = Some(e.to_string());
            }
        }

        if let Some(detail) = &self.broken_chain {
            return Some(Err(corrupt_page(&self.path, index, detail)));
        }

        Some(self.decode_current(index))
    }
}

fn open_tiff_decoder(
    path: &Path,
    max_page_bytes: u64,
) -> Result<Decoder<BufReader<File>>, ThumbnailError> {
    let file = File::open(path).map_err(|e| invalid_source(path, &e.to_string()))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| ThumbnailError::CorruptImage {
        path: path.to_path_buf(),
        page: None,
        detail: e.to_string(),
    })?;

    let max_buffer = usize::try_from(max_page_bytes).unwrap_or(usize::MAX);
    let mut limits = Limits::default();
    limits.decoding_buffer_size = max_buffer;
    limits.intermediate_buffer_size = max_buffer;
    Ok(decoder.with_limits(limits))
}

/// 解碼後緩衝的位元組數，以 u64 計算避免溢位
fn decoded_page_bytes(width: u32, height: u32, color: ColorType) -> u64 {
    let (samples, bits) = match color {
        ColorType::Gray(bits) | ColorType::Palette(bits) => (1, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) | ColorType::YCbCr(bits) => (3, bits),
        ColorType::RGBA(bits) | ColorType::CMYK(bits) => (4, bits),
    };
    let bytes_per_sample = u64::from(bits).div_ceil(8).max(1);
    u64::from(width)
        .saturating_mul(u64::from(height))
        .saturating_mul(samples * bytes_per_sample)
}

/// 只讀取 IFD 鏈計算頁數，不解碼像素
fn count_tiff_pages(path: &Path, max_page_bytes: u64) -> Result<usize, ThumbnailError> {
    let mut decoder = open_tiff_decoder(path, max_page_bytes)?;
    let mut count = 1;

    while decoder.more_images() {
        if let Err(e) = decoder.next_image() {
            warn!(
                "TIFF IFD 鏈在第 {count} 頁後中斷 {}: {e}",
                path.display()
            );
            break;
        }
        count += 1;
    }

    Ok(count)
}

fn tiff_to_image(
    path: &Path,
    index: usize,
    width: u32,
    height: u32,
    color: ColorType,
    data: DecodingResult,
) -> Result<DynamicImage, ThumbnailError> {
    let samples: Vec<u8> = match data {
        DecodingResult::U8(buffer) => buffer,
        // 16 位元取高位元組
        DecodingResult::U16(buffer) => buffer.into_iter().map(|v| (v >> 8) as u8).collect(),
        _ => return Err(unsupported(path, "不支援 32/64 位元或浮點樣本")),
    };

    let image = match color {
        ColorType::Gray(8 | 16) => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        ColorType::GrayA(8 | 16) => {
            GrayAlphaImage::from_raw(width, height, samples).map(DynamicImage::ImageLumaA8)
        }
        ColorType::RGB(8 | 16) => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        ColorType::RGBA(8 | 16) => {
            RgbaImage::from_raw(width, height, samples).map(DynamicImage::ImageRgba8)
        }
        ColorType::CMYK(8 | 16) => {
            RgbImage::from_raw(width, height, cmyk_to_rgb(&samples)).map(DynamicImage::ImageRgb8)
        }
        other => return Err(unsupported(path, &format!("不支援的色彩類型 {other:?}"))),
    };

    image.ok_or_else(|| corrupt_page(path, index, "像素資料長度與頁面尺寸不符"))
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|cmyk| {
            let k = 255 - u16::from(cmyk[3]);
            let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
            [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
        })
        .collect()
}

/// `image` crate 能解碼的單頁格式
pub struct SingleFrameSource {
    path: PathBuf,
    reader: Option<ImageReader<BufReader<File>>>,
}

impl SingleFrameSource {
    pub fn open(path: &Path, max_page_bytes: u64) -> Result<Self, ThumbnailError> {
        // 只依內容判斷格式，不採用副檔名
        let file = File::open(path).map_err(|e| invalid_source(path, &e.to_string()))?;
        let mut reader = ImageReader::new(BufReader::new(file))
            .with_guessed_format()
            .map_err(|e| invalid_source(path, &e.to_string()))?;

        if reader.format().is_none() {
            return Err(unsupported(path, "無法辨識的影像格式"));
        }
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(max_page_bytes);
        reader.limits(limits);

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
        })
    }
}

impl PageSource for SingleFrameSource {
    fn page_count(&self) -> usize {
        1
    }

    fn next_page(&mut self) -> Option<Result<DecodedPage, ThumbnailError>> {
        let reader = self.reader.take()?;
        let decoded = reader
            .decode()
            .map(|image| DecodedPage::new(0, to_eight_bit(image)))
            .map_err(|e| corrupt_page(&self.path, 0, &e.to_string()));
        Some(decoded)
    }
}

/// 統一為 8 位元緩衝
fn to_eight_bit(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => image,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn invalid_source(path: &Path, reason: &str) -> ThumbnailError {
    ThumbnailError::InvalidSourceFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn unsupported(path: &Path, detail: &str) -> ThumbnailError {
    ThumbnailError::UnsupportedFormat {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

fn corrupt_page(path: &Path, index: usize, detail: &str) -> ThumbnailError {
    ThumbnailError::CorruptImage {
        path: path.to_path_buf(),
        page: Some(index),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::TempDir;
    use tiff::encoder::{TiffEncoder, colortype};

    const PAGE_LIMIT: u64 = 64 * 1024 * 1024;

    /// 只有標頭的 Gray8 TIFF：宣告 `width` x `height`，實際只有 16 位元組像素資料
    fn header_only_tiff(width: u32, height: u32) -> Vec<u8> {
        const STRIP_OFFSET: u32 = 8 + 2 + 9 * 12 + 4;
        // (tag, type, value)；type 3 = SHORT, 4 = LONG
        let entries: [(u16, u16, u32); 9] = [
            (256, 4, width),
            (257, 4, height),
            (258, 3, 8),
            (259, 3, 1),
            (262, 3, 1),
            (273, 4, STRIP_OFFSET),
            (277, 3, 1),
            (278, 4, height),
            (279, 4, 4_000_000_000),
        ];

        let mut bytes = b"II*\0".to_vec();
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, field_type, value) in entries {
            bytes.extend_from_slice(&tag.to_le_bytes());
            bytes.extend_from_slice(&field_type.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            if field_type == 3 {
                bytes.extend_from_slice(&(value as u16).to_le_bytes());
                bytes.extend_from_slice(&[0, 0]);
            } else {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(bytes.len() as u32, STRIP_OFFSET);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    fn write_rgb_tiff(path: &Path, pages: &[(u32, u32)]) {
        let mut file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(&mut file).unwrap();
        for (index, &(width, height)) in pages.iter().enumerate() {
            let data: Vec<u8> = (0..width * height * 3)
                .map(|i| ((i as usize + index * 40) % 251) as u8)
                .collect();
            encoder
                .write_image::<colortype::RGB8>(width, height, &data)
                .unwrap();
        }
    }

    #[test]
    fn test_multi_page_tiff_decodes_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("book.tif");
        write_rgb_tiff(&path, &[(8, 4), (5, 9), (3, 3)]);

        let mut source = open_page_source(&path, PAGE_LIMIT).unwrap();
        assert_eq!(source.page_count(), 3);

        let mut sizes = Vec::new();
        while let Some(page) = source.next_page() {
            let page = page.unwrap();
            sizes.push((page.page_index, page.width(), page.height()));
        }
        assert_eq!(sizes, vec![(0, 8, 4), (1, 5, 9), (2, 3, 3)]);
    }

    #[test]
    fn test_rgba_tiff_keeps_alpha() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alpha.tif");
        let mut file = File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(&mut file).unwrap();
        encoder
            .write_image::<colortype::RGBA8>(2, 2, &[10u8; 16])
            .unwrap();
        drop(encoder);

        let mut source = open_page_source(&path, PAGE_LIMIT).unwrap();
        let page = source.next_page().unwrap().unwrap();
        assert!(page.has_alpha());
    }

    #[test]
    fn test_sixteen_bit_gray_is_reduced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gray16.tif");
        let mut file = File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(&mut file).unwrap();
        encoder
            .write_image::<colortype::Gray16>(2, 1, &[0xFF00u16, 0x1234])
            .unwrap();
        drop(encoder);

        let mut source = open_page_source(&path, PAGE_LIMIT).unwrap();
        let page = source.next_page().unwrap().unwrap();
        assert_eq!(page.image.as_luma8().unwrap().as_raw(), &vec![0xFF, 0x12]);
    }

    #[test]
    fn test_png_is_single_frame_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.png");
        RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();

        let mut source = open_page_source(&path, PAGE_LIMIT).unwrap();
        assert_eq!(source.page_count(), 1);
        let page = source.next_page().unwrap().unwrap();
        assert_eq!((page.width(), page.height()), (4, 3));
        assert!(source.next_page().is_none());
    }

    #[test]
    fn test_missing_file_is_invalid_source() {
        let error = open_page_source(Path::new("/definitely/missing.tif"), PAGE_LIMIT)
            .err()
            .unwrap();
        assert_eq!(error.kind(), ErrorKind::InvalidSourceFile);
    }

    #[test]
    fn test_unknown_bytes_are_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("random.tif");
        fs::write(&path, b"this is not an image at all").unwrap();

        let error = open_page_source(&path, PAGE_LIMIT).err().unwrap();
        assert_eq!(error.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_truncated_tiff_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.tif");
        fs::write(&path, b"II*\0\x08\0\0\0\xff\xff").unwrap();

        let error = open_page_source(&path, PAGE_LIMIT).err().unwrap();
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_oversized_header_is_corrupt_without_allocating() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("huge.tif");
        fs::write(&path, header_only_tiff(4_000_000, 4_000_000)).unwrap();

        let mut source = open_page_source(&path, PAGE_LIMIT).unwrap();
        assert_eq!(source.page_count(), 1);

        let error = source.next_page().unwrap().err().unwrap();
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
        assert!(error.to_string().contains("4000000x4000000"));
        assert!(source.next_page().is_none());
    }

    #[test]
    fn test_page_within_limit_decodes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small.tif");
        write_rgb_tiff(&path, &[(10, 10)]);

        // 10 x 10 x 3 剛好等於上限
        let mut source = open_page_source(&path, 300).unwrap();
        assert!(source.next_page().unwrap().is_ok());

        let mut source = open_page_source(&path, 299).unwrap();
        let error = source.next_page().unwrap().err().unwrap();
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_single_frame_over_limit_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wide.png");
        RgbImage::new(256, 256).save(&path).unwrap();

        let mut source = open_page_source(&path, 1024).unwrap();
        let error = source.next_page().unwrap().err().unwrap();
        assert_eq!(error.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_decoded_page_bytes_saturates() {
        assert_eq!(decoded_page_bytes(2, 3, ColorType::RGB(8)), 18);
        assert_eq!(decoded_page_bytes(2, 3, ColorType::Gray(16)), 12);
        assert_eq!(decoded_page_bytes(4_000_000, 4_000_000, ColorType::Gray(8)), 16_000_000_000_000);
        assert_eq!(decoded_page_bytes(u32::MAX, u32::MAX, ColorType::RGBA(64)), u64::MAX);
    }

    #[test]
    fn test_cmyk_conversion() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0]), vec![255, 255, 255]);
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255]), vec![0, 0, 0]);
        assert_eq!(cmyk_to_rgb(&[255, 0, 0, 0]), vec![0, 255, 255]);
    }
}
