use super::{icon, ConverterService, TargetFormat};
use crate::config::ConversionSettings;
use crate::models::{
    compression_ratio, ColorMode, ConversionReport, ConversionRequest, ConversionResult,
    ConvertedImage, IconReport, ImageInfo,
};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::bmp::BmpEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::imageops::{self, FilterType};
use image::error::{EncodingError, ImageFormatHint};
use image::{DynamicImage, Frame, ImageError, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

/// GIF quantizer speed: 1 is slowest and best, 30 fastest.
const GIF_QUANTIZE_SPEED: i32 = 10;

/// A decoded upload, read-only input to a conversion.
pub struct SourceImage {
    image: DynamicImage,
    format: Option<ImageFormat>,
    mode: ColorMode,
    byte_len: u64,
}

impl SourceImage {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| Error::Decode(image::ImageError::IoError(e)))?;
        let format = reader.format();
        let image = reader.decode().map_err(Error::Decode)?;
        let mode = ColorMode::classify(image.color(), format);

        Ok(Self {
            image,
            format,
            mode,
            byte_len: bytes.len() as u64,
        })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn format_name(&self) -> Option<String> {
        self.format
            .map(|format| format!("{:?}", format).to_ascii_uppercase())
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }
}

/// Output dimensions for a resize request, `None` when no resize was asked for.
pub fn plan_resize(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect: bool,
) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    let scaled = |value: u32, ratio: f64| ((value as f64 * ratio) as u32).max(1);

    match (width, height, maintain_aspect) {
        (None, None, _) => None,
        (Some(w), Some(h), true) => {
            let ratio = (w as f64 / src_w as f64).min(h as f64 / src_h as f64);
            Some((scaled(src_w, ratio), scaled(src_h, ratio)))
        }
        (Some(w), None, true) => Some((w, scaled(src_h, w as f64 / src_w as f64))),
        (None, Some(h), true) => Some((scaled(src_w, h as f64 / src_h as f64), h)),
        (w, h, false) => Some((w.unwrap_or(src_w), h.unwrap_or(src_h))),
    }
}

/// Composite onto opaque white, dropping the alpha channel.
pub fn flatten_onto_white(image: &DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &rgba, 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

/// Bring the pixel layout into one the target encoder accepts.
fn normalize(image: DynamicImage, mode: ColorMode, target: TargetFormat) -> Result<DynamicImage> {
    if target.needs_flatten() {
        return Ok(match (mode, image) {
            (ColorMode::Gray, image @ DynamicImage::ImageLuma8(_)) => image,
            (ColorMode::Gray, image) => DynamicImage::ImageLuma8(image.to_luma8()),
            (ColorMode::Rgb, image @ DynamicImage::ImageRgb8(_)) => image,
            (ColorMode::Rgb, image) => DynamicImage::ImageRgb8(image.to_rgb8()),
            (_, image) => flatten_onto_white(&image),
        });
    }

    let image = if mode == ColorMode::Palette {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        image
    };

    // Float and gray+alpha layouts are not accepted by every encoder.
    match image {
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgba32F(_) => Ok(DynamicImage::ImageRgba8(image.to_rgba8())),
        DynamicImage::ImageRgb32F(_) => Ok(DynamicImage::ImageRgb8(image.to_rgb8())),
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageRgba16(_) => Ok(image),
        other => Err(Error::Normalize(format!(
            "no {} layout for {:?} pixels",
            target,
            other.color()
        ))),
    }
}

fn encode(image: &DynamicImage, target: TargetFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());

    let written = match target {
        TargetFormat::Jpeg => {
            image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        }
        TargetFormat::Png => image.write_with_encoder(PngEncoder::new_with_quality(
            &mut buffer,
            CompressionType::Best,
            PngFilter::Adaptive,
        )),
        TargetFormat::WebP => return encode_webp(image, quality),
        TargetFormat::Gif => {
            let mut encoder = GifEncoder::new_with_speed(&mut buffer, GIF_QUANTIZE_SPEED);
            encoder.encode_frame(Frame::new(image.to_rgba8()))
        }
        TargetFormat::Bmp => image.write_with_encoder(BmpEncoder::new(&mut buffer)),
        TargetFormat::Tiff => image.write_with_encoder(TiffEncoder::new(&mut buffer)),
        TargetFormat::Ico => {
            return Err(Error::Invariant(
                "ICO output is packed, not encoded directly".to_string(),
            ))
        }
    };
    written.map_err(Error::Encode)?;

    Ok(buffer.into_inner())
}

/// Lossy WebP through libwebp; alpha is kept when the source has it.
fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = (image.width(), image.height());
    let encoded = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(false, f32::from(quality))
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
            .encode_simple(false, f32::from(quality))
    };

    encoded.map(|memory| memory.to_vec()).map_err(|e| {
        Error::Encode(ImageError::Encoding(EncodingError::new(
            ImageFormatHint::Exact(ImageFormat::WebP),
            format!("libwebp failed: {:?}", e),
        )))
    })
}

/// Converts uploaded images between formats. Cheap to clone.
#[derive(Clone)]
pub struct ImageConverter {
    settings: Arc<ConversionSettings>,
}

impl ImageConverter {
    pub fn new(settings: ConversionSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    /// Run a conversion, turning every stage error into a failure result.
    pub fn convert_bytes(&self, input: &[u8], request: &ConversionRequest) -> ConversionResult {
        let outcome = self.try_convert(input, request);
        if let Err(e) = &outcome {
            tracing::warn!("Conversion to {} failed at {:?}: {}", request.format, e.stage(), e);
        }
        outcome.into()
    }

    pub fn try_convert(&self, input: &[u8], request: &ConversionRequest) -> Result<ConvertedImage> {
        request.validate(&self.settings)?;
        let source = SourceImage::decode(input)?;
        tracing::debug!(
            "Decoded {:?} source {}x{} ({:?})",
            source.format_name(),
            source.image.width(),
            source.image.height(),
            source.mode()
        );

        if request.format == TargetFormat::Ico {
            return self.convert_icon(&source, request);
        }

        let planned = plan_resize(
            source.dimensions(),
            request.width,
            request.height,
            request.maintain_aspect,
        );
        if let Some((w, h)) = planned {
            let limit = self.settings.max_image_dimension;
            if w == 0 || h == 0 || w > limit || h > limit {
                let (src_w, src_h) = source.dimensions();
                return Err(Error::Resize(format!(
                    "cannot resize {}x{} to {}x{}, each side must be between 1 and {}",
                    src_w, src_h, w, h, limit
                )));
            }
        }

        let mut image = normalize(source.image.clone(), source.mode(), request.format)?;
        if let Some((w, h)) = planned {
            image = image.resize_exact(w, h, FilterType::Lanczos3);
        }

        let data = encode(&image, request.format, request.quality)?;
        let output_size = data.len() as u64;

        Ok(ConvertedImage {
            report: ConversionReport {
                original_size: source.dimensions(),
                original_format: source.format_name(),
                output_size,
                output_dimensions: (image.width(), image.height()),
                compression_ratio: Some(compression_ratio(source.byte_len(), output_size)),
                is_ico: false,
                icon: None,
            },
            data,
        })
    }

    fn convert_icon(&self, source: &SourceImage, request: &ConversionRequest) -> Result<ConvertedImage> {
        let (data, frames) = if request.ico_multi_size {
            let data = icon::pack(source.image(), &self.settings.ico_sizes)?;
            let mut frames = self.settings.ico_sizes.clone();
            frames.sort_unstable();
            frames.dedup();
            (data, frames)
        } else {
            let side = match (request.width, request.height) {
                (None, None) => icon::MAX_ICON_SIDE,
                (Some(w), None) => w,
                (None, Some(h)) => h,
                (Some(w), Some(h)) => w.max(h),
            };
            (icon::pack_one(source.image(), side)?, vec![side])
        };

        let largest = frames.last().copied().unwrap_or(icon::MAX_ICON_SIDE);
        Ok(ConvertedImage {
            report: ConversionReport {
                original_size: source.dimensions(),
                original_format: source.format_name(),
                output_size: data.len() as u64,
                output_dimensions: (largest, largest),
                compression_ratio: None,
                is_ico: true,
                icon: Some(IconReport {
                    multi_size: request.ico_multi_size,
                    frames,
                }),
            },
            data,
        })
    }

    pub fn inspect_bytes(&self, input: &[u8]) -> Result<ImageInfo> {
        let source = SourceImage::decode(input)?;
        let frames = if source.format == Some(ImageFormat::Ico) {
            icon::read_directory(input)?.len()
        } else {
            1
        };

        Ok(ImageInfo {
            format: source.format_name(),
            dimensions: source.dimensions(),
            mode: source.mode(),
            size_bytes: source.byte_len(),
            size_mb: source.byte_len() as f64 / (1024.0 * 1024.0),
            frames,
        })
    }
}

#[async_trait]
impl ConverterService for ImageConverter {
    async fn convert(&self, input: Vec<u8>, request: ConversionRequest) -> ConversionResult {
        let converter = self.clone();
        tokio::task::spawn_blocking(move || converter.convert_bytes(&input, &request))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Conversion task join error: {}", e);
                ConversionResult::from_error(Error::Invariant(format!(
                    "Conversion task join error: {}",
                    e
                )))
            })
    }

    async fn inspect(&self, input: Vec<u8>) -> Result<ImageInfo> {
        let converter = self.clone();
        tokio::task::spawn_blocking(move || converter.inspect_bytes(&input))
            .await
            .map_err(|e| Error::Invariant(format!("Inspection task join error: {}", e)))?
    }
}
