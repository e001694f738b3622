//! Data models and structures
//!
//! Defines conversion requests, results, and the image descriptions that flow
//! between the converter, the batch orchestrator and the HTTP layer.

use crate::config::ConversionSettings;
use crate::convert::TargetFormat;
use crate::error::{Error, Result, Stage};
use image::{ColorType, ImageFormat};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
    Palette,
}

impl ColorMode {
    /// Classify a decoded image. Palettes are expanded by the decoders, so a
    /// palette source is recognized by its container format.
    pub fn classify(color: ColorType, format: Option<ImageFormat>) -> Self {
        if format == Some(ImageFormat::Gif) {
            return ColorMode::Palette;
        }
        match (color.has_color(), color.has_alpha()) {
            (false, false) => ColorMode::Gray,
            (false, true) => ColorMode::GrayAlpha,
            (true, false) => ColorMode::Rgb,
            (true, true) => ColorMode::Rgba,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, ColorMode::GrayAlpha | ColorMode::Rgba)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub format: TargetFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub maintain_aspect: bool,
    pub ico_multi_size: bool,
}

impl ConversionRequest {
    pub const DEFAULT_QUALITY: u8 = 85;

    pub fn new(format: TargetFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            quality: Self::DEFAULT_QUALITY,
            maintain_aspect: true,
            ico_multi_size: false,
        }
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_maintain_aspect(mut self, maintain_aspect: bool) -> Self {
        self.maintain_aspect = maintain_aspect;
        self
    }

    pub fn with_ico_multi_size(mut self, ico_multi_size: bool) -> Self {
        self.ico_multi_size = ico_multi_size;
        self
    }

    /// Check quality and requested dimensions against the configured limits.
    pub fn validate(&self, settings: &ConversionSettings) -> Result<()> {
        if !settings.quality_range().contains(&self.quality) {
            return Err(Error::InvalidRequest(format!(
                "quality must be between {} and {}, got {}",
                settings.quality_range().start(),
                settings.quality_range().end(),
                self.quality
            )));
        }

        for (axis, value) in [("width", self.width), ("height", self.height)] {
            if let Some(value) = value {
                if value == 0 || value > settings.max_image_dimension {
                    return Err(Error::InvalidRequest(format!(
                        "{} must be between 1 and {}, got {}",
                        axis, settings.max_image_dimension, value
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Icon specific details of a successful ICO conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IconReport {
    pub multi_size: bool,
    pub frames: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionReport {
    pub original_size: (u32, u32),
    pub original_format: Option<String>,
    pub output_size: u64,
    pub output_dimensions: (u32, u32),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<String>,
    pub is_ico: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconReport>,
}

/// Encoded output plus what was learned while producing it.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedImage {
    #[serde(flatten)]
    pub report: ConversionReport,
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionFailure {
    pub error: String,
    pub stage: Stage,
}

impl From<Error> for ConversionFailure {
    fn from(err: Error) -> Self {
        Self {
            stage: err.stage(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConversionResult {
    Success(ConvertedImage),
    Failure(ConversionFailure),
}

impl ConversionResult {
    pub fn from_error(err: Error) -> Self {
        ConversionResult::Failure(err.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success(_))
    }

    pub fn converted(&self) -> Option<&ConvertedImage> {
        match self {
            ConversionResult::Success(converted) => Some(converted),
            ConversionResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ConversionFailure> {
        match self {
            ConversionResult::Success(_) => None,
            ConversionResult::Failure(failure) => Some(failure),
        }
    }
}

impl From<Result<ConvertedImage>> for ConversionResult {
    fn from(outcome: Result<ConvertedImage>) -> Self {
        match outcome {
            Ok(converted) => ConversionResult::Success(converted),
            Err(err) => ConversionResult::Failure(err.into()),
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    success: bool,
    #[serde(flatten)]
    inner: &'a T,
}

impl Serialize for ConversionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ConversionResult::Success(converted) => Tagged {
                success: true,
                inner: converted,
            }
            .serialize(serializer),
            ConversionResult::Failure(failure) => Tagged {
                success: false,
                inner: failure,
            }
            .serialize(serializer),
        }
    }
}

/// Compression ratio as a percentage with one decimal, `N/A` for empty input.
pub fn compression_ratio(input_bytes: u64, output_bytes: u64) -> String {
    if input_bytes == 0 {
        return "N/A".to_string();
    }
    let ratio = (1.0 - output_bytes as f64 / input_bytes as f64) * 100.0;
    format!("{:.1}%", ratio)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub format: Option<String>,
    pub dimensions: (u32, u32),
    pub mode: ColorMode,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub frames: usize,
}
