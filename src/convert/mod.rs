//! Image format conversion
//!
//! Decodes uploaded images, normalizes their color layout for the requested
//! container, resizes, and encodes. ICO targets go through the icon packer.

pub mod format;
pub mod icon;
pub mod mock;
pub mod processor;

pub use format::TargetFormat;
pub use mock::MockConverter;
pub use processor::{ImageConverter, SourceImage};

use crate::models::{ConversionRequest, ConversionResult, ImageInfo};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ConverterService: Send + Sync {
    /// Convert one encoded image. Failures come back as a failure result.
    async fn convert(&self, input: Vec<u8>, request: ConversionRequest) -> ConversionResult;
    async fn inspect(&self, input: Vec<u8>) -> Result<ImageInfo>;
}
