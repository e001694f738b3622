use super::ConverterService;
use crate::error::Stage;
use crate::models::{
    ColorMode, ConversionFailure, ConversionReport, ConversionRequest, ConversionResult,
    ConvertedImage, ImageInfo,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Converter stand-in that echoes a fixed payload without touching pixels.
#[derive(Clone)]
pub struct MockConverter {
    convert_count: Arc<Mutex<usize>>,
    output: Vec<u8>,
    should_fail: Arc<Mutex<bool>>,
    failing_inputs: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self {
            convert_count: Arc::new(Mutex::new(0)),
            output: b"converted".to_vec(),
            should_fail: Arc::new(Mutex::new(false)),
            failing_inputs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = output;
        self
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    /// Fail only for this exact input payload.
    pub fn with_failing_input(self, input: Vec<u8>) -> Self {
        self.failing_inputs.lock().unwrap().insert(input);
        self
    }

    pub fn get_convert_count(&self) -> usize {
        *self.convert_count.lock().unwrap()
    }
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConverterService for MockConverter {
    async fn convert(&self, input: Vec<u8>, request: ConversionRequest) -> ConversionResult {
        *self.convert_count.lock().unwrap() += 1;

        let fails = *self.should_fail.lock().unwrap()
            || self.failing_inputs.lock().unwrap().contains(&input);
        if fails {
            return ConversionResult::Failure(ConversionFailure {
                error: "Mock failure".to_string(),
                stage: Stage::Decode,
            });
        }

        let side = request.width.or(request.height).unwrap_or(1);
        ConversionResult::Success(ConvertedImage {
            report: ConversionReport {
                original_size: (1, 1),
                original_format: Some("PNG".to_string()),
                output_size: self.output.len() as u64,
                output_dimensions: (side, side),
                compression_ratio: None,
                is_ico: false,
                icon: None,
            },
            data: self.output.clone(),
        })
    }

    async fn inspect(&self, input: Vec<u8>) -> Result<ImageInfo> {
        Ok(ImageInfo {
            format: Some("PNG".to_string()),
            dimensions: (1, 1),
            mode: ColorMode::Rgba,
            size_bytes: input.len() as u64,
            size_mb: input.len() as f64 / (1024.0 * 1024.0),
            frames: 1,
        })
    }
}
