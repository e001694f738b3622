use crate::{Error, Result};
use image::ImageFormat;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Output container a conversion can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Png,
    Jpeg,
    Bmp,
    Gif,
    Tiff,
    WebP,
    Ico,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 7] = [
        TargetFormat::Png,
        TargetFormat::Jpeg,
        TargetFormat::Bmp,
        TargetFormat::Gif,
        TargetFormat::Tiff,
        TargetFormat::WebP,
        TargetFormat::Ico,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TargetFormat::Png => "PNG",
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Bmp => "BMP",
            TargetFormat::Gif => "GIF",
            TargetFormat::Tiff => "TIFF",
            TargetFormat::WebP => "WEBP",
            TargetFormat::Ico => "ICO",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Gif => "gif",
            TargetFormat::Tiff => "tiff",
            TargetFormat::WebP => "webp",
            TargetFormat::Ico => "ico",
        }
    }

    /// Targets that can only store opaque pixels.
    pub fn needs_flatten(self) -> bool {
        matches!(self, TargetFormat::Jpeg | TargetFormat::Bmp)
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(TargetFormat::Png),
            "JPEG" | "JPG" => Ok(TargetFormat::Jpeg),
            "BMP" => Ok(TargetFormat::Bmp),
            "GIF" => Ok(TargetFormat::Gif),
            "TIFF" | "TIF" => Ok(TargetFormat::Tiff),
            "WEBP" => Ok(TargetFormat::WebP),
            "ICO" => Ok(TargetFormat::Ico),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TargetFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Content type for a file served from the converted folder, chosen by extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let is_zip = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if is_zip {
        return "application/zip";
    }

    match ImageFormat::from_path(path) {
        Ok(format) => format.to_mime_type(),
        Err(_) => {
            tracing::debug!(
                "Unrecognized extension on {}, falling back to application/octet-stream",
                path.display()
            );
            "application/octet-stream"
        }
    }
}
