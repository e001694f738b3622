//! Runtime configuration
//!
//! Everything the server needs is read once from the environment (and an
//! optional `.env` file) into an explicit [`Config`] that is handed to the
//! components that need it.

use crate::convert::TargetFormat;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Square icon sides packed into a multi-size ICO.
pub const ICO_SIZES: [u32; 6] = [16, 32, 48, 64, 128, 256];

const DEFAULT_ALLOWED_EXTENSIONS: &str = "png,jpg,jpeg,gif,bmp,tiff,tif,webp,ico";

/// Limits and fixed parameters consumed by the converter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSettings {
    pub ico_sizes: Vec<u32>,
    pub max_image_dimension: u32,
}

impl ConversionSettings {
    pub fn quality_range(&self) -> RangeInclusive<u8> {
        1..=100
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            ico_sizes: ICO_SIZES.to_vec(),
            max_image_dimension: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub default_quality: u8,
    pub default_format: TargetFormat,
    pub cleanup_age: Duration,
    pub cleanup_interval: Duration,
    pub allowed_extensions: BTreeSet<String>,
    pub conversion: ConversionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            converted_dir: PathBuf::from("converted"),
            max_upload_bytes: 50 * 1024 * 1024,
            default_quality: 85,
            default_format: TargetFormat::Jpeg,
            cleanup_age: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
            allowed_extensions: parse_extensions(DEFAULT_ALLOWED_EXTENSIONS),
            conversion: ConversionSettings::default(),
        }
    }
}

impl Config {
    /// Read the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Result<Self> {
        load_dotenv(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup, falling back to defaults for
    /// missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            converted_dir: lookup("CONVERTED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.converted_dir),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            default_quality: parse_or(&lookup, "DEFAULT_QUALITY", defaults.default_quality)?,
            default_format: parse_or(&lookup, "DEFAULT_FORMAT", defaults.default_format)?,
            cleanup_age: Duration::from_secs(parse_or(
                &lookup,
                "CLEANUP_AGE_SECS",
                defaults.cleanup_age.as_secs(),
            )?),
            cleanup_interval: Duration::from_secs(parse_or(
                &lookup,
                "CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
            allowed_extensions: lookup("ALLOWED_EXTENSIONS")
                .map(|raw| parse_extensions(&raw))
                .unwrap_or(defaults.allowed_extensions),
            conversion: ConversionSettings {
                max_image_dimension: parse_or(
                    &lookup,
                    "MAX_IMAGE_DIMENSION",
                    defaults.conversion.max_image_dimension,
                )?,
                ..defaults.conversion
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self
            .conversion
            .quality_range()
            .contains(&self.default_quality)
        {
            return Err(Error::Config(format!(
                "DEFAULT_QUALITY must be between 1 and 100, got {}",
                self.default_quality
            )));
        }
        if self.conversion.max_image_dimension == 0 {
            return Err(Error::Config(
                "MAX_IMAGE_DIMENSION must be positive".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "CLEANUP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "ALLOWED_EXTENSIONS must list at least one extension".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `filename` carries one of the allowed extensions.
    pub fn is_allowed_file(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| self.allowed_extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn load_dotenv<T>(loaded: std::result::Result<T, dotenvy::Error>) -> Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::from_lookup(|_| None).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.default_format, TargetFormat::Jpeg);
        assert_eq!(config.default_quality, 85);
        assert_eq!(config.cleanup_age, Duration::from_secs(3600));
        assert_eq!(config.conversion.ico_sizes, vec![16, 32, 48, 64, 128, 256]);
        assert_eq!(config.conversion.max_image_dimension, 5000);
        assert_eq!(config.max_upload_bytes, 52_428_800);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("DEFAULT_FORMAT", "webp"),
            ("MAX_IMAGE_DIMENSION", "1024"),
            ("ALLOWED_EXTENSIONS", ".PNG, gif"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.default_format, TargetFormat::WebP);
        assert_eq!(config.conversion.max_image_dimension, 1024);
        assert!(config.is_allowed_file("logo.png"));
        assert!(config.is_allowed_file("anim.GIF"));
        assert!(!config.is_allowed_file("photo.jpg"));
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = Config::from_lookup(lookup_from(&[("DEFAULT_QUALITY", "0")])).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_QUALITY"));

        let err = Config::from_lookup(lookup_from(&[("DEFAULT_FORMAT", "xcf")])).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_FORMAT"));
    }

    #[test]
    fn test_dotenv_errors_other_than_missing_file_fail() {
        let dir = tempfile::TempDir::new().unwrap();

        let missing = dotenvy::from_path(dir.path().join("absent.env"));
        assert!(load_dotenv(missing).is_ok());

        let broken = dir.path().join("broken.env");
        std::fs::write(&broken, "this line is not an assignment\n").unwrap();
        let err = load_dotenv(dotenvy::from_path(&broken)).unwrap_err();
        assert!(matches!(err, Error::EnvVar(_)));
    }

    #[test]
    fn test_allowed_file_requires_extension() {
        let config = Config::default();
        assert!(config.is_allowed_file("photo.JPEG"));
        assert!(config.is_allowed_file("archive.tar.webp"));
        assert!(!config.is_allowed_file("README"));
        assert!(!config.is_allowed_file("script.sh"));
    }
}
