use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_converter::config::Config;
use image_converter::convert::{ConverterService, ImageConverter, TargetFormat};
use image_converter::models::{ConversionRequest, ConversionResult};
use image_converter::server;
use image_converter::storage::output_filename;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "image-converter")]
#[command(about = "Convert images between formats, over HTTP or from the shell")]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Convert a single file and print the result as JSON.
    Convert {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Target format (PNG, JPEG, BMP, GIF, TIFF, WEBP, ICO).
        #[arg(short, long, value_parser = parse_format_arg)]
        format: TargetFormat,
        /// Output path; defaults to the input's stem with the target extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(short, long)]
        quality: Option<u8>,
        /// Resize to exactly the given width and height.
        #[arg(long)]
        stretch: bool,
        /// Pack every standard icon size into the ICO.
        #[arg(long)]
        ico_multi_size: bool,
    },
    /// Print format, dimensions and color mode of an image as JSON.
    Info {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn parse_format_arg(input: &str) -> std::result::Result<TargetFormat, String> {
    input.parse().map_err(|e| format!("{}", e))
}

fn default_output(input: &Path, format: TargetFormat) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(output_filename(&name, format.extension()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_converter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting image-converter");
            if let Err(e) = server::start_server(config).await {
                error!("Server failed: {:#}", e);
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Convert {
            input,
            format,
            output,
            width,
            height,
            quality,
            stretch,
            ico_multi_size,
        } => {
            let request = ConversionRequest::new(format)
                .with_size(width, height)
                .with_quality(quality.unwrap_or(config.default_quality))
                .with_maintain_aspect(!stretch)
                .with_ico_multi_size(ico_multi_size);

            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let converter = ImageConverter::new(config.conversion);
            let result = converter.convert(bytes, request).await;

            let output = output.unwrap_or_else(|| default_output(&input, format));
            if let ConversionResult::Success(converted) = &result {
                tokio::fs::write(&output, &converted.data)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
            }

            let mut report = serde_json::to_value(&result)?;
            if result.is_success() {
                report["output"] = serde_json::Value::String(output.display().to_string());
            }
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !result.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Info { input } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let converter = ImageConverter::new(config.conversion);
            match converter.inspect(bytes).await {
                Ok(info) => {
                    println!("{}", serde_json::to_string_pretty(&info)?);
                    Ok(())
                }
                Err(e) => {
                    error!("Could not read {}: {}", input.display(), e);
                    std::process::exit(1);
                }
            }
        }
    }
}
