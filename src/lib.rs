//! Image conversion web utility
//!
//! Accepts uploaded raster images, converts them to a requested format with
//! optional resizing, packs icons (single or multi-size ICO), bundles batches
//! into zip archives and periodically sweeps stale temporary files.

pub mod batch;
pub mod cleanup;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
