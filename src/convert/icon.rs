//! Multi-resolution ICO packing
//!
//! Every frame is the source letterboxed into a transparent square, so
//! non-square sources keep their proportions at every icon size.

use crate::{Error, Result};
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

/// Largest side an ICO directory entry can describe.
pub const MAX_ICON_SIDE: u32 = 256;

const ICO_HEADER_LEN: usize = 6;
const ICO_ENTRY_LEN: usize = 16;

/// Largest rectangle with the source's aspect ratio that fits in `side`x`side`.
pub fn fit_within(source: (u32, u32), side: u32) -> (u32, u32) {
    let (width, height) = source;
    let ratio = width as f64 / height as f64;

    let (w, h) = if ratio > 1.0 {
        (side, (side as f64 / ratio) as u32)
    } else {
        ((side as f64 * ratio) as u32, side)
    };
    (w.max(1), h.max(1))
}

/// Render one square icon frame with the source centered on a transparent canvas.
pub fn prepare_frame(image: &DynamicImage, side: u32) -> RgbaImage {
    let rgba = image.to_rgba8();
    let (w, h) = fit_within(rgba.dimensions(), side);
    let resized = imageops::resize(&rgba, w, h, FilterType::Lanczos3);

    let mut canvas = RgbaImage::from_pixel(side, side, Rgba([255, 255, 255, 0]));
    let x = (side - w) / 2;
    let y = (side - h) / 2;
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    canvas
}

/// Pack one frame per side into an ICO container, smallest first.
pub fn pack(image: &DynamicImage, sizes: &[u32]) -> Result<Vec<u8>> {
    let mut sides = sizes.to_vec();
    sides.sort_unstable();
    sides.dedup();

    if sides.is_empty() {
        return Err(Error::InvalidRequest(
            "icon size list is empty".to_string(),
        ));
    }
    if let Some(&side) = sides
        .iter()
        .find(|&&side| side == 0 || side > MAX_ICON_SIDE)
    {
        return Err(Error::InvalidRequest(format!(
            "icon size must be between 1 and {}, got {}",
            MAX_ICON_SIDE, side
        )));
    }

    let frames = sides
        .iter()
        .map(|&side| encode_frame(&prepare_frame(image, side)))
        .collect::<Result<Vec<_>>>()?;

    let mut buffer = Vec::new();
    IcoEncoder::new(&mut buffer)
        .encode_images(&frames)
        .map_err(Error::Encode)?;
    tracing::debug!("Packed {} icon frames ({} bytes)", frames.len(), buffer.len());
    Ok(buffer)
}

pub fn pack_one(image: &DynamicImage, side: u32) -> Result<Vec<u8>> {
    pack(image, &[side])
}

fn encode_frame(frame: &RgbaImage) -> Result<IcoFrame<'static>> {
    let (width, height) = frame.dimensions();
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(frame.as_raw(), width, height, ExtendedColorType::Rgba8)
        .map_err(Error::Encode)?;
    IcoFrame::as_png(&png, width, height, ExtendedColorType::Rgba8).map_err(Error::Encode)
}

/// Frame dimensions listed in an ICO directory, in file order.
pub fn read_directory(bytes: &[u8]) -> Result<Vec<(u32, u32)>> {
    let header = bytes
        .get(..ICO_HEADER_LEN)
        .ok_or_else(|| Error::InvalidRequest("ICO header is truncated".to_string()))?;
    if header[..4] != [0, 0, 1, 0] {
        return Err(Error::InvalidRequest("not an ICO file".to_string()));
    }

    let count = u16::from_le_bytes([header[4], header[5]]) as usize;
    (0..count)
        .map(|index| {
            let start = ICO_HEADER_LEN + index * ICO_ENTRY_LEN;
            let entry = bytes.get(start..start + ICO_ENTRY_LEN).ok_or_else(|| {
                Error::InvalidRequest(format!("ICO directory entry {} is truncated", index))
            })?;
            // A zero byte encodes 256.
            let side = |b: u8| if b == 0 { 256 } else { b as u32 };
            Ok((side(entry[0]), side(entry[1])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ICO_SIZES;

    fn wide_source() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(512, 256, Rgba([200, 10, 10, 255])))
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within((512, 256), 256), (256, 128));
        assert_eq!(fit_within((256, 512), 256), (128, 256));
        assert_eq!(fit_within((300, 300), 48), (48, 48));
        assert_eq!(fit_within((1000, 1), 16), (16, 1));
    }

    #[test]
    fn test_frame_is_square_and_letterboxed() {
        let frame = prepare_frame(&wide_source(), 256);
        assert_eq!(frame.dimensions(), (256, 256));

        assert_eq!(frame.get_pixel(128, 63)[3], 0);
        assert_eq!(frame.get_pixel(128, 64)[3], 255);
        assert_eq!(frame.get_pixel(128, 191)[3], 255);
        assert_eq!(frame.get_pixel(128, 192)[3], 0);
        assert_eq!(frame.get_pixel(0, 128)[3], 255);
        assert_eq!(frame.get_pixel(255, 128)[3], 255);
    }

    #[test]
    fn test_margins_are_balanced() {
        let tall = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            30,
            100,
            Rgba([0, 0, 255, 255]),
        ));

        for side in ICO_SIZES {
            let frame = prepare_frame(&tall, side);
            let row = side / 2;
            let opaque: Vec<u32> = (0..side)
                .filter(|&x| frame.get_pixel(x, row)[3] > 0)
                .collect();
            let left = opaque[0];
            let right = side - 1 - opaque[opaque.len() - 1];
            assert!(left.abs_diff(right) <= 1, "side {}: {} vs {}", side, left, right);
        }
    }

    #[test]
    fn test_pack_orders_frames_ascending() {
        let bytes = pack(&wide_source(), &[256, 16, 64, 32, 128, 48, 16]).unwrap();
        let directory = read_directory(&bytes).unwrap();

        assert_eq!(
            directory,
            vec![(16, 16), (32, 32), (48, 48), (64, 64), (128, 128), (256, 256)]
        );
    }

    #[test]
    fn test_encoded_largest_frame_keeps_transparent_bands() {
        let bytes = pack(&wide_source(), &ICO_SIZES).unwrap();

        // The decoder hands back the largest frame.
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (256, 256));

        for x in [0, 128, 255] {
            assert_eq!(decoded.get_pixel(x, 0)[3], 0);
            assert_eq!(decoded.get_pixel(x, 63)[3], 0);
            assert_eq!(decoded.get_pixel(x, 64)[3], 255);
            assert_eq!(decoded.get_pixel(x, 191)[3], 255);
            assert_eq!(decoded.get_pixel(x, 192)[3], 0);
            assert_eq!(decoded.get_pixel(x, 255)[3], 0);
        }
        let center = decoded.get_pixel(128, 128);
        assert!(center[0] >= 195 && center[1] <= 15, "center was {:?}", center);
    }

    #[test]
    fn test_pack_one_and_decode() {
        let bytes = pack_one(&wide_source(), 64).unwrap();
        assert_eq!(read_directory(&bytes).unwrap(), vec![(64, 64)]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_pack_rejects_oversized_frames() {
        let err = pack_one(&wide_source(), 512).unwrap_err();
        assert!(err.to_string().contains("512"));
        assert!(pack(&wide_source(), &[]).is_err());
    }

    #[test]
    fn test_read_directory_rejects_other_files() {
        assert!(read_directory(b"\x89PNG\r\n\x1a\n").is_err());
        assert!(read_directory(&[]).is_err());
    }
}
