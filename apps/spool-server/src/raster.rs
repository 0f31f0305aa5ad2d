use anyhow::Context;
use bytes::Bytes;
use image::imageops::FilterType;
use image::GrayImage;

/// Printable width of the target printers, in pixels.
pub const RECEIPT_WIDTH: u32 = 565;

/// Luminance cutoff: pixels at or above this stay paper-white.
pub const MONO_THRESHOLD: u8 = 160;

/// ESC d 2 — feed two units and cut. Appended after the PNG IEND chunk;
/// the printer firmware consumes both.
pub const CUT_SEQUENCE: [u8; 3] = [0x1b, 0x64, 0x02];

/// Turn a rendered grayscale receipt into the exact payload the printer
/// fetches: a 2-colour palette PNG, 565 px wide, followed by the cut
/// command bytes.
pub fn finalize_receipt(src: &GrayImage) -> anyhow::Result<Bytes> {
    anyhow::ensure!(src.width() > 0 && src.height() > 0, "empty source image");

    let scaled;
    let img = if src.width() == RECEIPT_WIDTH {
        src
    } else {
        let height = ((src.height() as u64 * RECEIPT_WIDTH as u64) / src.width() as u64).max(1);
        scaled = image::imageops::resize(src, RECEIPT_WIDTH, height as u32, FilterType::Triangle);
        &scaled
    };

    let mut out = encode_mono_png(img)?;
    out.extend_from_slice(&CUT_SEQUENCE);
    Ok(Bytes::from(out))
}

/// 1-bit palette PNG: index 0 = white, index 1 = black, rows packed
/// MSB-first and padded to a byte boundary.
fn encode_mono_png(img: &GrayImage) -> anyhow::Result<Vec<u8>> {
    let (width, height) = img.dimensions();
    let stride = ((width as usize) + 7) / 8;
    let mut rows = vec![0u8; stride * height as usize];
    for (y, row) in img.rows().enumerate() {
        for (x, px) in row.enumerate() {
            if px.0[0] < MONO_THRESHOLD {
                rows[y * stride + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }

    let mut out = Vec::with_capacity(rows.len() / 4 + 256);
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::One);
        encoder.set_palette(vec![0xff, 0xff, 0xff, 0x00, 0x00, 0x00]);
        let mut writer = encoder.write_header().context("png header")?;
        writer.write_image_data(&rows).context("png data")?;
        writer.finish().context("png finish")?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    const IEND: &[u8] = b"IEND";

    fn checkerboard(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    #[test]
    fn payload_is_png_then_cut_bytes() {
        let bytes = finalize_receipt(&checkerboard(RECEIPT_WIDTH, 40)).unwrap();
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);
        assert_eq!(&bytes[bytes.len() - 3..], &CUT_SEQUENCE);
        // IEND sits before the cut sequence, not at the very end.
        let iend_pos = bytes
            .windows(IEND.len())
            .position(|w| w == IEND)
            .expect("IEND chunk");
        assert!(iend_pos < bytes.len() - CUT_SEQUENCE.len());
    }

    #[test]
    fn narrow_sources_are_resized_to_receipt_width() {
        let bytes = finalize_receipt(&checkerboard(100, 50)).unwrap();
        let png = &bytes[..bytes.len() - CUT_SEQUENCE.len()];
        let decoded = image::load_from_memory(png).expect("decodable png");
        assert_eq!(decoded.width(), RECEIPT_WIDTH);
        // Aspect preserved: 100x50 -> 565x282.
        assert_eq!(decoded.height(), 282);
    }

    #[test]
    fn threshold_splits_at_160() {
        let mut img = GrayImage::from_pixel(8, 1, Luma([MONO_THRESHOLD]));
        img.put_pixel(0, 0, Luma([MONO_THRESHOLD - 1]));
        // Encode directly; finalize_receipt would resize and blur the
        // pixel values under test.
        let png = encode_mono_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.get_pixel(0, 0).0[0], 0, "below cutoff is black");
        assert_eq!(decoded.get_pixel(1, 0).0[0], 255, "at cutoff stays white");
    }

    #[test]
    fn empty_source_is_rejected() {
        let img = GrayImage::new(0, 0);
        assert!(finalize_receipt(&img).is_err());
    }
}
