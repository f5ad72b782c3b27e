//! Concrete `ImageCodec` (spec.md §1's "image codec... assumed to exist and
//! be reliable" external collaborator), backed by the `png` crate. `core`
//! stays codec-agnostic; this is the one place PNG bytes actually get
//! decoded/encoded, mirroring the teacher's own pattern of keeping format
//! concerns out of the algorithmic core and pushed to the binary crate.
//!
//! Source uploads and mask round-trips are PNG only — JPEG/TIFF decode is
//! named in spec.md §1 as an external-collaborator concern this exercise
//! doesn't need to satisfy end-to-end.

use particlelab_core::kernels::GrayImage;
use particlelab_core::{ImageCodec, ParticleError, Result};
use std::io::Cursor;

pub struct PngCodec;

fn to_gray_pixel(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round() as u8
}

impl ImageCodec for PngCodec {
    fn decode_gray(&self, bytes: &[u8]) -> Result<GrayImage> {
        let decoder = png::Decoder::new(Cursor::new(bytes));
        let mut reader = decoder
            .read_info()
            .map_err(|e| ParticleError::invalid_input(format!("not a valid PNG: {e}")))?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .map_err(|e| ParticleError::invalid_input(format!("failed to decode PNG: {e}")))?;
        let raw = &buf[..info.buffer_size()];
        let (width, height) = (info.width as usize, info.height as usize);

        let samples_per_pixel = match info.color_type {
            png::ColorType::Grayscale => 1,
            png::ColorType::GrayscaleAlpha => 2,
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
            png::ColorType::Indexed => 1,
        };
        let bytes_per_sample = match info.bit_depth {
            png::BitDepth::Sixteen => 2,
            _ => 1,
        };

        let mut data = Vec::with_capacity(width * height);
        if info.bit_depth == png::BitDepth::Eight || info.bit_depth == png::BitDepth::Sixteen {
            let stride = samples_per_pixel * bytes_per_sample;
            for pixel in raw.chunks_exact(stride) {
                let sample_at = |i: usize| -> u8 {
                    if bytes_per_sample == 2 {
                        pixel[i * 2]
                    } else {
                        pixel[i]
                    }
                };
                let value = match info.color_type {
                    png::ColorType::Grayscale | png::ColorType::GrayscaleAlpha => sample_at(0),
                    png::ColorType::Rgb | png::ColorType::Rgba => {
                        to_gray_pixel(sample_at(0), sample_at(1), sample_at(2))
                    }
                    png::ColorType::Indexed => sample_at(0),
                };
                data.push(value);
            }
        } else {
            // Sub-byte indexed/grayscale bit depths (1/2/4): unpack MSB-first.
            let bits = info.bit_depth as usize;
            let mask = (1u16 << bits) - 1;
            let scale = 255 / mask.max(1);
            let row_bytes = (width * bits + 7) / 8;
            for row in raw.chunks(row_bytes).take(height) {
                let mut col = 0usize;
                'row: for &byte in row {
                    for shift in (0..8).step_by(bits) {
                        if col >= width {
                            break 'row;
                        }
                        let sample = ((byte >> (8 - bits - shift)) as u16) & mask;
                        data.push((sample * scale) as u8);
                        col += 1;
                    }
                }
            }
        }

        if info.color_type == png::ColorType::Indexed {
            if let Some(palette) = reader.info().palette.as_deref() {
                data = data
                    .into_iter()
                    .map(|index| {
                        let offset = index as usize * 3;
                        if offset + 2 < palette.len() {
                            to_gray_pixel(palette[offset], palette[offset + 1], palette[offset + 2])
                        } else {
                            index
                        }
                    })
                    .collect();
            }
        }

        data.resize(width * height, 0);
        Ok(GrayImage { width, height, data })
    }

    fn encode_gray(&self, image: &GrayImage) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder =
                png::Encoder::new(&mut out, image.width as u32, image.height as u32);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| ParticleError::internal(format!("PNG header write failed: {e}")))?;
            writer
                .write_image_data(&image.data)
                .map_err(|e| ParticleError::internal(format!("PNG encode failed: {e}")))?;
        }
        Ok(out)
    }

    fn encode_rgb(&self, width: usize, height: usize, rgb: &[u8]) -> Result<Vec<u8>> {
        if rgb.len() != width * height * 3 {
            return Err(ParticleError::internal(
                "rgb buffer length does not match width*height*3",
            ));
        }
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width as u32, height as u32);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| ParticleError::internal(format!("PNG header write failed: {e}")))?;
            writer
                .write_image_data(rgb)
                .map_err(|e| ParticleError::internal(format!("PNG encode failed: {e}")))?;
        }
        Ok(out)
    }

    fn encode_gray16_le(&self, width: usize, height: usize, values: &[u16]) -> Result<Vec<u8>> {
        if values.len() != width * height {
            return Err(ParticleError::internal(
                "label buffer length does not match width*height",
            ));
        }
        // spec.md §9 REDESIGN FLAGS "Label image packing": bytes must be
        // little-endian, which is not PNG's native big-endian 16-bit sample
        // order. We write the raw LE byte pairs straight through so on-disk
        // bytes match the existing format exactly; a conformant PNG decoder
        // reading this file would see a byte-swapped value, same as the
        // system this was ported from.
        let mut raw = Vec::with_capacity(values.len() * 2);
        for &v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width as u32, height as u32);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Sixteen);
            let mut writer = encoder
                .write_header()
                .map_err(|e| ParticleError::internal(format!("PNG header write failed: {e}")))?;
            writer
                .write_image_data(&raw)
                .map_err(|e| ParticleError::internal(format!("PNG encode failed: {e}")))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_round_trips_through_png() {
        let codec = PngCodec;
        let mut image = GrayImage::new(6, 4);
        for y in 0..4 {
            for x in 0..6 {
                image.set(x, y, ((x + y) * 20) as u8);
            }
        }
        let bytes = codec.encode_gray(&image).unwrap();
        let decoded = codec.decode_gray(&bytes).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn mask_round_trips_at_canonical_thresholds() {
        let codec = PngCodec;
        let mask = particlelab_core::kernels::Mask {
            width: 3,
            height: 1,
            data: vec![0, 1, 1],
        };
        let bytes = codec.encode_mask(&mask).unwrap();
        let decoded = codec.decode_mask(&bytes).unwrap();
        assert_eq!(decoded, mask);
    }

    #[test]
    fn rgb_rejects_mismatched_buffer_length() {
        let codec = PngCodec;
        assert!(codec.encode_rgb(2, 2, &[0u8; 5]).is_err());
    }
}
