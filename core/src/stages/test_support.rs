//! Shared fixtures for stage-executor unit tests: a codec that round-trips
//! real pixel bytes through a trivial length-prefixed format instead of PNG
//! (PNG encode/decode lives in the `cli` crate, not here).

#![cfg(test)]

use crate::kernels::GrayImage;
use crate::{ImageCodec, Result};

pub(crate) struct FakeCodec;

impl ImageCodec for FakeCodec {
    fn decode_gray(&self, bytes: &[u8]) -> Result<GrayImage> {
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        Ok(GrayImage {
            width,
            height,
            data: bytes[8..8 + width * height].to_vec(),
        })
    }

    fn encode_gray(&self, image: &GrayImage) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + image.data.len());
        out.extend_from_slice(&(image.width as u32).to_le_bytes());
        out.extend_from_slice(&(image.height as u32).to_le_bytes());
        out.extend_from_slice(&image.data);
        Ok(out)
    }

    fn encode_rgb(&self, width: usize, height: usize, rgb: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + rgb.len());
        out.extend_from_slice(&(width as u32).to_le_bytes());
        out.extend_from_slice(&(height as u32).to_le_bytes());
        out.extend_from_slice(rgb);
        Ok(out)
    }

    fn encode_gray16_le(&self, width: usize, height: usize, values: &[u16]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + values.len() * 2);
        out.extend_from_slice(&(width as u32).to_le_bytes());
        out.extend_from_slice(&(height as u32).to_le_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        Ok(out)
    }
}

pub(crate) fn gray_bytes(codec: &FakeCodec, image: &GrayImage) -> Vec<u8> {
    codec.encode_gray(image).unwrap()
}
