//! Image codec boundary (C4's external collaborator, per spec.md §1: "image
//! codec (decode/encode PNG/JPEG/TIFF)... assumed to exist and be reliable").
//!
//! Stage executors operate on [`crate::kernels::GrayImage`] and
//! [`crate::kernels::Mask`] — contiguous pixel buffers, never file bytes —
//! and the only thing standing between a kernel result and a committed
//! artifact file is this trait. The `cli` crate supplies the concrete
//! implementation (backed by the `png` crate); `core` stays free of any
//! concrete image-format dependency, matching the teacher's pattern of
//! keeping transport/storage concerns out of the algorithmic core.

use crate::kernels::{GrayImage, Mask};
use crate::Result;

pub trait ImageCodec: Send + Sync {
    /// Decodes arbitrary image bytes into an 8-bit grayscale buffer.
    fn decode_gray(&self, bytes: &[u8]) -> Result<GrayImage>;

    /// Encodes an 8-bit grayscale buffer as PNG bytes.
    fn encode_gray(&self, image: &GrayImage) -> Result<Vec<u8>>;

    /// Encodes a 24-bit RGB buffer (`width*height*3` bytes) as PNG bytes.
    fn encode_rgb(&self, width: usize, height: usize, rgb: &[u8]) -> Result<Vec<u8>>;

    /// Encodes a 16-bit little-endian grayscale buffer as PNG bytes, per the
    /// `labels.png` on-disk format (spec.md §9 "Label image packing").
    fn encode_gray16_le(&self, width: usize, height: usize, values: &[u16]) -> Result<Vec<u8>>;

    /// Decodes a binary mask PNG, thresholding at `>= 128` per the canonical
    /// read-side normalization rule (spec REDESIGN FLAGS "Mask serialization").
    fn decode_mask(&self, bytes: &[u8]) -> Result<Mask> {
        Ok(Mask::from_gray_threshold(&self.decode_gray(bytes)?))
    }

    /// Encodes a mask as a strictly-`{0,255}` grayscale PNG.
    fn encode_mask(&self, mask: &Mask) -> Result<Vec<u8>> {
        self.encode_gray(&GrayImage {
            width: mask.width,
            height: mask.height,
            data: mask.to_gray_bytes(),
        })
    }
}
