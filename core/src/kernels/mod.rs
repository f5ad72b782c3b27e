//! Pixel kernels: deterministic, side-effect-free algorithms over row-major
//! 8-bit grayscale buffers and binary masks of the same shape.
//!
//! Every kernel here rejects NaN/∞ by falling back to a documented default
//! and never panics on degenerate input (zero-size region, all-background).
//! No kernel in this module performs I/O; codec and storage concerns live in
//! the `store` module and the `cli` crate's filesystem adapter.

pub mod blur;
pub mod bresenham;
pub mod clahe;
pub mod components;
pub mod contour;
pub mod dijkstra;
pub mod distance;
pub mod laplacian;
pub mod lut;
pub mod morphology;
pub mod otsu;
pub mod sobel;
pub mod thinning;
pub mod watershed;

/// Row-major 8-bit grayscale buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            0
        } else {
            self.data[y as usize * self.width + x as usize]
        }
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }
}

/// Binary mask, foreground encoded as `1`, background as `0`.
///
/// On-disk masks are 8-bit PNGs with values strictly in `{0, 255}`; callers
/// crossing that boundary must normalize `>0 -> 255` on write and `>=128 ->
/// 1` on read (spec REDESIGN FLAGS "Mask serialization").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            false
        } else {
            self.data[y as usize * self.width + x as usize] != 0
        }
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value as u8;
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Builds a mask from a decoded 8-bit grayscale buffer, thresholding at
    /// `>= 128` per the canonical read-side normalization rule.
    pub fn from_gray_threshold(image: &GrayImage) -> Self {
        Self {
            width: image.width,
            height: image.height,
            data: image
                .data
                .iter()
                .map(|&v| if v >= 128 { 1 } else { 0 })
                .collect(),
        }
    }

    /// Renders to an 8-bit buffer with canonical `{0, 255}` values, ready to
    /// hand to a PNG encoder.
    pub fn to_gray_bytes(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| if v != 0 { 255u8 } else { 0u8 })
            .collect()
    }

    pub fn union(&self, other: &Mask) -> Mask {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| (a != 0 || b != 0) as u8)
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            data,
        }
    }

    pub fn subtract(&self, other: &Mask) -> Mask {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| (a != 0 && b == 0) as u8)
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Clamps a floating point value into `[lo, hi]`, treating NaN as `lo`.
#[inline]
pub fn clampf(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        lo
    } else {
        v.max(lo).min(hi)
    }
}

/// Downscales the longest edge of `source` to at most `max_edge` pixels
/// (nearest-neighbor), returning the scaled image and the scale factor
/// applied (`1.0` if no scaling was needed). Shared by stage executors that
/// accept a `quality_mode` and by the preview renderers, so a preview at
/// full resolution is pixel-identical to its executor.
pub fn downscale_longest_edge(source: &GrayImage, max_edge: u32) -> (GrayImage, f64) {
    let longest = source.width.max(source.height) as f64;
    if longest <= max_edge as f64 || longest == 0.0 {
        return (source.clone(), 1.0);
    }
    let scale = max_edge as f64 / longest;
    let new_w = ((source.width as f64) * scale).round().max(1.0) as usize;
    let new_h = ((source.height as f64) * scale).round().max(1.0) as usize;
    let mut out = GrayImage::new(new_w, new_h);
    for y in 0..new_h {
        for x in 0..new_w {
            let sx = ((x as f64 + 0.5) / scale).floor() as i64;
            let sy = ((y as f64 + 0.5) / scale).floor() as i64;
            out.set(x, y, source.get(sx, sy));
        }
    }
    (out, scale)
}

/// Upscales `image` back to `(width, height)` (nearest-neighbor), the
/// inverse of [`downscale_longest_edge`].
pub fn upscale_to(image: &GrayImage, width: usize, height: usize) -> GrayImage {
    if image.width == width && image.height == height {
        return image.clone();
    }
    let mut out = GrayImage::new(width, height);
    let sx = image.width as f64 / width.max(1) as f64;
    let sy = image.height as f64 / height.max(1) as f64;
    for y in 0..height {
        for x in 0..width {
            let ox = ((x as f64 + 0.5) * sx).floor() as i64;
            let oy = ((y as f64 + 0.5) * sy).floor() as i64;
            out.set(x, y, image.get(ox, oy));
        }
    }
    out
}
