//! Grayscale lookup tables: autocontrast, brightness/contrast, gamma.

use super::{clampf, GrayImage};

/// Builds a 256-entry LUT by calling `f` for every input value `0..=255`
/// and clamping the result into `0..=255`.
fn build_lut(f: impl Fn(f64) -> f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        *slot = clampf(f(v as f64), 0.0, 255.0).round() as u8;
    }
    lut
}

pub fn apply_lut(image: &GrayImage, lut: &[u8; 256]) -> GrayImage {
    GrayImage {
        width: image.width,
        height: image.height,
        data: image.data.iter().map(|&v| lut[v as usize]).collect(),
    }
}

/// Autocontrast with percentile clipping: values at or below the
/// `black_clip_pct` percentile map to 0, values at or above the
/// `white_clip_pct` percentile map to 255, linear in between.
pub fn autocontrast_lut(image: &GrayImage, black_clip_pct: f64, white_clip_pct: f64) -> [u8; 256] {
    if image.data.is_empty() {
        return build_lut(|v| v);
    }

    let mut histogram = [0u64; 256];
    for &v in &image.data {
        histogram[v as usize] += 1;
    }
    let total = image.data.len() as f64;

    let black_target = total * clampf(black_clip_pct, 0.0, 100.0) / 100.0;
    let white_target = total * clampf(white_clip_pct, 0.0, 100.0) / 100.0;

    let mut cumulative = 0u64;
    let mut low = 0u8;
    for (i, &c) in histogram.iter().enumerate() {
        cumulative += c;
        if cumulative as f64 >= black_target {
            low = i as u8;
            break;
        }
    }

    cumulative = 0;
    let mut high = 255u8;
    for (i, &c) in histogram.iter().enumerate() {
        cumulative += c;
        if cumulative as f64 >= white_target {
            high = i as u8;
            break;
        }
    }

    if high <= low {
        return build_lut(|v| v);
    }

    let (low_f, high_f) = (low as f64, high as f64);
    build_lut(move |v| (v - low_f) * 255.0 / (high_f - low_f))
}

/// `((v - 128) * contrast_factor + 128) + brightness * 2.55`.
pub fn brightness_contrast_lut(brightness: f64, contrast_factor: f64) -> [u8; 256] {
    build_lut(move |v| (v - 128.0) * contrast_factor + 128.0 + brightness * 2.55)
}

/// `255 * (v/255)^(1/gamma)`.
pub fn gamma_lut(gamma: f64) -> [u8; 256] {
    let gamma = if gamma <= 0.0 { 1.0 } else { gamma };
    build_lut(move |v| 255.0 * (v / 255.0).powf(1.0 / gamma))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_one_is_identity() {
        let lut = gamma_lut(1.0);
        for v in 0..=255u8 {
            assert!((lut[v as usize] as i32 - v as i32).abs() <= 1);
        }
    }

    #[test]
    fn autocontrast_on_constant_image_is_identity() {
        let image = GrayImage::filled(4, 4, 50);
        let lut = autocontrast_lut(&image, 0.5, 99.5);
        assert_eq!(lut[50], 50);
    }

    #[test]
    fn brightness_contrast_neutral_is_identity() {
        let lut = brightness_contrast_lut(0.0, 1.0);
        for v in 0..=255u8 {
            assert_eq!(lut[v as usize], v);
        }
    }
}
