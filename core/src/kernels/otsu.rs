//! Otsu's method: maximizes between-class variance over the 256-bin
//! histogram. Ties are broken by the smallest threshold.

use super::GrayImage;

/// Returns the Otsu threshold in `0..=255`. An empty or constant image
/// returns `0`.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    if image.data.is_empty() {
        return 0;
    }

    let mut histogram = [0u64; 256];
    for &v in &image.data {
        histogram[v as usize] += 1;
    }

    let total = image.data.len() as f64;
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0.0;
    let mut best_variance = -1.0f64;
    let mut best_threshold = 0u8;

    for t in 0..256 {
        weight_background += histogram[t] as f64;
        if weight_background == 0.0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground <= 0.0 {
            break;
        }

        sum_background += t as f64 * histogram[t] as f64;
        let mean_background = sum_background / weight_background;
        let mean_foreground = (sum_all - sum_background) / weight_foreground;

        let between_class_variance =
            weight_background * weight_foreground * (mean_background - mean_foreground).powi(2);

        if between_class_variance > best_variance {
            best_variance = between_class_variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_clear_clusters() {
        let mut data = vec![10u8; 50];
        data.extend(vec![200u8; 50]);
        let image = GrayImage {
            width: 100,
            height: 1,
            data,
        };
        let t = otsu_threshold(&image);
        assert!(t > 10 && t < 200, "threshold {t} should split clusters");
    }

    #[test]
    fn constant_image_does_not_panic() {
        let image = GrayImage::filled(4, 4, 128);
        let _ = otsu_threshold(&image);
    }

    #[test]
    fn empty_image_returns_zero() {
        let image = GrayImage {
            width: 0,
            height: 0,
            data: vec![],
        };
        assert_eq!(otsu_threshold(&image), 0);
    }
}
