//! Laplacian variance: a focus/noise proxy computed with a running Welford
//! accumulator over the 4-neighbor Laplacian of the interior.

use super::GrayImage;

/// Sample variance of the 4-neighbor Laplacian response
/// (`4*center - up - down - left - right`) over interior pixels. Images
/// smaller than 3x3 have no interior and return `0.0`.
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (w, h) = (image.width, image.height);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut mean = 0f64;
    let mut m2 = 0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = image.data[y * w + x] as f64;
            let up = image.data[(y - 1) * w + x] as f64;
            let down = image.data[(y + 1) * w + x] as f64;
            let left = image.data[y * w + x - 1] as f64;
            let right = image.data[y * w + x + 1] as f64;
            let value = 4.0 * center - up - down - left - right;

            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            let delta2 = value - mean;
            m2 += delta * delta2;
        }
    }

    if count < 2 {
        0.0
    } else {
        m2 / (count - 1) as f64
    }
}
