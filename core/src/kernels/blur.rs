//! Separable box and Gaussian blur, used by the denoise stage and by the
//! local-contrast term of structure-based binarization.

use super::GrayImage;

/// Gaussian blur with standard deviation `sigma`, implemented as a
/// separable convolution with a kernel radius of `ceil(3*sigma)`.
/// `sigma <= 0` returns the image unchanged.
pub fn gaussian_blur(image: &GrayImage, sigma: f64) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    let radius = (3.0 * sigma).ceil().max(1.0) as i64;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut sum = 0.0;
    for i in -radius..=radius {
        let w = (-((i * i) as f64) / two_sigma_sq).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    let horizontal = convolve_horizontal(image, &kernel, radius);
    convolve_vertical(&horizontal, &kernel, radius)
}

/// Box blur (uniform-weight separable convolution) with the given radius.
pub fn box_blur(image: &GrayImage, radius: i64) -> GrayImage {
    if radius <= 0 {
        return image.clone();
    }
    let kernel = vec![1.0 / (2 * radius + 1) as f64; (2 * radius + 1) as usize];
    let horizontal = convolve_horizontal(image, &kernel, radius);
    convolve_vertical(&horizontal, &kernel, radius)
}

fn convolve_horizontal(image: &GrayImage, kernel: &[f64], radius: i64) -> GrayImage {
    let (w, h) = (image.width, image.height);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let dx = k as i64 - radius;
                acc += weight * image.get(x as i64 + dx, y as i64) as f64;
            }
            out.data[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn convolve_vertical(image: &GrayImage, kernel: &[f64], radius: i64) -> GrayImage {
    let (w, h) = (image.width, image.height);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let dy = k as i64 - radius;
                acc += weight * image.get(x as i64, y as i64 + dy) as f64;
            }
            out.data[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
