//! Morphological filters: median, binary closing (max-then-min), and the
//! max/min filters closing is built from.

use super::{GrayImage, Mask};

/// Grayscale median filter with a `(2*radius+1)` square window.
pub fn median_filter(image: &GrayImage, radius: i64) -> GrayImage {
    if radius <= 0 {
        return image.clone();
    }
    let (w, h) = (image.width, image.height);
    let mut out = GrayImage::new(w, h);
    let mut window = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    window.push(image.get(x as i64 + dx, y as i64 + dy));
                }
            }
            window.sort_unstable();
            out.data[y * w + x] = window[window.len() / 2];
        }
    }
    out
}

/// Binary dilation: a pixel becomes foreground if any pixel within `radius`
/// (Chebyshev distance) is foreground.
pub fn max_filter(mask: &Mask, radius: i64) -> Mask {
    if radius <= 0 {
        return mask.clone();
    }
    let (w, h) = (mask.width, mask.height);
    let mut out = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut any = false;
            'search: for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if mask.get(x as i64 + dx, y as i64 + dy) {
                        any = true;
                        break 'search;
                    }
                }
            }
            out.set(x, y, any);
        }
    }
    out
}

/// Binary erosion: a pixel stays foreground only if every pixel within
/// `radius` (Chebyshev distance) is foreground.
pub fn min_filter(mask: &Mask, radius: i64) -> Mask {
    if radius <= 0 {
        return mask.clone();
    }
    let (w, h) = (mask.width, mask.height);
    let mut out = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut all = true;
            'search: for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if !mask.get(x as i64 + dx, y as i64 + dy) {
                        all = false;
                        break 'search;
                    }
                }
            }
            out.set(x, y, all);
        }
    }
    out
}

/// Binary closing: dilation followed by erosion with the same radius.
/// `radius <= 0` is a no-op.
pub fn closing(mask: &Mask, radius: i64) -> Mask {
    if radius <= 0 {
        return mask.clone();
    }
    min_filter(&max_filter(mask, radius), radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_fills_small_gap() {
        let mut mask = Mask::new(9, 9);
        for y in 2..7 {
            for x in 2..7 {
                mask.set(x, y, true);
            }
        }
        mask.set(4, 4, false); // a 1px hole
        let closed = closing(&mask, 1);
        assert!(closed.get(4, 4));
    }

    #[test]
    fn zero_radius_is_identity() {
        let mut mask = Mask::new(4, 4);
        mask.set(1, 1, true);
        assert_eq!(closing(&mask, 0), mask);
    }

    #[test]
    fn median_filter_removes_salt_pepper() {
        let mut image = GrayImage::filled(5, 5, 100);
        image.set(2, 2, 255);
        let out = median_filter(&image, 1);
        assert_eq!(out.get(2, 2), 100);
    }
}
