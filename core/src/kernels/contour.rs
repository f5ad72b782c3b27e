//! Boundary tracing, polygon simplification, and signed-area computation.
//!
//! Boundary tracing walks the axis-aligned outer polygon of a foreground
//! region by emitting unit edges at every foreground<->background boundary
//! and chaining them tail-to-head ("crack following"). A region with holes
//! produces one outer loop (clockwise, positive signed area under this
//! module's convention) plus one inner loop per hole (counter-clockwise,
//! negative area); callers that only want the outer silhouette should take
//! the loop with the largest absolute area.

use super::Mask;

pub type Point = (i64, i64);

/// Traces every closed boundary loop in `mask`. Loops shorter than 3 vertices
/// after collinear-triple removal are discarded. Returns loops as open
/// (non-duplicated first/last point) vertex lists.
pub fn trace_contours(mask: &Mask) -> Vec<Vec<Point>> {
    let edges = collect_edges(mask);
    if edges.is_empty() {
        return Vec::new();
    }

    let mut by_start: std::collections::HashMap<Point, Vec<Point>> =
        std::collections::HashMap::new();
    for &(a, b) in &edges {
        by_start.entry(a).or_default().push(b);
    }

    let mut visited: std::collections::HashSet<(Point, Point)> = std::collections::HashSet::new();
    let mut loops = Vec::new();

    for &(start, _) in &edges {
        for first_next in by_start.get(&start).cloned().unwrap_or_default() {
            if visited.contains(&(start, first_next)) {
                continue;
            }
            let mut loop_pts = vec![start];
            let mut current = start;
            let mut next = first_next;
            loop {
                visited.insert((current, next));
                loop_pts.push(next);
                if next == start {
                    break;
                }
                let candidates = by_start.get(&next);
                let Some(candidates) = candidates else {
                    break;
                };
                // Prefer an unvisited outgoing edge; a well-formed mask has
                // exactly one per vertex, but shared corners at diagonal
                // touches can offer more than one.
                let chosen = candidates
                    .iter()
                    .find(|&&c| !visited.contains(&(next, c)))
                    .copied();
                let Some(chosen) = chosen else {
                    break;
                };
                current = next;
                next = chosen;
            }
            if loop_pts.last() == Some(&start) {
                loop_pts.pop();
                let simplified = simplify_collinear(&loop_pts);
                if simplified.len() >= 3 {
                    loops.push(simplified);
                }
            }
        }
    }

    loops
}

/// Collects unit crack edges: for every foreground pixel, one edge per side
/// that borders background, oriented so the foreground interior is on the
/// edge's right (producing clockwise outer loops in image (y-down) space).
fn collect_edges(mask: &Mask) -> Vec<(Point, Point)> {
    let mut edges = Vec::new();
    for y in 0..mask.height as i64 {
        for x in 0..mask.width as i64 {
            if !mask.get(x, y) {
                continue;
            }
            if !mask.get(x, y - 1) {
                edges.push(((x, y), (x + 1, y))); // top
            }
            if !mask.get(x + 1, y) {
                edges.push(((x + 1, y), (x + 1, y + 1))); // right
            }
            if !mask.get(x, y + 1) {
                edges.push(((x + 1, y + 1), (x, y + 1))); // bottom
            }
            if !mask.get(x - 1, y) {
                edges.push(((x, y + 1), (x, y))); // left
            }
        }
    }
    edges
}

/// Returns the outer silhouette of `mask` (the loop with the largest absolute
/// signed area), or `None` if the mask has no foreground.
pub fn outer_contour(mask: &Mask) -> Option<Vec<Point>> {
    trace_contours(mask)
        .into_iter()
        .max_by(|a, b| signed_area(a).abs().partial_cmp(&signed_area(b).abs()).unwrap())
}

/// Removes collinear triples from a closed polygon (vertex list without a
/// duplicated closing point). Treats the list cyclically.
pub fn simplify_collinear(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let n = points.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = points[(i + n - 1) % n];
        let curr = points[i];
        let next = points[(i + 1) % n];
        let cross = cross2(prev, curr, next);
        if cross != 0 {
            out.push(curr);
        }
    }
    if out.len() < 3 {
        return points.to_vec();
    }
    out
}

#[inline]
fn cross2(a: Point, b: Point, c: Point) -> i64 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let (bcx, bcy) = (c.0 - b.0, c.1 - b.1);
    abx * bcy - aby * bcx
}

/// Signed area of a closed polygon via the shoelace formula (vertex list
/// without a duplicated closing point). Positive for clockwise loops in
/// image (y-down) coordinates, matching [`trace_contours`]'s convention for
/// outer boundaries.
pub fn signed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut sum: i64 = 0;
    for i in 0..n {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % n];
        sum += x0 * y1 - x1 * y0;
    }
    sum as f64 / 2.0
}

/// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)` of a point list.
pub fn bbox(points: &[Point]) -> (i64, i64, i64, i64) {
    let mut min_x = i64::MAX;
    let mut min_y = i64::MAX;
    let mut max_x = i64::MIN;
    let mut max_y = i64::MIN;
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if points.is_empty() {
        (0, 0, 0, 0)
    } else {
        (min_x, min_y, max_x, max_y)
    }
}

/// A floating-point polygon vertex, used from polygonization (S9) onward
/// once contours leave the integer pixel grid.
pub type FPoint = (f64, f64);

/// Closed-ring perimeter: sum of edge lengths including the wraparound edge
/// from the last point back to the first.
pub fn perimeter(points: &[FPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
        })
        .sum()
}

/// Resamples a closed ring to uniform arc-length spacing `step`, starting at
/// `points[0]`. Degenerate input (fewer than 3 points, non-positive step, or
/// zero perimeter) is returned unchanged.
pub fn resample_uniform(points: &[FPoint], step: f64) -> Vec<FPoint> {
    if points.len() < 3 || step <= 0.0 {
        return points.to_vec();
    }
    let total = perimeter(points);
    if total <= 0.0 {
        return points.to_vec();
    }
    let n = points.len();
    let count = (total / step).round().max(3.0) as usize;

    let mut out = Vec::with_capacity(count);
    let mut edge = 0usize;
    let mut edge_start = 0.0f64;
    let mut edge_len = edge_vec_len(points, 0);
    for k in 0..count {
        let target = total * k as f64 / count as f64;
        while edge_start + edge_len < target && edge < n {
            edge_start += edge_len;
            edge += 1;
            edge_len = edge_vec_len(points, edge % n);
        }
        let (x0, y0) = points[edge % n];
        let (x1, y1) = points[(edge + 1) % n];
        let t = if edge_len > 0.0 {
            ((target - edge_start) / edge_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
    }
    out
}

fn edge_vec_len(points: &[FPoint], i: usize) -> f64 {
    let n = points.len();
    let (x0, y0) = points[i];
    let (x1, y1) = points[(i + 1) % n];
    ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
}

/// Circular moving-average smoothing with the given radius (0 = no-op).
pub fn smooth_circular(points: &[FPoint], radius: usize) -> Vec<FPoint> {
    if radius == 0 || points.len() < 3 {
        return points.to_vec();
    }
    let n = points.len();
    let window = 2 * radius + 1;
    (0..n)
        .map(|i| {
            let (mut sx, mut sy) = (0.0, 0.0);
            for k in 0..window {
                let j = (i + n + k - radius) % n;
                sx += points[j].0;
                sy += points[j].1;
            }
            (sx / window as f64, sy / window as f64)
        })
        .collect()
}

/// Inserts evenly-spaced intermediate points so no edge of the closed ring
/// (including the wraparound edge) exceeds `max_gap` in length.
pub fn densify(points: &[FPoint], max_gap: f64) -> Vec<FPoint> {
    if points.len() < 2 || max_gap <= 0.0 {
        return points.to_vec();
    }
    let n = points.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % n];
        out.push((x0, y0));
        let len = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        if len > max_gap {
            let extra = (len / max_gap).ceil() as usize - 1;
            for k in 1..=extra {
                let t = k as f64 / (extra + 1) as f64;
                out.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
            }
        }
    }
    out
}

/// Rounds every coordinate to 3 decimal places.
pub fn round3(points: &[FPoint]) -> Vec<FPoint> {
    points
        .iter()
        .map(|&(x, y)| ((x * 1000.0).round() / 1000.0, (y * 1000.0).round() / 1000.0))
        .collect()
}

/// Rasterizes the interior of a closed polygon (in local coordinates) into a
/// `width`x`height` mask via even-odd scanline fill. Points outside the
/// canvas are clipped implicitly by the scan bounds.
pub fn rasterize_polygon(points: &[FPoint], width: usize, height: usize) -> Mask {
    let mut mask = Mask::new(width, height);
    if points.len() < 3 {
        return mask;
    }
    let n = points.len();
    for y in 0..height {
        let yc = y as f64 + 0.5;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..n {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            if (y0 <= yc && y1 > yc) || (y1 <= yc && y0 > yc) {
                let t = (yc - y0) / (y1 - y0);
                crossings.push(x0 + (x1 - x0) * t);
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in crossings.chunks(2) {
            if pair.len() < 2 {
                continue;
            }
            let x_start = pair[0].ceil().max(0.0) as usize;
            let x_end = (pair[1].floor() as i64).min(width as i64 - 1);
            if x_end < 0 {
                continue;
            }
            for x in x_start..=(x_end as usize).min(width.saturating_sub(1)) {
                if x < width {
                    mask.set(x, y, true);
                }
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(size: usize) -> Mask {
        Mask {
            width: size,
            height: size,
            data: vec![1u8; size * size],
        }
    }

    #[test]
    fn single_pixel_traces_unit_square() {
        let mask = Mask {
            width: 1,
            height: 1,
            data: vec![1],
        };
        let loops = trace_contours(&mask);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].len(), 4);
        assert_eq!(signed_area(&loops[0]).abs(), 1.0);
    }

    #[test]
    fn solid_square_outer_area_matches_pixel_count() {
        let mask = square_mask(10);
        let outer = outer_contour(&mask).unwrap();
        assert_eq!(signed_area(&outer).abs(), 100.0);
    }

    #[test]
    fn square_with_hole_has_inner_loop_opposite_sign() {
        let mut mask = square_mask(10);
        for y in 4..6 {
            for x in 4..6 {
                mask.set(x, y, false);
            }
        }
        let loops = trace_contours(&mask);
        assert_eq!(loops.len(), 2);
        let areas: Vec<f64> = loops.iter().map(|l| signed_area(l)).collect();
        assert!(areas.iter().any(|&a| a > 0.0));
        assert!(areas.iter().any(|&a| a < 0.0));
    }

    #[test]
    fn empty_mask_has_no_contours() {
        let mask = Mask::new(5, 5);
        assert!(trace_contours(&mask).is_empty());
        assert!(outer_contour(&mask).is_none());
    }

    #[test]
    fn collinear_points_are_removed() {
        // L-shaped path with a straight run that should collapse.
        let pts = vec![(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (0, 2)];
        let simplified = simplify_collinear(&pts);
        assert!(simplified.len() < pts.len());
        assert!(simplified.contains(&(0, 0)));
        assert!(simplified.contains(&(2, 0)));
        assert!(!simplified.contains(&(1, 0)));
    }

    #[test]
    fn bbox_of_square() {
        let pts = vec![(1, 1), (5, 1), (5, 5), (1, 5)];
        assert_eq!(bbox(&pts), (1, 1, 5, 5));
    }

    fn fsquare(side: f64) -> Vec<FPoint> {
        vec![(0.0, 0.0), (side, 0.0), (side, side), (0.0, side)]
    }

    #[test]
    fn resample_uniform_preserves_perimeter_roughly() {
        let square = fsquare(40.0);
        let resampled = resample_uniform(&square, 5.0);
        assert!(resampled.len() >= 28 && resampled.len() <= 36);
        let p_before = perimeter(&square);
        let p_after = perimeter(&resampled);
        assert!((p_before - p_after).abs() / p_before < 0.15);
    }

    #[test]
    fn densify_bounds_max_segment_length() {
        let square = fsquare(20.0);
        let dense = densify(&square, 3.0);
        let n = dense.len();
        for i in 0..n {
            let (x0, y0) = dense[i];
            let (x1, y1) = dense[(i + 1) % n];
            let len = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            assert!(len <= 3.0 + 1e-6);
        }
    }

    #[test]
    fn round3_rounds_to_three_decimals() {
        let pts = vec![(1.23456, 2.00001)];
        let rounded = round3(&pts);
        assert_eq!(rounded[0], (1.235, 2.0));
    }

    #[test]
    fn rasterize_polygon_matches_square_area() {
        let square = fsquare(10.0);
        let mask = rasterize_polygon(&square, 10, 10);
        assert_eq!(mask.foreground_count(), 100);
    }

    #[test]
    fn rasterize_polygon_empty_for_degenerate_input() {
        let mask = rasterize_polygon(&[(0.0, 0.0), (1.0, 1.0)], 5, 5);
        assert_eq!(mask.foreground_count(), 0);
    }
}
