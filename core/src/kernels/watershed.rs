//! Priority-flood watershed labeling, seeded at marker pixels, with elevation
//! `1 - normalized_distance + edge_weight * normalized_edge`. Ties are broken
//! by heap insertion order (first-claimed wins). Mask cells unreached by the
//! flood (can happen when every path to them crosses another label's claimed
//! territory first) fall back to a BFS from already-labeled neighbors.

use super::Mask;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    elevation: f64,
    x: usize,
    y: usize,
    label: u32,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .elevation
            .partial_cmp(&self.elevation)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const NEIGHBORS8: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Labels `mask`'s foreground via priority-flood watershed.
///
/// - `markers[i]` is the list of seed pixels for label `i + 1`.
/// - `distance`: city-block distance transform values aligned to `mask`
///   (foreground distance-to-background; see [`super::distance`]).
/// - `edge`: optional edge-strength field (e.g. Sobel magnitude), same shape;
///   `None` drops the edge term entirely (`edge_weight` is ignored).
///
/// Returns a label map (`0` = background/unlabeled, `1..=markers.len()` for
/// claimed foreground pixels).
pub fn priority_flood(
    mask: &Mask,
    markers: &[Vec<(usize, usize)>],
    distance: &[u32],
    edge: Option<&[f64]>,
    edge_weight: f64,
) -> Vec<u32> {
    let width = mask.width;
    let height = mask.height;
    let n = width * height;
    let mut labels = vec![0u32; n];
    if n == 0 || markers.is_empty() {
        return labels;
    }

    let dt_max = distance.iter().copied().max().unwrap_or(0).max(1) as f64;
    let edge_max = edge
        .map(|e| e.iter().cloned().fold(0.0_f64, f64::max).max(1e-9))
        .unwrap_or(1.0);

    let elevation = |idx: usize| -> f64 {
        let norm_dt = distance[idx] as f64 / dt_max;
        let norm_edge = edge.map(|e| e[idx] / edge_max).unwrap_or(0.0);
        1.0 - norm_dt + edge_weight * norm_edge
    };

    let idx = |x: usize, y: usize| y * width + x;
    let mut heap = BinaryHeap::new();

    for (i, seeds) in markers.iter().enumerate() {
        let label = (i + 1) as u32;
        for &(x, y) in seeds {
            if x >= width || y >= height || !mask.get(x as i64, y as i64) {
                continue;
            }
            let i = idx(x, y);
            if labels[i] == 0 {
                labels[i] = label;
                heap.push(Frontier {
                    elevation: elevation(i),
                    x,
                    y,
                    label,
                });
            }
        }
    }

    while let Some(Frontier { x, y, label, .. }) = heap.pop() {
        for (dx, dy) in NEIGHBORS8 {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if !mask.get(nx as i64, ny as i64) {
                continue;
            }
            let ni = idx(nx, ny);
            if labels[ni] != 0 {
                continue;
            }
            labels[ni] = label;
            heap.push(Frontier {
                elevation: elevation(ni),
                x: nx,
                y: ny,
                label,
            });
        }
    }

    fallback_bfs(mask, &mut labels);
    labels
}

/// Fills any still-unlabeled foreground pixel by BFS from its nearest
/// labeled neighbor, guaranteeing every foreground pixel ends up labeled.
fn fallback_bfs(mask: &Mask, labels: &mut [u32]) {
    let width = mask.width;
    let height = mask.height;
    let idx = |x: usize, y: usize| y * width + x;

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for y in 0..height {
        for x in 0..width {
            if labels[idx(x, y)] != 0 {
                queue.push_back((x, y));
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let label = labels[idx(x, y)];
        for (dx, dy) in NEIGHBORS8 {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if !mask.get(nx as i64, ny as i64) {
                continue;
            }
            let ni = idx(nx, ny);
            if labels[ni] == 0 {
                labels[ni] = label;
                queue.push_back((nx, ny));
            }
        }
    }
}

/// Finds local maxima of `distance` (aligned to `width`x`height`) suitable
/// as watershed seed markers: each peak must exceed `min_height` and be
/// strictly greater than at least one 8-neighbor, and no two accepted peaks
/// may be closer than `min_spacing` (Euclidean). Candidates are selected
/// greedily by descending height, ties broken by `(y, x)`.
pub fn find_local_maxima(
    distance: &[u32],
    width: usize,
    height: usize,
    min_height: f64,
    min_spacing: f64,
) -> Vec<(usize, usize)> {
    let idx = |x: usize, y: usize| y * width + x;
    let mut candidates: Vec<(u32, usize, usize)> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let d = distance[idx(x, y)];
            if (d as f64) < min_height {
                continue;
            }
            let mut strictly_greater = false;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                        continue;
                    }
                    if d > distance[idx(nx as usize, ny as usize)] {
                        strictly_greater = true;
                    }
                }
            }
            if strictly_greater {
                candidates.push((d, y, x));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut accepted: Vec<(usize, usize)> = Vec::new();
    let min_spacing_sq = min_spacing * min_spacing;
    for (_, y, x) in candidates {
        let far_enough = accepted.iter().all(|&(ax, ay)| {
            let dx = ax as f64 - x as f64;
            let dy = ay as f64 - y as f64;
            dx * dx + dy * dy >= min_spacing_sq
        });
        if far_enough {
            accepted.push((x, y));
        }
    }
    accepted
}
