use crate::config::ConnectivityParams;
use crate::types::{FloodResult, Mask};
use ndarray::Array2;

/// 8-connected neighbour offsets
const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Removes small 8-connected noise clusters from a flood mask.
///
/// Cluster sizes are counted by a bounded scan that stops at
/// `max_cluster_scan`, so every reported size is `min(size, cap)`.
#[derive(Debug, Clone)]
pub struct ClusterFilter {
    params: ConnectivityParams,
}

impl ClusterFilter {
    pub fn new(params: ConnectivityParams) -> Self {
        Self { params }
    }

    /// Capped 8-connected cluster size for every `true` pixel, 0 elsewhere
    pub fn connected_pixel_count(&self, mask: &Mask) -> Array2<usize> {
        let cap = self.params.max_cluster_scan;
        super::map_indexed(&mask.data, |(i, j), &set| {
            if set {
                bounded_cluster_size(&mask.data, i, j, cap)
            } else {
                0
            }
        })
    }

    /// Keep pixels whose capped cluster size reaches `connected_pixels`
    pub fn apply(&self, mask: &Mask) -> FloodResult<Mask> {
        log::info!(
            "Removing clusters smaller than {} pixels (scan cap {})",
            self.params.connected_pixels,
            self.params.max_cluster_scan
        );

        let counts = self.connected_pixel_count(mask);
        let min_size = self.params.connected_pixels;
        let data = super::zip_map(&mask.data, &counts, |&set, &count| set && count >= min_size);
        let filtered = Mask::new(data, mask.grid)?;

        log::debug!(
            "Cluster filter kept {} of {} pixels",
            filtered.count(),
            mask.count()
        );
        Ok(filtered)
    }
}

impl Default for ClusterFilter {
    fn default() -> Self {
        Self::new(ConnectivityParams::default())
    }
}

/// Size of the 8-connected cluster containing (i, j), saturating at `cap`
pub fn bounded_cluster_size(mask: &Array2<bool>, i: usize, j: usize, cap: usize) -> usize {
    if cap == 0 || !mask[[i, j]] {
        return 0;
    }

    let (height, width) = mask.dim();
    let mut visited: Vec<(usize, usize)> = Vec::with_capacity(cap);
    let mut frontier: Vec<(usize, usize)> = vec![(i, j)];
    visited.push((i, j));

    while let Some((ci, cj)) = frontier.pop() {
        for (di, dj) in NEIGHBORS_8 {
            if visited.len() >= cap {
                return cap;
            }
            let ni = ci as isize + di;
            let nj = cj as isize + dj;
            if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                continue;
            }
            let next = (ni as usize, nj as usize);
            if mask[next] && !visited.contains(&next) {
                visited.push(next);
                frontier.push(next);
            }
        }
    }

    visited.len().min(cap)
}
