//! Dynamic-dimension k-d index over node configurations.
//!
//! Points are stored in scaled coordinates so Euclidean queries agree with
//! the planner's scaled metric. Removal tombstones the entry; trees rebuild
//! the index after large purges.

use nalgebra::DVector;

use super::NodeId;

struct Entry {
    point: DVector<f64>,
    id: NodeId,
    left: Option<usize>,
    right: Option<usize>,
    removed: bool,
}

/// k-d tree keyed by scaled configuration, payload is a [`NodeId`].
pub struct KdIndex {
    dim: usize,
    entries: Vec<Entry>,
    root: Option<usize>,
    live: usize,
}

impl KdIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
            root: None,
            live: 0,
        }
    }

    /// Number of live points.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Insert a point. The id must not already be present.
    pub fn insert(&mut self, point: DVector<f64>, id: NodeId) {
        debug_assert_eq!(point.len(), self.dim);
        let new_idx = self.entries.len();
        self.entries.push(Entry {
            point,
            id,
            left: None,
            right: None,
            removed: false,
        });
        self.live += 1;

        let Some(mut current) = self.root else {
            self.root = Some(new_idx);
            return;
        };
        let mut depth = 0usize;
        loop {
            let axis = depth % self.dim;
            let go_left = self.entries[new_idx].point[axis] < self.entries[current].point[axis];
            let next = if go_left {
                self.entries[current].left
            } else {
                self.entries[current].right
            };
            match next {
                Some(n) => current = n,
                None => {
                    if go_left {
                        self.entries[current].left = Some(new_idx);
                    } else {
                        self.entries[current].right = Some(new_idx);
                    }
                    return;
                }
            }
            depth += 1;
        }
    }

    /// Tombstone a point by id. Returns whether it was present.
    pub fn remove(&mut self, id: NodeId) -> bool {
        for entry in &mut self.entries {
            if entry.id == id && !entry.removed {
                entry.removed = true;
                self.live -= 1;
                return true;
            }
        }
        false
    }

    /// Nearest live point to the query, with its distance.
    pub fn nearest(&self, query: &DVector<f64>) -> Option<(NodeId, f64)> {
        let root = self.root?;
        let mut best: Option<(NodeId, f64)> = None;
        self.nearest_rec(root, query, 0, &mut best);
        best
    }

    fn nearest_rec(
        &self,
        idx: usize,
        query: &DVector<f64>,
        depth: usize,
        best: &mut Option<(NodeId, f64)>,
    ) {
        let entry = &self.entries[idx];
        if !entry.removed {
            let dist = (query - &entry.point).norm();
            if best.map(|(_, d)| dist < d).unwrap_or(true) {
                *best = Some((entry.id, dist));
            }
        }

        let axis = depth % self.dim;
        let diff = query[axis] - entry.point[axis];
        let (near, far) = if diff < 0.0 {
            (entry.left, entry.right)
        } else {
            (entry.right, entry.left)
        };
        if let Some(n) = near {
            self.nearest_rec(n, query, depth + 1, best);
        }
        let best_dist = best.map(|(_, d)| d).unwrap_or(f64::INFINITY);
        if let Some(f) = far {
            if diff.abs() < best_dist {
                self.nearest_rec(f, query, depth + 1, best);
            }
        }
    }

    /// All live points within `radius` of the query.
    pub fn within_radius(&self, query: &DVector<f64>, radius: f64) -> Vec<(NodeId, f64)> {
        let mut found = Vec::new();
        if let Some(root) = self.root {
            self.radius_rec(root, query, radius, 0, &mut found);
        }
        found
    }

    fn radius_rec(
        &self,
        idx: usize,
        query: &DVector<f64>,
        radius: f64,
        depth: usize,
        found: &mut Vec<(NodeId, f64)>,
    ) {
        let entry = &self.entries[idx];
        if !entry.removed {
            let dist = (query - &entry.point).norm();
            if dist <= radius {
                found.push((entry.id, dist));
            }
        }

        let axis = depth % self.dim;
        let diff = query[axis] - entry.point[axis];
        let (near, far) = if diff < 0.0 {
            (entry.left, entry.right)
        } else {
            (entry.right, entry.left)
        };
        if let Some(n) = near {
            self.radius_rec(n, query, radius, depth + 1, found);
        }
        if let Some(f) = far {
            if diff.abs() <= radius {
                self.radius_rec(f, query, radius, depth + 1, found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn make_index() -> KdIndex {
        let mut index = KdIndex::new(2);
        let points = [
            dvector![0.0, 0.0],
            dvector![1.0, 0.0],
            dvector![0.0, 1.0],
            dvector![2.0, 2.0],
            dvector![-1.0, -1.0],
        ];
        for (i, p) in points.into_iter().enumerate() {
            index.insert(p, NodeId(i));
        }
        index
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let index = make_index();
        let (id, dist) = index.nearest(&dvector![0.9, 0.2]).unwrap();
        assert_eq!(id, NodeId(1));
        assert!((dist - (0.1f64.powi(2) + 0.2f64.powi(2)).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_removed_entry_skipped() {
        let mut index = make_index();
        assert!(index.remove(NodeId(1)));
        assert!(!index.remove(NodeId(1)));
        let (id, _) = index.nearest(&dvector![0.9, 0.2]).unwrap();
        assert_ne!(id, NodeId(1));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_within_radius() {
        let index = make_index();
        let mut ids: Vec<NodeId> = index
            .within_radius(&dvector![0.0, 0.0], 1.0)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_empty_index() {
        let index = KdIndex::new(3);
        assert!(index.is_empty());
        assert!(index.nearest(&dvector![0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_many_points_against_brute_force() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut index = KdIndex::new(3);
        let mut points = Vec::new();
        for i in 0..200 {
            let p = dvector![
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0)
            ];
            index.insert(p.clone(), NodeId(i));
            points.push(p);
        }
        for _ in 0..20 {
            let q = dvector![
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0)
            ];
            let (_, kd_dist) = index.nearest(&q).unwrap();
            let brute = points
                .iter()
                .map(|p| (p - &q).norm())
                .fold(f64::INFINITY, f64::min);
            assert!((kd_dist - brute).abs() < 1e-9);
        }
    }
}
