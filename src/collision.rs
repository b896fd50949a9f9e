//! Collision checking interface and reference implementations.
//!
//! The planner treats collision checking as a black box: a point predicate
//! plus a segment predicate. Segment checks discretize at the checker's
//! resolution. A parallel wrapper fans point checks across worker threads;
//! workers only read the immutable world, so the wrapper behaves as if
//! serial.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::DVector;

/// Black-box collision predicate.
///
/// `true` means collision-free.
pub trait CollisionChecker: Send + Sync {
    /// Check a single configuration.
    fn check(&self, q: &DVector<f64>) -> bool;

    /// Discretization step for segment checks.
    fn resolution(&self) -> f64 {
        0.01
    }

    /// Check the straight segment between two configurations.
    ///
    /// The default samples the segment uniformly at [`resolution`] spacing,
    /// endpoints included.
    ///
    /// [`resolution`]: CollisionChecker::resolution
    fn check_segment(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool {
        if !self.check(a) || !self.check(b) {
            return false;
        }
        for q in segment_samples(a, b, self.resolution()) {
            if !self.check(&q) {
                return false;
            }
        }
        true
    }
}

/// Interior sample points of the segment `[a, b]` at the given spacing.
fn segment_samples(a: &DVector<f64>, b: &DVector<f64>, resolution: f64) -> Vec<DVector<f64>> {
    let length = (b - a).norm();
    if length <= resolution {
        return Vec::new();
    }
    let steps = (length / resolution).ceil() as usize;
    (1..steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            a + (b - a) * t
        })
        .collect()
}

/// World with no obstacles. Every configuration is valid.
#[derive(Clone, Copy, Debug, Default)]
pub struct FreeSpace;

impl CollisionChecker for FreeSpace {
    fn check(&self, _q: &DVector<f64>) -> bool {
        true
    }
}

/// World of spherical obstacles in configuration space.
///
/// A configuration collides when it lies inside any sphere. Used by tests
/// and demos; real deployments wrap their own scene representation.
#[derive(Clone, Debug)]
pub struct SphereWorld {
    spheres: Vec<(DVector<f64>, f64)>,
    resolution: f64,
}

impl SphereWorld {
    pub fn new(spheres: Vec<(DVector<f64>, f64)>) -> Self {
        Self {
            spheres,
            resolution: 0.01,
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }
}

impl CollisionChecker for SphereWorld {
    fn check(&self, q: &DVector<f64>) -> bool {
        self.spheres
            .iter()
            .all(|(center, radius)| (q - center).norm() > *radius)
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }
}

/// Parallel segment checker.
///
/// Fans the point samples of a segment across up to `threads` scoped worker
/// threads. Workers share the inner checker read-only and publish failure
/// through one atomic; the call joins all workers before returning, so no
/// concurrency is observable to the caller.
pub struct ParallelChecker<C: CollisionChecker> {
    inner: Arc<C>,
    threads: usize,
}

impl<C: CollisionChecker> ParallelChecker<C> {
    pub fn new(inner: C, threads: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            threads: threads.max(1),
        }
    }
}

impl<C: CollisionChecker> CollisionChecker for ParallelChecker<C> {
    fn check(&self, q: &DVector<f64>) -> bool {
        self.inner.check(q)
    }

    fn resolution(&self) -> f64 {
        self.inner.resolution()
    }

    fn check_segment(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool {
        if !self.inner.check(a) || !self.inner.check(b) {
            return false;
        }
        let samples = segment_samples(a, b, self.inner.resolution());
        if samples.is_empty() {
            return true;
        }
        if self.threads == 1 || samples.len() < 2 * self.threads {
            return samples.iter().all(|q| self.inner.check(q));
        }

        let blocked = AtomicBool::new(false);
        let chunk = samples.len().div_ceil(self.threads);
        std::thread::scope(|scope| {
            for batch in samples.chunks(chunk) {
                let inner = Arc::clone(&self.inner);
                let blocked = &blocked;
                scope.spawn(move || {
                    for q in batch {
                        if blocked.load(Ordering::Relaxed) {
                            return;
                        }
                        if !inner.check(q) {
                            blocked.store(true, Ordering::Relaxed);
                            return;
                        }
                    }
                });
            }
        });
        !blocked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn make_disc_world() -> SphereWorld {
        SphereWorld::new(vec![(dvector![0.0, 0.0], 1.0)])
    }

    #[test]
    fn test_point_check() {
        let world = make_disc_world();
        assert!(!world.check(&dvector![0.5, 0.0]));
        assert!(world.check(&dvector![1.5, 0.0]));
    }

    #[test]
    fn test_segment_through_obstacle_blocked() {
        let world = make_disc_world();
        // Endpoints are free, the middle crosses the disc.
        assert!(!world.check_segment(&dvector![-2.0, 0.0], &dvector![2.0, 0.0]));
    }

    #[test]
    fn test_segment_clear() {
        let world = make_disc_world();
        assert!(world.check_segment(&dvector![-2.0, 1.5], &dvector![2.0, 1.5]));
    }

    #[test]
    fn test_free_space_always_valid() {
        assert!(FreeSpace.check_segment(&dvector![-10.0, 0.0], &dvector![10.0, 0.0]));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let serial = make_disc_world();
        let parallel = ParallelChecker::new(make_disc_world(), 4);

        let cases = [
            (dvector![-2.0, 0.0], dvector![2.0, 0.0]),
            (dvector![-2.0, 1.5], dvector![2.0, 1.5]),
            (dvector![-2.0, 0.99], dvector![2.0, 0.99]),
            (dvector![1.1, 0.0], dvector![1.2, 0.0]),
        ];
        for (a, b) in cases {
            assert_eq!(
                serial.check_segment(&a, &b),
                parallel.check_segment(&a, &b),
                "mismatch on segment {:?} -> {:?}",
                a,
                b
            );
        }
    }
}
