#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vbow::{BowErr, BowResult, Clustering, Codebook, Detector, KeyPoint};

pub type Point = [f32; 2];

/// A synthetic image: its keypoint descriptors are stored verbatim.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub id: usize,
    pub points: Vec<Point>,
}

/// `n` images of `per_image` distinct 2-d descriptors spread over four corners.
pub fn images(n: usize, per_image: usize) -> Vec<TestImage> {
    (0..n)
        .map(|id| TestImage {
            id,
            points: (0..per_image)
                .map(|j| {
                    let corner = ((id + j) % 4) as f32;
                    let jitter = 0.001 * (id * per_image + j) as f32;
                    [10. * (corner % 2.) + jitter, 10. * (corner / 2.).floor() - jitter]
                })
                .collect(),
        })
        .collect()
}

/// Detector that counts calls and clones through shared counters.
#[derive(Debug)]
pub struct CountingDetector {
    pub calls: Arc<AtomicUsize>,
    pub clones: Arc<AtomicUsize>,
    pub fail_on: Option<usize>,
}

impl CountingDetector {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            clones: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
        }
    }

    pub fn failing_on(id: usize) -> Self {
        Self {
            fail_on: Some(id),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

impl Clone for CountingDetector {
    fn clone(&self) -> Self {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Self {
            calls: self.calls.clone(),
            clones: self.clones.clone(),
            fail_on: self.fail_on,
        }
    }
}

impl Detector for CountingDetector {
    type Image = TestImage;
    type Descriptor = Point;

    fn detect(&mut self, image: &TestImage) -> BowResult<Vec<KeyPoint<Point>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(image.id) {
            return Err(BowErr::Detection(format!("image {} is corrupt", image.id)));
        }
        Ok(image
            .points
            .iter()
            .map(|&p| KeyPoint::new(p[0], p[1], p))
            .collect())
    }
}

/// Clustering engine that counts calls and splits descriptors into `k` bands of x.
#[derive(Debug, Clone)]
pub struct CountingClustering {
    pub k: usize,
    /// Word count of the returned codebook, when it differs from `k`.
    pub realized: Option<usize>,
    pub calls: Arc<AtomicUsize>,
    pub seen: Arc<AtomicUsize>,
}

impl CountingClustering {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            realized: None,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub k: usize,
}

impl Codebook<Point> for Bands {
    fn num_words(&self) -> usize {
        self.k
    }

    fn decide(&self, d: &Point) -> usize {
        (d[0].max(0.) as usize) % self.k
    }
}

impl Clustering<Point> for CountingClustering {
    type Codebook = Bands;

    fn num_clusters(&self) -> usize {
        self.k
    }

    fn learn(&mut self, descriptors: &[Point], _weights: Option<&[f64]>) -> BowResult<Bands> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.store(descriptors.len(), Ordering::SeqCst);
        Ok(Bands {
            k: self.realized.unwrap_or(self.k),
        })
    }
}
