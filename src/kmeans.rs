use log::debug;
use rand::{distributions::WeightedIndex, prelude::*, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{BowErr, BowResult, Clustering, Codebook};

/// Weighted Lloyd's k-means with k-means++ initialization, for real-valued descriptors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KMeans {
    pub k: usize,
    /// Stop once no centroid moves by more than this (squared euclidean distance).
    pub tolerance: f64,
    pub max_iterations: usize,
    pub seed: Option<u64>,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            tolerance: 1e-5,
            max_iterations: 100,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl<D: AsRef<[f32]> + Sync> Clustering<D> for KMeans {
    type Codebook = Centroids;

    fn num_clusters(&self) -> usize {
        self.k
    }

    fn learn(&mut self, descriptors: &[D], weights: Option<&[f64]>) -> BowResult<Centroids> {
        if self.k == 0 {
            return Err(BowErr::Clustering("k must be positive".into()));
        }
        if descriptors.len() < self.k {
            return Err(BowErr::InsufficientData {
                samples: descriptors.len(),
                words: self.k,
            });
        }
        let dim = descriptors[0].as_ref().len();
        if let Some(bad) = descriptors.iter().find(|d| d.as_ref().len() != dim) {
            return Err(BowErr::DimensionMismatch {
                expected: dim,
                actual: bad.as_ref().len(),
            });
        }
        if let Some(w) = weights {
            if w.len() != descriptors.len() {
                return Err(BowErr::DimensionMismatch {
                    expected: descriptors.len(),
                    actual: w.len(),
                });
            }
            if w.iter().any(|x| !x.is_finite() || *x < 0.) {
                return Err(BowErr::Clustering("weights must be finite and non-negative".into()));
            }
        }
        let weight = |i: usize| weights.map_or(1., |w| w[i]);

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut centroids: Vec<Vec<f32>> = seed_centers(
            &mut rng,
            descriptors.len(),
            self.k,
            &weight,
            |i, j| sq_dist(descriptors[i].as_ref(), descriptors[j].as_ref()),
        )
        .into_iter()
        .map(|i| descriptors[i].as_ref().to_vec())
        .collect();

        for iter in 0..self.max_iterations {
            let assignment: Vec<usize> = descriptors
                .par_iter()
                .map(|d| nearest(&centroids, d.as_ref()))
                .collect();

            let mut sums = vec![vec![0f64; dim]; centroids.len()];
            let mut mass = vec![0f64; centroids.len()];
            for (i, (&j, d)) in assignment.iter().zip(descriptors).enumerate() {
                let w = weight(i);
                mass[j] += w;
                for (s, &x) in sums[j].iter_mut().zip(d.as_ref()) {
                    *s += w * x as f64;
                }
            }

            // empty (or weightless) clusters keep their centroid
            let mut shift = 0f64;
            for ((c, s), &m) in centroids.iter_mut().zip(&sums).zip(&mass) {
                if m > 0. {
                    let updated: Vec<f32> = s.iter().map(|&x| (x / m) as f32).collect();
                    shift = shift.max(sq_dist(c, &updated));
                    *c = updated;
                }
            }

            if shift <= self.tolerance {
                debug!("k-means converged after {} iterations", iter + 1);
                break;
            }
        }

        Ok(Centroids { centroids })
    }
}

/// Cluster centers learned by [`KMeans`]. Descriptors go to the nearest center.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Centroids {
    centroids: Vec<Vec<f32>>,
}

impl Centroids {
    pub fn new(centroids: Vec<Vec<f32>>) -> Self {
        Self { centroids }
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }
}

impl<D: AsRef<[f32]>> Codebook<D> for Centroids {
    fn num_words(&self) -> usize {
        self.centroids.len()
    }

    fn decide(&self, descriptor: &D) -> usize {
        nearest(&self.centroids, descriptor.as_ref())
    }
}

fn nearest(centroids: &[Vec<f32>], d: &[f32]) -> usize {
    let mut best: (usize, f64) = (0, f64::INFINITY);
    for (j, c) in centroids.iter().enumerate() {
        let dist = sq_dist(c, d);
        if dist < best.1 {
            best = (j, dist);
        }
    }
    best.0
}

#[inline]
fn sq_dist(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

/// k-means++ seeding over `n` points: pick up to `k` indices, each with probability
/// proportional to `weight(i) * dist2(i, nearest picked)`.
///
/// Stops early when every remaining point coincides with a picked one.
pub(crate) fn seed_centers<R, W, F>(rng: &mut R, n: usize, k: usize, weight: W, dist2: F) -> Vec<usize>
where
    R: Rng,
    W: Fn(usize) -> f64,
    F: Fn(usize, usize) -> f64 + Sync,
{
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let first = match WeightedIndex::new((0..n).map(&weight)) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.gen_range(0..n),
    };
    let mut picked = vec![first];
    let mut closest: Vec<f64> = (0..n).into_par_iter().map(|i| dist2(i, first)).collect();

    while picked.len() < k {
        let scores = closest.iter().enumerate().map(|(i, &d)| d * weight(i));
        let next = match WeightedIndex::new(scores) {
            Ok(dist) => dist.sample(rng),
            Err(_) => break,
        };
        picked.push(next);
        closest
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, c)| *c = c.min(dist2(i, next)));
    }
    picked
}
