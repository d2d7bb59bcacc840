use bitvec::{order::Msb0, view::BitView};
use log::debug;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kmeans::seed_centers;
use crate::*;

/// The learned decision function: maps a descriptor to one of `num_words` visual words.
pub trait Codebook<D>: Send + Sync {
    fn num_words(&self) -> usize;

    /// Word id of `descriptor`, in `0..num_words()`.
    fn decide(&self, descriptor: &D) -> usize;
}

/// A clustering algorithm that learns a [`Codebook`] from a pool of descriptors.
///
/// The engine owns any parallelism inside its own iterations.
pub trait Clustering<D> {
    type Codebook: Codebook<D>;

    /// Number of words requested.
    fn num_clusters(&self) -> usize;

    /// Learn a codebook. `weights`, when given, holds one weight per descriptor.
    /// The codebook may hold fewer words than requested.
    fn learn(&mut self, descriptors: &[D], weights: Option<&[f64]>) -> BowResult<Self::Codebook>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// K-majority clustering of binary descriptors: k-means with hamming distance,
/// where a cluster center is the bitwise (weighted) majority of its members.
pub struct BinaryKMajority {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: Option<u64>,
}

impl BinaryKMajority {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 100,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Initialize clusters for k-majority with kmeans++ seeding.
    /// Returns fewer than `k` centers when the features hold fewer distinct values.
    fn initialize_clusters(&self, features: &[Desc], weight: impl Fn(usize) -> f64) -> Vec<Desc> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        seed_centers(&mut rng, features.len(), self.k, weight, |i, j| {
            let d = hamming(&features[i], &features[j]) as f64;
            d * d
        })
        .into_iter()
        .map(|i| features[i])
        .collect()
    }
}

impl Clustering<Desc> for BinaryKMajority {
    type Codebook = BinaryVocabulary;

    fn num_clusters(&self) -> usize {
        self.k
    }

    fn learn(&mut self, features: &[Desc], weights: Option<&[f64]>) -> BowResult<BinaryVocabulary> {
        if self.k == 0 {
            return Err(BowErr::Clustering("k must be positive".into()));
        }
        if let Some(w) = weights {
            if w.len() != features.len() {
                return Err(BowErr::DimensionMismatch {
                    expected: features.len(),
                    actual: w.len(),
                });
            }
        }
        let weight = |i: usize| weights.map_or(1., |w| w[i]);

        if features.len() <= self.k {
            // Only one feature per cluster
            return Ok(BinaryVocabulary {
                words: features.to_vec(),
                cluster_size: vec![1; features.len()],
            });
        }

        let mut clusters = self.initialize_clusters(features, &weight);
        let k = clusters.len();
        let assign = |clusters: &[Desc]| {
            let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
            let assignment: Vec<usize> = features
                .par_iter()
                .map(|f| nearest(clusters, f))
                .collect();
            for (i, &j) in assignment.iter().enumerate() {
                groups[j].push(i);
            }
            groups
        };

        // `groups` always holds the assignment to the current centers
        let mut groups = assign(&clusters[..]);
        for iter in 0..self.max_iterations {
            // update clusters, empty ones keep their center
            for (c, group) in clusters.iter_mut().zip(&groups) {
                if !group.is_empty() {
                    *c = desc_mean(group.iter().map(|&i| (&features[i], weight(i))));
                }
            }

            let new_groups = assign(&clusters[..]);
            if groups == new_groups {
                debug!("k-majority converged after {} iterations", iter + 1);
                break;
            }
            groups = new_groups;
        }

        // Drop clusters nothing was assigned to
        let (words, cluster_size): (Vec<Desc>, Vec<usize>) = clusters
            .into_iter()
            .zip(&groups)
            .filter(|(_, g)| !g.is_empty())
            .map(|(c, g)| (c, g.len()))
            .unzip();
        Ok(BinaryVocabulary {
            words,
            cluster_size,
        })
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual words of binary descriptors, learned by [`BinaryKMajority`].
pub struct BinaryVocabulary {
    words: Vec<Desc>,
    cluster_size: Vec<usize>,
}

impl BinaryVocabulary {
    pub fn words(&self) -> &[Desc] {
        &self.words
    }

    /// Number of training descriptors behind each word.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_size
    }
}

impl Codebook<Desc> for BinaryVocabulary {
    fn num_words(&self) -> usize {
        self.words.len()
    }

    fn decide(&self, descriptor: &Desc) -> usize {
        nearest(&self.words, descriptor)
    }
}

/// Index of the closest center by hamming distance. Ties go to the lowest index.
fn nearest(centers: &[Desc], d: &Desc) -> usize {
    let mut best: (usize, u32) = (0, u32::MAX);
    for (j, c) in centers.iter().enumerate() {
        let dist = hamming(c, d);
        if dist < best.1 {
            best = (j, dist);
        }
    }
    best.0
}

#[inline]
/// Hamming distance between two binary arrays (descriptors).
pub fn hamming(x: &[u8], y: &[u8]) -> u32 {
    x.iter()
        .zip(y)
        .fold(0, |a, (b, c)| a + (*b ^ *c).count_ones())
}

#[inline]
/// Compute the weighted bitwise majority of a collection of binary arrays (descriptors).
fn desc_mean<'a, I>(descriptors: I) -> Desc
where
    I: Iterator<Item = (&'a Desc, f64)>,
{
    let mut total = 0.;
    let mut counts = vec![0f64; std::mem::size_of::<Desc>() * 8];
    let mut result: Desc = [0; std::mem::size_of::<Desc>()];
    for (d, w) in descriptors {
        total += w;
        for (i, b) in d.view_bits::<Msb0>().iter().enumerate() {
            if *b {
                counts[i] += w;
            }
        }
    }
    let half = total / 2.;
    let result_bits = result.view_bits_mut::<Msb0>();
    for (i, &c) in counts.iter().enumerate() {
        if c > half {
            result_bits.set(i, true);
        }
    }
    result
}

impl fmt::Debug for BinaryVocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sum = self.cluster_size.iter().sum::<usize>();
        f.debug_struct("BinaryVocabulary")
            .field("Words", &self.words.len())
            .field("Total Training Features", &sum)
            .field("Min Word Cluster Size", &self.cluster_size.iter().min())
            .field("Max Word Cluster Size", &self.cluster_size.iter().max())
            .field(
                "Mean Word Cluster Size",
                &(sum.checked_div(self.cluster_size.len()).unwrap_or(0)),
            )
            .finish()
    }
}
