use serde::{Deserialize, Serialize};

/// Limits on how many descriptors feed the clustering step. 0 means unbounded.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Total descriptors handed to clustering, drawn uniformly from the pool.
    pub number_of_descriptors: usize,
    /// Descriptors kept from any single image.
    pub max_descriptors_per_image: usize,
}

/// Options of a [`BagOfWords`](crate::BagOfWords) model.
///
/// Deserializes from the camelCase option names, e.g.
/// `{"numberOfDescriptors": 50, "maxDescriptorsPerImage": 10, "parallelism": 1}`.
/// Missing options take their default.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct BowConfig {
    /// Global descriptor cap, see [`SamplingConfig::number_of_descriptors`].
    pub number_of_descriptors: usize,
    /// Per-image descriptor cap, see [`SamplingConfig::max_descriptors_per_image`].
    pub max_descriptors_per_image: usize,
    /// Worker count. 1 runs sequentially on the model's own detector,
    /// 0 uses every thread of the global rayon pool.
    pub parallelism: usize,
    /// Seed for descriptor sampling. Unseeded runs draw from the thread rng.
    pub seed: Option<u64>,
}

impl BowConfig {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            number_of_descriptors: self.number_of_descriptors,
            max_descriptors_per_image: self.max_descriptors_per_image,
        }
    }

    /// Number of workers a call will actually use.
    pub fn workers(&self) -> usize {
        match self.parallelism {
            0 => rayon::current_num_threads().max(1),
            n => n,
        }
    }
}
