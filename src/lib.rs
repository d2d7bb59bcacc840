use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Histogram accumulation and bag-of-words scoring.
pub mod bow;
pub use bow::{BoWTrait, Count};

/// The bag-of-visual-words model, which provides the main functionality of this crate.
pub mod bag;
pub use bag::BagOfWords;

/// Learning and transform options.
pub mod config;
pub use config::{BowConfig, SamplingConfig};

/// Keypoint detector abstraction and input adapters.
pub mod detect;
pub use detect::{Detector, PathDetector, Precomputed, RawDetector, RawImage};

/// Weighted k-means clustering for real-valued descriptors.
pub mod kmeans;
pub use kmeans::{Centroids, KMeans};

mod pool;

/// Per-image and global descriptor sampling.
pub mod sampler;
pub use sampler::{DescriptorSampler, SampledDescriptors};

/// Descriptor count statistics gathered while learning.
pub mod stats;
pub use stats::{CountSummary, LearningStatistics};

/// Clustering and codebook traits, plus a k-majority vocabulary for binary descriptors.
pub mod vocab;
pub use vocab::{BinaryKMajority, BinaryVocabulary, Clustering, Codebook};

/// Utilities for extracting keypoint descriptors using opencv.
#[cfg(feature = "opencv")]
pub mod opencv_utils;
#[cfg(feature = "opencv")]
pub use opencv_utils::*;

/// 256-bit binary descriptor.
///
/// This is the most commonly used keypoint descriptor data type.
/// It is used by ORB and BRIEF, for example.
pub type Desc = [u8; 32];

/// Count histogram of an image. Index: word id in the codebook.
pub type Histogram<T> = Vec<T>;

/// L1-normalised bag-of-words vector.
///
/// Index: word id in the codebook.
///
/// Value: share of the image's features assigned to that word.
pub type BoW = Vec<f32>;

/// A detected feature location with its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint<D> {
    pub x: f32,
    pub y: f32,
    pub descriptor: D,
}

impl<D> KeyPoint<D> {
    pub fn new(x: f32, y: f32, descriptor: D) -> Self {
        Self { x, y, descriptor }
    }
}

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[error("Image decode error")]
    Image(#[from] image::ImageError),
    #[error("Failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[cfg(feature = "bincode")]
    #[error("Model Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Error")]
    OpenCvInternal(#[from] opencv::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Descriptor decode error")]
    OpenCvDecode,
    #[error("Dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(
        "Not enough descriptors: {available} available after per-image sampling, {required} required. \
         Add more images or raise the per-image descriptor limit"
    )]
    InsufficientDescriptors { available: usize, required: usize },
    #[error("Not enough data to cluster: {samples} descriptors for {words} words (need more descriptors than words)")]
    InsufficientData { samples: usize, words: usize },
    #[error("The model has not been learned yet")]
    NotLearned,
    #[error("Detection error: {0}")]
    Detection(String),
    #[error("Clustering error: {0}")]
    Clustering(String),
}
