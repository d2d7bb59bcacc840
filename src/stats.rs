use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SampledDescriptors;

/// Summary of a distribution of per-image descriptor counts.
///
/// Never fails: no values or identical values give a zero variance.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct CountSummary {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    /// Unbiased sample variance.
    pub variance: f64,
}

impl CountSummary {
    pub fn from_counts<I: IntoIterator<Item = usize>>(counts: I) -> Self {
        // Welford
        let mut s = Self {
            min: usize::MAX,
            ..Self::default()
        };
        let mut m2 = 0f64;
        for c in counts {
            s.count += 1;
            s.min = s.min.min(c);
            s.max = s.max.max(c);
            let x = c as f64;
            let delta = x - s.mean;
            s.mean += delta / s.count as f64;
            m2 += delta * (x - s.mean);
        }
        if s.count == 0 {
            s.min = 0;
        }
        if s.count > 1 {
            s.variance = (m2 / (s.count - 1) as f64).max(0.);
        }
        s
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Descriptor counts observed by the last learning call.
///
/// Purely diagnostic.
#[derive(Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct LearningStatistics {
    /// Images handed to learning, skipped ones included.
    pub total_images: usize,
    /// Descriptors detected over all extracted images, before any cap.
    pub total_descriptors: usize,
    /// Per-image descriptor counts before capping, over extracted images.
    pub descriptors_per_image: CountSummary,
    /// Images that contributed at least one descriptor to clustering.
    pub images_taken: usize,
    /// Descriptors handed to clustering.
    pub descriptors_taken: usize,
    /// Per-image descriptor counts after both caps, over extracted images.
    pub descriptors_taken_per_image: CountSummary,
}

impl LearningStatistics {
    pub fn from_sample<D>(sample: &SampledDescriptors<D>) -> Self {
        let taken = sample.taken_counts();
        let extracted = || {
            sample
                .raw_counts
                .iter()
                .enumerate()
                .filter_map(|(i, raw)| raw.map(|r| (i, r)))
        };

        Self {
            total_images: sample.total_images(),
            total_descriptors: extracted().map(|(_, r)| r).sum(),
            descriptors_per_image: CountSummary::from_counts(extracted().map(|(_, r)| r)),
            images_taken: taken.iter().filter(|&&c| c > 0).count(),
            descriptors_taken: sample.descriptors.len(),
            descriptors_taken_per_image: CountSummary::from_counts(
                extracted().map(|(i, _)| taken[i]),
            ),
        }
    }

    /// Images skipped before extraction because the global cap was already met.
    pub fn images_skipped(&self) -> usize {
        self.total_images - self.descriptors_per_image.count
    }
}

impl fmt::Debug for LearningStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = |s: &CountSummary| {
            format!("{:.2} +/- {:.2} [{}, {}]", s.mean, s.std_dev(), s.min, s.max)
        };
        f.debug_struct("LearningStatistics")
            .field("Images", &self.total_images)
            .field("Images Skipped", &self.images_skipped())
            .field("Descriptors", &self.total_descriptors)
            .field("Descriptors Per Image", &summary(&self.descriptors_per_image))
            .field("Images Taken", &self.images_taken)
            .field("Descriptors Taken", &self.descriptors_taken)
            .field("Taken Per Image", &summary(&self.descriptors_taken_per_image))
            .finish()
    }
}
