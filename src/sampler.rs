use log::{debug, trace};
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::pool::WorkerPool;
use crate::{BowConfig, BowErr, BowResult, SamplingConfig};

/// Descriptors pooled from a set of images, ready for clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledDescriptors<D> {
    /// Retained descriptors, grouped by image in image order.
    pub descriptors: Vec<D>,
    /// `image_index[i]` is the image `descriptors[i]` came from.
    pub image_index: Vec<usize>,
    /// Descriptor count of each image before any capping.
    /// `None` for images skipped because the global cap was already reached.
    pub raw_counts: Vec<Option<usize>>,
}

impl<D> SampledDescriptors<D> {
    pub fn total_images(&self) -> usize {
        self.raw_counts.len()
    }

    /// Number of retained descriptors per image.
    pub fn taken_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.total_images()];
        for &i in &self.image_index {
            counts[i] += 1;
        }
        counts
    }
}

/// Extracts descriptors image by image and enforces the per-image and global caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSampler {
    caps: SamplingConfig,
    seed: Option<u64>,
}

impl DescriptorSampler {
    pub fn new(caps: SamplingConfig, seed: Option<u64>) -> Self {
        Self { caps, seed }
    }

    pub fn from_config(config: &BowConfig) -> Self {
        Self::new(config.sampling(), config.seed)
    }

    /// Run `extract` for every image on `workers` and pool what survives the caps.
    ///
    /// `state` is what `extract` needs per worker, normally a detector. Images are
    /// skipped without extraction once the running total reaches the global cap;
    /// under parallel execution which images get skipped is not deterministic.
    pub(crate) fn sample<S, D, F>(
        &self,
        workers: &WorkerPool,
        state: &mut S,
        n_images: usize,
        extract: F,
    ) -> BowResult<SampledDescriptors<D>>
    where
        S: Clone + Send,
        D: Send,
        F: Fn(&mut S, usize) -> BowResult<Vec<D>> + Sync,
    {
        let per_image = self.caps.max_descriptors_per_image;
        let global = self.caps.number_of_descriptors;
        let taken = AtomicUsize::new(0);

        let slots = workers.run(state, n_images, |s, i| {
            if global > 0 && taken.load(Ordering::Relaxed) >= global {
                trace!("skipping image {}: global cap of {} reached", i, global);
                return Ok(None);
            }
            let mut desc = extract(s, i)?;
            let raw = desc.len();
            if per_image > 0 && raw > per_image {
                desc = self.choose(&mut self.rng(Some(i)), desc, per_image);
            }
            taken.fetch_add(desc.len(), Ordering::Relaxed);
            trace!("image {}: {} descriptors, kept {}", i, raw, desc.len());
            Ok(Some((raw, desc)))
        })?;

        let mut raw_counts = Vec::with_capacity(n_images);
        let mut descriptors = Vec::new();
        let mut image_index = Vec::new();
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some((raw, desc)) => {
                    raw_counts.push(Some(raw));
                    image_index.extend(std::iter::repeat(i).take(desc.len()));
                    descriptors.extend(desc);
                }
                None => raw_counts.push(None),
            }
        }
        debug!(
            "pooled {} descriptors from {} images",
            descriptors.len(),
            n_images
        );

        let (descriptors, image_index) = self.subsample(descriptors, image_index)?;
        Ok(SampledDescriptors {
            descriptors,
            image_index,
            raw_counts,
        })
    }

    /// Indices into a flat pool of `len` descriptors that survive the global cap.
    pub fn flat_indices(&self, len: usize) -> BowResult<Vec<usize>> {
        let global = self.caps.number_of_descriptors;
        if global == 0 {
            return Ok((0..len).collect());
        }
        if len < global {
            return Err(BowErr::InsufficientDescriptors {
                available: len,
                required: global,
            });
        }
        Ok(index::sample(&mut self.rng(None), len, global).into_vec())
    }

    fn subsample<D>(
        &self,
        descriptors: Vec<D>,
        image_index: Vec<usize>,
    ) -> BowResult<(Vec<D>, Vec<usize>)> {
        if self.caps.number_of_descriptors == 0 {
            return Ok((descriptors, image_index));
        }
        let keep = self.flat_indices(descriptors.len())?;
        let mut pool: Vec<Option<D>> = descriptors.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(keep.len());
        let mut out_index = Vec::with_capacity(keep.len());
        for i in keep {
            if let Some(d) = pool[i].take() {
                out.push(d);
                out_index.push(image_index[i]);
            }
        }
        Ok((out, out_index))
    }

    /// Uniform subset of `k` elements, without replacement.
    fn choose<D, R: Rng>(&self, rng: &mut R, items: Vec<D>, k: usize) -> Vec<D> {
        let mut keep = index::sample(rng, items.len(), k).into_vec();
        keep.sort_unstable();
        let mut keep = keep.into_iter().peekable();
        items
            .into_iter()
            .enumerate()
            .filter_map(|(i, d)| match keep.peek() {
                Some(&j) if j == i => {
                    keep.next();
                    Some(d)
                }
                _ => None,
            })
            .collect()
    }

    /// Per-image streams are seeded from the image index so seeded runs do not
    /// depend on which worker handled which image.
    fn rng(&self, image: Option<usize>) -> StdRng {
        match self.seed {
            Some(seed) => {
                let stream = image.map_or(u64::MAX, |i| i as u64);
                StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_entropy(),
        }
    }
}
