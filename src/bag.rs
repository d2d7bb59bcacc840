use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::bow;
use crate::pool::WorkerPool;
use crate::*;

/// Bag-of-visual-words model. Can be:
/// 1. Learned from images, keypoint lists or a flat pool of descriptors.
/// 2. Used to transform new images or descriptor sets into word histograms.
/// 3. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
///
/// The detector turns images into descriptors and the clustering engine turns the
/// sampled descriptors into a [`Codebook`]. The model owns the codebook it learned.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "Det: Serialize, C: Serialize, C::Codebook: Serialize",
    deserialize = "Det: Deserialize<'de>, C: Deserialize<'de>, C::Codebook: Deserialize<'de>"
))]
pub struct BagOfWords<Det, C>
where
    Det: Detector,
    C: Clustering<Det::Descriptor>,
{
    detector: Det,
    clustering: C,
    codebook: Option<C::Codebook>,
    num_words: usize,
    config: BowConfig,
    statistics: Option<LearningStatistics>,
}

/// Configuration and model properties
impl<Det, C> BagOfWords<Det, C>
where
    Det: Detector,
    C: Clustering<Det::Descriptor>,
{
    pub fn new(detector: Det, clustering: C) -> Self {
        Self {
            detector,
            clustering,
            codebook: None,
            num_words: 0,
            config: BowConfig::default(),
            statistics: None,
        }
    }

    pub fn with_config(mut self, config: BowConfig) -> Self {
        self.config = config;
        self
    }

    /// Global descriptor cap. 0 means unbounded.
    pub fn with_number_of_descriptors(mut self, n: usize) -> Self {
        self.config.number_of_descriptors = n;
        self
    }

    /// Per-image descriptor cap. 0 means unbounded.
    pub fn with_max_descriptors_per_image(mut self, n: usize) -> Self {
        self.config.max_descriptors_per_image = n;
        self
    }

    /// Worker count. 1 is sequential, 0 uses every available thread.
    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.config.parallelism = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &BowConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut BowConfig {
        &mut self.config
    }

    /// Number of visual words, as realized by the last learning call. 0 before learning.
    pub fn number_of_words(&self) -> usize {
        self.num_words
    }

    /// Input length is not fixed: images hold any number of descriptors.
    pub fn number_of_inputs(&self) -> Option<usize> {
        None
    }

    /// Length of every histogram produced by this model.
    pub fn number_of_outputs(&self) -> usize {
        self.num_words
    }

    pub fn statistics(&self) -> Option<&LearningStatistics> {
        self.statistics.as_ref()
    }

    pub fn codebook(&self) -> Option<&C::Codebook> {
        self.codebook.as_ref()
    }

    pub fn detector(&self) -> &Det {
        &self.detector
    }

    pub fn clustering(&self) -> &C {
        &self.clustering
    }

    /// Tune the clustering engine before the next learning call.
    pub fn clustering_mut(&mut self) -> &mut C {
        &mut self.clustering
    }
}

/// Learning
impl<Det, C> BagOfWords<Det, C>
where
    Det: Detector,
    C: Clustering<Det::Descriptor>,
{
    /// Learn the codebook from images, running the detector on each one.
    ///
    /// `weights`, when given, holds one weight per image; every descriptor
    /// of an image carries that image's weight into clustering.
    pub fn learn<R>(&mut self, images: &[R], weights: Option<&[f64]>) -> BowResult<()>
    where
        R: Borrow<Det::Image> + Sync,
    {
        check_weights(weights, images.len())?;
        info!("learning {} words from {} images", self.clustering.num_clusters(), images.len());

        let workers = WorkerPool::new(&self.config)?;
        let sample = DescriptorSampler::from_config(&self.config).sample(
            &workers,
            &mut self.detector,
            images.len(),
            |det, i| det.descriptors(Borrow::<Det::Image>::borrow(&images[i])),
        )?;
        let weights = weights.map(|w| sample.image_index.iter().map(|&i| w[i]).collect());
        self.cluster(sample, weights)
    }

    /// Learn the codebook from keypoints that were already detected, one list per image.
    pub fn learn_keypoints(
        &mut self,
        images: &[Vec<KeyPoint<Det::Descriptor>>],
        weights: Option<&[f64]>,
    ) -> BowResult<()> {
        check_weights(weights, images.len())?;
        info!("learning {} words from {} keypoint sets", self.clustering.num_clusters(), images.len());

        let workers = WorkerPool::new(&self.config)?;
        let sample = DescriptorSampler::from_config(&self.config).sample(
            &workers,
            &mut (),
            images.len(),
            |_, i| Ok(images[i].iter().map(|kp| kp.descriptor.clone()).collect()),
        )?;
        let weights = weights.map(|w| sample.image_index.iter().map(|&i| w[i]).collect());
        self.cluster(sample, weights)
    }

    /// Learn the codebook from a flat pool of descriptors, skipping detection.
    ///
    /// Only the global descriptor cap applies. `weights`, when given, holds one
    /// weight per descriptor.
    pub fn learn_descriptors(
        &mut self,
        descriptors: &[Det::Descriptor],
        weights: Option<&[f64]>,
    ) -> BowResult<()> {
        check_weights(weights, descriptors.len())?;
        info!("learning {} words from {} descriptors", self.clustering.num_clusters(), descriptors.len());

        let keep = DescriptorSampler::from_config(&self.config).flat_indices(descriptors.len())?;
        let weights = weights.map(|w| keep.iter().map(|&i| w[i]).collect());
        let sample = SampledDescriptors {
            descriptors: keep.iter().map(|&i| descriptors[i].clone()).collect(),
            image_index: vec![0; keep.len()],
            raw_counts: vec![Some(descriptors.len())],
        };
        self.cluster(sample, weights)
    }

    /// Hand the sampled pool to the clustering engine. The model is only updated on success.
    fn cluster(
        &mut self,
        sample: SampledDescriptors<Det::Descriptor>,
        weights: Option<Vec<f64>>,
    ) -> BowResult<()> {
        let words = self.clustering.num_clusters();
        if sample.descriptors.len() <= words {
            return Err(BowErr::InsufficientData {
                samples: sample.descriptors.len(),
                words,
            });
        }

        let statistics = LearningStatistics::from_sample(&sample);
        debug!("{:?}", statistics);

        let codebook = self.clustering.learn(&sample.descriptors, weights.as_deref())?;
        if codebook.num_words() == 0 {
            return Err(BowErr::Clustering("clustering produced no words".into()));
        }
        self.num_words = codebook.num_words();
        self.codebook = Some(codebook);
        self.statistics = Some(statistics);
        info!("learned {} words from {} descriptors", self.num_words, sample.descriptors.len());
        Ok(())
    }
}

/// Transform
impl<Det, C> BagOfWords<Det, C>
where
    Det: Detector,
    C: Clustering<Det::Descriptor>,
{
    /// Detect the descriptors of one image and count its words.
    pub fn transform<T: Count>(&mut self, image: &Det::Image) -> BowResult<Histogram<T>> {
        self.learned()?;
        let descriptors = self.detector.descriptors(image)?;
        self.transform_descriptors(&descriptors)
    }

    /// Histograms of many images, one worker per image at a time.
    /// Each worker detects with its own detector clone.
    pub fn transform_batch<T, R>(&mut self, images: &[R]) -> BowResult<Vec<Histogram<T>>>
    where
        T: Count,
        R: Borrow<Det::Image> + Sync,
    {
        let codebook = self.codebook.as_ref().ok_or(BowErr::NotLearned)?;
        let workers = WorkerPool::new(&self.config)?;
        let slots = workers.run(&mut self.detector, images.len(), |det, i| {
            let descriptors = det.descriptors(Borrow::<Det::Image>::borrow(&images[i]))?;
            Ok(Some(bow::accumulate(codebook, &descriptors)))
        })?;
        Ok(self.fill(slots))
    }

    /// Count the words of one descriptor set.
    ///
    /// Parallel models count on the current rayon pool; no threads are started per call.
    pub fn transform_descriptors<T: Count>(
        &self,
        descriptors: &[Det::Descriptor],
    ) -> BowResult<Histogram<T>> {
        let codebook = self.learned()?;
        if self.config.workers() <= 1 {
            Ok(bow::accumulate(codebook, descriptors))
        } else {
            Ok(bow::accumulate_par(codebook, descriptors))
        }
    }

    pub fn transform_keypoints<T: Count>(
        &self,
        keypoints: &[KeyPoint<Det::Descriptor>],
    ) -> BowResult<Histogram<T>> {
        let descriptors: Vec<_> = keypoints.iter().map(|kp| kp.descriptor.clone()).collect();
        self.transform_descriptors(&descriptors)
    }

    /// Histograms of many pre-extracted descriptor sets, in parallel across sets.
    pub fn transform_descriptor_sets<T: Count>(
        &self,
        sets: &[Vec<Det::Descriptor>],
    ) -> BowResult<Vec<Histogram<T>>> {
        let codebook = self.learned()?;
        let workers = WorkerPool::new(&self.config)?;
        let slots = workers.run(&mut (), sets.len(), |_, i| {
            Ok(Some(bow::accumulate(codebook, &sets[i])))
        })?;
        Ok(self.fill(slots))
    }

    fn learned(&self) -> BowResult<&C::Codebook> {
        self.codebook.as_ref().ok_or(BowErr::NotLearned)
    }

    fn fill<T: Count>(&self, slots: Vec<Option<Histogram<T>>>) -> Vec<Histogram<T>> {
        slots
            .into_iter()
            .map(|h| h.unwrap_or_else(|| vec![T::ZERO; self.num_words]))
            .collect()
    }
}

/// Persistence
#[cfg(feature = "bincode")]
impl<Det, C> BagOfWords<Det, C>
where
    Det: Detector + Serialize + serde::de::DeserializeOwned,
    C: Clustering<Det::Descriptor> + Serialize + serde::de::DeserializeOwned,
    C::Codebook: Serialize + serde::de::DeserializeOwned,
{
    /// Load a model from a file
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        Ok(bincode::deserialize(&buffer)?)
    }

    /// Save model to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = bincode::serialize(&self)?;
        let mut file = std::fs::File::create(file)?;
        std::io::Write::write_all(&mut file, &serialized)?;
        Ok(())
    }
}

fn check_weights(weights: Option<&[f64]>, expected: usize) -> BowResult<()> {
    match weights {
        Some(w) if w.len() != expected => Err(BowErr::DimensionMismatch {
            expected,
            actual: w.len(),
        }),
        _ => Ok(()),
    }
}

impl<Det, C> fmt::Debug for BagOfWords<Det, C>
where
    Det: Detector,
    C: Clustering<Det::Descriptor>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BagOfWords")
            .field("Words", &self.num_words)
            .field("Learned", &self.codebook.is_some())
            .field("Config", &self.config)
            .field("Statistics", &self.statistics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Model = BagOfWords<Precomputed<Vec<f32>>, KMeans>;

    /// Image `i` holds points around `(10 * (i % 3), 0)`.
    fn images(n: usize, per_image: usize) -> Vec<Vec<Vec<f32>>> {
        (0..n)
            .map(|i| {
                (0..per_image)
                    .map(|j| vec![10. * (i % 3) as f32 + 0.01 * j as f32, 0.])
                    .collect()
            })
            .collect()
    }

    fn model(k: usize) -> Model {
        BagOfWords::new(Precomputed::new(), KMeans::new(k).with_seed(11)).with_seed(5)
    }

    #[test]
    fn properties_before_learning() {
        let mut m = model(3);
        assert_eq!(m.number_of_words(), 0);
        assert_eq!(m.number_of_outputs(), 0);
        assert_eq!(m.number_of_inputs(), None);
        assert!(m.statistics().is_none());
        assert!(matches!(
            m.transform::<u32>(&[vec![0., 0.]]),
            Err(BowErr::NotLearned)
        ));
    }

    #[test]
    fn learn_then_transform() {
        let data = images(6, 8);
        let mut m = model(3).with_parallelism(2);
        m.learn(&data, None).unwrap();
        assert_eq!(m.number_of_words(), 3);
        assert_eq!(m.number_of_outputs(), 3);

        let stats = m.statistics().unwrap();
        assert_eq!(stats.total_images, 6);
        assert_eq!(stats.descriptors_taken, 48);
        assert_eq!(stats.images_taken, 6);

        let h: Histogram<u32> = m.transform(&data[1]).unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.iter().sum::<u32>(), 8);
        assert_eq!(h.iter().filter(|&&c| c == 8).count(), 1);
    }

    #[test]
    fn learn_keypoints_with_weights() {
        let kps: Vec<Vec<KeyPoint<Vec<f32>>>> = images(4, 5)
            .into_iter()
            .map(|img| img.into_iter().map(|d| KeyPoint::new(1., 2., d)).collect())
            .collect();
        let mut m = model(2).with_parallelism(1);
        m.learn_keypoints(&kps, Some(&[1., 1., 2., 0.5])).unwrap();
        assert_eq!(m.number_of_words(), 2);
        let h: Histogram<f64> = m.transform_keypoints(&kps[0]).unwrap();
        assert_eq!(h.iter().sum::<f64>(), 5.);

        assert!(matches!(
            m.learn_keypoints(&kps, Some(&[1.])),
            Err(BowErr::DimensionMismatch { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn flat_descriptors_and_global_cap() {
        let flat: Vec<Vec<f32>> = images(5, 10).into_iter().flatten().collect();
        let mut m = model(3).with_number_of_descriptors(20);
        m.learn_descriptors(&flat, None).unwrap();
        let stats = m.statistics().unwrap();
        assert_eq!(stats.total_images, 1);
        assert_eq!(stats.total_descriptors, 50);
        assert_eq!(stats.descriptors_taken, 20);

        let mut m = model(3).with_number_of_descriptors(60);
        assert!(matches!(
            m.learn_descriptors(&flat, None),
            Err(BowErr::InsufficientDescriptors { available: 50, required: 60 })
        ));
        assert_eq!(m.number_of_words(), 0);
    }

    #[test]
    fn descriptor_sets_in_parallel() {
        let data = images(9, 4);
        let mut m = model(3).with_parallelism(3);
        m.learn(&data, None).unwrap();
        let hs: Vec<Histogram<usize>> = m.transform_descriptor_sets(&data).unwrap();
        let one_by_one: Vec<Histogram<usize>> = data
            .iter()
            .map(|d| m.transform_descriptors(d).unwrap())
            .collect();
        assert_eq!(hs, one_by_one);
        assert_eq!(hs[0], hs[3]);
    }

    #[test]
    fn single_transforms_reuse_the_current_pool() {
        let data = images(6, 8);
        let mut m = model(3).with_parallelism(4);
        m.learn(&data, None).unwrap();

        let built = crate::pool::POOLS_BUILT.with(|c| c.get());
        for img in &data {
            let h: Histogram<u32> = m.transform(img).unwrap();
            assert_eq!(h.iter().sum::<u32>(), 8);
        }
        let parallel: Histogram<u32> = m.transform_descriptors(&data[2]).unwrap();
        let kps = vec![KeyPoint::new(0., 0., vec![0., 0.])];
        let _: Histogram<f32> = m.transform_keypoints(&kps).unwrap();
        assert_eq!(crate::pool::POOLS_BUILT.with(|c| c.get()), built);

        // batches still get one dedicated pool each
        let _: Vec<Histogram<u32>> = m.transform_descriptor_sets(&data).unwrap();
        assert_eq!(crate::pool::POOLS_BUILT.with(|c| c.get()), built + 1);

        m.config_mut().parallelism = 1;
        let sequential: Histogram<u32> = m.transform_descriptors(&data[2]).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn relearning_replaces_statistics() {
        let mut m = model(2);
        m.learn(&images(6, 4), None).unwrap();
        m.learn(&images(3, 7), None).unwrap();
        let stats = m.statistics().unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.total_descriptors, 21);
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn save_and_load() {
        let data = images(6, 6);
        let mut m = model(3);
        m.learn(&data, None).unwrap();
        let path = std::env::temp_dir().join(format!("vbow-model-{}.bin", std::process::id()));
        m.save(&path).unwrap();
        let loaded = Model::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.number_of_words(), 3);
        assert_eq!(loaded.config(), m.config());
        assert_eq!(loaded.statistics(), m.statistics());
        assert_eq!(loaded.codebook(), m.codebook());
        let a: Histogram<u32> = m.transform_descriptors(&data[2]).unwrap();
        let b: Histogram<u32> = loaded.transform_descriptors(&data[2]).unwrap();
        assert_eq!(a, b);
    }
}
