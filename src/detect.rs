use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::Path;

use crate::{BowErr, BowResult, KeyPoint};

/// Produces keypoints with descriptors from one image.
///
/// A single instance is not assumed to be thread-safe: `detect` takes `&mut self`.
/// Parallel callers clone one instance per worker, and the clone is dropped once
/// that worker is done.
pub trait Detector: Clone + Send {
    type Image: ?Sized + Sync;
    type Descriptor: Clone + Send + Sync;

    fn detect(&mut self, image: &Self::Image) -> BowResult<Vec<KeyPoint<Self::Descriptor>>>;

    /// Descriptors only, in keypoint order.
    fn descriptors(&mut self, image: &Self::Image) -> BowResult<Vec<Self::Descriptor>> {
        Ok(self
            .detect(image)?
            .into_iter()
            .map(|kp| kp.descriptor)
            .collect())
    }
}

/// Detector for images that already are descriptor lists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Precomputed<D> {
    #[serde(skip)]
    _desc: PhantomData<fn() -> D>,
}

impl<D> Precomputed<D> {
    pub fn new() -> Self {
        Self { _desc: PhantomData }
    }
}

impl<D> Default for Precomputed<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Send + Sync> Detector for Precomputed<D> {
    type Image = [D];
    type Descriptor = D;

    fn detect(&mut self, image: &[D]) -> BowResult<Vec<KeyPoint<D>>> {
        Ok(image
            .iter()
            .map(|d| KeyPoint::new(0., 0., d.clone()))
            .collect())
    }

    fn descriptors(&mut self, image: &[D]) -> BowResult<Vec<D>> {
        Ok(image.to_vec())
    }
}

/// Decodes image files into 8-bit grayscale before handing them to the inner detector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PathDetector<Det> {
    inner: Det,
}

impl<Det> PathDetector<Det> {
    pub fn new(inner: Det) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Det {
        &self.inner
    }
}

impl<Det: Detector<Image = GrayImage>> Detector for PathDetector<Det> {
    type Image = Path;
    type Descriptor = Det::Descriptor;

    fn detect(&mut self, path: &Path) -> BowResult<Vec<KeyPoint<Self::Descriptor>>> {
        let img = image::open(path)?.to_luma8();
        log::trace!("decoded {:?} ({}x{})", path, img.width(), img.height());
        self.inner.detect(&img)
    }
}

/// A raw, row-major, 8-bit grayscale pixel buffer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Wraps raw pixel buffers into images for the inner detector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawDetector<Det> {
    inner: Det,
}

impl<Det> RawDetector<Det> {
    pub fn new(inner: Det) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Det {
        &self.inner
    }
}

impl<Det: Detector<Image = GrayImage>> Detector for RawDetector<Det> {
    type Image = RawImage;
    type Descriptor = Det::Descriptor;

    fn detect(&mut self, raw: &RawImage) -> BowResult<Vec<KeyPoint<Self::Descriptor>>> {
        let expected = raw.width as usize * raw.height as usize;
        let img = GrayImage::from_raw(raw.width, raw.height, raw.pixels.clone()).ok_or(
            BowErr::DimensionMismatch {
                expected,
                actual: raw.pixels.len(),
            },
        )?;
        self.inner.detect(&img)
    }
}
