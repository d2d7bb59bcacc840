use crate::{BowErr, BowResult, Desc, Detector, KeyPoint};
use opencv::{self, core::MatTrait, prelude::Feature2DTrait};
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    path::{Path, PathBuf},
};

type CvImage = opencv::prelude::Mat;
type CvMat = opencv::core::Mat;

/// ORB keypoint detector for image files.
///
/// The opencv detector object is created per call, so clones share nothing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrbDetector {
    pub max_features: i32,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self { max_features: 500 }
    }
}

impl OrbDetector {
    /// Extract orb keypoints and descriptors from an image.
    fn orb_from_cvimage(&self, cv_img: &CvImage) -> BowResult<Vec<KeyPoint<Desc>>> {
        // Create detector
        let mut orb = opencv::features2d::ORB::create(
            self.max_features,
            1.2,
            8,
            31,
            0,
            2,
            opencv::features2d::ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;

        // Detect keypoints and compute descriptors
        let mut kps = opencv::types::VectorOfKeyPoint::new();
        let mut desc = CvMat::default()?;
        let mask = CvMat::default()?;
        orb.detect_and_compute(cv_img, &mask, &mut kps, &mut desc, false)?;

        // Copy data from CvMat into descriptor buffer
        let mut out = Vec::with_capacity(kps.len());
        for i in 0..kps.len() {
            let kp = kps.get(i)?;
            let row = (0..32)
                .map(|j| desc.at_2d::<u8>(i as i32, j).map(|b| *b))
                .collect::<Result<Vec<u8>, _>>()?;
            let d: Desc = row.try_into().map_err(|_| BowErr::OpenCvDecode)?;
            out.push(KeyPoint::new(kp.pt.x, kp.pt.y, d));
        }
        Ok(out)
    }
}

impl Detector for OrbDetector {
    type Image = Path;
    type Descriptor = Desc;

    /// Use opencv to load a grayscale image and extract orb keypoints.
    fn detect(&mut self, path: &Path) -> BowResult<Vec<KeyPoint<Desc>>> {
        let name = path.to_str().ok_or(BowErr::OpenCvDecode)?;
        let img: CvImage = opencv::imgcodecs::imread(name, opencv::imgcodecs::IMREAD_GRAYSCALE)?;
        self.orb_from_cvimage(&img)
    }
}

/// All image paths in a directory, sorted.
pub fn image_paths<P: AsRef<Path>>(path: P) -> BowResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in path.as_ref().read_dir()? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    log::debug!("found {} images in {:?}", paths.len(), path.as_ref());
    Ok(paths)
}
