use std::{ffi::OsStr, path::PathBuf};

use vbow::*;

fn main() {
    // Load existing model
    let mut model = BagOfWords::<OrbDetector, BinaryKMajority>::load("vocabs/test.bow").unwrap();
    println!("Model: {:#?}", model);

    // Create BoW vectors from the test data. Save file name for demonstration.
    let paths: Vec<PathBuf> = image_paths("data/test").unwrap().into_iter().take(6).collect();
    let histograms: Vec<Histogram<u32>> = model.transform_batch(&paths).unwrap();
    let bows: Vec<(&PathBuf, BoW)> = paths
        .iter()
        .zip(&histograms)
        .map(|(p, h)| (p, bow::normalized(h)))
        .collect();

    // Match every image to every other image
    for (f1, bow1) in bows.iter() {
        let mut scores: Vec<(f32, &OsStr)> = Vec::new();
        for (f2, bow2) in bows.iter() {
            let d = bow1.l1(bow2);
            scores.push((d, f2.file_name().unwrap()));
        }

        // Print out the top 5 matches for each image
        println!("\nTop 5 Matches for {:#?}:", f1.file_name().unwrap());
        println!("Match      |      Score");
        scores.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        for m in scores.iter().take(5) {
            println!("{:#?} | {:#?}", m.1, m.0);
        }
    }
}
