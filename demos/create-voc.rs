use vbow::{image_paths, BagOfWords, BinaryKMajority, OrbDetector};

fn main() {
    // Collect training images
    let paths = image_paths("data/train").unwrap();
    println!("Found {} training images.", paths.len());

    // Learn 1000 words from at most 200 ORB features per image
    let mut model = BagOfWords::new(OrbDetector::default(), BinaryKMajority::new(1000))
        .with_max_descriptors_per_image(200)
        .with_number_of_descriptors(100_000);
    model.learn(&paths, None).unwrap();
    println!("\nModel = {:#?}", model);
    println!("\nCodebook = {:#?}", model.codebook().unwrap());

    // Save the model and load it again just for fun
    model.save("vocabs/test.bow").unwrap();
    let loaded = BagOfWords::<OrbDetector, BinaryKMajority>::load("vocabs/test.bow").unwrap();

    // Make sure save & load worked
    assert_eq!(model.codebook(), loaded.codebook());
}
