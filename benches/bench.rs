use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vbow::{BagOfWords, BinaryKMajority, Desc, Histogram, KMeans, Precomputed};

fn binary_sets(n: usize, per_image: usize) -> Vec<Vec<Desc>> {
    (0..n)
        .map(|i| {
            (0..per_image)
                .map(|j| {
                    let mut d = [(i * 37 + j * 11) as u8; 32];
                    d[j % 32] ^= (i as u8).wrapping_mul(13);
                    d
                })
                .collect()
        })
        .collect()
}

fn real_sets(n: usize, per_image: usize) -> Vec<Vec<Vec<f32>>> {
    (0..n)
        .map(|i| {
            (0..per_image)
                .map(|j| (0..32).map(|k| ((i * 7 + j * 3 + k) % 97) as f32).collect())
                .collect()
        })
        .collect()
}

/// Benchmark for BagOfWords::transform_descriptors()
fn transf(c: &mut Criterion) {
    let sets = binary_sets(20, 500);
    let mut model = BagOfWords::new(Precomputed::new(), BinaryKMajority::new(64).with_seed(1))
        .with_max_descriptors_per_image(100)
        .with_seed(1);
    model.learn(&sets, None).unwrap();

    c.bench_function("transform binary", |b| {
        b.iter(|| {
            let h: Histogram<u32> = model.transform_descriptors(black_box(&sets[0])).unwrap();
            h
        })
    });
    c.bench_function("transform binary batch", |b| {
        b.iter(|| {
            let h: Vec<Histogram<u32>> =
                model.transform_descriptor_sets(black_box(&sets)).unwrap();
            h
        })
    });
}

fn learn(c: &mut Criterion) {
    let sets = real_sets(16, 200);
    c.bench_function("learn kmeans", |b| {
        b.iter(|| {
            let mut model = BagOfWords::new(Precomputed::new(), KMeans::new(32).with_seed(2))
                .with_number_of_descriptors(1000)
                .with_seed(2);
            model.learn(black_box(&sets), None).unwrap();
            model.number_of_words()
        })
    });
}

criterion_group!(benches, transf, learn);
criterion_main!(benches);
