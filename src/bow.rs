use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::{BoW, Codebook, Histogram};

/// Element type of a histogram.
///
/// Integer kinds hold plain counts, real kinds hold the same counts in floating point.
/// Every kind has an atomic counterpart so descriptors of one image can be accumulated
/// from several threads at once.
pub trait Count: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    type Atomic: Send + Sync;

    const ZERO: Self;

    fn increment(&mut self);

    fn atomic_zero() -> Self::Atomic;

    fn atomic_increment(slot: &Self::Atomic);

    fn from_atomic(slot: Self::Atomic) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! integer_count {
    ($($t:ty => $atomic:ty),*) => {$(
        impl Count for $t {
            type Atomic = $atomic;

            const ZERO: Self = 0;

            #[inline]
            fn increment(&mut self) {
                *self += 1;
            }

            fn atomic_zero() -> Self::Atomic {
                <$atomic>::new(0)
            }

            #[inline]
            fn atomic_increment(slot: &Self::Atomic) {
                slot.fetch_add(1, Ordering::Relaxed);
            }

            fn from_atomic(slot: Self::Atomic) -> Self {
                slot.into_inner()
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

integer_count!(u32 => AtomicU32, u64 => AtomicU64, usize => AtomicUsize, i32 => AtomicI32);

// Floats are stored by bit pattern and updated with a compare-and-swap loop.
macro_rules! real_count {
    ($($t:ty => $atomic:ty),*) => {$(
        impl Count for $t {
            type Atomic = $atomic;

            const ZERO: Self = 0.;

            #[inline]
            fn increment(&mut self) {
                *self += 1.;
            }

            fn atomic_zero() -> Self::Atomic {
                <$atomic>::new((0. as $t).to_bits())
            }

            #[inline]
            fn atomic_increment(slot: &Self::Atomic) {
                let _ = slot.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                    Some((<$t>::from_bits(bits) + 1.).to_bits())
                });
            }

            fn from_atomic(slot: Self::Atomic) -> Self {
                <$t>::from_bits(slot.into_inner())
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

real_count!(f32 => AtomicU32, f64 => AtomicU64);

/// Count the words of `descriptors` sequentially.
pub fn accumulate<T, D, C>(codebook: &C, descriptors: &[D]) -> Histogram<T>
where
    T: Count,
    C: Codebook<D> + ?Sized,
{
    let mut histogram = vec![T::ZERO; codebook.num_words()];
    for d in descriptors {
        histogram[codebook.decide(d)].increment();
    }
    histogram
}

/// Count the words of `descriptors` from the current rayon pool.
///
/// Descriptors of the same image may land on the same word concurrently, so every
/// slot is an atomic.
pub fn accumulate_par<T, D, C>(codebook: &C, descriptors: &[D]) -> Histogram<T>
where
    T: Count,
    D: Sync,
    C: Codebook<D> + ?Sized,
{
    let slots: Vec<T::Atomic> = (0..codebook.num_words()).map(|_| T::atomic_zero()).collect();
    descriptors
        .par_iter()
        .for_each(|d| T::atomic_increment(&slots[codebook.decide(d)]));
    slots.into_iter().map(T::from_atomic).collect()
}

/// L1-normalise a count histogram into a [`BoW`] vector.
/// An empty histogram (no descriptors) stays all zero.
pub fn normalized<T: Count>(histogram: &[T]) -> BoW {
    let sum: f64 = histogram.iter().map(|&c| c.to_f64()).sum();
    if sum > 0. {
        let inv_sum = 1. / sum;
        histogram
            .iter()
            .map(|&c| (c.to_f64() * inv_sum) as f32)
            .collect()
    } else {
        vec![0.; histogram.len()]
    }
}

/// Provides method(s) for computing the similarity score between bow vectors.
pub trait BoWTrait {
    /// L1 score between two normalised bow. (Used in Galvez (Eq 2)).
    /// 1 for identical vectors, 0 for disjoint ones.
    fn l1(&self, other: &Self) -> f32;

    /// L2 score between two normalised bow, in [0, 1].
    fn l2(&self, other: &Self) -> f32;
}

impl BoWTrait for BoW {
    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }

    fn l2(&self, other: &Self) -> f32 {
        let dist = self
            .iter()
            .zip(other)
            .fold(0f32, |a, (b, c)| a + (b - c) * (b - c))
            .sqrt();
        (1. - 0.5 * dist).max(0.)
    }
}
