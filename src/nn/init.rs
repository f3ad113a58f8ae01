//! Weight initialization functions.
//!
//! The video network is normally populated from a pretrained weights
//! file, but randomly initialized networks are used by the synthetic
//! dream path and by tests. Kaiming initialization (He et al., 2015)
//! matches the ReLU networks built here.

use crate::autograd::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Kaiming uniform initialization (He et al., 2015).
///
/// Samples from U(-bound, bound) where bound = sqrt(6 / `fan_in`).
///
/// # Arguments
///
/// * `shape` - Shape of the tensor
/// * `fan_in` - Number of input connections per output unit
/// * `seed` - Optional random seed for reproducibility
#[must_use]
pub fn kaiming_uniform(shape: &[usize], fan_in: usize, seed: Option<u64>) -> Tensor {
    let bound = (6.0 / fan_in as f32).sqrt();
    uniform(shape, -bound, bound, seed)
}

/// Kaiming normal initialization (He et al., 2015).
///
/// Samples from N(0, std) where std = sqrt(2 / `fan_in`).
#[must_use]
pub fn kaiming_normal(shape: &[usize], fan_in: usize, seed: Option<u64>) -> Tensor {
    let std = (2.0 / fan_in as f32).sqrt();
    normal(shape, 0.0, std, seed)
}

/// Uniform distribution initialization: U(low, high).
pub(crate) fn uniform(shape: &[usize], low: f32, high: f32, seed: Option<u64>) -> Tensor {
    let numel: usize = shape.iter().product();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(low..high)).collect();
    Tensor::from_vec(data, shape)
}

/// Normal distribution initialization: N(mean, std).
///
/// Box-Muller sampling, matching the reproducibility guarantees of
/// [`uniform`].
pub(crate) fn normal(shape: &[usize], mean: f32, std: f32, seed: Option<u64>) -> Tensor {
    let numel: usize = shape.iter().product();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let data: Vec<f32> = (0..numel)
        .map(|_| {
            let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
            let u2: f32 = rng.gen_range(0.0..1.0);
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
            mean + std * z
        })
        .collect();
    Tensor::from_vec(data, shape)
}

/// Tensor of zeros (bias and beta initialization).
#[must_use]
pub fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape)
}

/// Tensor filled with a constant (gamma and running-variance init).
#[must_use]
pub fn constant(shape: &[usize], value: f32) -> Tensor {
    let numel: usize = shape.iter().product();
    Tensor::from_vec(vec![value; numel], shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kaiming_uniform_bounds() {
        let t = kaiming_uniform(&[16, 3, 3, 3, 3], 3 * 27, Some(0));
        let bound = (6.0f32 / (3.0 * 27.0)).sqrt();
        assert!(t.data().iter().all(|&v| v > -bound && v < bound));
        assert_eq!(t.numel(), 16 * 3 * 27);
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let a = kaiming_uniform(&[8, 8], 8, Some(42));
        let b = kaiming_uniform(&[8, 8], 8, Some(42));
        assert_eq!(a.data(), b.data());

        let c = kaiming_uniform(&[8, 8], 8, Some(43));
        assert_ne!(a.data(), c.data());
    }

    #[test]
    fn test_kaiming_normal_statistics() {
        let t = kaiming_normal(&[4096], 32, Some(7));
        let expected_std = (2.0f32 / 32.0).sqrt();
        let actual = t.std();
        assert!(
            (actual - expected_std).abs() < expected_std * 0.15,
            "std {actual} too far from {expected_std}"
        );
    }

    #[test]
    fn test_constant_and_zeros() {
        assert!(constant(&[4], 1.0).data().iter().all(|&v| v == 1.0));
        assert!(zeros(&[4]).data().iter().all(|&v| v == 0.0));
    }
}
