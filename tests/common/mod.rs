//! Seeded synthetic data shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_vq::context::ExecutionContext;
use splat_vq::distance::CpuDistance;
use splat_vq::model::PointModel;
use splat_vq::types::AttributeTensor;

pub fn ctx(chunk_size: usize, seed: u64) -> ExecutionContext {
    ExecutionContext::new(Arc::new(CpuDistance::default()), chunk_size, Some(seed))
}

/// `n x dim` values drawn uniformly from `[-1, 1)`.
pub fn uniform(n: usize, dim: usize, seed: u64) -> AttributeTensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    AttributeTensor::new(dim, data).unwrap()
}

/// Standard normal sample via Box-Muller.
fn normal(rng: &mut StdRng) -> f32 {
    let u1 = 1.0 - rng.gen::<f32>();
    let u2 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Isotropic Gaussian blobs around `centers`, `per_blob` rows each,
/// interleaved so row `i` belongs to blob `i % centers.len()`.
pub fn gaussian_blobs(centers: &[Vec<f32>], per_blob: usize, sigma: f32, seed: u64) -> AttributeTensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let dim = centers[0].len();
    let mut data = Vec::with_capacity(centers.len() * per_blob * dim);
    for _ in 0..per_blob {
        for c in centers {
            for &x in c {
                data.push(x + sigma * normal(&mut rng));
            }
        }
    }
    AttributeTensor::new(dim, data).unwrap()
}

/// 50 blob centers on a 5 x 5 x 2 grid with spacing 10.
pub fn grid_centers_50() -> Vec<Vec<f32>> {
    let mut centers = Vec::with_capacity(50);
    for x in 0..5 {
        for y in 0..5 {
            for z in 0..2 {
                centers.push(vec![x as f32 * 10.0, y as f32 * 10.0, z as f32 * 10.0]);
            }
        }
    }
    centers
}

/// Point model whose colour and scale groups are 3-dimensional.
pub fn synthetic_model(n: usize, seed: u64) -> PointModel {
    PointModel::new(
        uniform(n, 3, seed),
        uniform(n, 1, seed + 1).into_vec(),
        uniform(n, 3, seed + 2),
        uniform(n, 3, seed + 3),
        uniform(n, 4, seed + 4),
    )
    .unwrap()
}
