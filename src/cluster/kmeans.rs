//! Mini-batch k-means for codebook training on millions of rows.
//!
//! Each iteration recomputes every center from the full assignment, then
//! reassigns only a random mini-batch of rows. Rows outside the batch keep
//! their previous center. There is no convergence test: the caller picks
//! the iteration count and gets the current state back.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::error::{Result, VqError};
use crate::types::{AssignmentIndex, AttributeTensor, Codebook, QuantizedAttribute};

/// How initial centers are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// `K` distinct rows drawn uniformly without replacement.
    #[default]
    Random,
    /// k-means++ seeding. Not supported: the incremental distance pass is
    /// too slow at `K` in the thousands.
    PlusPlus,
}

pub struct KMeans<'a> {
    data: &'a AttributeTensor,
    ctx: &'a ExecutionContext,
    rng: StdRng,
    centers: Codebook,
    indices: AssignmentIndex,
}

impl<'a> KMeans<'a> {
    /// Choose `k` initial centers and run one full assignment.
    ///
    /// Fails with [`VqError::InsufficientData`] when `k` exceeds the number
    /// of rows, since random init never samples with replacement.
    pub fn init(
        data: &'a AttributeTensor,
        k: usize,
        policy: InitPolicy,
        ctx: &'a ExecutionContext,
        mut rng: StdRng,
    ) -> Result<Self> {
        let n = data.len();
        if k == 0 {
            return Err(VqError::Validation("k must be > 0".into()));
        }
        if n == 0 || k > n {
            return Err(VqError::InsufficientData {
                requested: k,
                available: n,
            });
        }

        let centers = match policy {
            InitPolicy::Random => {
                let chosen = sample(&mut rng, n, k).into_vec();
                data.gather(&chosen)
            }
            InitPolicy::PlusPlus => return Err(VqError::UnsupportedInit(policy)),
        };

        info!(n = n, k = k, dim = data.dim(), "initialized k-means centers");

        let mut kmeans = Self {
            data,
            ctx,
            rng,
            centers,
            indices: Vec::new(),
        };
        kmeans.assign_all();
        Ok(kmeans)
    }

    pub fn centers(&self) -> &Codebook {
        &self.centers
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn k(&self) -> usize {
        self.centers.len()
    }

    /// Assign every row to its nearest center, chunk by chunk.
    pub fn assign_all(&mut self) {
        self.indices = self.ctx.distance().nearest_indices_chunked(
            self.data,
            &self.centers,
            self.ctx.chunk_size(),
        );
    }

    /// Reassign a random batch of `batch_size` distinct rows. Rows outside
    /// the batch are left untouched.
    pub fn assign_batched(&mut self, batch_size: usize) {
        let n = self.data.len();
        let batch_size = batch_size.min(n);
        let chosen = sample(&mut self.rng, n, batch_size).into_vec();

        let mut batch = Vec::with_capacity(batch_size * self.data.dim());
        for &i in &chosen {
            batch.extend_from_slice(self.data.row(i));
        }

        let nearest = self.ctx.distance().nearest_indices(&batch, &self.centers);
        for (&row, &center) in chosen.iter().zip(nearest.iter()) {
            self.indices[row] = center;
        }
    }

    /// Move every center to the mean of the rows currently assigned to it.
    ///
    /// Centers with no rows are re-seeded from a uniformly random row.
    pub fn mean_update(&mut self) {
        let k = self.centers.len();
        let dim = self.data.dim();

        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];
        for (row, &c) in self.data.rows().zip(self.indices.iter()) {
            let c = c as usize;
            counts[c] += 1;
            let acc = &mut sums[c * dim..(c + 1) * dim];
            for (s, &v) in acc.iter_mut().zip(row) {
                *s += v as f64;
            }
        }

        let mut empty = 0usize;
        for c in 0..k {
            if counts[c] == 0 {
                empty += 1;
                let pick = self.rng.gen_range(0..self.data.len());
                self.centers.row_mut(c).copy_from_slice(self.data.row(pick));
                continue;
            }
            let inv = 1.0 / counts[c] as f64;
            let acc = &sums[c * dim..(c + 1) * dim];
            for (dst, &s) in self.centers.row_mut(c).iter_mut().zip(acc) {
                *dst = (s * inv) as f32;
            }
        }

        if empty > 0 {
            debug!(empty = empty, k = k, "re-seeded empty clusters");
        }
    }

    /// One training step: mean update, then mini-batch reassignment.
    pub fn step(&mut self, batch_size: usize) {
        self.mean_update();
        self.assign_batched(batch_size);
    }

    /// Run `iterations` steps, logging every `progress_interval`.
    pub fn run(
        mut self,
        iterations: usize,
        batch_size: usize,
        progress_interval: usize,
    ) -> Result<QuantizedAttribute> {
        let progress_interval = progress_interval.max(1);
        for iter in 0..iterations {
            self.step(batch_size);
            if iter % progress_interval == 0 {
                info!(
                    iteration = iter,
                    total = iterations,
                    k = self.k(),
                    "k-means progress"
                );
            }
        }
        self.into_quantized()
    }

    pub fn into_quantized(self) -> Result<QuantizedAttribute> {
        QuantizedAttribute::new(self.centers, self.indices)
    }
}
