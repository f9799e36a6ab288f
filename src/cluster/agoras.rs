//! AGORAS: sample-based approximate clustering that discovers `K` groups
//! without iterating k-means.
//!
//! Rows of one random sample set are matched to their nearest neighbor in
//! the previous set. Rows from the same latent cluster keep matching each
//! other, so chains that start in set 0 survive through all sets only for
//! real clusters. The number of surviving chains estimates how many
//! distinct clusters the sample size `S` captures:
//!
//! - too few chains at any pair: `S` is too small, grow it and retry;
//! - more than `K + margin` chains after the last pair: shrink `S` by the
//!   shrink factor and retry;
//! - otherwise the `K` largest chains become clusters and their medoids the
//!   codebook.
//!
//! The first `S` is the coupon-collector estimate `K ln K + gamma K`.
//! Growth is capped at the smaller of `max_sample_size` and the same
//! estimate for all `N` rows: a sample that large already covers every
//! distinct row, so data with fewer than `K` distinct rows fails with
//! `NonConverged` instead of doubling `S` until memory runs out.

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use super::sample::SampleSets;
use crate::config::AgorasConfig;
use crate::context::ExecutionContext;
use crate::error::{Result, VqError};
use crate::types::{AttributeTensor, QuantizedAttribute};

/// Euler–Mascheroni constant.
pub const EULER_MASCHERONI: f64 = 0.577_215_665;

#[derive(Debug, Clone)]
pub struct AgorasParams {
    pub num_clusters: usize,
    pub num_sample_sets: usize,
    pub max_attempts: usize,
    pub shrink_factor: f64,
    pub margin_divisor: usize,
    pub max_sample_size: usize,
}

impl AgorasParams {
    pub fn new(num_clusters: usize, num_sample_sets: usize, config: &AgorasConfig) -> Self {
        Self {
            num_clusters,
            num_sample_sets,
            max_attempts: config.max_attempts,
            shrink_factor: config.shrink_factor,
            margin_divisor: config.margin_divisor,
            max_sample_size: config.max_sample_size,
        }
    }

    /// Accepted surplus of chains over `K`: `ceil(K / margin_divisor)`.
    pub fn margin(&self) -> usize {
        self.num_clusters.div_ceil(self.margin_divisor.max(1))
    }
}

/// Outcome of a converged run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgorasReport {
    pub attempts: usize,
    pub sample_size: usize,
    pub mapping_length: usize,
    pub diff: i64,
    pub margin: usize,
}

/// What one pass over all sample-set pairs decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Fewer than `K` chains survived pair `pair`.
    TooFew { pair: usize, mapping_length: usize },
    /// All pairs matched; `mapping_length` chains reached the last set.
    Complete { mapping_length: usize },
}

pub struct Agoras<'a> {
    data: &'a AttributeTensor,
    ctx: &'a ExecutionContext,
    params: AgorasParams,
    rng: StdRng,
}

impl<'a> Agoras<'a> {
    pub fn new(
        data: &'a AttributeTensor,
        params: AgorasParams,
        ctx: &'a ExecutionContext,
        rng: StdRng,
    ) -> Result<Self> {
        if params.num_clusters == 0 {
            return Err(VqError::Validation("AGORAS needs at least one cluster".into()));
        }
        if params.num_clusters > data.len() {
            return Err(VqError::InsufficientData {
                requested: params.num_clusters,
                available: data.len(),
            });
        }
        if params.num_sample_sets < 2 {
            return Err(VqError::Validation(format!(
                "AGORAS needs at least 2 sample sets, got {}",
                params.num_sample_sets
            )));
        }
        Ok(Self {
            data,
            ctx,
            params,
            rng,
        })
    }

    /// Coupon-collector estimate of the draws needed to see `k` classes.
    pub fn initial_sample_size(k: usize) -> usize {
        let k = k as f64;
        ((k * k.ln() + EULER_MASCHERONI * k).ceil() as usize).max(1)
    }

    /// Largest sample size a run over `n` rows may grow to.
    pub fn sample_cap(&self, n: usize) -> usize {
        self.params
            .max_sample_size
            .min(Self::initial_sample_size(n))
            .max(1)
    }

    /// Search for a sample size whose chain count lands in
    /// `[K, K + margin]`, then return the medoid codebook and a full
    /// assignment of the data against it.
    pub fn run(mut self) -> Result<(QuantizedAttribute, AgorasReport)> {
        let k = self.params.num_clusters;
        let m = self.params.num_sample_sets;
        let margin = self.params.margin();
        let cap = self.sample_cap(self.data.len());
        let mut sample_size = Self::initial_sample_size(k).min(cap);
        let mut last_diff: i64 = 0;

        info!(
            n = self.data.len(),
            k = k,
            sample_sets = m,
            sample_size = sample_size,
            sample_cap = cap,
            margin = margin,
            "starting AGORAS"
        );

        for attempt in 1..=self.params.max_attempts {
            let (sets, mut maps) = SampleSets::build(self.data, sample_size, m, &mut self.rng)?;

            let mut pass = Pass::Complete { mapping_length: 0 };
            for pair in 0..m - 1 {
                let mapping_length =
                    self.ctx
                        .distance()
                        .nearest_neighbor_map(pair, &sets, &mut maps);
                if mapping_length < k {
                    pass = Pass::TooFew {
                        pair,
                        mapping_length,
                    };
                    break;
                }
                pass = Pass::Complete { mapping_length };
            }

            match pass {
                Pass::TooFew {
                    pair,
                    mapping_length,
                } => {
                    last_diff = mapping_length as i64 - k as i64;
                    if sample_size >= cap {
                        warn!(
                            attempt = attempt,
                            sample_size = sample_size,
                            sample_cap = cap,
                            last_diff = last_diff,
                            "AGORAS sample cap reached"
                        );
                        return Err(VqError::NonConverged {
                            attempts: attempt,
                            sample_size,
                            last_diff,
                        });
                    }
                    let grow = sample_size.saturating_mul(m - pair).div_ceil(m);
                    debug!(
                        attempt = attempt,
                        pair = pair,
                        mapping_length = mapping_length,
                        sample_size = sample_size,
                        grow = grow,
                        "too few chains, growing sample"
                    );
                    sample_size = sample_size.saturating_add(grow).min(cap);
                }
                Pass::Complete { mapping_length } => {
                    let diff = (mapping_length - k) as i64;
                    last_diff = diff;
                    if diff as usize <= margin {
                        info!(
                            attempt = attempt,
                            sample_size = sample_size,
                            mapping_length = mapping_length,
                            diff = diff,
                            "AGORAS converged"
                        );
                        let report = AgorasReport {
                            attempts: attempt,
                            sample_size,
                            mapping_length,
                            diff,
                            margin,
                        };
                        let quantized = self.finish(&sets, &maps)?;
                        return Ok((quantized, report));
                    }
                    let shrunk =
                        ((sample_size as f64 * self.params.shrink_factor).ceil() as usize).max(1);
                    debug!(
                        attempt = attempt,
                        diff = diff,
                        sample_size = sample_size,
                        next = shrunk,
                        "too many chains, shrinking sample"
                    );
                    // ceil() can pin tiny samples in place; always make progress.
                    sample_size = if shrunk < sample_size {
                        shrunk
                    } else {
                        sample_size.saturating_sub(1).max(1)
                    };
                }
            }
        }

        warn!(
            attempts = self.params.max_attempts,
            sample_size = sample_size,
            last_diff = last_diff,
            "AGORAS retry limit reached"
        );
        Err(VqError::NonConverged {
            attempts: self.params.max_attempts,
            sample_size,
            last_diff,
        })
    }

    fn finish(
        &self,
        sets: &SampleSets,
        maps: &super::sample::SampleMaps,
    ) -> Result<QuantizedAttribute> {
        let distance = self.ctx.distance();
        let groups = distance.collect_groups(self.params.num_clusters, sets, maps)?;

        let mut medoids = Vec::with_capacity(groups.len() * self.data.dim());
        for group in &groups {
            let m = distance.medoid_of(group);
            medoids.extend_from_slice(group.row(m));
        }
        let codebook = AttributeTensor::new(self.data.dim(), medoids)?;

        let indices = distance.nearest_indices_chunked(self.data, &codebook, self.ctx.chunk_size());
        QuantizedAttribute::new(codebook, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::CpuDistance;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(CpuDistance::default()), 1_000, Some(3))
    }

    fn params(k: usize, sets: usize) -> AgorasParams {
        AgorasParams {
            num_clusters: k,
            num_sample_sets: sets,
            max_attempts: 200,
            shrink_factor: 0.95,
            margin_divisor: 40,
            max_sample_size: 1 << 17,
        }
    }

    #[test]
    fn test_initial_sample_size() {
        assert_eq!(Agoras::initial_sample_size(1), 1);
        // 50 ln 50 + 0.5772 * 50 = 195.60 + 28.86 = 224.46
        assert_eq!(Agoras::initial_sample_size(50), 225);
    }

    #[test]
    fn test_margin() {
        assert_eq!(params(50, 5).margin(), 2);
        assert_eq!(params(40, 5).margin(), 1);
        assert_eq!(params(4096, 5).margin(), 103);
    }

    #[test]
    fn test_rejects_too_many_clusters() {
        let data = AttributeTensor::from_rows(&[[0.0f32], [1.0]]).unwrap();
        let ctx = ctx();
        let err = Agoras::new(&data, params(3, 5), &ctx, StdRng::seed_from_u64(0))
            .err()
            .unwrap();
        assert!(matches!(err, VqError::InsufficientData { .. }));
    }

    #[test]
    fn test_rejects_single_sample_set() {
        let data = AttributeTensor::from_rows(&[[0.0f32], [1.0]]).unwrap();
        let ctx = ctx();
        assert!(Agoras::new(&data, params(1, 1), &ctx, StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_single_cluster() {
        let rows: Vec<[f32; 2]> = (0..100).map(|i| [i as f32 * 0.01, 1.0]).collect();
        let data = AttributeTensor::from_rows(&rows).unwrap();
        let ctx = ctx();
        let agoras = Agoras::new(&data, params(1, 4), &ctx, StdRng::seed_from_u64(1)).unwrap();
        let (q, report) = agoras.run().unwrap();
        assert_eq!(q.k(), 1);
        assert_eq!(report.diff, 0);
        assert!(q.indices.iter().all(|&i| i == 0));
        // The medoid is a real data row.
        assert!(data.rows().any(|r| r == q.codebook.row(0)));
    }

    #[test]
    fn test_retry_limit_surfaces_non_converged() {
        // Four identical points can never yield two distinct chains.
        let data = AttributeTensor::from_rows(&[[1.0f32], [1.0], [1.0], [1.0]]).unwrap();
        let ctx = ctx();
        let mut p = params(2, 3);
        p.max_attempts = 3;
        let err = Agoras::new(&data, p, &ctx, StdRng::seed_from_u64(2))
            .unwrap()
            .run()
            .unwrap_err();
        match err {
            VqError::NonConverged { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected NonConverged, got {other:?}"),
        }
    }

    #[test]
    fn test_sample_cap() {
        let data = AttributeTensor::from_rows(&[[0.0f32]; 64]).unwrap();
        let ctx = ctx();
        let agoras = Agoras::new(&data, params(2, 2), &ctx, StdRng::seed_from_u64(0)).unwrap();
        // 64 ln 64 + 0.5772 * 64 = 266.17 + 36.94 = 303.11
        assert_eq!(agoras.sample_cap(64), 304);

        let mut p = params(2, 2);
        p.max_sample_size = 100;
        let agoras = Agoras::new(&data, p, &ctx, StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(agoras.sample_cap(64), 100);
    }

    #[test]
    fn test_duplicate_rows_stop_at_sample_cap() {
        // One distinct row can never form two chains; growth must stop at
        // the cap long before the default retry limit.
        let data = AttributeTensor::from_rows(&[[1.0f32]; 64]).unwrap();
        let ctx = ctx();
        let p = AgorasParams::new(2, 2, &AgorasConfig::default());
        let err = Agoras::new(&data, p, &ctx, StdRng::seed_from_u64(7))
            .unwrap()
            .run()
            .unwrap_err();
        match err {
            VqError::NonConverged {
                attempts,
                sample_size,
                last_diff,
            } => {
                assert_eq!(sample_size, 304);
                assert!(attempts < 20, "took {attempts} attempts");
                assert_eq!(last_diff, -1);
            }
            other => panic!("expected NonConverged, got {other:?}"),
        }
    }

    #[test]
    fn test_two_point_masses() {
        // Every row sits on one of two points, so each sample set collapses
        // to exactly one chain per point once both points are present.
        let mut rows = Vec::new();
        for _ in 0..200 {
            rows.push([0.0f32, 0.0]);
            rows.push([100.0, 100.0]);
        }
        let data = AttributeTensor::from_rows(&rows).unwrap();
        let ctx = ctx();
        let agoras = Agoras::new(&data, params(2, 6), &ctx, StdRng::seed_from_u64(4)).unwrap();
        let (q, report) = agoras.run().unwrap();
        assert_eq!(q.k(), 2);
        assert_eq!(report.diff, 0);
        assert_eq!(report.mapping_length, 2);
        // Rows alternate between the two points and must land on different medoids.
        assert_ne!(q.indices[0], q.indices[1]);
        for pair in q.indices.chunks(2) {
            assert_eq!(pair[0], q.indices[0]);
            assert_eq!(pair[1], q.indices[1]);
        }
    }
}
