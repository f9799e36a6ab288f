//! Multi-threaded CPU implementation of [`DistanceService`].

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::{squared_l2, DistanceService};
use crate::cluster::sample::{SampleMaps, SampleSets};
use crate::error::{Result, VqError};
use crate::types::{AttributeTensor, Codebook};

/// Rayon-backed distance service. With `threads == 0` work runs on the
/// global pool; otherwise a dedicated pool of that size is built.
#[derive(Default)]
pub struct CpuDistance {
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for CpuDistance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuDistance")
            .field(
                "threads",
                &self
                    .pool
                    .as_ref()
                    .map_or_else(rayon::current_num_threads, |p| p.current_num_threads()),
            )
            .finish()
    }
}

impl CpuDistance {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = if threads == 0 {
            None
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("splatvq-distance-{i}"))
                .build()
                .map_err(|e| VqError::Config(format!("failed to build thread pool: {e}")))?;
            Some(pool)
        };
        Ok(Self { pool })
    }

    fn install<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

/// Index of the row of `candidates` (flat, `dim` per row) closest to `query`.
#[inline]
fn argmin_row(query: &[f32], candidates: &[f32], dim: usize) -> usize {
    let mut best_dist = f32::MAX;
    let mut best_idx = 0usize;
    for (c, candidate) in candidates.chunks_exact(dim).enumerate() {
        let d = squared_l2(query, candidate);
        if d < best_dist {
            best_dist = d;
            best_idx = c;
        }
    }
    best_idx
}

impl DistanceService for CpuDistance {
    fn nearest_indices(&self, batch: &[f32], centers: &Codebook) -> Vec<u32> {
        let dim = centers.dim();
        debug_assert_eq!(batch.len() % dim, 0);
        let candidates = centers.as_slice();
        self.install(|| {
            batch
                .par_chunks_exact(dim)
                .map(|row| argmin_row(row, candidates, dim) as u32)
                .collect()
        })
    }

    fn nearest_neighbor_map(
        &self,
        set_index: usize,
        sets: &SampleSets,
        maps: &mut SampleMaps,
    ) -> usize {
        let dim = sets.dim();
        let set_a = sets.set(set_index);
        let set_b = sets.set(set_index + 1);

        let matches: Vec<usize> = self.install(|| {
            set_b
                .par_chunks_exact(dim)
                .map(|row| argmin_row(row, set_a, dim))
                .collect()
        });

        let next = set_index + 1;
        for (row, &matched) in matches.iter().enumerate() {
            let head = maps.map(set_index)[matched].head;
            maps.extend_chain(next, row, matched, head);
        }

        let mapping_length = maps.live_heads(next).count();
        debug!(
            set = next,
            mapping_length = mapping_length,
            "matched sample set"
        );
        mapping_length
    }

    fn collect_groups(
        &self,
        k: usize,
        sets: &SampleSets,
        maps: &SampleMaps,
    ) -> Result<Vec<AttributeTensor>> {
        let last = sets.num_sets() - 1;
        let dim = sets.dim();

        // Slot per set-0 row; only live heads get a buffer.
        let mut members: Vec<Option<Vec<f32>>> = vec![None; sets.sample_size()];
        for head in maps.live_heads(last) {
            members[head] = Some(Vec::new());
        }

        for set in 0..sets.num_sets() {
            for (row, slot) in maps.map(set).iter().enumerate() {
                if slot.head < 0 {
                    continue;
                }
                if let Some(group) = members[slot.head as usize].as_mut() {
                    group.extend_from_slice(sets.row(set, row));
                }
            }
        }

        let mut groups: Vec<(usize, Vec<f32>)> = members
            .into_iter()
            .enumerate()
            .filter_map(|(head, g)| g.map(|g| (head, g)))
            .collect();

        if groups.len() < k {
            return Err(VqError::Validation(format!(
                "only {} live chains, cannot form {k} groups",
                groups.len()
            )));
        }

        // Largest chains first; head order breaks ties.
        groups.sort_by(|(ha, a), (hb, b)| b.len().cmp(&a.len()).then(ha.cmp(hb)));
        groups.truncate(k);

        groups
            .into_iter()
            .map(|(_, data)| AttributeTensor::new(dim, data))
            .collect()
    }

    fn medoid_of(&self, group: &AttributeTensor) -> usize {
        let rows = group.as_slice();
        let dim = group.dim();
        let totals: Vec<f64> = self.install(|| {
            rows.par_chunks_exact(dim)
                .map(|a| {
                    rows.chunks_exact(dim)
                        .map(|b| squared_l2(a, b).sqrt() as f64)
                        .sum::<f64>()
                })
                .collect()
        });

        let mut best = 0usize;
        for (i, &total) in totals.iter().enumerate() {
            if total < totals[best] {
                best = i;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::sample::MapSlot;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tensor(n: usize, dim: usize, seed: u64) -> AttributeTensor {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        AttributeTensor::new(dim, data).unwrap()
    }

    #[test]
    fn test_nearest_indices_simple() {
        let centers = AttributeTensor::from_rows(&[[0.0f32, 0.0], [10.0, 10.0]]).unwrap();
        let batch = [0.5, 0.5, 9.0, 9.5, -1.0, 0.0];
        let svc = CpuDistance::default();
        assert_eq!(svc.nearest_indices(&batch, &centers), vec![0, 1, 0]);
    }

    #[test]
    fn test_nearest_indices_tie_prefers_lowest() {
        let centers = AttributeTensor::from_rows(&[[1.0f32], [-1.0]]).unwrap();
        let svc = CpuDistance::default();
        assert_eq!(svc.nearest_indices(&[0.0], &centers), vec![0]);
    }

    #[test]
    fn test_dedicated_pool_matches_global() {
        let data = random_tensor(500, 6, 11);
        let centers = random_tensor(20, 6, 12);
        let global = CpuDistance::default();
        let pooled = CpuDistance::new(2).unwrap();
        assert_eq!(
            global.nearest_indices(data.as_slice(), &centers),
            pooled.nearest_indices(data.as_slice(), &centers)
        );
    }

    #[test]
    fn test_chunked_matches_unchunked() {
        let data = random_tensor(1_037, 4, 21);
        let centers = random_tensor(17, 4, 22);
        let svc = CpuDistance::default();
        let whole = svc.nearest_indices(data.as_slice(), &centers);
        for chunk in [1, 100, 1_000, 5_000] {
            assert_eq!(svc.nearest_indices_chunked(&data, &centers, chunk), whole);
        }
    }

    #[test]
    fn test_medoid_of_line() {
        // On a line the medoid is the median point.
        let group =
            AttributeTensor::from_rows(&[[0.0f32], [1.0], [2.0], [3.0], [100.0]]).unwrap();
        let svc = CpuDistance::default();
        assert_eq!(svc.medoid_of(&group), 2);
    }

    #[test]
    fn test_medoid_of_single_row() {
        let group = AttributeTensor::from_rows(&[[4.0f32, 2.0]]).unwrap();
        assert_eq!(CpuDistance::default().medoid_of(&group), 0);
    }

    #[test]
    fn test_nearest_neighbor_map_chains_heads() {
        // Two far-apart blobs; every set holds both, so both chains survive.
        let data =
            AttributeTensor::from_rows(&[[0.0f32], [0.1], [50.0], [50.1]]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let (sets, mut maps) = SampleSets::build(&data, 64, 3, &mut rng).unwrap();
        let svc = CpuDistance::default();

        let first = svc.nearest_neighbor_map(0, &sets, &mut maps);
        assert!(first >= 2);
        for slot in maps.map(1) {
            assert!(slot.head >= 0);
            assert!(slot.link >= 0);
        }
        // A row's head sits in the same blob as the row itself.
        for (row, slot) in maps.map(1).iter().enumerate() {
            let own = sets.row(1, row)[0];
            let head = sets.row(0, slot.head as usize)[0];
            assert!((own - head).abs() < 1.0);
        }

        let second = svc.nearest_neighbor_map(1, &sets, &mut maps);
        assert!(second >= 2);
        assert!(second <= first);
        assert!(maps.map(2).iter().all(|s| *s != MapSlot::UNVISITED));
    }

    #[test]
    fn test_collect_groups_takes_largest_live_chains() {
        let data =
            AttributeTensor::from_rows(&[[0.0f32], [0.1], [50.0], [50.1]]).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let (sets, mut maps) = SampleSets::build(&data, 32, 4, &mut rng).unwrap();
        let svc = CpuDistance::default();
        for i in 0..3 {
            svc.nearest_neighbor_map(i, &sets, &mut maps);
        }
        let live = maps.live_heads(3).count();
        assert!(live >= 2);

        let groups = svc.collect_groups(2, &sets, &maps).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].len() >= groups[1].len());
        // Every group stays inside one blob.
        for group in &groups {
            let first = group.row(0)[0];
            assert!(group.rows().all(|r| (r[0] - first).abs() < 1.0));
        }

        assert!(svc.collect_groups(live + 1, &sets, &maps).is_err());
    }
}
