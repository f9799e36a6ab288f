//! Distance and grouping primitives used by both clustering engines.
//!
//! All parallelism in the crate lives behind [`DistanceService`]. The
//! clustering loops call it synchronously and never spawn work themselves,
//! so a GPU-backed implementation can be swapped in through
//! [`crate::context::ExecutionContext`] without touching the engines.

pub mod cpu;
mod kernels;

pub use cpu::CpuDistance;
pub use kernels::squared_l2;

use crate::cluster::sample::{SampleMaps, SampleSets};
use crate::error::Result;
use crate::types::{AttributeTensor, Codebook};

/// Nearest-codeword assignment, sample-set chaining and medoid selection.
pub trait DistanceService: Send + Sync {
    /// Arg-min squared L2 distance from every row of `batch` (flat,
    /// `centers.dim()` values per row) to the rows of `centers`.
    ///
    /// Ties resolve to the lowest center index, so the output is a pure
    /// function of the inputs.
    fn nearest_indices(&self, batch: &[f32], centers: &Codebook) -> Vec<u32>;

    /// Match every row of sample set `set_index + 1` to its nearest row in
    /// sample set `set_index`, extend the chains recorded in `maps`, and
    /// return the number of set-0 heads whose chain reached the new set.
    fn nearest_neighbor_map(
        &self,
        set_index: usize,
        sets: &SampleSets,
        maps: &mut SampleMaps,
    ) -> usize;

    /// Materialise the `k` largest live chains as groups of raw vectors.
    ///
    /// A chain is live when its head's tail reached the last sample set.
    /// Fails when fewer than `k` chains are live.
    fn collect_groups(
        &self,
        k: usize,
        sets: &SampleSets,
        maps: &SampleMaps,
    ) -> Result<Vec<AttributeTensor>>;

    /// Row of `group` minimising the summed L2 distance to all other rows.
    fn medoid_of(&self, group: &AttributeTensor) -> usize;

    /// Full assignment of `data` against `centers`, `chunk_size` rows at a
    /// time so the working set never exceeds `chunk_size x K` distances.
    fn nearest_indices_chunked(
        &self,
        data: &AttributeTensor,
        centers: &Codebook,
        chunk_size: usize,
    ) -> Vec<u32> {
        let n = data.len();
        let chunk_size = chunk_size.max(1);
        let mut indices = Vec::with_capacity(n);
        let mut start = 0;
        while start < n {
            let end = (start + chunk_size).min(n);
            indices.extend(self.nearest_indices(data.rows_slice(start, end), centers));
            start = end;
        }
        indices
    }
}
