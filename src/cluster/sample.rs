//! Sample sets and chain maps for AGORAS.
//!
//! `M` sample sets of `S` rows each are drawn with replacement from the
//! attribute tensor. Every set has a parallel map of [`MapSlot`]s:
//!
//! ```text
//! set 0:      MapSlot { link: tail set reached (NO_SUCCESSOR initially), head: own row }
//! set 1..M-1: MapSlot { link: matched row in previous set, head: set-0 row }  (UNVISITED initially)
//! ```
//!
//! Set 0 is the permanent head record of every chain; matching set `i + 1`
//! against set `i` copies heads forward and bumps the head's tail.

use rand::Rng;

use crate::error::{Result, VqError};
use crate::types::AttributeTensor;

/// Set-0 tail marker for a chain nothing has extended yet.
pub const NO_SUCCESSOR: i32 = -1;
/// Marker for slots of sets 1.. that have not been matched.
pub const UNVISITED: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSlot {
    pub link: i32,
    pub head: i32,
}

impl MapSlot {
    pub const UNVISITED: MapSlot = MapSlot {
        link: UNVISITED,
        head: UNVISITED,
    };
}

/// `M` random sample sets, stored as one flat `M x S x D` buffer.
#[derive(Debug, Clone)]
pub struct SampleSets {
    dim: usize,
    sample_size: usize,
    num_sets: usize,
    data: Vec<f32>,
}

/// Chain bookkeeping parallel to [`SampleSets`].
#[derive(Debug, Clone)]
pub struct SampleMaps {
    maps: Vec<Vec<MapSlot>>,
}

impl SampleSets {
    /// Draw `sample_size * num_sets` rows with replacement and split them
    /// into `num_sets` sets, returning the sets and their initial maps.
    pub fn build<R: Rng + ?Sized>(
        data: &AttributeTensor,
        sample_size: usize,
        num_sets: usize,
        rng: &mut R,
    ) -> Result<(SampleSets, SampleMaps)> {
        if data.is_empty() {
            return Err(VqError::InsufficientData {
                requested: sample_size,
                available: 0,
            });
        }
        if sample_size == 0 || num_sets < 2 {
            return Err(VqError::Validation(format!(
                "sample sets need a positive size and at least 2 sets (size {sample_size}, sets {num_sets})"
            )));
        }
        if sample_size > i32::MAX as usize {
            return Err(VqError::Validation(format!(
                "sample size {sample_size} exceeds the map slot range"
            )));
        }

        let n = data.len();
        let dim = data.dim();
        let (total, values) = sample_size
            .checked_mul(num_sets)
            .and_then(|total| Some((total, total.checked_mul(dim)?)))
            .ok_or_else(|| {
                VqError::Validation(format!(
                    "{num_sets} sample sets of {sample_size} rows overflow the buffer size"
                ))
            })?;
        let mut buf = Vec::with_capacity(values);
        for _ in 0..total {
            buf.extend_from_slice(data.row(rng.gen_range(0..n)));
        }

        let mut maps = Vec::with_capacity(num_sets);
        maps.push(
            (0..sample_size)
                .map(|row| MapSlot {
                    link: NO_SUCCESSOR,
                    head: row as i32,
                })
                .collect(),
        );
        for _ in 1..num_sets {
            maps.push(vec![MapSlot::UNVISITED; sample_size]);
        }

        Ok((
            SampleSets {
                dim,
                sample_size,
                num_sets,
                data: buf,
            },
            SampleMaps { maps },
        ))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Flat `S x D` rows of set `i`.
    pub fn set(&self, i: usize) -> &[f32] {
        let stride = self.sample_size * self.dim;
        &self.data[i * stride..(i + 1) * stride]
    }

    /// Row `row` of set `set`.
    pub fn row(&self, set: usize, row: usize) -> &[f32] {
        let start = (set * self.sample_size + row) * self.dim;
        &self.data[start..start + self.dim]
    }
}

impl SampleMaps {
    pub fn map(&self, set: usize) -> &[MapSlot] {
        &self.maps[set]
    }

    /// Set 0's map, which doubles as the head record for every chain.
    pub fn heads(&self) -> &[MapSlot] {
        &self.maps[0]
    }

    /// Record that row `row` of set `set` follows `link` in the previous set
    /// and belongs to chain `head`, and extend that chain's tail to `set`.
    pub fn extend_chain(&mut self, set: usize, row: usize, link: usize, head: i32) {
        self.maps[set][row] = MapSlot {
            link: link as i32,
            head,
        };
        if head >= 0 {
            self.maps[0][head as usize].link = set as i32;
        }
    }

    /// Heads whose chain reached `set`.
    pub fn live_heads(&self, set: usize) -> impl Iterator<Item = usize> + '_ {
        let set = set as i32;
        self.maps[0]
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.link == set)
            .map(|(i, _)| i)
    }
}
