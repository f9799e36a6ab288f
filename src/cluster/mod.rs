//! Clustering engines that turn an attribute tensor into a codebook plus
//! per-row indices.
//!
//! - [`kmeans`]: mini-batch k-means with a fixed iteration count.
//! - [`agoras`]: sample-based search that sizes its own sample until the
//!   estimated cluster count matches the target.
//! - [`sample`]: sample sets and chain maps used by AGORAS.

pub mod agoras;
pub mod kmeans;
pub mod sample;

pub use agoras::{Agoras, AgorasParams, AgorasReport};
pub use kmeans::{InitPolicy, KMeans};
