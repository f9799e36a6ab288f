//! splat-vq: vector-quantization compressor for radiance-field point models.

pub mod archive;
pub mod cluster;
pub mod compress;
pub mod config;
pub mod context;
pub mod distance;
pub mod error;
pub mod model;
pub mod startup;
pub mod types;
